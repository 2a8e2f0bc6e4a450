//! Speech recognition over downloaded speaker tracks.
//!
//! The pipeline sees only the `Transcriber` contract. The local Whisper
//! engine lives behind the `local-whisper` feature because it pulls in the
//! whisper.cpp build chain.

#[cfg(feature = "local-whisper")]
mod audio;
#[cfg(feature = "local-whisper")]
mod whisper;

#[cfg(feature = "local-whisper")]
pub use whisper::WhisperTranscriber;

use crate::recording::{AudioTrack, SpeakerInfo};
use async_trait::async_trait;

/// One recognized utterance. `0 <= start_sec <= end_sec`; text is trimmed
/// and non-empty.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptSegment {
    pub start_sec: f64,
    pub end_sec: f64,
    pub text: String,
}

/// All of one speaker's segments, in non-decreasing `start_sec` order.
#[derive(Debug, Clone)]
pub struct SpeakerTranscript {
    pub speaker: SpeakerInfo,
    pub segments: Vec<TranscriptSegment>,
}

#[derive(Debug, thiserror::Error)]
pub enum TranscribeError {
    /// Missing, unreadable or undecodable track file.
    #[error("Audio error: {0}")]
    Audio(String),

    /// The recognition engine failed.
    #[error("Recognition failed: {0}")]
    Engine(String),

    /// The accelerator ran out of memory. Never retried; surfaced
    /// immediately so the operator can see it.
    #[error("Accelerator out of memory: {0}")]
    AcceleratorOom(String),
}

impl TranscribeError {
    pub fn is_accelerator_oom(&self) -> bool {
        matches!(self, TranscribeError::AcceleratorOom(_))
    }
}

/// Trait for speech recognition engines.
///
/// Implementations own the process-wide accelerator mutex: concurrent calls
/// from parallel pipelines serialize inside `transcribe`, so at most one
/// caller is in the model at any instant.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, track: &AudioTrack) -> Result<SpeakerTranscript, TranscribeError>;
}
