//! Audio acquisition: where the per-speaker tracks of a recording come from.
//!
//! The pipeline only sees the two-operation `AudioSource` contract. The
//! concrete implementations are the recording service's cook API
//! (`CookApiClient`) and archives picked up from the watched cloud folder
//! (`DriveArchiveSource`).

mod archive;
mod cook;
mod drive;

pub use archive::extract_tracks;
pub use cook::CookApiClient;
pub use drive::DriveArchiveSource;

use crate::recording::{AudioTrack, SpeakerInfo};
use crate::retry::Retryable;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

/// Errors raised while acquiring audio tracks.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Speaker metadata error: {0}")]
    Metadata(String),

    #[error("Drive error: {0}")]
    Drive(#[from] crate::drive::DriveError),

    #[error("Acquisition timed out after {0:?}")]
    Timeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Retryable for SourceError {
    fn is_retryable(&self) -> bool {
        match self {
            SourceError::Network(_) => true,
            SourceError::Api { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            SourceError::Drive(e) => e.is_retryable(),
            // The deadline is wall-clock for the whole acquisition; once it
            // fires there is nothing left to retry against.
            SourceError::Timeout(_) => false,
            SourceError::Archive(_) | SourceError::Metadata(_) | SourceError::Io(_) => false,
        }
    }
}

/// A source of speaker-tagged audio for one recording.
#[async_trait]
pub trait AudioSource: Send + Sync {
    /// Authoritative speaker metadata for the recording.
    async fn list_speakers(&self) -> Result<Vec<SpeakerInfo>, SourceError>;

    /// Download and unpack the speaker tracks into `into`.
    ///
    /// Every returned path exists, is readable, lies under `into`, and maps
    /// to exactly one speaker from `list_speakers`.
    async fn fetch(&self, into: &Path) -> Result<Vec<AudioTrack>, SourceError>;
}
