//! Pipeline orchestrator: acquire, transcribe, merge, generate, post.
//!
//! One invocation per recording, fired as a detached task by a trigger.
//! `run` never propagates errors; every failure ends with a best-effort
//! error embed, a `Failed` status line, and the temp root released.
//!
//! Invariants enforced here:
//! - at most one concurrent run per recording id (process-wide active set)
//! - a fresh `minutes-{id}-XXXX` temp root, released on every exit path
//! - strict stage order, each stage's duration recorded
//! - speakers transcribed sequentially in ascending track index
//! - status updates at stage transitions and per speaker

use crate::chat::ChatError;
use crate::config::MergerConfig;
use crate::generate::{GenerateError, Generator};
use crate::logging;
use crate::merge::{self, MergeError};
use crate::publish::{MinutesPost, Publisher, StatusLine, StatusUpdate};
use crate::recording::RecordingHandle;
use crate::source::{AudioSource, SourceError};
use crate::transcribe::{SpeakerTranscript, Transcriber, TranscribeError};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// What the generator is given when a recording contains no speech at all.
const NO_SPEECH_TRANSCRIPT: &str =
    "(no speech was detected in this recording; produce minutes that say so)";

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Acquire,
    Transcribe,
    Merge,
    Generate,
    Post,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Acquire => "acquisition",
            Stage::Transcribe => "transcription",
            Stage::Merge => "merge",
            Stage::Generate => "generation",
            Stage::Post => "publish",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stage-tagged failure of one pipeline invocation.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Acquisition failed: {0}")]
    Acquisition(#[from] SourceError),

    #[error("Transcription failed: {0}")]
    Transcription(#[from] TranscribeError),

    #[error("Merge failed: {0}")]
    Merge(#[from] MergeError),

    #[error("Generation failed: {0}")]
    Generation(#[from] GenerateError),

    #[error("Publish failed: {0}")]
    Publish(#[from] ChatError),
}

impl PipelineError {
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::Acquisition(_) => Stage::Acquire,
            PipelineError::Transcription(_) => Stage::Transcribe,
            PipelineError::Merge(_) => Stage::Merge,
            PipelineError::Generation(_) => Stage::Generate,
            PipelineError::Publish(_) => Stage::Post,
        }
    }
}

/// Summary of a completed invocation.
#[derive(Debug)]
pub struct PipelineResult {
    pub recording_id: String,
    pub speaker_count: usize,
    pub total_audio_seconds: f64,
    pub stage_durations: HashMap<Stage, Duration>,
    pub posted_message_ids: Vec<u64>,
}

/// Picks the concrete audio source for a handle (cook API for panel
/// triggers, the drive archive for drive triggers).
pub trait SourceFactory: Send + Sync {
    fn source_for(&self, handle: &RecordingHandle) -> Arc<dyn AudioSource>;
}

pub struct Pipeline {
    sources: Arc<dyn SourceFactory>,
    transcriber: Arc<dyn Transcriber>,
    generator: Arc<Generator>,
    publisher: Arc<Publisher>,
    merger: MergerConfig,
    /// Recording ids with a run in flight.
    active: Mutex<HashSet<String>>,
    shutdown: CancellationToken,
}

impl Pipeline {
    pub fn new(
        sources: Arc<dyn SourceFactory>,
        transcriber: Arc<dyn Transcriber>,
        generator: Arc<Generator>,
        publisher: Arc<Publisher>,
        merger: MergerConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            sources,
            transcriber,
            generator,
            publisher,
            merger,
            active: Mutex::new(HashSet::new()),
            shutdown,
        }
    }

    /// Number of runs currently in flight.
    pub fn active_count(&self) -> usize {
        self.active.lock().map(|set| set.len()).unwrap_or(0)
    }

    fn try_claim(&self, recording_id: &str) -> bool {
        self.active
            .lock()
            .map(|mut set| set.insert(recording_id.to_string()))
            .unwrap_or(false)
    }

    fn release(&self, recording_id: &str) {
        if let Ok(mut set) = self.active.lock() {
            set.remove(recording_id);
        }
    }

    /// Run one invocation to its terminal outcome. Never propagates errors;
    /// callers fire this as a detached task (or await it for drive files).
    pub async fn run(self: Arc<Self>, handle: RecordingHandle) {
        let recording_id = handle.recording_id.clone();

        if self.shutdown.is_cancelled() {
            log::info!(
                "Pipeline: shutting down; refusing new run for {}",
                recording_id
            );
            return;
        }

        if !self.try_claim(&recording_id) {
            log::info!("Pipeline: duplicate trigger; ignored ({})", recording_id);
            return;
        }
        let _claim = ActiveClaim {
            pipeline: self.as_ref(),
            recording_id: &recording_id,
        };

        // The access key must never appear in logs from here on.
        logging::register_secret(&handle.access_key);

        log::info!(
            "Pipeline: starting for recording {} (trigger: {})",
            recording_id,
            handle.trigger_kind.as_str()
        );

        let status = self.publisher.begin_status(&recording_id).await;
        let started = Instant::now();

        match self.execute(&handle, &status).await {
            Ok(result) => {
                let elapsed_ms = started.elapsed().as_millis();
                self.publisher
                    .update_status(&status, StatusUpdate::Complete { elapsed_ms })
                    .await;

                let mut stages: Vec<(Stage, Duration)> = result
                    .stage_durations
                    .iter()
                    .map(|(stage, duration)| (*stage, *duration))
                    .collect();
                stages.sort_by_key(|(stage, _)| *stage as u8);
                let timings: Vec<String> = stages
                    .iter()
                    .map(|(stage, duration)| format!("{} {:?}", stage, duration))
                    .collect();
                log::info!(
                    "Pipeline: {} complete in {} ms ({} speakers, {:.1}s audio; {})",
                    recording_id,
                    elapsed_ms,
                    result.speaker_count,
                    result.total_audio_seconds,
                    timings.join(", ")
                );
            }
            Err(e) => {
                let stage = e.stage();
                log::error!("Pipeline: {} failed during {}: {}", recording_id, stage, e);
                self.publisher
                    .update_status(&status, StatusUpdate::Failed { stage })
                    .await;
                self.publisher
                    .post_error(&recording_id, stage, &e.to_string())
                    .await;
            }
        }
    }

    async fn execute(
        &self,
        handle: &RecordingHandle,
        status: &Option<StatusLine>,
    ) -> Result<PipelineResult, PipelineError> {
        let mut stage_durations = HashMap::new();

        // Acquire. The temp root lives for the rest of the invocation and is
        // removed when `temp_root` drops, on every exit path out of here.
        let stage_started = Instant::now();
        let temp_root = tempfile::Builder::new()
            .prefix(&format!("minutes-{}-", handle.recording_id))
            .tempdir()
            .map_err(SourceError::from)?;

        let source = self.sources.source_for(handle);
        let speakers = source.list_speakers().await?;
        let mut tracks = source.fetch(temp_root.path()).await?;
        stage_durations.insert(Stage::Acquire, stage_started.elapsed());

        log::info!(
            "Pipeline: {} acquired {} tracks for {} speakers",
            handle.recording_id,
            tracks.len(),
            speakers.len()
        );

        // Transcribe, strictly sequential in ascending track order. The
        // engine serializes accelerator access across pipelines on its own.
        let stage_started = Instant::now();
        tracks.sort_by_key(|track| track.speaker.track_index);
        let total = tracks.len();
        let mut transcripts: Vec<SpeakerTranscript> = Vec::with_capacity(total);
        for (index, track) in tracks.iter().enumerate() {
            self.publisher
                .update_status(
                    status,
                    StatusUpdate::Transcribing {
                        current: index + 1,
                        total,
                        name: &track.speaker.display_name,
                    },
                )
                .await;

            let transcript = self.transcriber.transcribe(track).await?;
            log::debug!(
                "Pipeline: {} transcribed track {} ({} segments)",
                handle.recording_id,
                track.speaker.track_index,
                transcript.segments.len()
            );
            transcripts.push(transcript);
        }
        stage_durations.insert(Stage::Transcribe, stage_started.elapsed());

        let total_audio_seconds = transcripts
            .iter()
            .flat_map(|transcript| transcript.segments.iter())
            .map(|segment| segment.end_sec)
            .fold(0.0, f64::max);

        // Merge.
        let stage_started = Instant::now();
        let merged = merge::merge(&transcripts, self.merger.gap_merge_threshold_sec)?;
        let transcript_text = if merged.trim().is_empty() {
            log::info!("Pipeline: {} contains no speech", handle.recording_id);
            NO_SPEECH_TRANSCRIPT.to_string()
        } else {
            merged
        };
        stage_durations.insert(Stage::Merge, stage_started.elapsed());

        // Generate.
        self.publisher
            .update_status(status, StatusUpdate::Generating)
            .await;
        let stage_started = Instant::now();
        let minutes = self.generator.generate(&transcript_text).await?;
        stage_durations.insert(Stage::Generate, stage_started.elapsed());

        // Post.
        self.publisher
            .update_status(status, StatusUpdate::Posting)
            .await;
        let stage_started = Instant::now();
        let posted_message_ids = self
            .publisher
            .post_minutes(&MinutesPost {
                recording_id: handle.recording_id.clone(),
                minutes,
                transcript: transcript_text,
                participants: speakers.iter().map(|s| s.display_name.clone()).collect(),
                duration_seconds: total_audio_seconds,
            })
            .await?;
        stage_durations.insert(Stage::Post, stage_started.elapsed());

        drop(temp_root);

        Ok(PipelineResult {
            recording_id: handle.recording_id.clone(),
            speaker_count: speakers.len(),
            total_audio_seconds,
            stage_durations,
            posted_message_ids,
        })
    }
}

/// Releases the active-set claim on drop, whatever exit path `run` takes.
struct ActiveClaim<'a> {
    pipeline: &'a Pipeline,
    recording_id: &'a str,
}

impl Drop for ActiveClaim<'_> {
    fn drop(&mut self) {
        self.pipeline.release(self.recording_id);
    }
}
