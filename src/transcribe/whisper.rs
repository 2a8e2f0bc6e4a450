//! Local Whisper recognizer using whisper.cpp bindings.
//!
//! The model is loaded once at service startup and stays resident. Every
//! transcription acquires the process-wide accelerator mutex before touching
//! the model, so concurrent pipelines never run inference simultaneously.
//! That is what keeps the accelerator from running out of memory under
//! simultaneous triggers.

use crate::config::RecognizerConfig;
use crate::recording::AudioTrack;
use crate::transcribe::{audio, SpeakerTranscript, Transcriber, TranscribeError, TranscriptSegment};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

pub struct WhisperTranscriber {
    ctx: Arc<WhisperContext>,
    /// Process-wide accelerator mutex. Held across the whole inference call.
    accelerator: Mutex<()>,
    language: String,
    beam_size: u32,
    vad_filter: bool,
}

impl WhisperTranscriber {
    /// Load the model described by `config`. Fails fast at startup if the
    /// model file is missing or unloadable.
    pub fn new(config: &RecognizerConfig) -> Result<Self, TranscribeError> {
        let model_path = Path::new(&config.model);
        if !model_path.is_file() {
            return Err(TranscribeError::Engine(format!(
                "Model file not found: {}",
                model_path.display()
            )));
        }

        let use_gpu = config.device != "cpu";
        let mut ctx_params = WhisperContextParameters::default();
        ctx_params.use_gpu(use_gpu);

        log::info!(
            "Recognizer: loading model {} (device {}, compute_type {}, beam {})",
            config.model,
            config.device,
            config.compute_type,
            config.beam_size
        );
        if config.compute_type != "default" {
            // whisper.cpp fixes precision when the model is converted.
            log::info!(
                "Recognizer: compute_type {:?} is advisory for this engine",
                config.compute_type
            );
        }

        let ctx = WhisperContext::new_with_params(&config.model, ctx_params)
            .map_err(|e| classify_engine_error(format!("Failed to load model: {}", e)))?;

        Ok(Self {
            ctx: Arc::new(ctx),
            accelerator: Mutex::new(()),
            language: config.language.clone(),
            beam_size: config.beam_size,
            vad_filter: config.vad_filter,
        })
    }
}

/// Recognize the known out-of-memory signatures so the pipeline can surface
/// them distinctly instead of retrying.
fn classify_engine_error(message: String) -> TranscribeError {
    let lowered = message.to_ascii_lowercase();
    if lowered.contains("out of memory")
        || lowered.contains("oom")
        || lowered.contains("failed to allocate")
        || lowered.contains("cuda error 2")
    {
        TranscribeError::AcceleratorOom(message)
    } else {
        TranscribeError::Engine(message)
    }
}

/// Non-speech artifacts Whisper emits on silence, e.g. `[BLANK_AUDIO]` or
/// `(crickets chirping)`.
fn is_noise_annotation(text: &str) -> bool {
    (text.starts_with('[') && text.ends_with(']'))
        || (text.starts_with('(') && text.ends_with(')'))
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, track: &AudioTrack) -> Result<SpeakerTranscript, TranscribeError> {
        // Decode outside the accelerator lock; only inference needs it.
        let samples = audio::decode_to_mono_16khz(&track.file_path)?;

        if samples.is_empty() {
            return Ok(SpeakerTranscript {
                speaker: track.speaker.clone(),
                segments: Vec::new(),
            });
        }

        let ctx = self.ctx.clone();
        let language = self.language.clone();
        let beam_size = self.beam_size as i32;
        let vad_filter = self.vad_filter;

        log::debug!(
            "Recognizer: transcribing track {} ({}, {:.1}s)",
            track.speaker.track_index,
            track.speaker.display_name,
            samples.len() as f64 / 16_000.0
        );

        let _accelerator = self.accelerator.lock().await;

        // whisper-rs is synchronous; host it on a worker thread so the
        // runtime (and the gateway receiver on it) keeps breathing.
        let segments = tokio::task::spawn_blocking(move || {
            let mut state = ctx
                .create_state()
                .map_err(|e| classify_engine_error(format!("Failed to create state: {}", e)))?;

            let mut params = FullParams::new(SamplingStrategy::BeamSearch {
                beam_size,
                patience: -1.0,
            });
            params.set_language(Some(&language));
            params.set_translate(false);
            params.set_print_special(false);
            params.set_print_progress(false);
            params.set_print_realtime(false);
            params.set_print_timestamps(false);

            state
                .full(params, &samples)
                .map_err(|e| classify_engine_error(format!("Inference failed: {}", e)))?;

            let num_segments = state
                .full_n_segments()
                .map_err(|e| classify_engine_error(format!("Failed to read segments: {}", e)))?;

            let mut segments = Vec::with_capacity(num_segments as usize);
            for i in 0..num_segments {
                let text = state
                    .full_get_segment_text(i)
                    .map_err(|e| classify_engine_error(format!("Failed to read segment: {}", e)))?;
                let text = text.trim().to_string();
                if text.is_empty() {
                    continue;
                }
                if vad_filter && is_noise_annotation(&text) {
                    continue;
                }

                // Segment bounds are reported in centiseconds.
                let start_sec = state
                    .full_get_segment_t0(i)
                    .map_err(|e| classify_engine_error(format!("Failed to read segment: {}", e)))?
                    as f64
                    * 0.01;
                let end_sec = state
                    .full_get_segment_t1(i)
                    .map_err(|e| classify_engine_error(format!("Failed to read segment: {}", e)))?
                    as f64
                    * 0.01;

                segments.push(TranscriptSegment {
                    start_sec: start_sec.max(0.0),
                    end_sec: end_sec.max(start_sec),
                    text,
                });
            }

            Ok::<Vec<TranscriptSegment>, TranscribeError>(segments)
        })
        .await
        .map_err(|e| TranscribeError::Engine(format!("Worker thread failed: {}", e)))??;

        Ok(SpeakerTranscript {
            speaker: track.speaker.clone(),
            segments,
        })
    }
}
