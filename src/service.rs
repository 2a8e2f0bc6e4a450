//! Service wiring and lifecycle.
//!
//! Builds every component from the loaded config (explicit dependencies, no
//! ambient singletons), spawns the two long-lived workers (gateway receiver,
//! drive watcher), and owns the shutdown sequence: stop signal, refuse new
//! pipelines, wait out the running ones up to a grace period.

use crate::chat::{gateway, RestChatClient};
use crate::config::{Config, RecognizerConfig, Secrets, SourceConfig};
use crate::detector::PanelDetector;
use crate::drive::{DriveClient, DriveWatcher, HttpDriveClient, PipelineStarter, ProcessedSet};
use crate::generate::{Generator, OpenAiLlmProvider};
use crate::pipeline::{Pipeline, SourceFactory};
use crate::publish::Publisher;
use crate::recording::{AudioTrack, RecordingHandle, SpeakerInfo, TriggerKind};
use crate::source::{AudioSource, CookApiClient, DriveArchiveSource, SourceError};
use crate::transcribe::Transcriber;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// How long running pipelines get to finish after the stop signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Startup failed: {0}")]
    Startup(String),

    #[error("Service terminated unexpectedly: {0}")]
    Runtime(String),
}

impl ServiceError {
    pub fn is_startup(&self) -> bool {
        matches!(self, ServiceError::Startup(_))
    }
}

/// Routes each handle to its concrete audio source: the cook API for panel
/// triggers, the drive archive for drive triggers.
struct ServiceSourceFactory {
    source_config: SourceConfig,
    cook_host: String,
    drive: Option<Arc<dyn DriveClient>>,
}

impl SourceFactory for ServiceSourceFactory {
    fn source_for(&self, handle: &RecordingHandle) -> Arc<dyn AudioSource> {
        match handle.trigger_kind {
            TriggerKind::PanelEdit => Arc::new(CookApiClient::new(
                &self.cook_host,
                handle,
                &self.source_config,
            )),
            TriggerKind::DriveFile => match (&self.drive, &handle.drive_file_id) {
                (Some(client), Some(file_id)) => {
                    Arc::new(DriveArchiveSource::new(client.clone(), file_id.clone()))
                }
                _ => Arc::new(UnavailableSource),
            },
        }
    }
}

/// Fallback for a drive handle arriving while the drive layer is disabled.
/// The watcher is the only producer of such handles, so this is effectively
/// unreachable, but the factory has to be total.
struct UnavailableSource;

#[async_trait]
impl AudioSource for UnavailableSource {
    async fn list_speakers(&self) -> Result<Vec<SpeakerInfo>, SourceError> {
        Err(SourceError::Metadata(
            "drive source is not configured".to_string(),
        ))
    }

    async fn fetch(&self, _into: &Path) -> Result<Vec<AudioTrack>, SourceError> {
        Err(SourceError::Metadata(
            "drive source is not configured".to_string(),
        ))
    }
}

#[cfg(feature = "local-whisper")]
fn build_transcriber(config: &RecognizerConfig) -> Result<Arc<dyn Transcriber>, ServiceError> {
    let engine = crate::transcribe::WhisperTranscriber::new(config)
        .map_err(|e| ServiceError::Startup(format!("recognizer: {}", e)))?;
    Ok(Arc::new(engine))
}

#[cfg(not(feature = "local-whisper"))]
fn build_transcriber(_config: &RecognizerConfig) -> Result<Arc<dyn Transcriber>, ServiceError> {
    Err(ServiceError::Startup(
        "this build carries no speech recognizer; rebuild with --features local-whisper"
            .to_string(),
    ))
}

/// Run the service until a stop signal (graceful, `Ok`) or an unexpected
/// worker death (`Err(Runtime)`).
pub async fn run(config: Config, secrets: Secrets) -> Result<(), ServiceError> {
    let shutdown = CancellationToken::new();

    // Components, leaves first.
    let transcriber = build_transcriber(&config.recognizer)?;

    let llm = Arc::new(OpenAiLlmProvider::new(
        secrets.llm_api_key.clone(),
        config.generator.model.clone(),
        config.generator.max_tokens,
        config.generator.temperature,
        config.generator.api_base.clone(),
    ));
    let generator = Arc::new(
        Generator::new(
            llm,
            &config.generator.prompt_template_path,
            config.generator.max_retries,
        )
        .map_err(|e| ServiceError::Startup(format!("generator: {}", e)))?,
    );

    let chat = Arc::new(RestChatClient::new(secrets.bot_token.clone()));
    let publisher = Arc::new(Publisher::new(
        chat.clone(),
        config.chat.output_channel_id,
        config.chat.error_mention_role_id,
        config.publisher.clone(),
    ));

    let drive_client: Option<Arc<dyn DriveClient>> = if config.drive.enabled {
        let credentials = config.drive.credentials_file.as_ref().ok_or_else(|| {
            ServiceError::Startup("drive.credentials_file is required".to_string())
        })?;
        let client = HttpDriveClient::from_credentials_file(credentials)
            .map_err(|e| ServiceError::Startup(format!("drive: {}", e)))?;
        Some(Arc::new(client))
    } else {
        None
    };

    // Panel URLs are only accepted from allowlisted hosts, so the first
    // entry is the canonical recording-service host for cook requests.
    let cook_host = config
        .source
        .domain_allowlist
        .first()
        .cloned()
        .ok_or_else(|| ServiceError::Startup("source.domain_allowlist is empty".to_string()))?;

    let pipeline = Arc::new(Pipeline::new(
        Arc::new(ServiceSourceFactory {
            source_config: config.source.clone(),
            cook_host,
            drive: drive_client.clone(),
        }),
        transcriber,
        generator,
        publisher,
        config.merger.clone(),
        shutdown.clone(),
    ));

    // Long-lived workers.
    let mut edit_events = gateway::spawn(secrets.bot_token.clone(), shutdown.clone());

    let watcher_handle = if let Some(drive_client) = drive_client {
        let processed = Arc::new(
            ProcessedSet::load(&config.drive.state_file)
                .map_err(|e| ServiceError::Startup(format!("drive state: {}", e)))?,
        );
        log::info!(
            "Service: drive watcher enabled ({} files already processed)",
            processed.len()
        );

        let pipeline_for_watcher = pipeline.clone();
        let starter: PipelineStarter = Arc::new(move |handle| {
            let pipeline = pipeline_for_watcher.clone();
            Box::pin(pipeline.run(handle))
        });

        let watcher = DriveWatcher::new(
            drive_client,
            processed,
            config.drive.clone(),
            starter,
            shutdown.clone(),
        );
        Some(tokio::spawn(watcher.run()))
    } else {
        None
    };

    let detector = PanelDetector::new(&config.chat, &config.source);
    let tracker = TaskTracker::new();

    log::info!(
        "Service: started (watch channel {}, output channel {})",
        config.chat.watch_channel_id,
        config.chat.output_channel_id
    );

    // Event loop: panel edits in, pipeline tasks out.
    let stop = shutdown_signal();
    tokio::pin!(stop);
    let outcome = loop {
        tokio::select! {
            _ = &mut stop => {
                log::info!("Service: stop signal received");
                break Ok(());
            }

            payload = edit_events.recv() => {
                match payload {
                    Some(payload) => {
                        if let Some(handle) = detector.detect(&payload) {
                            tracker.spawn(pipeline.clone().run(handle));
                        }
                    }
                    None => {
                        break Err(ServiceError::Runtime(
                            "gateway receiver stopped".to_string(),
                        ));
                    }
                }
            }
        }
    };

    // Shutdown: refuse new starts, let running pipelines finish.
    shutdown.cancel();
    tracker.close();

    let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
        if let Some(handle) = watcher_handle {
            let _ = handle.await;
        }
        tracker.wait().await;
    })
    .await;

    match drained {
        Ok(()) => log::info!("Service: all pipelines finished"),
        Err(_) => log::warn!(
            "Service: grace period expired with {} pipelines still running",
            pipeline.active_count()
        ),
    }

    outcome
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("SIGTERM handler installs");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
