//! Background poller that turns new drive archives into pipeline runs.
//!
//! One worker, one tick at a time: the loop awaits each tick (and each
//! per-file callback) before the next begins, so ticks never overlap.
//! Cancellation is cooperative, checked between ticks and between files.

use crate::config::DriveConfig;
use crate::drive::{DriveClient, DriveError, ProcessedSet};
use crate::recording::{RecordingHandle, TriggerKind};
use futures_util::future::BoxFuture;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Callback that runs a pipeline to its terminal outcome.
///
/// Injected at construction so the watcher never imports the pipeline
/// (watcher → pipeline → publisher → … would otherwise loop back here).
pub type PipelineStarter =
    Arc<dyn Fn(RecordingHandle) -> BoxFuture<'static, ()> + Send + Sync>;

pub struct DriveWatcher {
    client: Arc<dyn DriveClient>,
    processed: Arc<ProcessedSet>,
    config: DriveConfig,
    start_pipeline: PipelineStarter,
    shutdown: CancellationToken,
}

/// Derive a recording id from an archive filename: the stem, reduced to
/// alphanumerics so it is safe in status messages and temp-dir names.
pub fn pseudo_recording_id(file_name: &str, file_id: &str) -> String {
    let stem = file_name
        .rsplit_once('.')
        .map(|(stem, _ext)| stem)
        .unwrap_or(file_name);

    let cleaned: String = stem.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
    if !cleaned.is_empty() {
        return cleaned;
    }

    let fallback: String = file_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    if fallback.is_empty() {
        "drivefile".to_string()
    } else {
        fallback
    }
}

impl DriveWatcher {
    pub fn new(
        client: Arc<dyn DriveClient>,
        processed: Arc<ProcessedSet>,
        config: DriveConfig,
        start_pipeline: PipelineStarter,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            client,
            processed,
            config,
            start_pipeline,
            shutdown,
        }
    }

    /// Poll until shutdown. Tick failures are logged and the loop keeps
    /// going; the next tick gets a fresh snapshot anyway.
    pub async fn run(self) {
        let pattern = match glob::Pattern::new(&self.config.name_glob) {
            Ok(p) => p,
            Err(e) => {
                // Config validation rejects bad globs, so this is unreachable
                // in a started service; bail rather than poll uselessly.
                log::error!("Drive watcher: invalid name glob {:?}: {}", self.config.name_glob, e);
                return;
            }
        };

        log::info!(
            "Drive watcher: polling folder {} every {:?}",
            self.config.folder_id,
            self.config.poll_interval()
        );

        let mut ticker = tokio::time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.tick(&pattern).await {
                log::error!("Drive watcher: tick failed: {}", e);
            }
        }

        log::info!("Drive watcher: stopped");
    }

    async fn tick(&self, pattern: &glob::Pattern) -> Result<(), DriveError> {
        let files = self.client.list_folder(&self.config.folder_id).await?;

        for file in files {
            if self.shutdown.is_cancelled() {
                break;
            }
            if !pattern.matches(&file.name) {
                continue;
            }
            if self.processed.contains(&file.id) {
                continue;
            }

            log::info!("Drive watcher: new archive {:?} ({})", file.name, file.id);

            let handle = RecordingHandle {
                recording_id: pseudo_recording_id(&file.name, &file.id),
                access_key: String::new(),
                origin_channel_id: 0,
                trigger_kind: TriggerKind::DriveFile,
                drive_file_id: Some(file.id.clone()),
            };

            // Runs the pipeline to its terminal outcome (success or failed);
            // only then is the file recorded as processed.
            (self.start_pipeline)(handle).await;

            if let Err(e) = self.processed.insert(&file.id) {
                log::error!(
                    "Drive watcher: failed to persist processed id {}: {}",
                    file.id,
                    e
                );
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::DriveFile;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::Mutex;

    struct FakeDrive {
        files: Vec<DriveFile>,
    }

    #[async_trait]
    impl DriveClient for FakeDrive {
        async fn list_folder(&self, _folder_id: &str) -> Result<Vec<DriveFile>, DriveError> {
            Ok(self.files.clone())
        }

        async fn download_to(&self, _file_id: &str, _dest: &Path) -> Result<(), DriveError> {
            Ok(())
        }
    }

    fn watcher_config() -> DriveConfig {
        DriveConfig {
            enabled: true,
            folder_id: "folder".to_string(),
            poll_interval_sec: 1,
            credentials_file: None,
            name_glob: "*.zip".to_string(),
            state_file: std::path::PathBuf::from("unused"),
        }
    }

    #[test]
    fn test_pseudo_recording_id() {
        assert_eq!(pseudo_recording_id("craig-xyz_1.zip", "f1"), "craigxyz1");
        assert_eq!(pseudo_recording_id("...", "file-9"), "file9");
        assert_eq!(pseudo_recording_id("---", "---"), "drivefile");
    }

    #[tokio::test]
    async fn test_tick_processes_new_matching_files_once() {
        let dir = tempfile::tempdir().unwrap();
        let processed =
            Arc::new(ProcessedSet::load(&dir.path().join("processed.json")).unwrap());
        processed.insert("old").unwrap();

        let client = Arc::new(FakeDrive {
            files: vec![
                DriveFile {
                    id: "old".to_string(),
                    name: "meeting-old.zip".to_string(),
                },
                DriveFile {
                    id: "new".to_string(),
                    name: "meeting-new.zip".to_string(),
                },
                DriveFile {
                    id: "noise".to_string(),
                    name: "notes.txt".to_string(),
                },
            ],
        });

        let started: Arc<Mutex<Vec<RecordingHandle>>> = Arc::new(Mutex::new(Vec::new()));
        let started_clone = started.clone();
        let starter: PipelineStarter = Arc::new(move |handle| {
            let started = started_clone.clone();
            Box::pin(async move {
                started.lock().unwrap().push(handle);
            })
        });

        let watcher = DriveWatcher::new(
            client,
            processed.clone(),
            watcher_config(),
            starter,
            CancellationToken::new(),
        );

        let pattern = glob::Pattern::new("*.zip").unwrap();
        watcher.tick(&pattern).await.unwrap();

        let runs = started.lock().unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].trigger_kind, TriggerKind::DriveFile);
        assert_eq!(runs[0].drive_file_id.as_deref(), Some("new"));
        assert_eq!(runs[0].recording_id, "meetingnew");

        // Terminal outcome recorded before the next tick could begin.
        assert!(processed.contains("new"));
        assert!(!processed.contains("noise"));
    }

    #[tokio::test]
    async fn test_cancelled_watcher_skips_remaining_files() {
        let dir = tempfile::tempdir().unwrap();
        let processed =
            Arc::new(ProcessedSet::load(&dir.path().join("processed.json")).unwrap());

        let client = Arc::new(FakeDrive {
            files: vec![DriveFile {
                id: "a".to_string(),
                name: "a.zip".to_string(),
            }],
        });

        let starter: PipelineStarter = Arc::new(|_handle| Box::pin(async {}));
        let token = CancellationToken::new();
        token.cancel();

        let watcher = DriveWatcher::new(client, processed.clone(), watcher_config(), starter, token);
        let pattern = glob::Pattern::new("*.zip").unwrap();
        watcher.tick(&pattern).await.unwrap();

        assert!(processed.is_empty());
    }
}
