//! Cook-API client: the recording service's HTTP surface.
//!
//! Backs three endpoints (speaker list, duration, archive cook), all keyed
//! by the recording id and its access key. The archive endpoint packages the
//! per-track files server-side ("cooking") and streams the result back.

use crate::config::SourceConfig;
use crate::recording::{AudioTrack, RecordingHandle, SpeakerInfo};
use crate::retry::{with_retry, RetryConfig};
use crate::source::{archive, AudioSource, SourceError};
use async_trait::async_trait;
use serde::Deserialize;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

/// Per-request timeout for the small metadata endpoints. The archive cook is
/// governed by the combined acquisition deadline instead.
const METADATA_TIMEOUT: Duration = Duration::from_secs(30);

/// Concrete `AudioSource` bound to one recording on the cook API.
pub struct CookApiClient {
    client: reqwest::Client,
    base_url: String,
    recording_id: String,
    access_key: String,
    format: String,
    container: String,
    deadline: Duration,
    retry: RetryConfig,
    /// Speaker metadata is immutable per recording; fetched once.
    speakers_cache: tokio::sync::Mutex<Option<Vec<SpeakerInfo>>>,
}

#[derive(Debug, Deserialize)]
struct UsersResponse {
    users: Vec<UserEntry>,
}

#[derive(Debug, Deserialize)]
struct UserEntry {
    track: u32,
    #[serde(default)]
    name: String,
    #[serde(default)]
    id: String,
}

#[derive(Debug, Deserialize)]
struct DurationResponse {
    duration: f64,
}

impl CookApiClient {
    /// Create a client for one recording. `host` is the allowlisted
    /// recording-service host the panel URL pointed at.
    pub fn new(host: &str, handle: &RecordingHandle, config: &SourceConfig) -> Self {
        let scheme = if host.starts_with("localhost") || host.starts_with("127.") {
            "http"
        } else {
            "https"
        };

        Self {
            client: reqwest::Client::new(),
            base_url: format!("{}://{}", scheme, host),
            recording_id: handle.recording_id.clone(),
            access_key: handle.access_key.clone(),
            format: config.format.clone(),
            container: config.container.clone(),
            deadline: config.download_timeout(),
            retry: RetryConfig::with_max_retries(config.max_retries),
            speakers_cache: tokio::sync::Mutex::new(None),
        }
    }

    fn endpoint(&self, suffix: &str) -> String {
        format!(
            "{}/api/recording/{}/{}",
            self.base_url, self.recording_id, suffix
        )
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, SourceError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(SourceError::Api {
            status: status.as_u16(),
            message,
        })
    }

    /// Total recording length in seconds, as reported by the service.
    pub async fn duration(&self) -> Result<f64, SourceError> {
        let body: DurationResponse = with_retry(&self.retry, "Cook duration", || async {
            let response = self
                .client
                .get(self.endpoint("duration"))
                .query(&[("key", self.access_key.as_str())])
                .timeout(METADATA_TIMEOUT)
                .send()
                .await?;
            let response = Self::check_status(response).await?;
            response.json().await.map_err(SourceError::Network)
        })
        .await?;

        Ok(body.duration)
    }

    /// Cook the archive server-side and stream it to `dest`.
    async fn download_archive(&self, dest: &Path) -> Result<(), SourceError> {
        with_retry(&self.retry, "Cook archive", || async {
            let response = self
                .client
                .post(self.endpoint("cook"))
                .query(&[("key", self.access_key.as_str())])
                .json(&serde_json::json!({
                    "format": self.format,
                    "container": self.container,
                }))
                .send()
                .await?;
            let mut response = Self::check_status(response).await?;

            let mut file = std::fs::File::create(dest)?;
            while let Some(chunk) = response.chunk().await? {
                file.write_all(&chunk)?;
            }
            file.flush()?;
            Ok(())
        })
        .await
    }
}

impl CookApiClient {
    async fn fetch_speakers(&self) -> Result<Vec<SpeakerInfo>, SourceError> {
        let body: UsersResponse = with_retry(&self.retry, "Cook users", || async {
            let response = self
                .client
                .get(self.endpoint("users"))
                .query(&[("key", self.access_key.as_str())])
                .timeout(METADATA_TIMEOUT)
                .send()
                .await?;
            let response = Self::check_status(response).await?;
            response.json().await.map_err(SourceError::Network)
        })
        .await?;

        let mut speakers = Vec::with_capacity(body.users.len());
        for user in body.users {
            if user.track == 0 {
                return Err(SourceError::Metadata(format!(
                    "speaker entry with invalid track index 0 ({:?})",
                    user.name
                )));
            }
            let display_name = if user.name.trim().is_empty() {
                format!("Speaker {}", user.track)
            } else {
                user.name.trim().to_string()
            };
            speakers.push(SpeakerInfo {
                track_index: user.track,
                display_name,
                user_id: user.id.parse().unwrap_or(0),
            });
        }

        if speakers.is_empty() {
            return Err(SourceError::Metadata(
                "recording has no speakers".to_string(),
            ));
        }

        speakers.sort_by_key(|s| s.track_index);
        Ok(speakers)
    }
}

#[async_trait]
impl AudioSource for CookApiClient {
    async fn list_speakers(&self) -> Result<Vec<SpeakerInfo>, SourceError> {
        let mut cache = self.speakers_cache.lock().await;
        if let Some(speakers) = cache.as_ref() {
            return Ok(speakers.clone());
        }

        let speakers = self.fetch_speakers().await?;
        *cache = Some(speakers.clone());
        Ok(speakers)
    }

    async fn fetch(&self, into: &Path) -> Result<Vec<AudioTrack>, SourceError> {
        let speakers = self.list_speakers().await?;

        // The whole cook+download+extract sequence shares one wall-clock
        // deadline.
        let deadline = self.deadline;
        let result = tokio::time::timeout(deadline, async {
            if let Ok(duration) = self.duration().await {
                log::info!(
                    "Cook: recording {} is {:.1}s across {} speakers",
                    self.recording_id,
                    duration,
                    speakers.len()
                );
            }

            let archive_path = into.join("tracks.zip");
            self.download_archive(&archive_path).await?;

            let tracks = archive::extract_tracks(&archive_path, into, &speakers)?;

            // The container is no longer needed once the tracks are out.
            let _ = std::fs::remove_file(&archive_path);
            Ok(tracks)
        })
        .await;

        match result {
            Ok(tracks) => tracks,
            Err(_) => Err(SourceError::Timeout(deadline)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::TriggerKind;

    fn handle() -> RecordingHandle {
        RecordingHandle {
            recording_id: "rec42".to_string(),
            access_key: "s3cretkey".to_string(),
            origin_channel_id: 1,
            trigger_kind: TriggerKind::PanelEdit,
            drive_file_id: None,
        }
    }

    #[test]
    fn test_endpoint_urls() {
        let client = CookApiClient::new("rec.example.com", &handle(), &SourceConfig::default());
        assert_eq!(
            client.endpoint("users"),
            "https://rec.example.com/api/recording/rec42/users"
        );
        assert_eq!(
            client.endpoint("cook"),
            "https://rec.example.com/api/recording/rec42/cook"
        );
    }

    #[test]
    fn test_localhost_uses_plain_http() {
        let client = CookApiClient::new("localhost:8080", &handle(), &SourceConfig::default());
        assert!(client.endpoint("users").starts_with("http://localhost:8080/"));
    }
}
