//! Publishing: the evolving status line, the final minutes post, and error
//! embeds.
//!
//! Status writes never raise; a missed edit is a logging event, not a
//! pipeline failure.

use crate::chat::{Attachment, ChatClient, ChatError, Embed, EmbedField, OutgoingMessage};
use crate::config::PublisherConfig;
use crate::pipeline::Stage;
use crate::retry::{with_retry, RetryConfig};
use std::sync::Arc;
use std::time::Duration;

const ERROR_EMBED_COLOR: u32 = 0xED4245;
const TRUNCATION_NOTE: &str = "\n\n*(truncated, full minutes attached)*";
const FIELD_VALUE_LIMIT: usize = 1024;

/// The one status message a pipeline invocation keeps editing.
#[derive(Debug, Clone)]
pub struct StatusLine {
    channel_id: u64,
    message_id: u64,
    recording_id: String,
}

/// Pipeline progress states, rendered into the status line.
#[derive(Debug, Clone)]
pub enum StatusUpdate<'a> {
    Downloading,
    Transcribing {
        current: usize,
        total: usize,
        name: &'a str,
    },
    Generating,
    Posting,
    Complete {
        elapsed_ms: u128,
    },
    Failed {
        stage: Stage,
    },
}

impl StatusUpdate<'_> {
    fn render(&self, recording_id: &str) -> String {
        match self {
            StatusUpdate::Downloading => {
                format!("⏳ Recording `{}`: downloading audio...", recording_id)
            }
            StatusUpdate::Transcribing {
                current,
                total,
                name,
            } => format!(
                "🎙️ Recording `{}`: transcribing {}/{} ({})...",
                recording_id, current, total, name
            ),
            StatusUpdate::Generating => {
                format!("🧠 Recording `{}`: generating minutes...", recording_id)
            }
            StatusUpdate::Posting => {
                format!("📨 Recording `{}`: posting...", recording_id)
            }
            StatusUpdate::Complete { elapsed_ms } => {
                format!("✅ Recording `{}`: complete ({} ms)", recording_id, elapsed_ms)
            }
            StatusUpdate::Failed { stage } => {
                format!("❌ Recording `{}`: failed: {}", recording_id, stage)
            }
        }
    }
}

/// Everything the final post needs.
pub struct MinutesPost {
    pub recording_id: String,
    pub minutes: String,
    pub transcript: String,
    pub participants: Vec<String>,
    pub duration_seconds: f64,
}

pub struct Publisher {
    chat: Arc<dyn ChatClient>,
    output_channel_id: u64,
    error_mention_role_id: Option<u64>,
    config: PublisherConfig,
}

impl Publisher {
    pub fn new(
        chat: Arc<dyn ChatClient>,
        output_channel_id: u64,
        error_mention_role_id: Option<u64>,
        config: PublisherConfig,
    ) -> Self {
        Self {
            chat,
            output_channel_id,
            error_mention_role_id,
            config,
        }
    }

    /// Create the status message in its initial state. Best-effort: if the
    /// send fails the pipeline simply runs without progress display.
    pub async fn begin_status(&self, recording_id: &str) -> Option<StatusLine> {
        let content = StatusUpdate::Downloading.render(recording_id);
        match self
            .chat
            .send_message(
                self.output_channel_id,
                OutgoingMessage {
                    content: Some(content),
                    ..Default::default()
                },
            )
            .await
        {
            Ok(message_id) => Some(StatusLine {
                channel_id: self.output_channel_id,
                message_id,
                recording_id: recording_id.to_string(),
            }),
            Err(e) => {
                log::warn!("Publisher: failed to create status message: {}", e);
                None
            }
        }
    }

    /// Edit the status line. Never raises.
    pub async fn update_status(&self, status: &Option<StatusLine>, update: StatusUpdate<'_>) {
        let Some(status) = status else {
            return;
        };

        let content = update.render(&status.recording_id);
        if let Err(e) = self
            .chat
            .edit_message(status.channel_id, status.message_id, content)
            .await
        {
            log::warn!("Publisher: status edit failed: {}", e);
        }
    }

    /// Post the final minutes: summary embed plus the full markdown file.
    pub async fn post_minutes(&self, post: &MinutesPost) -> Result<Vec<u64>, ChatError> {
        let (description, truncated) =
            truncate_at_line_boundary(&post.minutes, self.config.max_embed_length);
        let description = if truncated {
            format!("{}{}", description, TRUNCATION_NOTE)
        } else {
            description
        };

        let mut fields = Vec::new();
        if !post.participants.is_empty() {
            fields.push(EmbedField {
                name: "Participants".to_string(),
                value: clamp_chars(&post.participants.join(", "), FIELD_VALUE_LIMIT),
                inline: true,
            });
        }
        fields.push(EmbedField {
            name: "Duration".to_string(),
            value: format_duration(post.duration_seconds),
            inline: true,
        });

        let embed = Embed {
            title: Some(format!(
                "Meeting Minutes - {}",
                chrono::Local::now().format("%Y-%m-%d")
            )),
            description: Some(description),
            color: Some(self.config.embed_color),
            fields,
        };

        let mut attachments = vec![Attachment {
            filename: format!("minutes-{}.md", post.recording_id),
            bytes: post.minutes.clone().into_bytes(),
        }];
        if self.config.include_transcript {
            attachments.push(Attachment {
                filename: format!("transcript-{}.txt", post.recording_id),
                bytes: post.transcript.clone().into_bytes(),
            });
        }

        // One retry on transport errors or 5xx.
        let retry = RetryConfig {
            max_retries: 1,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
        };
        let message_id = with_retry(&retry, "Publish", || {
            self.chat.send_message(
                self.output_channel_id,
                OutgoingMessage {
                    content: None,
                    embeds: vec![embed.clone()],
                    attachments: attachments.clone(),
                },
            )
        })
        .await?;

        Ok(vec![message_id])
    }

    /// Post the red error embed. Best-effort: failures are logged, never
    /// propagated (this runs inside the pipeline's error boundary).
    pub async fn post_error(&self, recording_id: &str, stage: Stage, message: &str) {
        let content = self
            .error_mention_role_id
            .map(|role_id| format!("<@&{}>", role_id));

        let embed = Embed {
            title: Some("Minutes pipeline failed".to_string()),
            description: None,
            color: Some(ERROR_EMBED_COLOR),
            fields: vec![
                EmbedField {
                    name: "Stage".to_string(),
                    value: stage.to_string(),
                    inline: true,
                },
                EmbedField {
                    name: "Recording".to_string(),
                    value: recording_id.to_string(),
                    inline: true,
                },
                EmbedField {
                    name: "Error".to_string(),
                    value: clamp_chars(message, FIELD_VALUE_LIMIT),
                    inline: false,
                },
            ],
        };

        let result = self
            .chat
            .send_message(
                self.output_channel_id,
                OutgoingMessage {
                    content,
                    embeds: vec![embed],
                    attachments: Vec::new(),
                },
            )
            .await;

        if let Err(e) = result {
            log::error!(
                "Publisher: failed to post error embed for {}: {}",
                recording_id,
                e
            );
        }
    }
}

fn format_duration(seconds: f64) -> String {
    let total = seconds.max(0.0).round() as u64;
    format!("{}m {:02}s", total / 60, total % 60)
}

fn clamp_chars(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut cut = limit.saturating_sub(3);
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &text[..cut])
}

/// Truncate to `max_len` bytes at a line boundary, leaving room for the
/// truncation note. Returns whether truncation happened; the full text
/// always travels in the attachment.
fn truncate_at_line_boundary(text: &str, max_len: usize) -> (String, bool) {
    if text.len() <= max_len {
        return (text.to_string(), false);
    }

    let room = max_len.saturating_sub(TRUNCATION_NOTE.len());
    let mut cut = room.min(text.len());
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }

    let head = &text[..cut];
    let cut_at = head.rfind('\n').unwrap_or(cut);

    (text[..cut_at].trim_end().to_string(), true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingChat {
        sent: Mutex<Vec<(u64, OutgoingMessage)>>,
        edits: Mutex<Vec<(u64, u64, String)>>,
        fail_sends: Mutex<u32>,
    }

    #[async_trait]
    impl ChatClient for RecordingChat {
        async fn send_message(
            &self,
            channel_id: u64,
            message: OutgoingMessage,
        ) -> Result<u64, ChatError> {
            let mut failures = self.fail_sends.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(ChatError::Api {
                    status: 502,
                    message: "bad gateway".to_string(),
                });
            }
            let mut sent = self.sent.lock().unwrap();
            sent.push((channel_id, message));
            Ok(sent.len() as u64)
        }

        async fn edit_message(
            &self,
            channel_id: u64,
            message_id: u64,
            content: String,
        ) -> Result<(), ChatError> {
            self.edits.lock().unwrap().push((channel_id, message_id, content));
            Ok(())
        }
    }

    fn publisher(chat: Arc<RecordingChat>) -> Publisher {
        Publisher::new(chat, 900, Some(77), PublisherConfig::default())
    }

    fn minutes_post(minutes: &str) -> MinutesPost {
        MinutesPost {
            recording_id: "rec1".to_string(),
            minutes: minutes.to_string(),
            transcript: "[00:00] A: hi".to_string(),
            participants: vec!["alice".to_string(), "bob".to_string()],
            duration_seconds: 125.0,
        }
    }

    #[test]
    fn test_truncation_cuts_at_line_boundary() {
        let text = "line one\nline two\nline three";
        let (kept, truncated) = truncate_at_line_boundary(text, 20);
        assert!(truncated);
        assert_eq!(kept, "line one");

        let (kept, truncated) = truncate_at_line_boundary(text, 500);
        assert!(!truncated);
        assert_eq!(kept, text);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(125.0), "2m 05s");
        assert_eq!(format_duration(0.0), "0m 00s");
        assert_eq!(format_duration(3700.0), "61m 40s");
    }

    #[tokio::test]
    async fn test_status_lifecycle_edits_one_message() {
        let chat = Arc::new(RecordingChat::default());
        let publisher = publisher(chat.clone());

        let status = publisher.begin_status("rec1").await;
        assert!(status.is_some());

        publisher
            .update_status(
                &status,
                StatusUpdate::Transcribing {
                    current: 1,
                    total: 3,
                    name: "alice",
                },
            )
            .await;
        publisher
            .update_status(&status, StatusUpdate::Failed { stage: Stage::Generate })
            .await;

        let edits = chat.edits.lock().unwrap();
        assert_eq!(edits.len(), 2);
        assert!(edits[0].2.contains("transcribing 1/3 (alice)"));
        assert!(edits[1].2.contains("failed: generation"));
    }

    #[tokio::test]
    async fn test_missing_status_line_is_silently_ignored() {
        let chat = Arc::new(RecordingChat::default());
        let publisher = publisher(chat.clone());
        publisher.update_status(&None, StatusUpdate::Generating).await;
        assert!(chat.edits.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_final_post_embed_and_attachment() {
        let chat = Arc::new(RecordingChat::default());
        let publisher = publisher(chat.clone());

        let ids = publisher
            .post_minutes(&minutes_post("## Summary\nwe met"))
            .await
            .unwrap();
        assert_eq!(ids.len(), 1);

        let sent = chat.sent.lock().unwrap();
        let (channel, message) = &sent[0];
        assert_eq!(*channel, 900);
        assert_eq!(message.embeds.len(), 1);
        assert_eq!(
            message.embeds[0].description.as_deref(),
            Some("## Summary\nwe met")
        );
        assert_eq!(message.attachments.len(), 1);
        assert_eq!(message.attachments[0].filename, "minutes-rec1.md");
    }

    #[tokio::test]
    async fn test_long_minutes_truncated_but_attachment_complete() {
        let chat = Arc::new(RecordingChat::default());
        let mut config = PublisherConfig::default();
        config.max_embed_length = 120;
        let publisher = Publisher::new(chat.clone(), 900, None, config);

        let minutes = (0..40)
            .map(|i| format!("- point number {}", i))
            .collect::<Vec<_>>()
            .join("\n");
        publisher.post_minutes(&minutes_post(&minutes)).await.unwrap();

        let sent = chat.sent.lock().unwrap();
        let message = &sent[0].1;
        let description = message.embeds[0].description.as_ref().unwrap();
        assert!(description.len() <= 120 + TRUNCATION_NOTE.len());
        assert!(description.ends_with(TRUNCATION_NOTE.trim_start_matches('\n')));
        assert_eq!(message.attachments[0].bytes, minutes.as_bytes());
    }

    #[tokio::test]
    async fn test_final_post_retries_once_on_server_error() {
        let chat = Arc::new(RecordingChat::default());
        *chat.fail_sends.lock().unwrap() = 1;
        let publisher = publisher(chat.clone());

        let ids = publisher.post_minutes(&minutes_post("short")).await.unwrap();
        assert_eq!(ids.len(), 1);
        assert_eq!(chat.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_error_embed_mentions_role_and_carries_fields() {
        let chat = Arc::new(RecordingChat::default());
        let publisher = publisher(chat.clone());

        publisher
            .post_error("rec1", Stage::Transcribe, "Accelerator out of memory")
            .await;

        let sent = chat.sent.lock().unwrap();
        let message = &sent[0].1;
        assert_eq!(message.content.as_deref(), Some("<@&77>"));
        let embed = &message.embeds[0];
        assert_eq!(embed.color, Some(ERROR_EMBED_COLOR));
        let stage_field = embed.fields.iter().find(|f| f.name == "Stage").unwrap();
        assert_eq!(stage_field.value, "transcription");
    }

    #[tokio::test]
    async fn test_include_transcript_adds_second_attachment() {
        let chat = Arc::new(RecordingChat::default());
        let mut config = PublisherConfig::default();
        config.include_transcript = true;
        let publisher = Publisher::new(chat.clone(), 900, None, config);

        publisher.post_minutes(&minutes_post("ok")).await.unwrap();

        let sent = chat.sent.lock().unwrap();
        let message = &sent[0].1;
        assert_eq!(message.attachments.len(), 2);
        assert_eq!(message.attachments[1].filename, "transcript-rec1.txt");
    }
}
