//! Panel detector: classifies chat-edit events into recording triggers.
//!
//! The recording bot edits a status panel in the watch channel when a
//! recording ends. Rather than parsing the panel's component tree (whose
//! schema keeps evolving upstream), detection works on the serialized
//! payload: a marker substring plus a URL regex. Four filters apply in
//! order; the first miss yields `None`.

use crate::config::{ChatConfig, SourceConfig};
use crate::recording::{RecordingHandle, TriggerKind};
use regex::Regex;
use serde_json::Value;

/// The panel text the recording bot shows once a recording has ended.
/// Versionable detection rule: update here if the upstream UI changes.
pub const RECORDING_ENDED_MARKER: &str = "Recording ended";

pub struct PanelDetector {
    bot_id: u64,
    watch_channel_id: u64,
    domain_allowlist: Vec<String>,
    url_pattern: Regex,
}

impl PanelDetector {
    pub fn new(chat: &ChatConfig, source: &SourceConfig) -> Self {
        Self {
            bot_id: source.bot_id,
            watch_channel_id: chat.watch_channel_id,
            domain_allowlist: source
                .domain_allowlist
                .iter()
                .map(|host| host.to_ascii_lowercase())
                .collect(),
            url_pattern: Regex::new(r"https?://([A-Za-z0-9.\-:]+)/rec/([A-Za-z0-9]+)\?key=([A-Za-z0-9]+)")
                .expect("recording URL pattern is valid"),
        }
    }

    /// Classify one raw message-edit payload.
    pub fn detect(&self, payload: &Value) -> Option<RecordingHandle> {
        // 1. The edit must come from the recording bot.
        if id_field(payload, "author")? != self.bot_id {
            return None;
        }

        // 2. ...in the watched channel.
        let channel_id = payload
            .get("channel_id")
            .and_then(parse_id)
            .filter(|id| *id == self.watch_channel_id)?;

        // 3. The panel components must show the ended state.
        let components = payload.get("components")?;
        if !components.to_string().contains(RECORDING_ENDED_MARKER) {
            return None;
        }

        // 4. An allowlisted recording URL must appear somewhere in the payload.
        let serialized = payload.to_string();
        for capture in self.url_pattern.captures_iter(&serialized) {
            let host = capture[1].to_ascii_lowercase();
            if !self.domain_allowlist.contains(&host) {
                log::debug!("Detector: ignoring recording URL on non-allowlisted host {:?}", host);
                continue;
            }

            return Some(RecordingHandle {
                recording_id: capture[2].to_string(),
                access_key: capture[3].to_string(),
                origin_channel_id: channel_id,
                trigger_kind: TriggerKind::PanelEdit,
                drive_file_id: None,
            });
        }

        None
    }
}

/// Read a nested `{field}.id`, accepting both string and numeric ids.
fn id_field(payload: &Value, field: &str) -> Option<u64> {
    payload.get(field).and_then(|obj| obj.get("id")).and_then(parse_id)
}

fn parse_id(value: &Value) -> Option<u64> {
    match value {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn detector() -> PanelDetector {
        let chat = ChatConfig {
            watch_channel_id: 500,
            output_channel_id: 501,
            error_mention_role_id: None,
        };
        let source = SourceConfig {
            bot_id: 42,
            domain_allowlist: vec!["rec.example.com".to_string()],
            ..Default::default()
        };
        PanelDetector::new(&chat, &source)
    }

    fn panel_payload(author_id: &str, channel_id: &str, label: &str, url: &str) -> Value {
        json!({
            "author": { "id": author_id },
            "channel_id": channel_id,
            "components": [{
                "type": 1,
                "components": [{ "type": 2, "label": label, "url": url }],
            }],
        })
    }

    #[test]
    fn test_detects_recording_ended_panel() {
        let payload = panel_payload(
            "42",
            "500",
            "Recording ended",
            "https://rec.example.com/rec/abc123?key=XYZ789",
        );

        let handle = detector().detect(&payload).unwrap();
        assert_eq!(handle.recording_id, "abc123");
        assert_eq!(handle.access_key, "XYZ789");
        assert_eq!(handle.origin_channel_id, 500);
        assert_eq!(handle.trigger_kind, TriggerKind::PanelEdit);
        assert!(handle.drive_file_id.is_none());
    }

    #[test]
    fn test_rejects_wrong_author() {
        let payload = panel_payload(
            "41",
            "500",
            "Recording ended",
            "https://rec.example.com/rec/abc123?key=XYZ789",
        );
        assert!(detector().detect(&payload).is_none());
    }

    #[test]
    fn test_rejects_wrong_channel() {
        let payload = panel_payload(
            "42",
            "999",
            "Recording ended",
            "https://rec.example.com/rec/abc123?key=XYZ789",
        );
        assert!(detector().detect(&payload).is_none());
    }

    #[test]
    fn test_rejects_in_progress_panel() {
        let payload = panel_payload(
            "42",
            "500",
            "Recording…",
            "https://rec.example.com/rec/abc123?key=XYZ789",
        );
        assert!(detector().detect(&payload).is_none());
    }

    #[test]
    fn test_rejects_non_allowlisted_host() {
        let payload = panel_payload(
            "42",
            "500",
            "Recording ended",
            "https://evil.example.net/rec/abc123?key=XYZ789",
        );
        assert!(detector().detect(&payload).is_none());
    }

    #[test]
    fn test_accepts_numeric_ids() {
        let payload = json!({
            "author": { "id": 42 },
            "channel_id": 500,
            "components": [{ "label": "Recording ended" }],
            "content": "https://rec.example.com/rec/zzz9?key=k1234567",
        });

        let handle = detector().detect(&payload).unwrap();
        assert_eq!(handle.recording_id, "zzz9");
    }

    #[test]
    fn test_url_may_appear_anywhere_in_payload() {
        let payload = json!({
            "author": { "id": "42" },
            "channel_id": "500",
            "components": [{ "label": "Recording ended" }],
            "embeds": [{ "description": "get it at https://rec.example.com/rec/qq11?key=pp22" }],
        });

        let handle = detector().detect(&payload).unwrap();
        assert_eq!(handle.recording_id, "qq11");
        assert_eq!(handle.access_key, "pp22");
    }

    #[test]
    fn test_missing_components_is_none() {
        let payload = json!({
            "author": { "id": "42" },
            "channel_id": "500",
            "content": "https://rec.example.com/rec/abc?key=def",
        });
        assert!(detector().detect(&payload).is_none());
    }
}
