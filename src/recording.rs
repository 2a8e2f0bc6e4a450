//! Core recording model shared by the triggers and the pipeline.
//!
//! A `RecordingHandle` is created by one of the two trigger paths (panel
//! detector or drive watcher) and travels by value through the pipeline.
//! Nothing in here is mutated after construction.

use std::path::PathBuf;

/// Which trigger path produced a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    /// The recording bot edited its in-channel status panel.
    PanelEdit,
    /// A new archive file appeared in the watched cloud folder.
    DriveFile,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::PanelEdit => "panel-edit",
            TriggerKind::DriveFile => "drive-file",
        }
    }
}

/// Identifies one finished recording and how to reach it.
#[derive(Debug, Clone)]
pub struct RecordingHandle {
    /// Recording id as issued by the recording service (alphanumeric).
    pub recording_id: String,
    /// Access key paired with the id. Treated as a secret in logs.
    pub access_key: String,
    /// Channel the trigger came from.
    pub origin_channel_id: u64,
    pub trigger_kind: TriggerKind,
    /// Set only for drive-sourced recordings; used to mark the file processed.
    pub drive_file_id: Option<String>,
}

/// One speaker within a recording.
///
/// `track_index` is the small positive integer the recording service assigns
/// per speaker track; it is unique within a recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeakerInfo {
    pub track_index: u32,
    pub display_name: String,
    pub user_id: u64,
}

/// A downloaded per-speaker audio file.
///
/// The path always lies under the pipeline invocation's temp root and is
/// only valid until that root is released.
#[derive(Debug, Clone)]
pub struct AudioTrack {
    pub speaker: SpeakerInfo,
    pub file_path: PathBuf,
}
