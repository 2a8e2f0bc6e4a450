//! Cloud-folder watcher: the second trigger path.
//!
//! The folder SDK itself is external; the core consumes the small
//! `DriveClient` contract. `HttpDriveClient` is the thin production adapter.

mod http;
mod processed;
mod watcher;

pub use http::HttpDriveClient;
pub use processed::ProcessedSet;
pub use watcher::{pseudo_recording_id, DriveWatcher, PipelineStarter};

use crate::retry::Retryable;
use async_trait::async_trait;
use std::path::Path;

/// One child file of the watched folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveFile {
    pub id: String,
    pub name: String,
}

#[derive(Debug, thiserror::Error)]
pub enum DriveError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Credentials error: {0}")]
    Credentials(String),

    #[error("State store error: {0}")]
    Store(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Retryable for DriveError {
    fn is_retryable(&self) -> bool {
        match self {
            DriveError::Network(_) => true,
            DriveError::Api { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            _ => false,
        }
    }
}

/// Minimal cloud-folder contract the watcher and the drive audio source use.
#[async_trait]
pub trait DriveClient: Send + Sync {
    /// Snapshot the folder's child files.
    async fn list_folder(&self, folder_id: &str) -> Result<Vec<DriveFile>, DriveError>;

    /// Download a file's content to `dest`.
    async fn download_to(&self, file_id: &str, dest: &Path) -> Result<(), DriveError>;
}
