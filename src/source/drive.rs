//! Audio source for archives picked up from the watched cloud folder.
//!
//! Drive archives have no speaker endpoint; the archive entry names are the
//! authoritative metadata. The archive is downloaded once into a private
//! spool file and reused across `list_speakers` and `fetch`.

use crate::drive::DriveClient;
use crate::recording::{AudioTrack, SpeakerInfo};
use crate::source::{archive, AudioSource, SourceError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct DriveArchiveSource {
    client: Arc<dyn DriveClient>,
    file_id: String,
    spool: Mutex<Option<tempfile::TempPath>>,
}

impl DriveArchiveSource {
    pub fn new(client: Arc<dyn DriveClient>, file_id: String) -> Self {
        Self {
            client,
            file_id,
            spool: Mutex::new(None),
        }
    }

    /// Download the archive on first use; later calls reuse the spool file.
    async fn archive_path(&self) -> Result<PathBuf, SourceError> {
        let mut spool = self.spool.lock().await;

        if let Some(path) = spool.as_ref() {
            return Ok(path.to_path_buf());
        }

        let temp = tempfile::NamedTempFile::new()?;
        let path = temp.path().to_path_buf();
        self.client.download_to(&self.file_id, &path).await?;
        *spool = Some(temp.into_temp_path());

        Ok(path)
    }
}

#[async_trait]
impl AudioSource for DriveArchiveSource {
    async fn list_speakers(&self) -> Result<Vec<SpeakerInfo>, SourceError> {
        let path = self.archive_path().await?;
        archive::list_archive_speakers(&path)
    }

    async fn fetch(&self, into: &Path) -> Result<Vec<AudioTrack>, SourceError> {
        let path = self.archive_path().await?;
        let speakers = archive::list_archive_speakers(&path)?;
        archive::extract_tracks(&path, into, &speakers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::{DriveError, DriveFile};
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use zip::write::SimpleFileOptions;

    struct ArchiveDrive {
        bytes: Vec<u8>,
        downloads: AtomicUsize,
    }

    #[async_trait]
    impl DriveClient for ArchiveDrive {
        async fn list_folder(&self, _folder_id: &str) -> Result<Vec<DriveFile>, DriveError> {
            Ok(Vec::new())
        }

        async fn download_to(&self, _file_id: &str, dest: &Path) -> Result<(), DriveError> {
            self.downloads.fetch_add(1, Ordering::SeqCst);
            std::fs::write(dest, &self.bytes)?;
            Ok(())
        }
    }

    fn archive_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            for (name, data) in entries {
                writer.start_file(*name, SimpleFileOptions::default()).unwrap();
                writer.write_all(data).unwrap();
            }
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    #[tokio::test]
    async fn test_speakers_come_from_entry_names_and_download_happens_once() {
        let drive = Arc::new(ArchiveDrive {
            bytes: archive_bytes(&[("1-alice.m4a", b"aaaa"), ("2-bob.m4a", b"bbbb")]),
            downloads: AtomicUsize::new(0),
        });
        let source = DriveArchiveSource::new(drive.clone(), "file-1".to_string());

        let speakers = source.list_speakers().await.unwrap();
        assert_eq!(speakers.len(), 2);
        assert_eq!(speakers[0].display_name, "alice");

        let out = tempfile::tempdir().unwrap();
        let tracks = source.fetch(out.path()).await.unwrap();
        assert_eq!(tracks.len(), 2);
        assert!(tracks.iter().all(|t| t.file_path.starts_with(out.path())));

        assert_eq!(drive.downloads.load(Ordering::SeqCst), 1);
    }
}
