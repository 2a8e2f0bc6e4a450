//! Thin HTTP adapter for the cloud drive's files API.

use crate::drive::{DriveClient, DriveError, DriveFile};
use async_trait::async_trait;
use serde::Deserialize;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

const API_BASE: &str = "https://www.googleapis.com/drive/v3";
const LIST_TIMEOUT: Duration = Duration::from_secs(30);

/// How the client authenticates against the files API. Extra fields in the
/// credentials file are ignored.
#[derive(Debug, Deserialize)]
struct Credentials {
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

#[derive(Debug)]
pub struct HttpDriveClient {
    client: reqwest::Client,
    credentials: Credentials,
}

#[derive(Debug, Deserialize)]
struct FileListResponse {
    #[serde(default)]
    files: Vec<FileEntry>,
}

#[derive(Debug, Deserialize)]
struct FileEntry {
    id: String,
    name: String,
}

impl HttpDriveClient {
    /// Build a client from a credentials JSON file containing either an
    /// `api_key` or an `access_token`.
    pub fn from_credentials_file(path: &Path) -> Result<Self, DriveError> {
        let raw = std::fs::read_to_string(path)?;
        let credentials: Credentials = serde_json::from_str(&raw)
            .map_err(|e| DriveError::Credentials(format!("{}: {}", path.display(), e)))?;

        if credentials.api_key.is_none() && credentials.access_token.is_none() {
            return Err(DriveError::Credentials(format!(
                "{}: expected an api_key or access_token field",
                path.display()
            )));
        }

        if let Some(token) = &credentials.access_token {
            crate::logging::register_secret(token);
        }
        if let Some(key) = &credentials.api_key {
            crate::logging::register_secret(key);
        }

        Ok(Self {
            client: reqwest::Client::new(),
            credentials,
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = match &self.credentials.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        match &self.credentials.api_key {
            Some(key) => request.query(&[("key", key.as_str())]),
            None => request,
        }
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, DriveError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(DriveError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl DriveClient for HttpDriveClient {
    async fn list_folder(&self, folder_id: &str) -> Result<Vec<DriveFile>, DriveError> {
        let query = format!("'{}' in parents and trashed = false", folder_id);
        let request = self
            .client
            .get(format!("{}/files", API_BASE))
            .query(&[
                ("q", query.as_str()),
                ("fields", "files(id,name)"),
                ("pageSize", "100"),
            ])
            .timeout(LIST_TIMEOUT);

        let response = self.authorize(request).send().await?;
        let response = Self::check_status(response).await?;
        let body: FileListResponse = response.json().await?;

        Ok(body
            .files
            .into_iter()
            .map(|f| DriveFile {
                id: f.id,
                name: f.name,
            })
            .collect())
    }

    async fn download_to(&self, file_id: &str, dest: &Path) -> Result<(), DriveError> {
        let request = self
            .client
            .get(format!("{}/files/{}", API_BASE, file_id))
            .query(&[("alt", "media")]);

        let response = self.authorize(request).send().await?;
        let mut response = Self::check_status(response).await?;

        let mut file = std::fs::File::create(dest)?;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk)?;
        }
        file.flush()?;
        Ok(())
    }
}
