//! Drive REST client
//!
//! Translates high-level file operations into authenticated HTTP requests
//! against the Drive v3 API and normalizes responses into [`FileRecord`]s.
//!
//! Every call carries a bounded retry discipline: on HTTP 401 the client
//! refreshes the token exactly once and retries the same request exactly
//! once. A second 401 surfaces as [`DriveError::AuthExpired`]. Any other
//! non-2xx status surfaces as [`DriveError::RemoteApi`] and is not retried.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::config::DriveConfig;
use crate::token::{TokenBroker, TokenStore};
use crate::types::{DriveError, FileRecord, ListPage, StorageQuota, FOLDER_MIME_TYPE};

/// Metadata fields requested for every file
const FILE_FIELDS: &str =
    "id,name,mimeType,size,modifiedTime,createdTime,parents,webContentLink,thumbnailLink";

/// Multipart boundary for uploads
const UPLOAD_BOUNDARY: &str = "aerodrive_boundary";

/// Progress callback: (bytes_done, bytes_total)
pub type ProgressFn = Box<dyn Fn(u64, u64) + Send>;

/// Drive file metadata from API
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    name: String,
    mime_type: String,
    #[serde(default)]
    size: Option<String>,
    modified_time: Option<String>,
    created_time: Option<String>,
    #[serde(default)]
    parents: Vec<String>,
    web_content_link: Option<String>,
    thumbnail_link: Option<String>,
}

/// Drive file list response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    next_page_token: Option<String>,
}

/// `about` endpoint response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AboutResponse {
    storage_quota: Option<QuotaInfo>,
}

#[derive(Debug, Deserialize)]
struct QuotaInfo {
    limit: Option<String>,
    usage: Option<String>,
}

fn parse_timestamp(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Convert a wire entry into the normalized record shape
fn normalize(file: DriveFile) -> FileRecord {
    let is_folder = file.mime_type == FOLDER_MIME_TYPE;
    let size_bytes = file
        .size
        .as_ref()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);

    FileRecord {
        id: file.id,
        name: file.name,
        is_folder,
        mime_type: file.mime_type,
        size_bytes,
        modified_at: parse_timestamp(file.modified_time),
        created_at: parse_timestamp(file.created_time),
        parents: file.parents,
        download_url: file.web_content_link,
        thumbnail_url: file.thumbnail_link,
    }
}

/// Build the `q` filter expression for a folder listing
fn build_query(folder_id: &str, name_query: &str) -> String {
    let mut q = format!("'{}' in parents and trashed = false", folder_id);
    if !name_query.is_empty() {
        q.push_str(&format!(
            " and name contains '{}'",
            name_query.replace('\'', "\\'")
        ));
    }
    q
}

/// Assemble a `multipart/related` upload body (metadata part + content part)
fn build_multipart(metadata: &serde_json::Value, mime: &str, content: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(content.len() + 512);
    body.extend_from_slice(format!("--{}\r\n", UPLOAD_BOUNDARY).as_bytes());
    body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.extend_from_slice(metadata.to_string().as_bytes());
    body.extend_from_slice(b"\r\n");
    body.extend_from_slice(format!("--{}\r\n", UPLOAD_BOUNDARY).as_bytes());
    body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", mime).as_bytes());
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{}--", UPLOAD_BOUNDARY).as_bytes());
    body
}

/// Authenticated client for the remote Drive API
pub struct DriveClient {
    config: DriveConfig,
    http: reqwest::Client,
    tokens: Arc<TokenBroker>,
}

impl DriveClient {
    pub fn new(config: DriveConfig, store: Arc<dyn TokenStore>) -> Result<Self, DriveError> {
        config.validate()?;
        let http = reqwest::Client::new();
        let tokens = Arc::new(TokenBroker::new(&config, store, http.clone()));
        Ok(Self { config, http, tokens })
    }

    pub fn config(&self) -> &DriveConfig {
        &self.config
    }

    /// Token broker, for login/logout flows
    pub fn tokens(&self) -> &TokenBroker {
        &self.tokens
    }

    fn files_url(&self, suffix: &str) -> String {
        format!("{}/files{}", self.config.api_base, suffix)
    }

    /// Send a request with the 401-refresh-and-retry-once policy.
    ///
    /// The builder closure is invoked once per attempt so the retry gets a
    /// fresh request carrying the refreshed token.
    async fn send_authorized<F>(&self, build: F) -> Result<reqwest::Response, DriveError>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let auth = self.tokens.bearer().await?;
        let response = build(&self.http)
            .header(AUTHORIZATION, &auth)
            .send()
            .await
            .map_err(|e| DriveError::Network(e.to_string()))?;

        if response.status().as_u16() != 401 {
            return Ok(response);
        }

        debug!("Got 401, refreshing token and retrying once");
        let stale = auth.trim_start_matches("Bearer ");
        let auth = self.tokens.force_refresh(stale).await?;

        let retry = build(&self.http)
            .header(AUTHORIZATION, &auth)
            .send()
            .await
            .map_err(|e| DriveError::Network(e.to_string()))?;

        if retry.status().as_u16() == 401 {
            return Err(DriveError::AuthExpired);
        }
        Ok(retry)
    }

    /// Turn any non-2xx response into [`DriveError::RemoteApi`]
    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, DriveError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(DriveError::RemoteApi { status: status.as_u16(), message })
    }

    async fn parse_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, DriveError> {
        let response = Self::check_status(response).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| DriveError::Parse(e.to_string()))
    }

    /// List one page of a folder, optionally filtered by a name query
    pub async fn list_files(
        &self,
        folder_id: &str,
        query: &str,
        page_token: Option<&str>,
    ) -> Result<ListPage, DriveError> {
        let q = build_query(folder_id, query);
        let fields = format!("files({}),nextPageToken", FILE_FIELDS);
        let page_size = self.config.page_size.to_string();

        let url = self.files_url("");
        let response = self
            .send_authorized(|http| {
                let mut params = vec![
                    ("q", q.as_str()),
                    ("fields", fields.as_str()),
                    ("pageSize", page_size.as_str()),
                ];
                if let Some(token) = page_token {
                    params.push(("pageToken", token));
                }
                http.get(&url).query(&params)
            })
            .await?;

        let list: DriveFileList = Self::parse_json(response).await?;
        Ok(ListPage {
            records: list.files.into_iter().map(normalize).collect(),
            next_page_token: list.next_page_token,
        })
    }

    /// Fetch a single record by id
    pub async fn get_file(&self, file_id: &str) -> Result<FileRecord, DriveError> {
        let url = self.files_url(&format!("/{}", file_id));
        let response = self
            .send_authorized(|http| http.get(&url).query(&[("fields", FILE_FIELDS)]))
            .await?;
        let file: DriveFile = Self::parse_json(response).await?;
        Ok(normalize(file))
    }

    /// Upload a local file into the target folder (multipart)
    pub async fn upload_file(
        &self,
        local_path: &Path,
        target_folder_id: &str,
    ) -> Result<FileRecord, DriveError> {
        let name = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                DriveError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "upload path has no file name",
                ))
            })?
            .to_string();

        let content = tokio::fs::read(local_path).await?;
        let mime = mime_guess::from_path(local_path)
            .first_or_octet_stream()
            .to_string();

        let metadata = serde_json::json!({
            "name": name,
            "parents": [target_folder_id],
        });
        let body = build_multipart(&metadata, &mime, &content);
        let content_type = format!("multipart/related; boundary={}", UPLOAD_BOUNDARY);

        let url = format!("{}/files", self.config.upload_base);
        let response = self
            .send_authorized(|http| {
                http.post(&url)
                    .query(&[("uploadType", "multipart"), ("fields", FILE_FIELDS)])
                    .header(CONTENT_TYPE, &content_type)
                    .body(body.clone())
            })
            .await?;

        let file: DriveFile = Self::parse_json(response).await?;
        info!("Uploaded {} ({} bytes)", name, content.len());
        Ok(normalize(file))
    }

    /// Download file content into memory
    pub async fn download_to_bytes(&self, file_id: &str) -> Result<Vec<u8>, DriveError> {
        let url = self.files_url(&format!("/{}", file_id));
        let response = self
            .send_authorized(|http| http.get(&url).query(&[("alt", "media")]))
            .await?;
        let response = Self::check_status(response).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| DriveError::Network(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    /// Stream file content to a local path
    pub async fn download_to_path(
        &self,
        file_id: &str,
        local_path: &Path,
        on_progress: Option<ProgressFn>,
    ) -> Result<(), DriveError> {
        let url = self.files_url(&format!("/{}", file_id));
        let response = self
            .send_authorized(|http| http.get(&url).query(&[("alt", "media")]))
            .await?;
        let response = Self::check_status(response).await?;

        let total = response.content_length().unwrap_or(0);
        let mut out = tokio::fs::File::create(local_path).await?;
        let mut stream = response.bytes_stream();
        let mut done: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| DriveError::Network(e.to_string()))?;
            out.write_all(&chunk).await?;
            done += chunk.len() as u64;
            if let Some(ref progress) = on_progress {
                progress(done, total);
            }
        }
        out.flush().await?;
        info!("Downloaded {} to {}", file_id, local_path.display());
        Ok(())
    }

    /// Delete a file or folder
    pub async fn delete_file(&self, file_id: &str) -> Result<(), DriveError> {
        let url = self.files_url(&format!("/{}", file_id));
        let response = self.send_authorized(|http| http.delete(&url)).await?;
        Self::check_status(response).await?;
        info!("Deleted {}", file_id);
        Ok(())
    }

    /// Rename a file or folder in place
    pub async fn rename_file(&self, file_id: &str, new_name: &str) -> Result<(), DriveError> {
        let url = self.files_url(&format!("/{}", file_id));
        let metadata = serde_json::json!({ "name": new_name });
        let response = self
            .send_authorized(|http| http.patch(&url).json(&metadata))
            .await?;
        Self::check_status(response).await?;
        Ok(())
    }

    /// Move a file to another folder.
    ///
    /// Reads the current parents first, then asks the API to add the new
    /// parent and remove the old ones in one request.
    pub async fn move_file(&self, file_id: &str, new_folder_id: &str) -> Result<(), DriveError> {
        let current = self.get_file(file_id).await?;
        let remove = current.parents.join(",");

        let url = self.files_url(&format!("/{}", file_id));
        let response = self
            .send_authorized(|http| {
                let mut params = vec![("addParents", new_folder_id)];
                if !remove.is_empty() {
                    params.push(("removeParents", remove.as_str()));
                }
                http.patch(&url)
                    .query(&params)
                    .json(&serde_json::json!({}))
            })
            .await?;
        Self::check_status(response).await?;
        Ok(())
    }

    /// Create a folder under the given parent
    pub async fn create_folder(
        &self,
        name: &str,
        parent_id: &str,
    ) -> Result<FileRecord, DriveError> {
        let metadata = serde_json::json!({
            "name": name,
            "mimeType": FOLDER_MIME_TYPE,
            "parents": [parent_id],
        });
        let url = self.files_url("");
        let response = self
            .send_authorized(|http| {
                http.post(&url)
                    .query(&[("fields", FILE_FIELDS)])
                    .json(&metadata)
            })
            .await?;
        let file: DriveFile = Self::parse_json(response).await?;
        info!("Created folder {}", file.name);
        Ok(normalize(file))
    }

    /// Account storage quota from the `about` endpoint
    pub async fn storage_quota(&self) -> Result<StorageQuota, DriveError> {
        let url = format!("{}/about", self.config.api_base);
        let response = self
            .send_authorized(|http| http.get(&url).query(&[("fields", "storageQuota")]))
            .await?;
        let about: AboutResponse = Self::parse_json(response).await?;

        let quota = about
            .storage_quota
            .ok_or_else(|| DriveError::Parse("missing storageQuota".to_string()))?;
        Ok(StorageQuota {
            // Absent limit means unlimited storage
            total_bytes: quota.limit.as_ref().and_then(|s| s.parse().ok()).unwrap_or(0),
            used_bytes: quota.usage.as_ref().and_then(|s| s.parse().ok()).unwrap_or(0),
        })
    }
}
