//! Shared types for the vault core
//!
//! This module contains the types shared across the Drive client, the folder
//! session and the sync loop: the normalized file record, quota information,
//! sink callback payloads, and the error type.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use chrono::{DateTime, Utc};

/// MIME type Google Drive uses to mark folders
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// Well-known id of the Drive root folder
pub const ROOT_FOLDER_ID: &str = "root";

/// Normalized remote file or folder entry
///
/// Unified representation of one entry as returned by the remote API.
/// Records are immutable snapshots: rename/move/delete go through the
/// remote API and replace the local copy, they never patch it in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    /// Opaque id assigned by the remote service
    pub id: String,
    /// File or folder name
    pub name: String,
    /// MIME type as reported by the remote service
    pub mime_type: String,
    /// File size in bytes (0 for folders and when the API omits it)
    pub size_bytes: u64,
    /// Last modification time
    pub modified_at: Option<DateTime<Utc>>,
    /// Creation time
    pub created_at: Option<DateTime<Utc>>,
    /// Whether this entry is a folder
    pub is_folder: bool,
    /// Parent folder ids; the first entry is the primary parent
    #[serde(default)]
    pub parents: Vec<String>,
    /// Direct download URL (if the API exposed one)
    pub download_url: Option<String>,
    /// Thumbnail URL (if the API exposed one)
    pub thumbnail_url: Option<String>,
}

impl FileRecord {
    /// Primary parent folder id, when known
    pub fn primary_parent(&self) -> Option<&str> {
        self.parents.first().map(|s| s.as_str())
    }
}

/// One page of a folder listing
#[derive(Debug, Clone)]
pub struct ListPage {
    pub records: Vec<FileRecord>,
    pub next_page_token: Option<String>,
}

/// Storage quota information from the remote account
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StorageQuota {
    /// Total bytes available (0 = unlimited)
    pub total_bytes: u64,
    /// Bytes used
    pub used_bytes: u64,
}

impl StorageQuota {
    /// Usage as a percentage of the total (0.0 when the quota is unlimited)
    pub fn percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            0.0
        } else {
            (self.used_bytes as f64 / self.total_bytes as f64) * 100.0
        }
    }
}

/// Sort criterion for folder listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    Name,
    Size,
    Modified,
    MimeType,
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortKey::Name => write!(f, "name"),
            SortKey::Size => write!(f, "size"),
            SortKey::Modified => write!(f, "modified"),
            SortKey::MimeType => write!(f, "mimeType"),
        }
    }
}

/// Payload for [`UiSink::on_list_updated`]
#[derive(Debug, Clone)]
pub struct ListUpdate {
    pub files: Vec<FileRecord>,
    pub folders: Vec<FileRecord>,
    pub current_folder_id: String,
}

/// Payload for [`UiSink::on_storage_updated`]
#[derive(Debug, Clone, Copy)]
pub struct StorageUsage {
    pub used_bytes: u64,
    pub total_bytes: u64,
    pub percentage: f64,
}

impl From<StorageQuota> for StorageUsage {
    fn from(q: StorageQuota) -> Self {
        Self {
            used_bytes: q.used_bytes,
            total_bytes: q.total_bytes,
            percentage: q.percentage(),
        }
    }
}

/// Notification contract towards whatever renders the session state.
///
/// The session and sync loop only talk to the outside world through this
/// trait; pass [`NoopSink`] when no renderer is attached.
pub trait UiSink: Send + Sync {
    fn on_list_updated(&self, update: ListUpdate);
    fn on_storage_updated(&self, usage: StorageUsage);
    fn on_sync_state_changed(&self, is_syncing: bool);
}

/// Default sink that drops every notification
#[derive(Debug, Default)]
pub struct NoopSink;

impl UiSink for NoopSink {
    fn on_list_updated(&self, _update: ListUpdate) {}
    fn on_storage_updated(&self, _usage: StorageUsage) {}
    fn on_sync_state_changed(&self, _is_syncing: bool) {}
}

/// Vault core error type
#[derive(Error, Debug)]
pub enum DriveError {
    /// Token invalid and refresh failed; the caller must force re-auth
    #[error("Authorization expired - re-authentication required")]
    AuthExpired,

    /// Non-2xx, non-401 response from the remote API
    #[error("Remote API error {status}: {message}")]
    RemoteApi { status: u16, message: String },

    /// Transport-level failure (offline, DNS, TLS)
    #[error("Network error: {0}")]
    Network(String),

    /// Malformed remote payload
    #[error("Parse error: {0}")]
    Parse(String),

    /// Bad endpoint or credential configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Local file IO during upload/download or token persistence
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DriveError {
    /// Whether the caller should trigger the re-authentication flow
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, DriveError::AuthExpired)
    }
}
