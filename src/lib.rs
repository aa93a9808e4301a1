//! AeroDrive - Drive-backed personal vault core
//!
//! Presents a remote Drive account as a navigable folder session with a
//! short-lived response cache, bounded token-refresh retry discipline, and
//! an optional background sync loop.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────┐     ┌───────────────┐     ┌─────────────┐
//! │ SyncLoop  │────▶│ FolderSession │────▶│ DriveClient │
//! └───────────┘     └───────┬───────┘     └──────┬──────┘
//!       │                   │                    │
//!       ▼                   ▼                    ▼
//!   ┌────────┐         ┌────────┐         ┌─────────────┐
//!   │ UiSink │         │ cache  │         │ TokenBroker │
//!   └────────┘         └────────┘         └──────┬──────┘
//!                                                ▼
//!                                          ┌────────────┐
//!                                          │ TokenStore │
//!                                          └────────────┘
//! ```
//!
//! The session owns its listing state exclusively; collaborators observe it
//! through [`UiSink`] notifications and [`FolderSession::snapshot`].

pub mod client;
pub mod config;
pub mod session;
pub mod sync;
pub mod token;
pub mod types;

pub use client::DriveClient;
pub use config::DriveConfig;
pub use session::FolderSession;
pub use sync::SyncLoop;
pub use token::{FileTokenStore, MemoryTokenStore, StoredTokens, TokenBroker, TokenStore};
pub use types::{
    DriveError, FileRecord, ListPage, ListUpdate, NoopSink, SortKey, SortOrder, StorageQuota,
    StorageUsage, UiSink, FOLDER_MIME_TYPE, ROOT_FOLDER_ID,
};
