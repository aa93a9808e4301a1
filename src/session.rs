//! Folder session
//!
//! Tracks "where am I" and "what did I last see": the current folder, the
//! partition of its last successful listing into files and folders, and a
//! short-lived response cache keyed by `(folder, query, page_token)`.
//!
//! Session state lives behind a mutex that is never held across a network
//! await. Because navigation can therefore overlap an in-flight listing,
//! every fetch is tagged with the navigation epoch at dispatch time and its
//! result is discarded if the epoch moved while it was in flight
//! (last request wins, not last response).

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::client::DriveClient;
use crate::types::{
    DriveError, FileRecord, ListUpdate, SortKey, SortOrder, UiSink, ROOT_FOLDER_ID,
};

/// Cache key for one listing request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    folder_id: String,
    query: String,
    page_token: String,
}

impl CacheKey {
    fn new(folder_id: &str, query: &str, page_token: &str) -> Self {
        Self {
            folder_id: folder_id.to_string(),
            query: query.to_string(),
            page_token: page_token.to_string(),
        }
    }
}

/// One cached listing response
struct CacheEntry {
    records: Vec<FileRecord>,
    next_page_token: Option<String>,
    fetched_at: Instant,
}

impl CacheEntry {
    fn is_live(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() < ttl
    }
}

/// Split a listing into (folders, files) preserving order
fn partition(records: Vec<FileRecord>) -> (Vec<FileRecord>, Vec<FileRecord>) {
    records.into_iter().partition(|r| r.is_folder)
}

/// Stable sort; descending order reverses the ascending result
fn sort_records(records: &mut [FileRecord], key: SortKey, order: SortOrder) {
    match key {
        SortKey::Name => records.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase())),
        SortKey::Size => records.sort_by_key(|r| r.size_bytes),
        SortKey::Modified => records.sort_by_key(|r| r.modified_at),
        SortKey::MimeType => records.sort_by(|a, b| a.mime_type.cmp(&b.mime_type)),
    }
    if order == SortOrder::Desc {
        records.reverse();
    }
}

struct SessionState {
    current_folder_id: String,
    files: Vec<FileRecord>,
    folders: Vec<FileRecord>,
    /// Continuation token of the last fetched page, if any
    next_page_token: Option<String>,
    /// Query the current listing was fetched with
    last_query: String,
    /// Bumped on every navigation; stale fetches compare against it
    epoch: u64,
    cache: HashMap<CacheKey, CacheEntry>,
}

impl SessionState {
    fn list_update(&self) -> ListUpdate {
        ListUpdate {
            files: self.files.clone(),
            folders: self.folders.clone(),
            current_folder_id: self.current_folder_id.clone(),
        }
    }

    fn invalidate(&mut self, folder_id: &str) {
        self.cache.retain(|key, _| key.folder_id != folder_id);
    }

    /// Snapshot of both partitions, for optimistic-update rollback
    fn backup(&self) -> (Vec<FileRecord>, Vec<FileRecord>) {
        (self.files.clone(), self.folders.clone())
    }

    fn restore(&mut self, backup: (Vec<FileRecord>, Vec<FileRecord>)) {
        self.files = backup.0;
        self.folders = backup.1;
    }
}

/// Current-folder view over a [`DriveClient`], with response caching and
/// optimistic local mutations.
pub struct FolderSession {
    client: Arc<DriveClient>,
    sink: Arc<dyn UiSink>,
    cache_ttl: Duration,
    state: Mutex<SessionState>,
}

impl FolderSession {
    pub fn new(client: Arc<DriveClient>, sink: Arc<dyn UiSink>) -> Self {
        let cache_ttl = client.config().cache_ttl;
        Self {
            client,
            sink,
            cache_ttl,
            state: Mutex::new(SessionState {
                current_folder_id: ROOT_FOLDER_ID.to_string(),
                files: Vec::new(),
                folders: Vec::new(),
                next_page_token: None,
                last_query: String::new(),
                epoch: 0,
                cache: HashMap::new(),
            }),
        }
    }

    pub async fn current_folder_id(&self) -> String {
        self.state.lock().await.current_folder_id.clone()
    }

    /// Continuation token of the last listing, when more pages exist
    pub async fn next_page_token(&self) -> Option<String> {
        self.state.lock().await.next_page_token.clone()
    }

    /// Read-only copy of the current listing for collaborators
    pub async fn snapshot(&self) -> ListUpdate {
        self.state.lock().await.list_update()
    }

    /// Enter a folder and refresh its listing
    pub async fn navigate_to(&self, folder_id: &str) -> Result<(), DriveError> {
        {
            let mut state = self.state.lock().await;
            state.current_folder_id = folder_id.to_string();
            state.epoch += 1;
        }
        self.refresh("").await
    }

    /// Re-fetch the current folder, serving from cache when a live entry
    /// exists for `(current_folder_id, query, "")`.
    pub async fn refresh(&self, query: &str) -> Result<(), DriveError> {
        let (folder_id, epoch) = {
            let mut state = self.state.lock().await;
            state.last_query = query.to_string();

            let key = CacheKey::new(&state.current_folder_id, query, "");
            let cached = state
                .cache
                .get(&key)
                .filter(|entry| entry.is_live(self.cache_ttl))
                .map(|entry| (entry.records.clone(), entry.next_page_token.clone()));
            if let Some((records, next)) = cached {
                debug!("Cache hit for folder {}", state.current_folder_id);
                let (folders, files) = partition(records);
                state.folders = folders;
                state.files = files;
                state.next_page_token = next;
                let update = state.list_update();
                drop(state);
                self.sink.on_list_updated(update);
                return Ok(());
            }
            (state.current_folder_id.clone(), state.epoch)
        };

        // Network call without holding the state lock
        let page = self.client.list_files(&folder_id, query, None).await?;

        let update = {
            let mut state = self.state.lock().await;
            if state.epoch != epoch {
                debug!("Discarding stale listing for folder {}", folder_id);
                return Ok(());
            }
            state.cache.insert(
                CacheKey::new(&folder_id, query, ""),
                CacheEntry {
                    records: page.records.clone(),
                    next_page_token: page.next_page_token.clone(),
                    fetched_at: Instant::now(),
                },
            );
            let (folders, files) = partition(page.records);
            state.folders = folders;
            state.files = files;
            state.next_page_token = page.next_page_token;
            state.list_update()
        };
        self.sink.on_list_updated(update);
        Ok(())
    }

    /// Fetch a continuation page and append it to the current listing
    pub async fn load_more(&self, page_token: &str) -> Result<(), DriveError> {
        let (folder_id, query, epoch) = {
            let state = self.state.lock().await;
            (
                state.current_folder_id.clone(),
                state.last_query.clone(),
                state.epoch,
            )
        };

        let page = self
            .client
            .list_files(&folder_id, &query, Some(page_token))
            .await?;

        let update = {
            let mut state = self.state.lock().await;
            if state.epoch != epoch {
                debug!("Discarding stale continuation for folder {}", folder_id);
                return Ok(());
            }
            state.cache.insert(
                CacheKey::new(&folder_id, &query, page_token),
                CacheEntry {
                    records: page.records.clone(),
                    next_page_token: page.next_page_token.clone(),
                    fetched_at: Instant::now(),
                },
            );
            let (folders, files) = partition(page.records);
            state.folders.extend(folders);
            state.files.extend(files);
            state.next_page_token = page.next_page_token;
            state.list_update()
        };
        self.sink.on_list_updated(update);
        Ok(())
    }

    /// Sort both partitions independently and notify the sink
    pub async fn sort_by(&self, key: SortKey, order: SortOrder) {
        let update = {
            let mut state = self.state.lock().await;
            sort_records(&mut state.files, key, order);
            sort_records(&mut state.folders, key, order);
            state.list_update()
        };
        self.sink.on_list_updated(update);
    }

    /// Drop every cache entry for the given folder
    pub async fn invalidate_folder(&self, folder_id: &str) {
        self.state.lock().await.invalidate(folder_id);
    }

    /// Upload a local file into the current folder
    pub async fn upload(&self, local_path: &Path) -> Result<FileRecord, DriveError> {
        let folder_id = self.current_folder_id().await;
        let record = self.client.upload_file(local_path, &folder_id).await?;

        let update = {
            let mut state = self.state.lock().await;
            state.invalidate(&folder_id);
            if state.current_folder_id == folder_id {
                state.files.push(record.clone());
                Some(state.list_update())
            } else {
                None
            }
        };
        if let Some(update) = update {
            self.sink.on_list_updated(update);
        }
        Ok(record)
    }

    /// Create a folder inside the current folder
    pub async fn create_folder(&self, name: &str) -> Result<FileRecord, DriveError> {
        let folder_id = self.current_folder_id().await;
        let record = self.client.create_folder(name, &folder_id).await?;

        let update = {
            let mut state = self.state.lock().await;
            state.invalidate(&folder_id);
            if state.current_folder_id == folder_id {
                state.folders.push(record.clone());
                Some(state.list_update())
            } else {
                None
            }
        };
        if let Some(update) = update {
            self.sink.on_list_updated(update);
        }
        Ok(record)
    }

    /// Delete an entry, removing it locally before the remote call and
    /// restoring the pre-delete arrays exactly if the call fails.
    pub async fn delete(&self, file_id: &str) -> Result<(), DriveError> {
        let (folder_id, backup) = {
            let mut state = self.state.lock().await;
            let backup = state.backup();
            state.files.retain(|r| r.id != file_id);
            state.folders.retain(|r| r.id != file_id);
            let update = state.list_update();
            let folder_id = state.current_folder_id.clone();
            drop(state);
            self.sink.on_list_updated(update);
            (folder_id, backup)
        };

        match self.client.delete_file(file_id).await {
            Ok(()) => {
                self.state.lock().await.invalidate(&folder_id);
                Ok(())
            }
            Err(e) => {
                let update = {
                    let mut state = self.state.lock().await;
                    state.restore(backup);
                    state.list_update()
                };
                self.sink.on_list_updated(update);
                Err(e)
            }
        }
    }

    /// Rename an entry in place, rolling back on remote failure
    pub async fn rename(&self, file_id: &str, new_name: &str) -> Result<(), DriveError> {
        let (folder_id, backup) = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            let backup = state.backup();
            for record in state.files.iter_mut().chain(state.folders.iter_mut()) {
                if record.id == file_id {
                    record.name = new_name.to_string();
                }
            }
            let update = state.list_update();
            let folder_id = state.current_folder_id.clone();
            drop(guard);
            self.sink.on_list_updated(update);
            (folder_id, backup)
        };

        match self.client.rename_file(file_id, new_name).await {
            Ok(()) => {
                self.state.lock().await.invalidate(&folder_id);
                Ok(())
            }
            Err(e) => {
                let update = {
                    let mut state = self.state.lock().await;
                    state.restore(backup);
                    state.list_update()
                };
                self.sink.on_list_updated(update);
                Err(e)
            }
        }
    }

    /// Move an entry out of the current folder, rolling back on failure
    pub async fn move_to(&self, file_id: &str, new_folder_id: &str) -> Result<(), DriveError> {
        let (folder_id, backup) = {
            let mut state = self.state.lock().await;
            let backup = state.backup();
            state.files.retain(|r| r.id != file_id);
            state.folders.retain(|r| r.id != file_id);
            let update = state.list_update();
            let folder_id = state.current_folder_id.clone();
            drop(state);
            self.sink.on_list_updated(update);
            (folder_id, backup)
        };

        match self.client.move_file(file_id, new_folder_id).await {
            Ok(()) => {
                let mut state = self.state.lock().await;
                state.invalidate(&folder_id);
                state.invalidate(new_folder_id);
                info!("Moved {} to {}", file_id, new_folder_id);
                Ok(())
            }
            Err(e) => {
                let update = {
                    let mut state = self.state.lock().await;
                    state.restore(backup);
                    state.list_update()
                };
                self.sink.on_list_updated(update);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FOLDER_MIME_TYPE;

    fn record(id: &str, name: &str, mime: &str, size: u64) -> FileRecord {
        FileRecord {
            id: id.to_string(),
            name: name.to_string(),
            mime_type: mime.to_string(),
            size_bytes: size,
            modified_at: None,
            created_at: None,
            is_folder: mime == FOLDER_MIME_TYPE,
            parents: vec![ROOT_FOLDER_ID.to_string()],
            download_url: None,
            thumbnail_url: None,
        }
    }

    #[test]
    fn test_partition_preserves_order() {
        let records = vec![
            record("1", "b", FOLDER_MIME_TYPE, 0),
            record("2", "doc.txt", "text/plain", 500),
            record("3", "a", FOLDER_MIME_TYPE, 0),
        ];
        let (folders, files) = partition(records);
        assert_eq!(
            folders.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
            ["1", "3"]
        );
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].id, "2");
    }

    #[test]
    fn test_sort_by_size_desc() {
        let mut records = vec![
            record("1", "a", "text/plain", 10),
            record("2", "b", "text/plain", 500),
            record("3", "c", "text/plain", 200),
        ];
        sort_records(&mut records, SortKey::Size, SortOrder::Desc);
        let sizes: Vec<u64> = records.iter().map(|r| r.size_bytes).collect();
        assert!(sizes.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn test_sort_by_name_is_case_insensitive() {
        let mut records = vec![
            record("1", "zebra", "text/plain", 0),
            record("2", "Apple", "text/plain", 0),
            record("3", "mango", "text/plain", 0),
        ];
        sort_records(&mut records, SortKey::Name, SortOrder::Asc);
        let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["Apple", "mango", "zebra"]);
    }

    #[test]
    fn test_cache_entry_expiry() {
        let entry = CacheEntry {
            records: Vec::new(),
            next_page_token: None,
            fetched_at: Instant::now(),
        };
        assert!(entry.is_live(Duration::from_secs(300)));
        assert!(!entry.is_live(Duration::ZERO));
    }

    #[test]
    fn test_cache_key_distinguishes_components() {
        let base = CacheKey::new("root", "", "");
        assert_eq!(base, CacheKey::new("root", "", ""));
        assert_ne!(base, CacheKey::new("other", "", ""));
        assert_ne!(base, CacheKey::new("root", "report", ""));
        assert_ne!(base, CacheKey::new("root", "", "page2"));
    }

    #[test]
    fn test_invalidate_drops_only_matching_folder() {
        let mut state = SessionState {
            current_folder_id: ROOT_FOLDER_ID.to_string(),
            files: Vec::new(),
            folders: Vec::new(),
            next_page_token: None,
            last_query: String::new(),
            epoch: 0,
            cache: HashMap::new(),
        };
        for (folder, token) in [("root", ""), ("root", "p2"), ("other", "")] {
            state.cache.insert(
                CacheKey::new(folder, "", token),
                CacheEntry {
                    records: Vec::new(),
                    next_page_token: None,
                    fetched_at: Instant::now(),
                },
            );
        }
        state.invalidate("root");
        assert_eq!(state.cache.len(), 1);
        assert!(state.cache.contains_key(&CacheKey::new("other", "", "")));
    }
}
