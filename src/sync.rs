//! Background sync loop
//!
//! Timer-driven re-fetch of the current folder and the storage quota.
//! A pass that is still running when the next tick fires causes that tick
//! to be skipped outright (not queued, not retried). A failed pass is
//! logged and reported; it never stops the timer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::DriveClient;
use crate::session::FolderSession;
use crate::types::UiSink;

/// Re-entrancy flag: `idle -> syncing -> idle`
#[derive(Debug, Default)]
pub(crate) struct SyncGuard(AtomicBool);

impl SyncGuard {
    /// Enter the syncing state; returns false when a pass is already running
    pub(crate) fn try_begin(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn end(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub(crate) fn is_active(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Periodic background refresh of the folder session and storage quota
pub struct SyncLoop {
    session: Arc<FolderSession>,
    client: Arc<DriveClient>,
    sink: Arc<dyn UiSink>,
    guard: Arc<SyncGuard>,
    handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SyncLoop {
    pub fn new(
        session: Arc<FolderSession>,
        client: Arc<DriveClient>,
        sink: Arc<dyn UiSink>,
    ) -> Self {
        Self {
            session,
            client,
            sink,
            guard: Arc::new(SyncGuard::default()),
            handle: std::sync::Mutex::new(None),
        }
    }

    /// Arm the repeating timer. Restarts the loop when already armed.
    pub fn start(&self, interval: Duration) {
        self.stop();

        let session = Arc::clone(&self.session);
        let client = Arc::clone(&self.client);
        let sink = Arc::clone(&self.sink);
        let guard = Arc::clone(&self.guard);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first interval tick completes immediately; consume it so
            // the loop waits a full period before its first pass.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                Self::run_pass(&session, &client, &sink, &guard).await;
            }
        });

        *self.handle.lock().unwrap_or_else(|e| e.into_inner()) = Some(task);
        info!("Sync loop started (interval {:?})", interval);
    }

    /// Disarm the timer. An in-flight pass is abandoned, not awaited.
    pub fn stop(&self) {
        if let Some(task) = self.handle.lock().unwrap_or_else(|e| e.into_inner()).take() {
            task.abort();
            self.guard.end();
            info!("Sync loop stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    pub fn is_syncing(&self) -> bool {
        self.guard.is_active()
    }

    /// Run one sync pass immediately, subject to the same re-entrancy rule
    pub async fn sync_now(&self) {
        Self::run_pass(&self.session, &self.client, &self.sink, &self.guard).await;
    }

    async fn run_pass(
        session: &FolderSession,
        client: &DriveClient,
        sink: &Arc<dyn UiSink>,
        guard: &SyncGuard,
    ) {
        if !guard.try_begin() {
            debug!("Sync tick skipped, previous pass still running");
            return;
        }
        sink.on_sync_state_changed(true);

        // Both legs run concurrently; either failure is reported without
        // aborting the other.
        let (refresh_result, quota_result) =
            tokio::join!(session.refresh(""), client.storage_quota());

        if let Err(e) = refresh_result {
            warn!("Background refresh failed: {}", e);
        }
        match quota_result {
            Ok(quota) => sink.on_storage_updated(quota.into()),
            Err(e) => warn!("Storage quota fetch failed: {}", e),
        }

        guard.end();
        sink.on_sync_state_changed(false);
    }
}

impl Drop for SyncLoop {
    fn drop(&mut self) {
        self.stop();
    }
}
