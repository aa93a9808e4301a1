//! Token storage and refresh
//!
//! Holds the bearer token and its expiry, persists them through a pluggable
//! [`TokenStore`], and performs the refresh-token grant when the access token
//! goes stale. Refreshes are single-flight: a caller that arrives while a
//! grant is already in flight waits for it and reuses the fresh token
//! instead of issuing a second grant.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::DriveConfig;
use crate::types::DriveError;

/// Stored OAuth2 tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<i64>, // Unix timestamp
}

impl StoredTokens {
    /// Check if token is expired (with 5 min buffer)
    pub fn is_expired(&self) -> bool {
        if let Some(expires_at) = self.expires_at {
            let now = chrono::Utc::now().timestamp();
            expires_at <= now + 300 // 5 minutes buffer
        } else {
            false // No expiry = assume valid
        }
    }
}

/// Durable holder of the bearer token and its expiry
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn load(&self) -> Result<Option<StoredTokens>, DriveError>;
    async fn save(&self, tokens: &StoredTokens) -> Result<(), DriveError>;
    async fn clear(&self) -> Result<(), DriveError>;
}

/// In-memory token store, used by tests and short-lived sessions
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    tokens: RwLock<Option<StoredTokens>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with an initial token set
    pub fn with_tokens(tokens: StoredTokens) -> Self {
        Self { tokens: RwLock::new(Some(tokens)) }
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn load(&self) -> Result<Option<StoredTokens>, DriveError> {
        Ok(self.tokens.read().await.clone())
    }

    async fn save(&self, tokens: &StoredTokens) -> Result<(), DriveError> {
        *self.tokens.write().await = Some(tokens.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), DriveError> {
        *self.tokens.write().await = None;
        Ok(())
    }
}

/// Token store backed by a JSON file under the user config directory
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Default location: `<config_dir>/aerodrive/tokens.json`
    pub fn default_path() -> Result<Self, DriveError> {
        let base = dirs::config_dir()
            .ok_or_else(|| DriveError::InvalidConfig("could not find config directory".to_string()))?;
        Ok(Self::new(base.join("aerodrive").join("tokens.json")))
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn load(&self) -> Result<Option<StoredTokens>, DriveError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(json) => {
                let tokens = serde_json::from_str(&json)
                    .map_err(|e| DriveError::Parse(format!("stored tokens: {}", e)))?;
                Ok(Some(tokens))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(DriveError::Io(e)),
        }
    }

    async fn save(&self, tokens: &StoredTokens) -> Result<(), DriveError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(tokens)
            .map_err(|e| DriveError::Parse(format!("serialize tokens: {}", e)))?;
        tokio::fs::write(&self.path, json).await?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), DriveError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DriveError::Io(e)),
        }
    }
}

/// Successful response from the token endpoint
#[derive(Debug, Deserialize)]
struct TokenGrant {
    access_token: String,
    expires_in: Option<i64>,
    refresh_token: Option<String>,
}

/// Manages the access token lifecycle for a single remote account.
///
/// Every [`crate::client::DriveClient`] call goes through [`bearer`] before
/// hitting the network; the 401 path goes through [`force_refresh`].
///
/// [`bearer`]: TokenBroker::bearer
/// [`force_refresh`]: TokenBroker::force_refresh
pub struct TokenBroker {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    store: Arc<dyn TokenStore>,
    cached: RwLock<Option<StoredTokens>>,
    /// Single-flight gate for the refresh grant
    refresh_gate: Mutex<()>,
}

impl TokenBroker {
    pub fn new(config: &DriveConfig, store: Arc<dyn TokenStore>, http: reqwest::Client) -> Self {
        Self {
            http,
            token_url: config.token_url.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            store,
            cached: RwLock::new(None),
            refresh_gate: Mutex::new(()),
        }
    }

    /// Seed the broker with freshly obtained tokens (login)
    pub async fn install(&self, tokens: StoredTokens) -> Result<(), DriveError> {
        self.store.save(&tokens).await?;
        *self.cached.write().await = Some(tokens);
        Ok(())
    }

    /// Drop broker state and the backing store (logout)
    pub async fn logout(&self) -> Result<(), DriveError> {
        *self.cached.write().await = None;
        self.store.clear().await?;
        info!("Tokens cleared");
        Ok(())
    }

    /// Whether any token material is available
    pub async fn has_tokens(&self) -> bool {
        if self.cached.read().await.is_some() {
            return true;
        }
        matches!(self.store.load().await, Ok(Some(_)))
    }

    /// Get an `Authorization` header value, refreshing first if the stored
    /// token is expired.
    pub async fn bearer(&self) -> Result<String, DriveError> {
        if let Some(tokens) = self.current().await? {
            if !tokens.is_expired() {
                return Ok(format!("Bearer {}", tokens.access_token));
            }
        }
        self.refresh_single_flight(None).await
    }

    /// Refresh after the remote API rejected `stale_access` with a 401.
    ///
    /// If another caller already replaced the token while this one was
    /// waiting on the gate, the replacement is returned without a second
    /// grant.
    pub async fn force_refresh(&self, stale_access: &str) -> Result<String, DriveError> {
        self.refresh_single_flight(Some(stale_access)).await
    }

    /// Cached tokens, falling back to the store on first use
    async fn current(&self) -> Result<Option<StoredTokens>, DriveError> {
        if let Some(tokens) = self.cached.read().await.clone() {
            return Ok(Some(tokens));
        }
        let loaded = self.store.load().await?;
        if let Some(ref tokens) = loaded {
            *self.cached.write().await = Some(tokens.clone());
        }
        Ok(loaded)
    }

    async fn refresh_single_flight(&self, stale_access: Option<&str>) -> Result<String, DriveError> {
        let _gate = self.refresh_gate.lock().await;

        // Re-check after acquiring the gate: a refresh that was in flight
        // while we waited may already have produced a usable token.
        if let Some(tokens) = self.current().await? {
            let replaced = stale_access.map_or(true, |stale| tokens.access_token != stale);
            if replaced && !tokens.is_expired() {
                debug!("Reusing token refreshed by a concurrent caller");
                return Ok(format!("Bearer {}", tokens.access_token));
            }
        }

        let refresh_token = match self.current().await? {
            Some(StoredTokens { refresh_token: Some(rt), .. }) => rt,
            _ => {
                warn!("No refresh token available");
                self.invalidate().await;
                return Err(DriveError::AuthExpired);
            }
        };

        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
            ])
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                warn!("Token refresh request failed: {}", e);
                self.invalidate().await;
                return Err(DriveError::AuthExpired);
            }
        };

        if !response.status().is_success() {
            warn!("Token refresh rejected with status {}", response.status());
            self.invalidate().await;
            return Err(DriveError::AuthExpired);
        }

        let grant: TokenGrant = match response.json().await {
            Ok(g) => g,
            Err(e) => {
                warn!("Token refresh returned malformed payload: {}", e);
                self.invalidate().await;
                return Err(DriveError::AuthExpired);
            }
        };

        let tokens = StoredTokens {
            access_token: grant.access_token,
            // Keep old refresh token if not returned
            refresh_token: grant.refresh_token.or(Some(refresh_token)),
            expires_at: grant
                .expires_in
                .map(|secs| chrono::Utc::now().timestamp() + secs),
        };

        self.store.save(&tokens).await?;
        let header = format!("Bearer {}", tokens.access_token);
        *self.cached.write().await = Some(tokens);
        info!("Access token refreshed");
        Ok(header)
    }

    /// A failed refresh invalidates the token state entirely
    async fn invalidate(&self) {
        *self.cached.write().await = None;
        if let Err(e) = self.store.clear().await {
            warn!("Failed to clear token store: {}", e);
        }
    }
}
