//! Drive client configuration

use std::time::Duration;

use crate::types::DriveError;

/// Google Drive API base URL
pub const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";
/// Multipart upload endpoint base URL
pub const UPLOAD_API_BASE: &str = "https://www.googleapis.com/upload/drive/v3";
/// OAuth2 token endpoint
pub const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Configuration for [`crate::client::DriveClient`] and
/// [`crate::session::FolderSession`].
///
/// Endpoints default to the public Google APIs and are overridable so tests
/// can point the client at a local fixture.
#[derive(Debug, Clone)]
pub struct DriveConfig {
    /// OAuth2 client id
    pub client_id: String,
    /// OAuth2 client secret
    pub client_secret: String,
    /// Base URL of the files API
    pub api_base: String,
    /// Base URL of the multipart upload API
    pub upload_base: String,
    /// Token refresh endpoint
    pub token_url: String,
    /// Listing page size
    pub page_size: u32,
    /// Time-to-live of cached folder listings
    pub cache_ttl: Duration,
}

impl DriveConfig {
    pub fn new(client_id: &str, client_secret: &str) -> Self {
        Self {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            api_base: DRIVE_API_BASE.to_string(),
            upload_base: UPLOAD_API_BASE.to_string(),
            token_url: TOKEN_URL.to_string(),
            page_size: 100,
            cache_ttl: Duration::from_secs(300),
        }
    }

    /// Override every endpoint with one origin, keeping the Drive path
    /// layout. Used by tests and by self-hosted API proxies.
    pub fn with_origin(mut self, origin: &str) -> Self {
        let origin = origin.trim_end_matches('/');
        self.api_base = format!("{}/drive/v3", origin);
        self.upload_base = format!("{}/upload/drive/v3", origin);
        self.token_url = format!("{}/token", origin);
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Validate credentials and endpoint URLs
    pub fn validate(&self) -> Result<(), DriveError> {
        if self.client_id.trim().is_empty() {
            return Err(DriveError::InvalidConfig("client_id is required".to_string()));
        }
        if self.client_secret.trim().is_empty() {
            return Err(DriveError::InvalidConfig("client_secret is required".to_string()));
        }
        for endpoint in [&self.api_base, &self.upload_base, &self.token_url] {
            url::Url::parse(endpoint)
                .map_err(|e| DriveError::InvalidConfig(format!("invalid endpoint '{}': {}", endpoint, e)))?;
        }
        if self.page_size == 0 || self.page_size > 1000 {
            return Err(DriveError::InvalidConfig(format!(
                "page_size {} out of range 1-1000",
                self.page_size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = DriveConfig::new("id", "secret");
        assert!(config.validate().is_ok());
        assert_eq!(config.api_base, DRIVE_API_BASE);
        assert_eq!(config.page_size, 100);
        assert_eq!(config.cache_ttl, Duration::from_secs(300));
    }

    #[test]
    fn test_with_origin_rewrites_endpoints() {
        let config = DriveConfig::new("id", "secret").with_origin("http://127.0.0.1:9900/");
        assert_eq!(config.api_base, "http://127.0.0.1:9900/drive/v3");
        assert_eq!(config.upload_base, "http://127.0.0.1:9900/upload/drive/v3");
        assert_eq!(config.token_url, "http://127.0.0.1:9900/token");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(DriveConfig::new("", "secret").validate().is_err());
        assert!(DriveConfig::new("id", "").validate().is_err());

        let bad_url = DriveConfig {
            api_base: "not a url".to_string(),
            ..DriveConfig::new("id", "secret")
        };
        assert!(bad_url.validate().is_err());

        let bad_page = DriveConfig::new("id", "secret").with_page_size(0);
        assert!(bad_page.validate().is_err());
    }
}
