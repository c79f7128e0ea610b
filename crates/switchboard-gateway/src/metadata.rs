//! Gateway metadata
//!
//! Where to connect and how many shards to run, as advertised by the REST API.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Identify quota reported by the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStartLimit {
    /// Identifies allowed per window
    pub total: u32,
    pub remaining: u32,
    /// Milliseconds until `remaining` resets to `total`
    pub reset_after: u64,
    /// Shards that may identify concurrently
    pub max_concurrency: u32,
}

impl SessionStartLimit {
    /// Identifies already consumed in the current window
    pub fn used(&self) -> usize {
        self.total.saturating_sub(self.remaining) as usize
    }

    pub fn resets_in(&self) -> Duration {
        Duration::from_millis(self.reset_after)
    }

    pub fn resets_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + chrono::Duration::milliseconds(self.reset_after.min(i64::MAX as u64) as i64)
    }
}

impl Default for SessionStartLimit {
    fn default() -> Self {
        Self {
            total: 1000,
            remaining: 1000,
            reset_after: 0,
            max_concurrency: 1,
        }
    }
}

/// Response of `GET /gateway/bot`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayMetadata {
    pub url: String,
    /// Recommended shard count
    pub shards: u32,
    pub session_start_limit: SessionStartLimit,
}

impl GatewayMetadata {
    pub fn new(url: impl Into<String>, shards: u32) -> Self {
        Self {
            url: url.into(),
            shards,
            session_start_limit: SessionStartLimit::default(),
        }
    }
}

/// Metadata error type
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("{0}")]
    Unavailable(String),
}

/// Supplies gateway metadata
#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn gateway_metadata(&self) -> Result<GatewayMetadata, MetadataError>;
}

/// Fetches metadata from the REST API
pub struct HttpMetadataSource {
    client: reqwest::Client,
    endpoint: String,
    authorization: String,
}

impl HttpMetadataSource {
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(api_base_url: &str, token: &str) -> Result<Self, MetadataError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .timeout(Self::REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/gateway/bot", api_base_url.trim_end_matches('/')),
            authorization: format!("Bot {token}"),
        })
    }
}

#[async_trait]
impl MetadataSource for HttpMetadataSource {
    async fn gateway_metadata(&self) -> Result<GatewayMetadata, MetadataError> {
        let response = self
            .client
            .get(&self.endpoint)
            .header(reqwest::header::AUTHORIZATION, &self.authorization)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MetadataError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let metadata: GatewayMetadata = response.json().await?;
        tracing::debug!(
            url = %metadata.url,
            shards = metadata.shards,
            remaining = metadata.session_start_limit.remaining,
            "Fetched gateway metadata"
        );
        Ok(metadata)
    }
}

/// Fixed metadata, replaceable at runtime
#[derive(Debug)]
pub struct StaticMetadata {
    current: Mutex<GatewayMetadata>,
}

impl StaticMetadata {
    pub fn new(metadata: GatewayMetadata) -> Self {
        Self {
            current: Mutex::new(metadata),
        }
    }

    /// Serve `metadata` from now on
    pub fn set(&self, metadata: GatewayMetadata) {
        *self.current.lock() = metadata;
    }

    pub fn set_shards(&self, shards: u32) {
        self.current.lock().shards = shards;
    }
}

#[async_trait]
impl MetadataSource for StaticMetadata {
    async fn gateway_metadata(&self) -> Result<GatewayMetadata, MetadataError> {
        Ok(self.current.lock().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_deserialization() {
        let metadata: GatewayMetadata = serde_json::from_str(
            r#"{
                "url": "wss://gateway.example",
                "shards": 9,
                "session_start_limit": {
                    "total": 1000,
                    "remaining": 999,
                    "reset_after": 14400000,
                    "max_concurrency": 1
                }
            }"#,
        )
        .unwrap();

        assert_eq!(metadata.url, "wss://gateway.example");
        assert_eq!(metadata.shards, 9);
        assert_eq!(metadata.session_start_limit.used(), 1);
        assert_eq!(
            metadata.session_start_limit.resets_in(),
            Duration::from_secs(4 * 60 * 60)
        );
    }

    #[test]
    fn test_resets_at() {
        let limit = SessionStartLimit {
            reset_after: 60_000,
            ..SessionStartLimit::default()
        };
        let now = Utc::now();
        assert_eq!((limit.resets_at(now) - now).num_seconds(), 60);
    }

    #[tokio::test]
    async fn test_static_metadata_can_be_swapped() {
        let source = StaticMetadata::new(GatewayMetadata::new("wss://gateway.example", 2));
        assert_eq!(source.gateway_metadata().await.unwrap().shards, 2);

        source.set_shards(4);
        assert_eq!(source.gateway_metadata().await.unwrap().shards, 4);
    }

    #[test]
    fn test_http_source_endpoint() {
        let source = HttpMetadataSource::new("https://api.example/v10/", "abc").unwrap();
        assert_eq!(source.endpoint, "https://api.example/v10/gateway/bot");
        assert_eq!(source.authorization, "Bot abc");
    }
}
