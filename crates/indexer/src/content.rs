//! Content-addressed metadata: gateway fetcher and store-backed cache.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::retry::{now_ms, RetryTracker};
use crate::storage::{now_secs, ContentCacheEntry, Storage};

/// Retry namespace used for content fetches.
pub const CONTENT_NAMESPACE: &str = "content";
/// Retry operation used for content fetches.
pub const FETCH_OPERATION: &str = "fetch";

/// Source of content-addressed JSON blobs.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    /// Fetch the raw JSON text stored under `content_id`.
    ///
    /// Implementations must only return text that parses as JSON.
    async fn fetch(&self, content_id: &str) -> Result<String>;
}

/// IPFS HTTP gateway client.
#[derive(Clone)]
pub struct IpfsFetcher {
    client: Client,
    gateway: String,
    max_bytes: usize,
}

impl IpfsFetcher {
    /// Build a fetcher for `gateway` (e.g. `https://ipfs.io/ipfs/`).
    pub fn new(gateway: &str, max_bytes: usize, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent("roundmirror-indexer/content")
            .build()
            .context("Failed to build content HTTP client")?;

        let mut gateway = gateway.trim().to_string();
        if !gateway.ends_with('/') {
            gateway.push('/');
        }

        Ok(Self {
            client,
            gateway,
            max_bytes,
        })
    }

    fn url_for(&self, content_id: &str) -> String {
        format!("{}{}", self.gateway, content_id)
    }
}

#[async_trait]
impl ContentFetcher for IpfsFetcher {
    async fn fetch(&self, content_id: &str) -> Result<String> {
        let response = self
            .client
            .get(self.url_for(content_id))
            .send()
            .await
            .context("Failed to fetch content")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Gateway returned {}", status);
        }

        if let Some(len) = response.content_length() {
            if len as usize > self.max_bytes {
                anyhow::bail!("Content too large: {} bytes", len);
            }
        }

        let bytes = response.bytes().await.context("Failed to read content")?;
        if bytes.len() > self.max_bytes {
            anyhow::bail!("Content too large: {} bytes", bytes.len());
        }

        let text = String::from_utf8(bytes.to_vec()).context("Content is not UTF-8")?;
        serde_json::from_str::<Value>(&text).context("Content is not valid JSON")?;

        Ok(text)
    }
}

/// Normalize a content id: trim whitespace and strip `ipfs://` (and a
/// leading `ipfs/` path segment). Empty ids normalize to `None`.
pub fn normalize_content_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let stripped = trimmed.strip_prefix("ipfs://").unwrap_or(trimmed);
    let stripped = stripped.strip_prefix("ipfs/").unwrap_or(stripped);
    let stripped = stripped.trim_start_matches('/').trim();

    if stripped.is_empty() {
        None
    } else {
        Some(stripped.to_string())
    }
}

/// Get-or-fetch cache over a [`ContentFetcher`].
///
/// Cached blobs never expire. Fetch failures are recorded in the
/// [`RetryTracker`] and the id is not fetched again until its backoff
/// elapses; meanwhile lookups resolve to `None`.
#[derive(Clone)]
pub struct ContentCache {
    storage: Storage,
    retry: RetryTracker,
    fetcher: Arc<dyn ContentFetcher>,
}

impl ContentCache {
    /// Create a cache.
    pub fn new(storage: Storage, retry: RetryTracker, fetcher: Arc<dyn ContentFetcher>) -> Self {
        Self {
            storage,
            retry,
            fetcher,
        }
    }

    /// Resolve a content id to its JSON document.
    ///
    /// Returns `None` when the id is empty, the fetch is in backoff, or the
    /// fetch failed. Never returns an error.
    pub async fn get_or_fetch(&self, content_id: &str) -> Option<Value> {
        self.get_or_fetch_at(content_id, now_ms()).await
    }

    /// [`get_or_fetch`](Self::get_or_fetch) against an explicit clock.
    pub async fn get_or_fetch_at(&self, content_id: &str, now_ms: i64) -> Option<Value> {
        let content_id = normalize_content_id(content_id)?;

        match self.resolve(&content_id, now_ms).await {
            Ok(value) => value,
            Err(e) => {
                warn!("Content lookup for {} failed: {:#}", content_id, e);
                None
            }
        }
    }

    async fn resolve(&self, content_id: &str, now_ms: i64) -> Result<Option<Value>> {
        if let Some(entry) = self.storage.get_cached_content(content_id).await? {
            let value = serde_json::from_str(&entry.raw_content)
                .with_context(|| format!("Cached content {} is not valid JSON", content_id))?;
            return Ok(Some(value));
        }

        if !self
            .retry
            .should_retry_at(CONTENT_NAMESPACE, FETCH_OPERATION, content_id, now_ms)
            .await?
        {
            debug!("Content {} is in backoff, skipping fetch", content_id);
            return Ok(None);
        }

        let fetched = self
            .fetcher
            .fetch(content_id)
            .await
            .and_then(|raw| Ok((serde_json::from_str::<Value>(&raw)?, raw)));

        match fetched {
            Ok((value, raw_content)) => {
                self.storage
                    .put_cached_content(&ContentCacheEntry {
                        content_id: content_id.to_string(),
                        raw_content,
                        fetched_at: now_secs(),
                    })
                    .await?;
                self.retry
                    .record_success(CONTENT_NAMESPACE, FETCH_OPERATION, content_id)
                    .await?;
                Ok(Some(value))
            }
            Err(e) => {
                self.retry
                    .record_failure_at(
                        CONTENT_NAMESPACE,
                        FETCH_OPERATION,
                        content_id,
                        &format!("{:#}", e),
                        now_ms,
                    )
                    .await?;
                Ok(None)
            }
        }
    }
}
