//! Checksum-validated cache for crawled page text.
//!
//! Crawled text ends up verbatim in prompts, so an entry is only served if its
//! SHA-256 checksum still matches. A mismatch is treated as a miss and the page
//! is fetched again.

use moka::future::Cache;
use sha2::{Digest, Sha256};
use std::time::Duration;

/// Cached text paired with its checksum.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ValidatedCacheEntry {
    /// Cached page text.
    pub data: String,
    /// SHA-256 of `data`, hex encoded.
    pub checksum: String,
}

impl ValidatedCacheEntry {
    pub fn new(data: String) -> Self {
        let checksum = Self::compute_checksum(&data);
        Self { data, checksum }
    }

    fn compute_checksum(data: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn is_valid(&self) -> bool {
        Self::compute_checksum(&self.data) == self.checksum
    }

    /// Serialized form stored in the cache (data + checksum).
    pub fn serialize(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Returns the data if the serialized entry parses and its checksum matches.
    pub fn deserialize_and_validate(serialized: &str) -> Option<String> {
        let entry: ValidatedCacheEntry = serde_json::from_str(serialized).ok()?;

        if entry.is_valid() {
            Some(entry.data)
        } else {
            tracing::warn!(
                "Cache validation failed: checksum mismatch. Expected: {}, Data length: {}",
                entry.checksum,
                entry.data.len()
            );
            None
        }
    }
}

/// URL -> cleaned text, 1 hour TTL.
#[derive(Clone)]
pub struct CrawlCache {
    inner: Cache<String, String>,
}

impl CrawlCache {
    pub fn new(ttl: Duration, max_capacity: u64) -> Self {
        Self {
            inner: Cache::builder()
                .time_to_live(ttl)
                .max_capacity(max_capacity)
                .build(),
        }
    }

    pub async fn get(&self, url: &str) -> Option<String> {
        let serialized = self.inner.get(url).await?;
        match ValidatedCacheEntry::deserialize_and_validate(&serialized) {
            Some(text) => {
                tracing::debug!("Crawl cache HIT for {}", url);
                Some(text)
            }
            None => {
                self.inner.invalidate(url).await;
                None
            }
        }
    }

    pub async fn insert(&self, url: &str, text: String) {
        let entry = ValidatedCacheEntry::new(text);
        self.inner.insert(url.to_string(), entry.serialize()).await;
    }

    #[cfg(test)]
    async fn insert_raw(&self, url: &str, serialized: String) {
        self.inner.insert(url.to_string(), serialized).await;
    }
}

impl Default for CrawlCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600), 10_000)
    }
}
