//! URL memoization
//!
//! Entries never expire on their own; signed URLs carry their own expiration
//! and the whole cache is cleared on demand.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};

use crate::error::Result;
use crate::transport::HttpMethod;

/// Which operation produced a cached URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UrlOperation {
    /// Unsigned object URL
    Public,
    /// HMAC-SHA1 query-string signed URL
    Legacy,
    /// URL presigned by the storage transport
    Presigned,
    /// Presigned URL with a download disposition
    Download,
}

/// Everything that influences a produced URL
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UrlCacheKey {
    pub operation: UrlOperation,
    pub key: String,
    pub expiry_secs: u64,
    pub method: HttpMethod,
    /// Stable encoding of method-specific options
    pub fingerprint: String,
}

impl UrlCacheKey {
    pub fn new(
        operation: UrlOperation,
        key: impl Into<String>,
        expiry_secs: u64,
        method: HttpMethod,
        fingerprint: impl Into<String>,
    ) -> Self {
        Self {
            operation,
            key: key.into(),
            expiry_secs,
            method,
            fingerprint: fingerprint.into(),
        }
    }
}

/// Thread-safe URL cache
#[derive(Debug, Default)]
pub struct UrlCache {
    entries: Mutex<HashMap<UrlCacheKey, String>>,
}

impl UrlCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached URL for `key`, computing and storing it on a miss
    ///
    /// Errors from `compute` are returned and nothing is stored.
    pub fn get_or_compute<F>(&self, key: UrlCacheKey, compute: F) -> Result<String>
    where
        F: FnOnce() -> Result<String>,
    {
        let mut entries = self.lock();
        if let Some(url) = entries.get(&key) {
            return Ok(url.clone());
        }
        let url = compute()?;
        entries.insert(key, url.clone());
        Ok(url)
    }

    /// Async variant of [`UrlCache::get_or_compute`]
    ///
    /// The lock is not held while `compute` runs. If two callers race on the
    /// same key, the first stored URL wins and both get it back.
    pub async fn get_or_compute_async<F, Fut>(&self, key: UrlCacheKey, compute: F) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        if let Some(url) = self.get(&key) {
            return Ok(url);
        }
        let url = compute().await?;
        Ok(self.lock().entry(key).or_insert(url).clone())
    }

    pub fn get(&self, key: &UrlCacheKey) -> Option<String> {
        self.lock().get(key).cloned()
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<UrlCacheKey, String>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}
