//! Bucket handle
//!
//! A `Bucket` binds one validated configuration to its endpoint decision,
//! clock synchronizer, legacy signer and URL cache. URL operations are
//! answered locally; object I/O and modern presigning go to the
//! [`StorageTransport`].

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tracing::debug;

use crate::cache::{UrlCache, UrlCacheKey, UrlOperation};
use crate::clock::{ClockSync, SystemClock, WallClock};
use crate::config::{BucketConfig, validate_base_url};
use crate::endpoint::{self, EndpointDecision, EndpointKind};
use crate::error::{Error, Result};
use crate::path::{compose, encode_key};
use crate::signer::LegacySigner;
use crate::transport::{
    DownloadOptions, HttpMethod, ListOptions, ListPage, ObjectAcl, ObjectAclInfo, ObjectInfo,
    PresignOptions, PresignRequest, PutOptions, StorageTransport,
};

/// Handle to a configured bucket
pub struct Bucket {
    config: Arc<BucketConfig>,
    endpoint: EndpointDecision,
    cdn_url: RwLock<Option<String>>,
    /// User metadata written with every upload; per-call metadata wins
    default_metadata: RwLock<BTreeMap<String, String>>,
    clock: ClockSync,
    signer: LegacySigner,
    cache: UrlCache,
    transport: Arc<dyn StorageTransport>,
}

impl Bucket {
    /// Create a handle using the system clock
    pub fn new(config: BucketConfig, transport: Arc<dyn StorageTransport>) -> Result<Self> {
        Self::with_wall_clock(config, transport, Arc::new(SystemClock))
    }

    /// Create a handle with a custom local clock
    pub fn with_wall_clock(
        config: BucketConfig,
        transport: Arc<dyn StorageTransport>,
        wall: Arc<dyn WallClock>,
    ) -> Result<Self> {
        let config = Arc::new(config.validated()?);
        let endpoint = EndpointDecision::resolve(&config);
        let probe_timeout = Duration::from_millis(config.timeout_config().clock_probe_ms);

        Ok(Self {
            cdn_url: RwLock::new(config.cdn_url.clone()),
            default_metadata: RwLock::new(BTreeMap::new()),
            clock: ClockSync::new(Arc::clone(&transport), &config.bucket, wall, probe_timeout),
            signer: LegacySigner::new(Arc::clone(&config), endpoint.clone()),
            cache: UrlCache::new(),
            endpoint,
            config,
            transport,
        })
    }

    // Configuration accessors

    pub fn config(&self) -> &BucketConfig {
        &self.config
    }

    pub fn alias(&self) -> &str {
        &self.config.alias
    }

    pub fn bucket(&self) -> &str {
        &self.config.bucket
    }

    pub fn region(&self) -> &str {
        &self.config.region
    }

    pub fn access_key(&self) -> &str {
        &self.config.access_key
    }

    pub fn root_prefix(&self) -> &str {
        &self.config.root_prefix
    }

    pub fn endpoint(&self) -> &EndpointDecision {
        &self.endpoint
    }

    pub fn endpoint_kind(&self) -> EndpointKind {
        self.endpoint.kind
    }

    pub fn is_path_style(&self) -> bool {
        self.endpoint.path_style
    }

    pub fn is_accelerated(&self) -> bool {
        self.endpoint.kind == EndpointKind::Accelerate
    }

    pub fn has_custom_endpoint(&self) -> bool {
        self.endpoint.kind == EndpointKind::Custom
    }

    pub fn cdn_url(&self) -> Option<String> {
        self.cdn_url.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn transport(&self) -> &Arc<dyn StorageTransport> {
        &self.transport
    }

    /// Full object key for `key`, optionally qualified with the bucket name
    pub fn path(&self, key: &str, include_bucket: bool) -> String {
        compose(&self.config.root_prefix, &self.config.bucket, key, include_bucket)
    }

    // URL operations

    /// Public URL of an object
    ///
    /// With `use_cdn` and a configured CDN the URL points at the CDN;
    /// otherwise at the resolved endpoint.
    pub fn object_url(&self, key: &str, use_https: bool, use_cdn: bool) -> Result<String> {
        let cache_key = UrlCacheKey::new(
            UrlOperation::Public,
            key,
            0,
            HttpMethod::Get,
            format!("https={use_https};cdn={use_cdn}"),
        );

        self.cache.get_or_compute(cache_key, || {
            let cdn = self.cdn_url();
            endpoint::public_url(
                &self.config,
                &self.endpoint,
                cdn.as_deref(),
                key,
                use_https,
                use_cdn,
            )
        })
    }

    /// Query-string signed GET URL using the legacy HMAC-SHA1 scheme
    pub async fn legacy_signed_url(&self, key: &str, expiry_secs: u64, https: bool) -> Result<String> {
        let cache_key = UrlCacheKey::new(
            UrlOperation::Legacy,
            key,
            expiry_secs,
            HttpMethod::Get,
            format!("https={https}"),
        );

        self.cache
            .get_or_compute_async(cache_key, move || async move {
                let now = self.clock.now().await;
                self.signer.sign(HttpMethod::Get, key, expiry_secs, now, https)
            })
            .await
    }

    /// URL presigned by the storage transport
    pub async fn presigned_url(
        &self,
        key: &str,
        expiry_secs: u64,
        method: HttpMethod,
        options: PresignOptions,
    ) -> Result<String> {
        let cache_key = UrlCacheKey::new(
            UrlOperation::Presigned,
            key,
            expiry_secs,
            method,
            options.fingerprint(),
        );

        self.cache
            .get_or_compute_async(cache_key, move || self.presign(key, expiry_secs, method, options))
            .await
    }

    /// Presigned GET URL that makes browsers download the object
    pub async fn download_url(
        &self,
        key: &str,
        expiry_secs: u64,
        options: DownloadOptions,
    ) -> Result<String> {
        let options = options.to_presign_options(key);
        let cache_key = UrlCacheKey::new(
            UrlOperation::Download,
            key,
            expiry_secs,
            HttpMethod::Get,
            options.fingerprint(),
        );

        self.cache
            .get_or_compute_async(cache_key, move || {
                self.presign(key, expiry_secs, HttpMethod::Get, options)
            })
            .await
    }

    async fn presign(
        &self,
        key: &str,
        expiry_secs: u64,
        method: HttpMethod,
        options: PresignOptions,
    ) -> Result<String> {
        let request = PresignRequest {
            bucket: self.config.bucket.clone(),
            key: self.path(key, false),
            method,
            expires_in: Duration::from_secs(expiry_secs),
            options,
        };
        let url = self.transport.presign(request).await?;
        endpoint::ensure_valid_url(&url)?;
        Ok(url)
    }

    /// Replace (or remove) the CDN URL and drop all cached URLs
    pub fn set_cdn_url(&self, cdn_url: Option<&str>) -> Result<()> {
        let cdn_url = match cdn_url {
            Some(url) => {
                validate_base_url("cdn_url", url)?;
                Some(url.trim().trim_end_matches('/').to_string())
            }
            None => None,
        };

        debug!(bucket = %self.config.bucket, cdn_url = ?cdn_url, "Updating CDN URL");
        *self.cdn_url.write().unwrap_or_else(|e| e.into_inner()) = cdn_url;
        self.cache.clear();
        Ok(())
    }

    /// Drop every memoized URL
    pub fn clear_url_cache(&self) {
        debug!(bucket = %self.config.bucket, entries = self.cache.len(), "Clearing URL cache");
        self.cache.clear();
    }

    /// Server-corrected current time in Unix seconds
    pub async fn time(&self) -> i64 {
        self.clock.now().await
    }

    /// Measure the server clock offset again on the next signing
    pub fn resync_clock(&self) {
        self.clock.invalidate();
    }

    /// Replace the metadata attached to every upload
    pub fn set_default_metadata<I, K, V>(&self, metadata: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let metadata: BTreeMap<String, String> = metadata
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        debug!(bucket = %self.config.bucket, keys = metadata.len(), "Updating default metadata");
        *self.default_metadata.write().unwrap_or_else(|e| e.into_inner()) = metadata;
    }

    pub fn default_metadata(&self) -> BTreeMap<String, String> {
        self.default_metadata
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// `options` with the default metadata filled in under the caller's keys
    fn with_default_metadata(&self, options: &PutOptions) -> PutOptions {
        let mut merged = options.clone();
        merged.metadata = self.default_metadata();
        merged.metadata.extend(options.metadata.clone());
        merged
    }

    // Object operations

    /// Object content, `None` if it does not exist
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.transport
            .get_object(&self.config.bucket, &self.path(key, false))
            .await
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.metadata(key).await?.is_some())
    }

    /// Object metadata, `None` if it does not exist
    pub async fn metadata(&self, key: &str) -> Result<Option<ObjectInfo>> {
        self.transport
            .head_object(&self.config.bucket, &self.path(key, false))
            .await
    }

    pub async fn put(
        &self,
        key: &str,
        data: impl Into<Vec<u8>>,
        options: &PutOptions,
    ) -> Result<ObjectInfo> {
        let options = self.with_default_metadata(options);
        self.transport
            .put_object(&self.config.bucket, &self.path(key, false), data.into(), &options)
            .await
    }

    /// Upload a local file; the content type is guessed from its extension
    /// unless `options` sets one
    pub async fn put_file(
        &self,
        key: &str,
        local_path: impl AsRef<Path>,
        options: PutOptions,
    ) -> Result<ObjectInfo> {
        let local_path = local_path.as_ref();
        if !local_path.is_file() {
            return Err(Error::InvalidPath(format!(
                "Local file not found: {}",
                local_path.display()
            )));
        }

        let data = tokio::fs::read(local_path).await?;
        let mut options = options;
        if options.content_type.is_none() {
            options.content_type = Some(
                mime_guess::from_path(local_path)
                    .first_or_octet_stream()
                    .to_string(),
            );
        }

        self.put(key, data, &options).await
    }

    /// Server-side copy within this bucket
    ///
    /// The copy keeps the source metadata unless `options` replaces it; a
    /// replacement carries the default metadata like an upload does.
    pub async fn copy(&self, source: &str, destination: &str, options: &PutOptions) -> Result<ObjectInfo> {
        let copy_source = encode_key(&self.path(source, true));
        let options = if options.replaces_metadata() {
            self.with_default_metadata(options)
        } else {
            options.clone()
        };
        self.transport
            .copy_object(
                &copy_source,
                &self.config.bucket,
                &self.path(destination, false),
                &options,
            )
            .await
    }

    /// Copy then delete the source
    pub async fn move_object(
        &self,
        source: &str,
        destination: &str,
        options: &PutOptions,
    ) -> Result<ObjectInfo> {
        let info = self.copy(source, destination, options).await?;
        self.delete(source).await?;
        Ok(info)
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        self.transport
            .delete_object(&self.config.bucket, &self.path(key, false))
            .await
    }

    /// Delete several objects; returns the full keys that were deleted
    pub async fn delete_many<S: AsRef<str>>(&self, keys: &[S]) -> Result<Vec<String>> {
        let keys = keys
            .iter()
            .map(|k| self.path(k.as_ref(), false))
            .collect::<Vec<_>>();
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        self.transport.delete_objects(&self.config.bucket, keys).await
    }

    /// Apply a canned ACL to an existing object
    pub async fn set_acl(&self, key: &str, acl: ObjectAcl) -> Result<()> {
        debug!(bucket = %self.config.bucket, key, acl = acl.as_str(), "Setting object ACL");
        self.transport
            .put_object_acl(&self.config.bucket, &self.path(key, false), acl)
            .await
    }

    /// Access control list of an object, `None` if it does not exist
    pub async fn acl(&self, key: &str) -> Result<Option<ObjectAclInfo>> {
        self.transport
            .get_object_acl(&self.config.bucket, &self.path(key, false))
            .await
    }

    /// Names under `prefix`, relative to it
    ///
    /// Non-recursive listings include sub-directories, without their
    /// trailing slash.
    pub async fn files(&self, prefix: &str, recursive: bool) -> Result<Vec<String>> {
        let base = self.path(prefix, false);
        let base = base.trim_end_matches('/');
        let base = if base.is_empty() {
            String::new()
        } else {
            format!("{base}/")
        };

        let options = ListOptions {
            prefix: (!base.is_empty()).then(|| base.clone()),
            delimiter: (!recursive).then(|| "/".to_string()),
            ..Default::default()
        };

        let mut files = Vec::new();
        for page in self.all_pages(options).await? {
            for object in page.objects {
                if object.key != base {
                    files.push(relative_to(&object.key, &base).to_string());
                }
            }
            for common in page.common_prefixes {
                files.push(relative_to(&common, &base).trim_end_matches('/').to_string());
            }
        }

        files.retain(|f| !f.is_empty());
        Ok(files)
    }

    /// Total size of every object in the bucket, in bytes
    pub async fn size(&self) -> Result<i64> {
        let pages = self.all_pages(ListOptions::default()).await?;
        Ok(pages
            .iter()
            .flat_map(|p| &p.objects)
            .map(|o| o.size_bytes)
            .sum())
    }

    /// Number of objects in the bucket
    pub async fn object_count(&self) -> Result<usize> {
        let pages = self.all_pages(ListOptions::default()).await?;
        Ok(pages.iter().map(|p| p.objects.len()).sum())
    }

    async fn all_pages(&self, options: ListOptions) -> Result<Vec<ListPage>> {
        let mut pages = Vec::new();
        let mut options = options;

        loop {
            let page = self
                .transport
                .list_objects_page(&self.config.bucket, options.clone())
                .await?;
            let next = page.next_continuation_token.clone();
            pages.push(page);

            match next {
                Some(token) if options.continuation_token.as_ref() != Some(&token) => {
                    options.continuation_token = Some(token);
                }
                _ => break,
            }
        }

        Ok(pages)
    }
}

impl std::fmt::Debug for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bucket")
            .field("config", &self.config)
            .field("endpoint", &self.endpoint)
            .field("cdn_url", &self.cdn_url())
            .field("clock", &self.clock)
            .field("cached_urls", &self.cache.len())
            .finish()
    }
}

fn relative_to<'a>(key: &'a str, base: &str) -> &'a str {
    key.strip_prefix(base).unwrap_or(key)
}
