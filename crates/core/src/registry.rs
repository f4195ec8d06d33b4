//! Alias registry
//!
//! Maps aliases to bucket configurations and hands out one shared [`Bucket`]
//! per alias, built on first use.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::bucket::Bucket;
use crate::config::{BucketConfig, Config};
use crate::error::{Error, Result};
use crate::transport::StorageTransport;

/// Builds the storage transport for a bucket configuration
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn connect(&self, config: &BucketConfig) -> Result<Arc<dyn StorageTransport>>;
}

/// Registered configurations in insertion order
#[derive(Debug, Default)]
struct Entries {
    order: Vec<String>,
    configs: HashMap<String, Arc<BucketConfig>>,
}

impl Entries {
    fn first(&self) -> Option<&str> {
        self.order.first().map(String::as_str)
    }
}

/// Handle slot of one alias, filled by the first successful resolve
type HandleCell = Arc<OnceCell<Arc<Bucket>>>;

/// Registry of bucket configurations and their handles
///
/// Lock order: `handles` may be held while reading `entries`, never the
/// other way around.
pub struct Registry {
    factory: Arc<dyn TransportFactory>,
    entries: RwLock<Entries>,
    handles: Mutex<HashMap<String, HandleCell>>,
}

impl Registry {
    pub fn new(factory: Arc<dyn TransportFactory>) -> Self {
        Self {
            factory,
            entries: RwLock::new(Entries::default()),
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Build a registry holding every bucket of a config file, in file order
    ///
    /// Entries without an alias are registered as `default`.
    pub fn from_config(config: Config, factory: Arc<dyn TransportFactory>) -> Result<Self> {
        let registry = Self::new(factory);
        for bucket in config.buckets {
            let alias = if bucket.alias.trim().is_empty() {
                "default".to_string()
            } else {
                bucket.alias.clone()
            };
            registry.register(&alias, bucket)?;
        }
        Ok(registry)
    }

    /// Store a configuration under `alias`
    ///
    /// Re-registering an alias replaces its configuration but keeps its
    /// position. A handle already built for the alias is left untouched.
    pub fn register(&self, alias: &str, config: BucketConfig) -> Result<()> {
        let alias = alias.trim();
        if alias.is_empty() {
            return Err(Error::InvalidConfig("Alias cannot be empty".into()));
        }

        let mut config = config.validated()?;
        config.alias = alias.to_string();

        let mut entries = self.write_entries();
        if entries.configs.insert(alias.to_string(), Arc::new(config)).is_none() {
            entries.order.push(alias.to_string());
        }
        debug!(alias, "Registered bucket configuration");
        Ok(())
    }

    /// Shared handle for `alias`, or for the first registered alias
    ///
    /// Each alias is built at most once; resolving one alias never waits on
    /// the construction of another.
    pub async fn resolve(&self, alias: Option<&str>) -> Result<Arc<Bucket>> {
        let (alias, config, cell) = {
            let mut handles = self.lock_handles();
            let entries = self.read_entries();
            let alias = match alias {
                Some(alias) => alias.to_string(),
                None => entries.first().ok_or(Error::NotConfigured)?.to_string(),
            };
            if entries.order.is_empty() {
                return Err(Error::NotConfigured);
            }
            let config = entries
                .configs
                .get(&alias)
                .cloned()
                .ok_or_else(|| Error::UnknownAlias(alias.clone()))?;
            let cell = Arc::clone(handles.entry(alias.clone()).or_default());
            (alias, config, cell)
        };

        let (alias, config) = (alias.as_str(), config.as_ref());
        let bucket = cell
            .get_or_try_init(move || async move {
                debug!(alias, bucket = %config.bucket, "Building bucket handle");
                let transport = self.factory.connect(config).await?;
                Bucket::new(config.clone(), transport).map(Arc::new)
            })
            .await?;

        Ok(Arc::clone(bucket))
    }

    /// Configuration registered under `alias`
    pub fn config(&self, alias: &str) -> Option<Arc<BucketConfig>> {
        self.read_entries().configs.get(alias).cloned()
    }

    pub fn has_config(&self, alias: &str) -> bool {
        self.read_entries().configs.contains_key(alias)
    }

    /// Registered aliases in insertion order
    pub fn aliases(&self) -> Vec<String> {
        self.read_entries().order.clone()
    }

    /// Drop the configuration and handle of `alias`
    ///
    /// Returns whether a configuration was registered. A resolve still
    /// building the handle finishes, but its handle is not kept.
    pub fn remove(&self, alias: &str) -> bool {
        let mut handles = self.lock_handles();
        let mut entries = self.write_entries();
        entries.order.retain(|a| a != alias);
        handles.remove(alias);
        entries.configs.remove(alias).is_some()
    }

    /// Drop every configuration and handle
    pub fn clear(&self) {
        let mut handles = self.lock_handles();
        let mut entries = self.write_entries();
        entries.order.clear();
        entries.configs.clear();
        handles.clear();
        debug!("Cleared bucket registry");
    }

    fn read_entries(&self) -> RwLockReadGuard<'_, Entries> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_entries(&self) -> RwLockWriteGuard<'_, Entries> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_handles(&self) -> MutexGuard<'_, HashMap<String, HandleCell>> {
        self.handles.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("aliases", &self.aliases())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::transport::MockStorageTransport;

    fn config(bucket: &str) -> BucketConfig {
        BucketConfig::new(bucket, "us-east-1", "AK", "SK")
    }

    fn factory(expected_connects: usize) -> Arc<MockTransportFactory> {
        let mut factory = MockTransportFactory::new();
        factory
            .expect_connect()
            .times(expected_connects)
            .returning(|_| Ok(Arc::new(MockStorageTransport::new())));
        Arc::new(factory)
    }

    /// Factory that yields before connecting, to widen race windows
    struct SlowFactory {
        connects: AtomicUsize,
    }

    #[async_trait]
    impl TransportFactory for SlowFactory {
        async fn connect(&self, _config: &BucketConfig) -> Result<Arc<dyn StorageTransport>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Ok(Arc::new(MockStorageTransport::new()))
        }
    }

    /// Factory that parks connections to one bucket until released
    struct GatedFactory {
        gated_bucket: &'static str,
        entered: tokio::sync::Notify,
        release: tokio::sync::Notify,
        connects: AtomicUsize,
    }

    impl GatedFactory {
        fn new(gated_bucket: &'static str) -> Arc<Self> {
            Arc::new(Self {
                gated_bucket,
                entered: tokio::sync::Notify::new(),
                release: tokio::sync::Notify::new(),
                connects: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl TransportFactory for GatedFactory {
        async fn connect(&self, config: &BucketConfig) -> Result<Arc<dyn StorageTransport>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if config.bucket == self.gated_bucket {
                self.entered.notify_one();
                self.release.notified().await;
            }
            Ok(Arc::new(MockStorageTransport::new()))
        }
    }

    #[tokio::test]
    async fn test_resolve_without_registration() {
        let registry = Registry::new(factory(0));
        assert!(matches!(registry.resolve(None).await, Err(Error::NotConfigured)));
        assert!(matches!(
            registry.resolve(Some("main")).await,
            Err(Error::NotConfigured)
        ));
    }

    #[tokio::test]
    async fn test_resolve_unknown_alias() {
        let registry = Registry::new(factory(0));
        registry.register("main", config("my-bucket")).unwrap();

        let err = registry.resolve(Some("other")).await.unwrap_err();
        assert!(matches!(err, Error::UnknownAlias(ref a) if a == "other"));
        assert_eq!(err.to_string(), "Bucket configuration for alias 'other' not found");
    }

    #[tokio::test]
    async fn test_default_alias_is_first_registered() {
        let registry = Registry::new(factory(1));
        registry.register("first", config("bucket-one")).unwrap();
        registry.register("second", config("bucket-two")).unwrap();

        let bucket = registry.resolve(None).await.unwrap();
        assert_eq!(bucket.alias(), "first");
        assert_eq!(bucket.bucket(), "bucket-one");
        assert_eq!(registry.aliases(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_resolve_returns_same_handle() {
        let registry = Registry::new(factory(1));
        registry.register("main", config("my-bucket")).unwrap();

        let a = registry.resolve(Some("main")).await.unwrap();
        let b = registry.resolve(None).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_register_rejects_invalid() {
        let registry = Registry::new(factory(0));

        let err = registry.register("", config("my-bucket")).unwrap_err();
        assert!(err.to_string().contains("Alias cannot be empty"));

        let missing = BucketConfig::new("my-bucket", "us-east-1", "", "SK");
        assert!(matches!(
            registry.register("main", missing),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            registry.register("main", config("ab")),
            Err(Error::InvalidConfig(_))
        ));
        assert!(!registry.has_config("main"));
    }

    #[tokio::test]
    async fn test_reregister_keeps_existing_handle_and_position() {
        let registry = Registry::new(factory(1));
        registry.register("a", config("bucket-a")).unwrap();
        registry.register("b", config("bucket-b")).unwrap();

        let before = registry.resolve(Some("a")).await.unwrap();
        registry.register("a", config("bucket-a2")).unwrap();

        assert_eq!(registry.aliases(), vec!["a", "b"]);
        assert_eq!(registry.config("a").unwrap().bucket, "bucket-a2");

        let after = registry.resolve(Some("a")).await.unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(after.bucket(), "bucket-a");
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let registry = Registry::new(factory(2));
        registry.register("a", config("bucket-a")).unwrap();
        registry.register("b", config("bucket-b")).unwrap();

        let first = registry.resolve(Some("a")).await.unwrap();
        assert!(registry.remove("a"));
        assert!(!registry.remove("a"));
        assert!(!registry.has_config("a"));
        assert_eq!(registry.aliases(), vec!["b"]);

        registry.register("a", config("bucket-a")).unwrap();
        let rebuilt = registry.resolve(Some("a")).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &rebuilt));

        registry.clear();
        assert!(registry.aliases().is_empty());
        assert!(matches!(registry.resolve(None).await, Err(Error::NotConfigured)));
    }

    #[tokio::test]
    async fn test_connect_failure_is_not_cached() {
        let mut factory = MockTransportFactory::new();
        let mut seq = mockall::Sequence::new();
        factory
            .expect_connect()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(Error::Network("connection refused".into())));
        factory
            .expect_connect()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(Arc::new(MockStorageTransport::new())));

        let registry = Registry::new(Arc::new(factory));
        registry.register("main", config("my-bucket")).unwrap();

        assert!(matches!(
            registry.resolve(None).await,
            Err(Error::Network(_))
        ));
        assert!(registry.resolve(None).await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_resolve_builds_one_handle() {
        let factory = Arc::new(SlowFactory {
            connects: AtomicUsize::new(0),
        });
        let registry = Arc::new(Registry::new(factory.clone()));
        registry.register("main", config("my-bucket")).unwrap();

        let tasks = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.resolve(Some("main")).await })
            })
            .collect::<Vec<_>>();

        let mut handles = Vec::new();
        for task in tasks {
            handles.push(task.await.unwrap().unwrap());
        }

        assert_eq!(factory.connects.load(Ordering::SeqCst), 1);
        assert!(handles.iter().all(|h| Arc::ptr_eq(h, &handles[0])));
    }

    #[tokio::test]
    async fn test_slow_alias_does_not_block_others() {
        let factory = GatedFactory::new("slow-bucket");
        let registry = Arc::new(Registry::new(factory.clone()));
        registry.register("slow", config("slow-bucket")).unwrap();
        registry.register("fast", config("fast-bucket")).unwrap();

        let pending = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.resolve(Some("slow")).await })
        };
        factory.entered.notified().await;

        let fast = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            registry.resolve(Some("fast")),
        )
        .await
        .expect("fast alias resolved while slow alias was connecting")
        .unwrap();
        assert_eq!(fast.bucket(), "fast-bucket");

        factory.release.notify_one();
        let slow = pending.await.unwrap().unwrap();
        assert_eq!(slow.bucket(), "slow-bucket");
    }

    #[tokio::test]
    async fn test_remove_during_build_drops_stale_handle() {
        let factory = GatedFactory::new("bucket-old");
        let registry = Arc::new(Registry::new(factory.clone()));
        registry.register("a", config("bucket-old")).unwrap();

        let pending = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.resolve(Some("a")).await })
        };
        factory.entered.notified().await;

        assert!(registry.remove("a"));
        registry.register("a", config("bucket-new")).unwrap();

        factory.release.notify_one();
        let stale = pending.await.unwrap().unwrap();
        assert_eq!(stale.bucket(), "bucket-old");

        let current = registry.resolve(Some("a")).await.unwrap();
        assert_eq!(current.bucket(), "bucket-new");
        assert!(!Arc::ptr_eq(&stale, &current));
        assert_eq!(factory.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_from_config_preserves_file_order() {
        let toml = r#"
schema_version = 1

[[buckets]]
alias = "media"
bucket = "media-bucket"
region = "sa-east-1"
access_key = "AK"
secret_key = "SK"
cdn_url = "https://cdn.example.com"
root_prefix = "uploads"

[[buckets]]
alias = "backup"
bucket = "backup-bucket"
region = "us-west-2"
access_key = "AK2"
secret_key = "SK2"
use_path_style = true
"#;
        let config: Config = toml::from_str(toml).unwrap();
        let registry = Registry::from_config(config, factory(1)).unwrap();

        assert_eq!(registry.aliases(), vec!["media", "backup"]);
        let media = registry.resolve(None).await.unwrap();
        assert_eq!(media.root_prefix(), "uploads");
        assert_eq!(
            media.object_url("a.txt", true, true).unwrap(),
            "https://cdn.example.com/uploads/a.txt"
        );
        assert!(registry.config("backup").unwrap().use_path_style);
    }
}
