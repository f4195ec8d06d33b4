//! Configuration management
//!
//! This module defines the bucket configuration and handles loading and
//! saving the s3kit configuration file. The file is stored in TOML format at
//! ~/.config/s3kit/config.toml.
//!
//! PROTECTED FILE: Changes to schema_version require migration support.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::path::normalize_root;

/// Current configuration schema version
///
/// IMPORTANT: Bumping this version requires:
/// 1. Adding a migration step in `ConfigManager::migrate`
/// 2. Updating migration tests
/// 3. Marking the change as BREAKING
pub const SCHEMA_VERSION: u32 = 1;

/// Timeout configuration for a bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Connection timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_ms: u64,

    /// Read timeout in milliseconds
    #[serde(default = "default_read_timeout")]
    pub read_ms: u64,

    /// Upper bound for the remote clock probe in milliseconds
    #[serde(default = "default_clock_probe_timeout")]
    pub clock_probe_ms: u64,
}

fn default_connect_timeout() -> u64 {
    10_000
}

fn default_read_timeout() -> u64 {
    30_000
}

fn default_clock_probe_timeout() -> u64 {
    5_000
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: default_connect_timeout(),
            read_ms: default_read_timeout(),
            clock_probe_ms: default_clock_probe_timeout(),
        }
    }
}

/// Configuration of a single bucket
///
/// Built with [`BucketConfig::new`] and the chained setters, or deserialized
/// from the `[[buckets]]` entries of the config file. A config is validated
/// once, by [`BucketConfig::validated`], before a registry stores it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketConfig {
    /// Alias this configuration is registered under
    #[serde(default)]
    pub alias: String,

    /// Bucket name
    pub bucket: String,

    /// Bucket region, e.g. "sa-east-1"
    pub region: String,

    /// Access key ID
    pub access_key: String,

    /// Secret access key
    pub secret_key: String,

    /// Custom endpoint, e.g. a local emulator at http://localhost:4566
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_endpoint: Option<String>,

    /// CDN base URL used for public reads
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cdn_url: Option<String>,

    /// Use path-style addressing on the regional endpoint
    #[serde(default)]
    pub use_path_style: bool,

    /// Use the transfer acceleration endpoint
    #[serde(default)]
    pub use_accelerate: bool,

    /// Prefix prepended to every object key
    #[serde(default)]
    pub root_prefix: String,

    /// Timeout configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<TimeoutConfig>,
}

impl BucketConfig {
    /// Create a new bucket configuration with the required fields
    pub fn new(
        bucket: impl Into<String>,
        region: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        Self {
            alias: String::new(),
            bucket: bucket.into(),
            region: region.into(),
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            custom_endpoint: None,
            cdn_url: None,
            use_path_style: false,
            use_accelerate: false,
            root_prefix: String::new(),
            timeout: None,
        }
    }

    pub fn custom_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.custom_endpoint = Some(endpoint.into());
        self
    }

    pub fn cdn_url(mut self, url: impl Into<String>) -> Self {
        self.cdn_url = Some(url.into());
        self
    }

    pub fn path_style(mut self, enabled: bool) -> Self {
        self.use_path_style = enabled;
        self
    }

    pub fn accelerate(mut self, enabled: bool) -> Self {
        self.use_accelerate = enabled;
        self
    }

    pub fn root_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.root_prefix = normalize_root(&prefix.into());
        self
    }

    pub fn timeout(mut self, timeout: TimeoutConfig) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Get the effective timeout configuration
    pub fn timeout_config(&self) -> TimeoutConfig {
        self.timeout.clone().unwrap_or_default()
    }

    /// Check required fields and their formats
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("bucket", &self.bucket),
            ("region", &self.region),
            ("access_key", &self.access_key),
            ("secret_key", &self.secret_key),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(Error::InvalidConfig(format!(
                    "Missing required configuration: {field}"
                )));
            }
        }

        if !is_valid_bucket_name(&self.bucket) {
            return Err(Error::InvalidConfig(format!(
                "Invalid bucket name '{}': use 3-63 lowercase letters, digits, dots or hyphens, \
                 starting and ending with a letter or digit",
                self.bucket
            )));
        }

        if !is_valid_region(&self.region) {
            return Err(Error::InvalidConfig(format!(
                "Invalid region '{}': use lowercase letters, digits and hyphens",
                self.region
            )));
        }

        if let Some(endpoint) = &self.custom_endpoint {
            validate_base_url("custom_endpoint", endpoint)?;
        }
        if let Some(cdn) = &self.cdn_url {
            validate_base_url("cdn_url", cdn)?;
        }

        Ok(())
    }

    /// Validate and normalize the configuration
    ///
    /// Normalization strips surrounding slashes from the root prefix and
    /// trailing slashes from the endpoint and CDN URLs.
    pub fn validated(mut self) -> Result<Self> {
        self.validate()?;
        self.root_prefix = normalize_root(&self.root_prefix);
        self.custom_endpoint = self
            .custom_endpoint
            .map(|e| e.trim().trim_end_matches('/').to_string());
        self.cdn_url = self
            .cdn_url
            .map(|c| c.trim().trim_end_matches('/').to_string());
        Ok(self)
    }
}

impl fmt::Debug for BucketConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BucketConfig")
            .field("alias", &self.alias)
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("custom_endpoint", &self.custom_endpoint)
            .field("cdn_url", &self.cdn_url)
            .field("use_path_style", &self.use_path_style)
            .field("use_accelerate", &self.use_accelerate)
            .field("root_prefix", &self.root_prefix)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Check a bucket name: 3-63 chars of `[a-z0-9.-]`, alphanumeric at both ends
pub fn is_valid_bucket_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    if !(3..=63).contains(&bytes.len()) {
        return false;
    }
    let edge_ok = |b: &u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    bytes.first().is_some_and(edge_ok)
        && bytes.last().is_some_and(edge_ok)
        && bytes
            .iter()
            .all(|b| edge_ok(b) || *b == b'.' || *b == b'-')
}

/// Check a region code: `[a-z0-9-]`, non-empty
pub fn is_valid_region(region: &str) -> bool {
    !region.is_empty()
        && region
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

pub(crate) fn validate_base_url(field: &str, value: &str) -> Result<()> {
    let parsed = url::Url::parse(value.trim())
        .map_err(|e| Error::InvalidConfig(format!("Invalid {field} '{value}': {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(Error::InvalidConfig(format!(
            "Invalid {field} '{value}': expected an absolute http(s) URL"
        )));
    }
    Ok(())
}

/// Main configuration file structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Schema version for migration support; files written before
    /// versioning have none and load as version 0
    #[serde(default)]
    pub schema_version: u32,

    /// Configured buckets, in registration order
    #[serde(default)]
    pub buckets: Vec<BucketConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            buckets: Vec::new(),
        }
    }
}

/// Configuration manager handles loading and saving config
#[derive(Debug)]
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new ConfigManager with the default config path
    pub fn new() -> Result<Self> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| Error::InvalidConfig("Could not determine config directory".into()))?;
        let config_path = config_dir.join("s3kit").join("config.toml");
        Ok(Self { config_path })
    }

    /// Create a ConfigManager with a custom path (useful for testing)
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the configuration file path
    pub fn config_path(&self) -> &PathBuf {
        &self.config_path
    }

    /// Load configuration from disk
    ///
    /// If the configuration file doesn't exist, returns a default configuration.
    /// If the schema version doesn't match, attempts migration.
    pub fn load(&self) -> Result<Config> {
        if !self.config_path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(&self.config_path)?;
        let mut config: Config = toml::from_str(&content)?;

        if config.schema_version < SCHEMA_VERSION {
            config = self.migrate(config)?;
        } else if config.schema_version > SCHEMA_VERSION {
            return Err(Error::InvalidConfig(format!(
                "Configuration file version {} is newer than supported version {}. Please upgrade s3kit.",
                config.schema_version, SCHEMA_VERSION
            )));
        }

        Ok(config)
    }

    /// Save configuration to disk
    ///
    /// Creates parent directories if they don't exist.
    /// Sets file permissions to 600 (owner read/write only).
    pub fn save(&self, config: &Config) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(config)?;
        std::fs::write(&self.config_path, content)?;

        // Credentials live in this file
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&self.config_path, permissions)?;
        }

        Ok(())
    }

    /// Migrate configuration from older schema version
    ///
    /// Version 0 files predate aliases: every entry gets one, `default` for
    /// the first bucket and the bucket name for the rest.
    fn migrate(&self, mut config: Config) -> Result<Config> {
        tracing::debug!(
            from = config.schema_version,
            to = SCHEMA_VERSION,
            "Migrating configuration file"
        );

        if config.schema_version == 0 {
            for (i, bucket) in config.buckets.iter_mut().enumerate() {
                if bucket.alias.trim().is_empty() {
                    bucket.alias = if i == 0 {
                        "default".to_string()
                    } else {
                        bucket.bucket.clone()
                    };
                }
            }
        }

        config.schema_version = SCHEMA_VERSION;
        Ok(config)
    }
}
