//! s3kit-core: URL resolution and request-signing engine
//!
//! This crate provides the SDK-independent half of s3kit:
//! - Bucket configuration, validation and the TOML config file
//! - The alias registry handing out one `Bucket` per alias
//! - Endpoint resolution (custom, accelerated, regional, CDN)
//! - Legacy query-string signing with clock-skew compensation
//! - URL memoization
//!
//! Object I/O and modern presigning are delegated to a [`StorageTransport`]
//! implementation, such as the one in the `s3kit-s3` crate.

pub mod bucket;
pub mod cache;
pub mod clock;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod path;
pub mod registry;
pub mod signer;
pub mod transport;

pub use bucket::Bucket;
pub use cache::{UrlCache, UrlCacheKey, UrlOperation};
pub use clock::{ClockSync, FixedClock, SystemClock, WallClock};
pub use config::{BucketConfig, Config, ConfigManager, TimeoutConfig};
pub use endpoint::{EndpointDecision, EndpointKind};
pub use error::{Error, Result};
pub use registry::{Registry, TransportFactory};
pub use signer::LegacySigner;
pub use transport::{
    ALL_USERS_GROUP, AclGrant, BucketMetadata, DownloadOptions, HttpMethod, ListOptions, ListPage,
    ObjectAcl, ObjectAclInfo, ObjectInfo, PresignOptions, PresignRequest, PutOptions,
    StorageTransport,
};
