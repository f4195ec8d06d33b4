//! Error types for s3kit-core
//!
//! Configuration problems fail fast through the `InvalidConfig`,
//! `NotConfigured` and `UnknownAlias` variants. Transport failures are carried
//! through unchanged in `NotFound`, `Auth` and `Network`.

use thiserror::Error;

/// Result type alias for s3kit-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for s3kit-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or malformed bucket configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// No bucket has been registered yet
    #[error("No bucket configuration found. Register one before resolving a bucket.")]
    NotConfigured,

    /// The requested alias has no configuration
    #[error("Bucket configuration for alias '{0}' not found")]
    UnknownAlias(String),

    /// A resolved URL is not a valid absolute URL
    #[error("Failed to construct URL: {0}")]
    UrlConstruction(String),

    /// Invalid object or local path
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// URL parsing error
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Authentication or authorization failure reported by the backend
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Network or service error
    #[error("Network error: {0}")]
    Network(String),

    /// General error
    #[error("{0}")]
    General(String),
}

impl Error {
    /// Whether this error comes from configuration or alias resolution
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidConfig(_)
                | Error::NotConfigured
                | Error::UnknownAlias(_)
                | Error::TomlParse(_)
        )
    }

    /// Whether the backend reported that the resource does not exist
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}
