//! Endpoint resolution
//!
//! Decides which base URL a bucket's public and signed URLs are built on.
//! The decision is made once per configuration, in a fixed priority order:
//! custom endpoint, then transfer acceleration, then the regional endpoint.

use crate::config::BucketConfig;
use crate::error::{Error, Result};
use crate::path::{compose, encode_key};

/// Known regions whose S3 host differs from `s3.{region}.amazonaws.com`
/// or that are listed for completeness.
const REGION_HOSTS: &[(&str, &str)] = &[
    ("af-south-1", "s3.af-south-1.amazonaws.com"),
    ("ap-east-1", "s3.ap-east-1.amazonaws.com"),
    ("ap-northeast-1", "s3.ap-northeast-1.amazonaws.com"),
    ("ap-northeast-2", "s3.ap-northeast-2.amazonaws.com"),
    ("ap-northeast-3", "s3.ap-northeast-3.amazonaws.com"),
    ("ap-south-1", "s3.ap-south-1.amazonaws.com"),
    ("ap-southeast-1", "s3.ap-southeast-1.amazonaws.com"),
    ("ap-southeast-2", "s3.ap-southeast-2.amazonaws.com"),
    ("ca-central-1", "s3.ca-central-1.amazonaws.com"),
    ("cn-north-1", "s3.cn-north-1.amazonaws.com.cn"),
    ("cn-northwest-1", "s3.cn-northwest-1.amazonaws.com.cn"),
    ("eu-central-1", "s3.eu-central-1.amazonaws.com"),
    ("eu-north-1", "s3.eu-north-1.amazonaws.com"),
    ("eu-south-1", "s3.eu-south-1.amazonaws.com"),
    ("eu-west-1", "s3.eu-west-1.amazonaws.com"),
    ("eu-west-2", "s3.eu-west-2.amazonaws.com"),
    ("eu-west-3", "s3.eu-west-3.amazonaws.com"),
    ("me-south-1", "s3.me-south-1.amazonaws.com"),
    ("sa-east-1", "s3.sa-east-1.amazonaws.com"),
    ("us-east-1", "s3.us-east-1.amazonaws.com"),
    ("us-east-2", "s3.us-east-2.amazonaws.com"),
    ("us-gov-east-1", "s3.us-gov-east-1.amazonaws.com"),
    ("us-gov-west-1", "s3.us-gov-west-1.amazonaws.com"),
    ("us-iso-east-1", "s3.us-iso-east-1.c2s.ic.gov"),
    ("us-isob-east-1", "s3.us-isob-east-1.sc2s.sgov.gov"),
    ("us-west-1", "s3.us-west-1.amazonaws.com"),
    ("us-west-2", "s3.us-west-2.amazonaws.com"),
];

/// Which kind of endpoint a bucket uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointKind {
    /// Explicitly configured endpoint, e.g. a local emulator
    Custom,
    /// Transfer acceleration endpoint
    Accelerate,
    /// Regional AWS endpoint
    Standard,
}

/// The resolved base endpoint for a bucket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointDecision {
    pub kind: EndpointKind,
    /// Base URL without a trailing slash
    pub base_url: String,
    /// Whether the bucket name goes in the path instead of the host
    pub path_style: bool,
}

impl EndpointDecision {
    /// Resolve the endpoint for a configuration
    pub fn resolve(config: &BucketConfig) -> Self {
        if let Some(endpoint) = &config.custom_endpoint {
            return Self {
                kind: EndpointKind::Custom,
                base_url: endpoint.trim().trim_end_matches('/').to_string(),
                path_style: true,
            };
        }

        if config.use_accelerate {
            return Self {
                kind: EndpointKind::Accelerate,
                base_url: format!("https://{}.s3-accelerate.amazonaws.com", config.bucket),
                path_style: false,
            };
        }

        let host = region_host(&config.region);
        let base_url = if config.use_path_style {
            format!("https://{host}")
        } else {
            format!("https://{}.{host}", config.bucket)
        };

        Self {
            kind: EndpointKind::Standard,
            base_url,
            path_style: config.use_path_style,
        }
    }

    /// The URL object keys are appended to, without a trailing slash
    ///
    /// AWS endpoints switch to `http` when `https` is false. A custom
    /// endpoint keeps the scheme it was configured with.
    pub fn object_base(&self, bucket: &str, https: bool) -> String {
        let base = match self.kind {
            EndpointKind::Custom => self.base_url.clone(),
            EndpointKind::Accelerate | EndpointKind::Standard => with_scheme(&self.base_url, https),
        };

        if self.path_style {
            format!("{base}/{bucket}")
        } else {
            base
        }
    }
}

/// Host of the regional S3 endpoint
pub fn region_host(region: &str) -> String {
    REGION_HOSTS
        .iter()
        .find(|(code, _)| *code == region)
        .map(|(_, host)| (*host).to_string())
        .unwrap_or_else(|| format!("s3.{region}.amazonaws.com"))
}

fn with_scheme(url: &str, https: bool) -> String {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    let scheme = if https { "https" } else { "http" };
    format!("{scheme}://{rest}")
}

/// Build the public (unsigned) URL of an object
///
/// When `use_cdn` is set and a CDN is configured, the CDN wins over any
/// endpoint decision.
pub fn public_url(
    config: &BucketConfig,
    decision: &EndpointDecision,
    cdn_url: Option<&str>,
    key: &str,
    https: bool,
    use_cdn: bool,
) -> Result<String> {
    let composed = compose(&config.root_prefix, &config.bucket, &encode_key(key), false);

    let url = match cdn_url.filter(|_| use_cdn) {
        Some(cdn) => format!("{}/{composed}", cdn.trim_end_matches('/')),
        None => format!("{}/{composed}", decision.object_base(&config.bucket, https)),
    };

    ensure_valid_url(&url)?;
    Ok(url)
}

/// Check that `url` is an absolute http(s) URL with a host
///
/// Control characters are rejected up front because the URL parser would
/// silently strip tabs and newlines.
pub fn ensure_valid_url(url: &str) -> Result<()> {
    if url.chars().any(char::is_control) {
        return Err(Error::UrlConstruction(format!(
            "URL contains control characters: {url:?}"
        )));
    }

    let parsed =
        url::Url::parse(url).map_err(|e| Error::UrlConstruction(format!("{url}: {e}")))?;

    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(Error::UrlConstruction(format!(
            "{url}: not an absolute http(s) URL"
        )));
    }

    Ok(())
}
