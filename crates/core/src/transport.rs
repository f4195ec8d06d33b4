//! StorageTransport trait definition
//!
//! This trait is the boundary between the URL engine and the network. The
//! engine never speaks the object-storage protocol itself; everything that
//! needs a request goes through an implementation of this trait, such as
//! the aws-sdk-s3 adapter in the `s3kit-s3` crate.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// HTTP methods supported for presigned requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Put,
    Delete,
    Head,
}

impl HttpMethod {
    pub const fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canned ACLs applied on upload and copy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ObjectAcl {
    Private,
    PublicRead,
    PublicReadWrite,
    AuthenticatedRead,
}

impl ObjectAcl {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ObjectAcl::Private => "private",
            ObjectAcl::PublicRead => "public-read",
            ObjectAcl::PublicReadWrite => "public-read-write",
            ObjectAcl::AuthenticatedRead => "authenticated-read",
        }
    }
}

/// Group URI that stands for anonymous users in S3 grants
pub const ALL_USERS_GROUP: &str = "http://acs.amazonaws.com/groups/global/AllUsers";

/// One entry of an object's access control list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclGrant {
    /// Canonical user ID, e-mail address or group URI
    pub grantee: String,

    /// Permission such as `READ` or `FULL_CONTROL`
    pub permission: String,
}

/// Access control list of an object
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectAclInfo {
    /// Owner ID (or display name when the backend sends no ID)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,

    pub grants: Vec<AclGrant>,
}

impl ObjectAclInfo {
    /// Whether anonymous users may read the object
    pub fn is_public_read(&self) -> bool {
        self.grants.iter().any(|g| {
            g.grantee == ALL_USERS_GROUP && matches!(g.permission.as_str(), "READ" | "FULL_CONTROL")
        })
    }
}

/// Metadata for an object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectInfo {
    /// Full object key
    pub key: String,

    /// Size in bytes
    pub size_bytes: i64,

    /// Human-readable size
    pub size_human: String,

    /// Last modified timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<jiff::Timestamp>,

    /// ETag without surrounding quotes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,

    /// Content type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    /// Storage class
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,

    /// User metadata
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl ObjectInfo {
    /// Create a new ObjectInfo for an object of `size` bytes
    pub fn new(key: impl Into<String>, size: i64) -> Self {
        Self {
            key: key.into(),
            size_bytes: size,
            size_human: humansize::format_size(size.max(0) as u64, humansize::BINARY),
            last_modified: None,
            etag: None,
            content_type: None,
            storage_class: None,
            metadata: BTreeMap::new(),
        }
    }
}

/// Response of the bucket metadata probe
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BucketMetadata {
    /// Server time taken from the `Date` response header
    pub server_time: Option<jiff::Timestamp>,

    /// Region reported by the backend
    pub region: Option<String>,
}

/// Options for a single list request
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Full key prefix to filter by
    pub prefix: Option<String>,

    /// Delimiter for grouping (usually "/")
    pub delimiter: Option<String>,

    /// Maximum number of keys to return per request
    pub max_keys: Option<i32>,

    /// Continuation token for pagination
    pub continuation_token: Option<String>,
}

/// One page of a list request
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    /// Listed objects
    pub objects: Vec<ObjectInfo>,

    /// Common prefixes, when a delimiter was given
    pub common_prefixes: Vec<String>,

    /// Token for the next page, if the listing is truncated
    pub next_continuation_token: Option<String>,
}

/// Options for uploads and copies
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutOptions {
    pub content_type: Option<String>,
    pub cache_control: Option<String>,
    pub content_disposition: Option<String>,
    pub acl: Option<ObjectAcl>,
    /// User metadata; on copy, a non-empty map replaces the source metadata
    pub metadata: BTreeMap<String, String>,
}

impl PutOptions {
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn cache_control(mut self, cache_control: impl Into<String>) -> Self {
        self.cache_control = Some(cache_control.into());
        self
    }

    pub fn acl(mut self, acl: ObjectAcl) -> Self {
        self.acl = Some(acl);
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Whether a copy with these options rewrites the destination metadata
    /// instead of keeping the source's
    pub fn replaces_metadata(&self) -> bool {
        !self.metadata.is_empty() || self.content_type.is_some()
    }
}

/// Method-specific options of a presigned request
///
/// Every field ends up in the URL cache fingerprint, so two option sets that
/// produce different URLs never share a cache entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PresignOptions {
    pub response_content_disposition: Option<String>,
    pub response_content_type: Option<String>,
    pub response_cache_control: Option<String>,
    /// Content type the uploader must send (PUT only)
    pub content_type: Option<String>,
}

impl PresignOptions {
    /// Stable string identifying these options
    pub fn fingerprint(&self) -> String {
        // Field order is fixed by the struct definition
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Options for download URLs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadOptions {
    /// File name offered to the browser; defaults to the key's last segment
    pub filename: Option<String>,
    /// Overrides the stored content type
    pub content_type: Option<String>,
    /// Use `inline` instead of `attachment`
    pub inline: bool,
}

impl DownloadOptions {
    /// Turn these options into presign options for `key`
    pub fn to_presign_options(&self, key: &str) -> PresignOptions {
        let filename = self.filename.clone().unwrap_or_else(|| {
            key.trim_end_matches('/')
                .rsplit('/')
                .next()
                .unwrap_or_default()
                .to_string()
        });
        let disposition = if self.inline { "inline" } else { "attachment" };
        let escaped = filename.replace('\\', "\\\\").replace('"', "\\\"");

        PresignOptions {
            response_content_disposition: Some(format!("{disposition}; filename=\"{escaped}\"")),
            response_content_type: self.content_type.clone(),
            ..Default::default()
        }
    }
}

/// A request to presign
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresignRequest {
    pub bucket: String,
    /// Full object key, root prefix included
    pub key: String,
    pub method: HttpMethod,
    pub expires_in: Duration,
    pub options: PresignOptions,
}

/// Trait for the storage-transport collaborator
///
/// Keys passed to these methods are full object keys; the caller has already
/// applied the root prefix. "Not found" is reported as `None` where the
/// signature allows it, every other failure is an error.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StorageTransport: Send + Sync {
    /// Lightweight request against the bucket, used to read the server clock
    async fn head_bucket_metadata(&self, bucket: &str) -> Result<BucketMetadata>;

    /// Upload an object
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        options: &PutOptions,
    ) -> Result<ObjectInfo>;

    /// Get object content, `None` if the key does not exist
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>>;

    /// Delete an object
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()>;

    /// Delete several objects, returning the keys that were deleted
    async fn delete_objects(&self, bucket: &str, keys: Vec<String>) -> Result<Vec<String>>;

    /// Get object metadata, `None` if the key does not exist
    async fn head_object(&self, bucket: &str, key: &str) -> Result<Option<ObjectInfo>>;

    /// Server-side copy; `copy_source` is the encoded `bucket/key` of the source
    async fn copy_object(
        &self,
        copy_source: &str,
        bucket: &str,
        key: &str,
        options: &PutOptions,
    ) -> Result<ObjectInfo>;

    /// List one page of objects
    async fn list_objects_page(&self, bucket: &str, options: ListOptions) -> Result<ListPage>;

    /// Produce a presigned URL with the backend's native signing scheme
    async fn presign(&self, request: PresignRequest) -> Result<String>;

    /// Replace an object's ACL with a canned one
    async fn put_object_acl(&self, bucket: &str, key: &str, acl: ObjectAcl) -> Result<()>;

    /// Read an object's ACL, `None` if the key does not exist
    async fn get_object_acl(&self, bucket: &str, key: &str) -> Result<Option<ObjectAclInfo>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_info_new() {
        let info = ObjectInfo::new("test.txt", 1024);
        assert_eq!(info.key, "test.txt");
        assert_eq!(info.size_bytes, 1024);
        assert!(info.size_human.contains("KiB"));
        assert!(info.metadata.is_empty());
    }

    #[test]
    fn test_http_method_display() {
        assert_eq!(HttpMethod::Get.to_string(), "GET");
        assert_eq!(HttpMethod::Delete.as_str(), "DELETE");
    }

    #[test]
    fn test_acl_as_str() {
        assert_eq!(ObjectAcl::PublicRead.as_str(), "public-read");
        assert_eq!(ObjectAcl::AuthenticatedRead.as_str(), "authenticated-read");
    }

    #[test]
    fn test_replaces_metadata() {
        assert!(!PutOptions::default().replaces_metadata());
        assert!(!PutOptions::default().cache_control("no-cache").replaces_metadata());
        assert!(PutOptions::default().metadata("k", "v").replaces_metadata());
        assert!(PutOptions::default().content_type("text/plain").replaces_metadata());
    }

    #[test]
    fn test_acl_info_public_read() {
        let owner_only = ObjectAclInfo {
            owner: Some("owner-id".into()),
            grants: vec![AclGrant {
                grantee: "owner-id".into(),
                permission: "FULL_CONTROL".into(),
            }],
        };
        assert!(!owner_only.is_public_read());

        let mut public = owner_only.clone();
        public.grants.push(AclGrant {
            grantee: ALL_USERS_GROUP.into(),
            permission: "READ".into(),
        });
        assert!(public.is_public_read());
    }

    #[test]
    fn test_presign_fingerprint_distinguishes_options() {
        let empty = PresignOptions::default();
        let typed = PresignOptions {
            response_content_type: Some("text/plain".into()),
            ..Default::default()
        };
        let cached = PresignOptions {
            response_cache_control: Some("text/plain".into()),
            ..Default::default()
        };

        assert_eq!(empty.fingerprint(), PresignOptions::default().fingerprint());
        assert_ne!(empty.fingerprint(), typed.fingerprint());
        assert_ne!(typed.fingerprint(), cached.fingerprint());
    }

    #[test]
    fn test_download_options_disposition() {
        let options = DownloadOptions::default().to_presign_options("reports/2024/q1.pdf");
        assert_eq!(
            options.response_content_disposition.as_deref(),
            Some("attachment; filename=\"q1.pdf\"")
        );
        assert!(options.response_content_type.is_none());

        let options = DownloadOptions {
            filename: Some("my \"report\".pdf".into()),
            content_type: Some("application/pdf".into()),
            inline: true,
        }
        .to_presign_options("q1.pdf");
        assert_eq!(
            options.response_content_disposition.as_deref(),
            Some("inline; filename=\"my \\\"report\\\".pdf\"")
        );
        assert_eq!(
            options.response_content_type.as_deref(),
            Some("application/pdf")
        );
    }
}
