//! S3 transport implementation
//!
//! Wraps aws-sdk-s3 and implements the StorageTransport trait from s3kit-core.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, Grant, MetadataDirective, Object, ObjectCannedAcl, ObjectIdentifier};
use aws_smithy_types::date_time::Format;
use tracing::{debug, warn};

use s3kit_core::{
    AclGrant, BucketConfig, BucketMetadata, EndpointDecision, EndpointKind, Error, HttpMethod,
    ListOptions, ListPage, ObjectAcl, ObjectAclInfo, ObjectInfo, PresignRequest, PutOptions, Result,
    StorageTransport, TransportFactory,
};

/// Maximum number of keys accepted by a single DeleteObjects request
const DELETE_BATCH_SIZE: usize = 1000;

/// Error codes reported for missing buckets or keys
const NOT_FOUND_CODES: &[&str] = &["NoSuchKey", "NotFound", "NoSuchBucket"];

/// Error codes reported for rejected credentials or permissions
const AUTH_CODES: &[&str] = &[
    "AccessDenied",
    "InvalidAccessKeyId",
    "SignatureDoesNotMatch",
    "ExpiredToken",
    "InvalidToken",
    "AllAccessDisabled",
];

/// S3 transport wrapper
pub struct S3Transport {
    inner: aws_sdk_s3::Client,
}

impl S3Transport {
    /// Create a new transport from a bucket configuration
    pub async fn new(config: &BucketConfig) -> Result<Self> {
        let credentials = aws_credential_types::Credentials::new(
            config.access_key.clone(),
            config.secret_key.clone(),
            None, // session token
            None, // expiry
            "s3kit-static-credentials",
        );

        let timeout = config.timeout_config();
        let timeouts = aws_config::timeout::TimeoutConfig::builder()
            .connect_timeout(Duration::from_millis(timeout.connect_ms))
            .read_timeout(Duration::from_millis(timeout.read_ms))
            .build();

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(aws_config::Region::new(config.region.clone()))
            .timeout_config(timeouts);
        if let Some(endpoint) = &config.custom_endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;

        // Addressing follows the same decision the URL builder uses
        let endpoint = EndpointDecision::resolve(config);
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(endpoint.path_style)
            .accelerate(endpoint.kind == EndpointKind::Accelerate)
            .build();

        debug!(
            bucket = %config.bucket,
            region = %config.region,
            endpoint = ?endpoint.kind,
            "Created S3 transport"
        );

        Ok(Self {
            inner: aws_sdk_s3::Client::from_conf(s3_config),
        })
    }

    /// Get the underlying aws-sdk-s3 client
    pub fn inner(&self) -> &aws_sdk_s3::Client {
        &self.inner
    }
}

#[async_trait]
impl StorageTransport for S3Transport {
    async fn head_bucket_metadata(&self, bucket: &str) -> Result<BucketMetadata> {
        let date = Arc::new(Mutex::new(None::<String>));
        let capture = Arc::clone(&date);

        let response = self
            .inner
            .head_bucket()
            .bucket(bucket)
            .customize()
            .mutate_response(move |response| {
                if let Some(value) = response.headers().get("date") {
                    *capture.lock().unwrap_or_else(|e| e.into_inner()) = Some(value.to_string());
                }
            })
            .send()
            .await
            .map_err(|e| map_sdk_error(e, bucket))?;

        let date = date.lock().unwrap_or_else(|e| e.into_inner()).take();
        let server_time = date.as_deref().and_then(parse_http_date);
        if server_time.is_none() {
            debug!(bucket, date = ?date, "HeadBucket response carried no usable Date header");
        }

        Ok(BucketMetadata {
            server_time,
            region: response.bucket_region().map(str::to_string),
        })
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        options: &PutOptions,
    ) -> Result<ObjectInfo> {
        let size = data.len() as i64;

        let mut request = self
            .inner
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(data))
            .set_content_type(options.content_type.clone())
            .set_cache_control(options.cache_control.clone())
            .set_content_disposition(options.content_disposition.clone());

        if let Some(acl) = options.acl {
            request = request.acl(ObjectCannedAcl::from(acl.as_str()));
        }
        if !options.metadata.is_empty() {
            request = request.set_metadata(Some(to_sdk_metadata(options)));
        }

        let response = request.send().await.map_err(|e| map_sdk_error(e, key))?;

        let mut info = ObjectInfo::new(key, size);
        info.etag = response.e_tag().map(trim_etag);
        info.content_type = options.content_type.clone();
        info.metadata = options.metadata.clone();
        info.last_modified = Some(jiff::Timestamp::now());

        Ok(info)
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let response = match self.inner.get_object().bucket(bucket).key(key).send().await {
            Ok(response) => response,
            Err(e) => {
                return match map_sdk_error(e, key) {
                    Error::NotFound(_) => Ok(None),
                    other => Err(other),
                };
            }
        };

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| Error::Network(e.to_string()))?
            .into_bytes()
            .to_vec();

        Ok(Some(data))
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.inner
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, key))?;

        Ok(())
    }

    async fn delete_objects(&self, bucket: &str, keys: Vec<String>) -> Result<Vec<String>> {
        let mut deleted = Vec::with_capacity(keys.len());

        for chunk in keys.chunks(DELETE_BATCH_SIZE) {
            let objects = chunk
                .iter()
                .map(|k| {
                    ObjectIdentifier::builder()
                        .key(k)
                        .build()
                        .map_err(|e| Error::General(e.to_string()))
                })
                .collect::<Result<Vec<_>>>()?;

            let delete = Delete::builder()
                .set_objects(Some(objects))
                .build()
                .map_err(|e| Error::General(e.to_string()))?;

            let response = self
                .inner
                .delete_objects()
                .bucket(bucket)
                .delete(delete)
                .send()
                .await
                .map_err(|e| map_sdk_error(e, bucket))?;

            deleted.extend(
                response
                    .deleted()
                    .iter()
                    .filter_map(|d| d.key().map(str::to_string)),
            );

            if !response.errors().is_empty() {
                let failed: Vec<&str> = response.errors().iter().filter_map(|e| e.key()).collect();
                warn!(bucket, ?failed, "Failed to delete some objects");
            }
        }

        Ok(deleted)
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<Option<ObjectInfo>> {
        let response = match self.inner.head_object().bucket(bucket).key(key).send().await {
            Ok(response) => response,
            Err(e) => {
                return match map_sdk_error(e, key) {
                    Error::NotFound(_) => Ok(None),
                    other => Err(other),
                };
            }
        };

        let mut info = ObjectInfo::new(key, response.content_length().unwrap_or(0));
        info.last_modified = response.last_modified().and_then(to_timestamp);
        info.etag = response.e_tag().map(trim_etag);
        info.content_type = response.content_type().map(str::to_string);
        info.storage_class = response.storage_class().map(|sc| sc.as_str().to_string());
        if let Some(metadata) = response.metadata() {
            info.metadata = metadata
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
        }

        Ok(Some(info))
    }

    async fn copy_object(
        &self,
        copy_source: &str,
        bucket: &str,
        key: &str,
        options: &PutOptions,
    ) -> Result<ObjectInfo> {
        let mut request = self
            .inner
            .copy_object()
            .copy_source(copy_source)
            .bucket(bucket)
            .key(key)
            .set_cache_control(options.cache_control.clone())
            .set_content_disposition(options.content_disposition.clone());

        if let Some(acl) = options.acl {
            request = request.acl(ObjectCannedAcl::from(acl.as_str()));
        }

        // S3 ignores new metadata and content type unless told to replace
        if options.replaces_metadata() {
            request = request
                .metadata_directive(MetadataDirective::Replace)
                .set_content_type(options.content_type.clone())
                .set_metadata(Some(to_sdk_metadata(options)));
        }

        let response = request
            .send()
            .await
            .map_err(|e| map_sdk_error(e, copy_source))?;

        // Get size from head_object since copy doesn't return it
        let mut info = self
            .head_object(bucket, key)
            .await?
            .ok_or_else(|| Error::NotFound(key.to_string()))?;

        if let Some(etag) = response.copy_object_result().and_then(|r| r.e_tag()) {
            info.etag = Some(trim_etag(etag));
        }

        Ok(info)
    }

    async fn list_objects_page(&self, bucket: &str, options: ListOptions) -> Result<ListPage> {
        let response = self
            .inner
            .list_objects_v2()
            .bucket(bucket)
            .set_prefix(options.prefix)
            .set_delimiter(options.delimiter)
            .set_max_keys(options.max_keys)
            .set_continuation_token(options.continuation_token)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, bucket))?;

        let objects = response.contents().iter().map(object_info).collect();
        let common_prefixes = response
            .common_prefixes()
            .iter()
            .filter_map(|p| p.prefix().map(str::to_string))
            .collect();

        let next_continuation_token = if response.is_truncated().unwrap_or(false) {
            response.next_continuation_token().map(str::to_string)
        } else {
            None
        };

        Ok(ListPage {
            objects,
            common_prefixes,
            next_continuation_token,
        })
    }

    async fn presign(&self, request: PresignRequest) -> Result<String> {
        let presigning = PresigningConfig::expires_in(request.expires_in)
            .map_err(|e| Error::UrlConstruction(e.to_string()))?;
        let options = &request.options;

        let presigned = match request.method {
            HttpMethod::Get => self
                .inner
                .get_object()
                .bucket(&request.bucket)
                .key(&request.key)
                .set_response_content_disposition(options.response_content_disposition.clone())
                .set_response_content_type(options.response_content_type.clone())
                .set_response_cache_control(options.response_cache_control.clone())
                .presigned(presigning)
                .await
                .map_err(|e| map_sdk_error(e, &request.key))?,
            HttpMethod::Put => self
                .inner
                .put_object()
                .bucket(&request.bucket)
                .key(&request.key)
                .set_content_type(options.content_type.clone())
                .presigned(presigning)
                .await
                .map_err(|e| map_sdk_error(e, &request.key))?,
            HttpMethod::Delete => self
                .inner
                .delete_object()
                .bucket(&request.bucket)
                .key(&request.key)
                .presigned(presigning)
                .await
                .map_err(|e| map_sdk_error(e, &request.key))?,
            HttpMethod::Head => self
                .inner
                .head_object()
                .bucket(&request.bucket)
                .key(&request.key)
                .presigned(presigning)
                .await
                .map_err(|e| map_sdk_error(e, &request.key))?,
        };

        Ok(presigned.uri().to_string())
    }

    async fn put_object_acl(&self, bucket: &str, key: &str, acl: ObjectAcl) -> Result<()> {
        self.inner
            .put_object_acl()
            .bucket(bucket)
            .key(key)
            .acl(ObjectCannedAcl::from(acl.as_str()))
            .send()
            .await
            .map_err(|e| map_sdk_error(e, key))?;

        Ok(())
    }

    async fn get_object_acl(&self, bucket: &str, key: &str) -> Result<Option<ObjectAclInfo>> {
        let response = match self.inner.get_object_acl().bucket(bucket).key(key).send().await {
            Ok(response) => response,
            Err(e) => {
                return match map_sdk_error(e, key) {
                    Error::NotFound(_) => Ok(None),
                    other => Err(other),
                };
            }
        };

        let owner = response
            .owner()
            .and_then(|o| o.id().or(o.display_name()))
            .map(str::to_string);
        let grants = response.grants().iter().filter_map(acl_grant).collect();

        Ok(Some(ObjectAclInfo { owner, grants }))
    }
}

/// Connects [`S3Transport`]s for the registry
#[derive(Debug, Clone, Copy, Default)]
pub struct S3TransportFactory;

#[async_trait]
impl TransportFactory for S3TransportFactory {
    async fn connect(&self, config: &BucketConfig) -> Result<Arc<dyn StorageTransport>> {
        Ok(Arc::new(S3Transport::new(config).await?))
    }
}

/// Map an SDK error onto the core error type
fn map_sdk_error<E>(err: SdkError<E, HttpResponse>, resource: &str) -> Error
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    let status = err.raw_response().map(|r| r.status().as_u16());
    let code = err.code().map(str::to_string);
    let message = err
        .message()
        .map(str::to_string)
        .unwrap_or_else(|| DisplayErrorContext(&err).to_string());

    classify_error(status, code.as_deref(), resource, &message)
}

fn classify_error(status: Option<u16>, code: Option<&str>, resource: &str, message: &str) -> Error {
    let has_code = |codes: &[&str]| code.is_some_and(|c| codes.contains(&c));

    if status == Some(404) || has_code(NOT_FOUND_CODES) {
        Error::NotFound(resource.to_string())
    } else if matches!(status, Some(401 | 403)) || has_code(AUTH_CODES) {
        Error::Auth(match code {
            Some(code) => format!("{code}: {message}"),
            None => message.to_string(),
        })
    } else {
        Error::Network(match code {
            Some(code) => format!("{resource}: {code}: {message}"),
            None => format!("{resource}: {message}"),
        })
    }
}

/// Parse an RFC 7231 `Date` header value
fn parse_http_date(value: &str) -> Option<jiff::Timestamp> {
    let parsed = aws_smithy_types::DateTime::from_str(value.trim(), Format::HttpDate).ok()?;
    to_timestamp(&parsed)
}

fn to_timestamp(value: &aws_smithy_types::DateTime) -> Option<jiff::Timestamp> {
    jiff::Timestamp::from_second(value.secs()).ok()
}

fn trim_etag(etag: &str) -> String {
    etag.trim_matches('"').to_string()
}

fn to_sdk_metadata(options: &PutOptions) -> HashMap<String, String> {
    options
        .metadata
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Convert an SDK grant, skipping grants without a grantee or permission
fn acl_grant(grant: &Grant) -> Option<AclGrant> {
    let grantee = grant.grantee()?;
    let name = grantee
        .id()
        .or(grantee.uri())
        .or(grantee.email_address())
        .or(grantee.display_name())?;

    Some(AclGrant {
        grantee: name.to_string(),
        permission: grant.permission()?.as_str().to_string(),
    })
}

fn object_info(object: &Object) -> ObjectInfo {
    let mut info = ObjectInfo::new(object.key().unwrap_or_default(), object.size().unwrap_or(0));
    info.last_modified = object.last_modified().and_then(to_timestamp);
    info.etag = object.e_tag().map(trim_etag);
    info.storage_class = object.storage_class().map(|sc| sc.as_str().to_string());
    info
}

#[cfg(test)]
mod tests {
    use super::*;
    use s3kit_core::PresignOptions;

    fn presign_request(method: HttpMethod, expires_in: Duration) -> PresignRequest {
        PresignRequest {
            bucket: "my-bucket".to_string(),
            key: "docs/a b.txt".to_string(),
            method,
            expires_in,
            options: PresignOptions::default(),
        }
    }

    #[test]
    fn test_classify_not_found() {
        assert!(matches!(
            classify_error(Some(404), None, "a.txt", "missing"),
            Error::NotFound(ref r) if r == "a.txt"
        ));
        assert!(matches!(
            classify_error(None, Some("NoSuchKey"), "a.txt", "missing"),
            Error::NotFound(_)
        ));
    }

    #[test]
    fn test_classify_auth() {
        assert!(matches!(
            classify_error(Some(403), Some("AccessDenied"), "a.txt", "Access Denied"),
            Error::Auth(ref m) if m == "AccessDenied: Access Denied"
        ));
        assert!(matches!(
            classify_error(Some(400), Some("InvalidAccessKeyId"), "a.txt", "bad key"),
            Error::Auth(_)
        ));
        assert!(matches!(
            classify_error(Some(401), None, "a.txt", "unauthorized"),
            Error::Auth(ref m) if m == "unauthorized"
        ));
    }

    #[test]
    fn test_classify_other_errors_are_network() {
        let err = classify_error(Some(500), Some("InternalError"), "my-bucket", "boom");
        assert!(matches!(err, Error::Network(ref m) if m == "my-bucket: InternalError: boom"));

        let err = classify_error(None, None, "my-bucket", "dispatch failure");
        assert!(matches!(err, Error::Network(ref m) if m == "my-bucket: dispatch failure"));
    }

    #[test]
    fn test_parse_http_date() {
        let parsed = parse_http_date("Tue, 14 Nov 2023 22:13:20 GMT").unwrap();
        assert_eq!(parsed.as_second(), 1_700_000_000);

        assert!(parse_http_date("not a date").is_none());
        assert!(parse_http_date("").is_none());
    }

    #[test]
    fn test_trim_etag() {
        assert_eq!(trim_etag("\"abc123\""), "abc123");
        assert_eq!(trim_etag("abc123"), "abc123");
    }

    #[test]
    fn test_object_info_from_listing() {
        let object = Object::builder()
            .key("docs/a.txt")
            .size(2048)
            .e_tag("\"etag\"")
            .last_modified(aws_smithy_types::DateTime::from_secs(1_700_000_000))
            .build();

        let info = object_info(&object);
        assert_eq!(info.key, "docs/a.txt");
        assert_eq!(info.size_bytes, 2048);
        assert_eq!(info.etag.as_deref(), Some("etag"));
        assert_eq!(info.last_modified.unwrap().as_second(), 1_700_000_000);
    }

    #[test]
    fn test_acl_grant_conversion() {
        use aws_sdk_s3::types::{Grantee, Permission, Type};

        let group = Grant::builder()
            .grantee(
                Grantee::builder()
                    .r#type(Type::Group)
                    .uri(s3kit_core::ALL_USERS_GROUP)
                    .build()
                    .unwrap(),
            )
            .permission(Permission::Read)
            .build();
        assert_eq!(
            acl_grant(&group),
            Some(AclGrant {
                grantee: s3kit_core::ALL_USERS_GROUP.to_string(),
                permission: "READ".to_string(),
            })
        );

        let user = Grant::builder()
            .grantee(
                Grantee::builder()
                    .r#type(Type::CanonicalUser)
                    .id("owner-id")
                    .display_name("owner")
                    .build()
                    .unwrap(),
            )
            .permission(Permission::FullControl)
            .build();
        assert_eq!(acl_grant(&user).unwrap().grantee, "owner-id");

        let no_permission = Grant::builder()
            .grantee(
                Grantee::builder()
                    .r#type(Type::CanonicalUser)
                    .id("x")
                    .build()
                    .unwrap(),
            )
            .build();
        assert!(acl_grant(&no_permission).is_none());
    }

    #[tokio::test]
    async fn test_presign_custom_endpoint_is_path_style() {
        let config = BucketConfig::new("my-bucket", "us-east-1", "AK", "SK")
            .custom_endpoint("http://localhost:9000");
        let transport = S3Transport::new(&config).await.unwrap();

        let mut request = presign_request(HttpMethod::Get, Duration::from_secs(600));
        request.options.response_content_disposition =
            Some("attachment; filename=\"a b.txt\"".to_string());
        let url = transport.presign(request).await.unwrap();

        assert!(url.starts_with("http://localhost:9000/my-bucket/docs/a%20b.txt?"));
        assert!(url.contains("X-Amz-Signature="));
        assert!(url.contains("X-Amz-Expires=600"));
        assert!(url.contains("response-content-disposition="));
    }

    #[tokio::test]
    async fn test_presign_standard_endpoint_is_virtual_hosted() {
        let config = BucketConfig::new("my-bucket", "sa-east-1", "AK", "SK");
        let transport = S3Transport::new(&config).await.unwrap();

        for method in [HttpMethod::Get, HttpMethod::Put, HttpMethod::Delete, HttpMethod::Head] {
            let url = transport
                .presign(presign_request(method, Duration::from_secs(60)))
                .await
                .unwrap();
            assert!(
                url.starts_with("https://my-bucket.s3.sa-east-1.amazonaws.com/docs/a%20b.txt?"),
                "{method}: {url}"
            );
            assert!(url.contains("X-Amz-Credential=AK%2F"));
        }
    }

    #[tokio::test]
    async fn test_presign_rejects_expiry_over_a_week() {
        let config = BucketConfig::new("my-bucket", "us-east-1", "AK", "SK");
        let transport = S3Transport::new(&config).await.unwrap();

        let result = transport
            .presign(presign_request(HttpMethod::Get, Duration::from_secs(8 * 24 * 3600)))
            .await;
        assert!(matches!(result, Err(Error::UrlConstruction(_))));
    }
}
