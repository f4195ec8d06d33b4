//! Legacy query-string request signing
//!
//! Signs simple requests with the HMAC-SHA1 query-string scheme:
//!
//! ```text
//! StringToSign = HTTP-Verb + "\n" +
//!                Content-MD5 + "\n" +
//!                Content-Type + "\n" +
//!                Expires + "\n" +
//!                "/" + Bucket + "/" + Key
//! ```
//!
//! `Signature = Base64(HMAC-SHA1(SecretKey, StringToSign))`, passed in the
//! `AWSAccessKeyId`, `Expires` and `Signature` query parameters. Content-MD5
//! and Content-Type are always empty here.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use sha1::{Digest, Sha1};

use crate::config::BucketConfig;
use crate::endpoint::{EndpointDecision, ensure_valid_url};
use crate::error::{Error, Result};
use crate::path::{compose, encode_key};
use crate::transport::HttpMethod;

type HmacSha1 = Hmac<Sha1>;

/// SHA-1 block size in bytes
const BLOCK_SIZE: usize = 64;

/// Form encoding of the signature: alphanumerics and `-_.` stay literal
const SIGNATURE_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.');

/// Signer for legacy query-string authenticated URLs
#[derive(Debug, Clone)]
pub struct LegacySigner {
    config: Arc<BucketConfig>,
    endpoint: EndpointDecision,
}

impl LegacySigner {
    pub fn new(config: Arc<BucketConfig>, endpoint: EndpointDecision) -> Self {
        Self { config, endpoint }
    }

    /// Render a signed URL for `key`, valid until `now + expiry_secs`
    ///
    /// `now` is the clock-corrected Unix time. For fixed inputs the output
    /// is fully deterministic.
    pub fn sign(
        &self,
        method: HttpMethod,
        key: &str,
        expiry_secs: u64,
        now: i64,
        https: bool,
    ) -> Result<String> {
        let composed = compose(
            &self.config.root_prefix,
            &self.config.bucket,
            &encode_key(key),
            false,
        );
        let expires = now.saturating_add_unsigned(expiry_secs);

        let string_to_sign = canonical_string(method, expires, &self.config.bucket, &composed);
        let signature = compute_signature(&self.config.secret_key, &string_to_sign)?;
        let signature = utf8_percent_encode(&signature, SIGNATURE_ENCODE_SET);

        let url = format!(
            "{}/{composed}?AWSAccessKeyId={}&Expires={expires}&Signature={signature}",
            self.endpoint.object_base(&self.config.bucket, https),
            self.config.access_key,
        );

        ensure_valid_url(&url)?;
        Ok(url)
    }
}

/// Build the string to sign for a query-string authenticated request
pub fn canonical_string(method: HttpMethod, expires: i64, bucket: &str, composed_key: &str) -> String {
    format!("{method}\n\n\n{expires}\n/{bucket}/{composed_key}")
}

/// Base64(HMAC-SHA1(secret, string_to_sign))
pub fn compute_signature(secret_key: &str, string_to_sign: &str) -> Result<String> {
    let mut mac = HmacSha1::new_from_slice(secret_key.as_bytes())
        .map_err(|e| Error::General(format!("Invalid signing key: {e}")))?;
    mac.update(string_to_sign.as_bytes());
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

/// HMAC-SHA1 built directly on the SHA-1 digest
///
/// `H((K ^ opad) || H((K ^ ipad) || message))` with the key zero-padded to
/// the 64-byte block (hashed first when longer). Byte-for-byte the same
/// construction the `hmac` crate performs.
pub fn manual_hmac_sha1(key: &[u8], message: &[u8]) -> [u8; 20] {
    let mut block = [0u8; BLOCK_SIZE];
    if key.len() > BLOCK_SIZE {
        block[..20].copy_from_slice(&Sha1::digest(key));
    } else {
        block[..key.len()].copy_from_slice(key);
    }

    let mut inner = Sha1::new();
    inner.update(block.map(|b| b ^ 0x36));
    inner.update(message);
    let inner = inner.finalize();

    let mut outer = Sha1::new();
    outer.update(block.map(|b| b ^ 0x5c));
    outer.update(inner);

    let mut mac = [0u8; 20];
    mac.copy_from_slice(&outer.finalize());
    mac
}
