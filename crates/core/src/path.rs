//! Object key composition
//!
//! Keys passed by callers are relative to the bucket's root prefix. This
//! module turns them into full object keys, optionally bucket-qualified for
//! copy sources, and percent-encodes keys for use in URLs.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

/// Characters escaped in object keys: everything but RFC 3986 unreserved
/// characters, with `/` and `+` kept literal.
const KEY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/')
    .remove(b'+');

/// Compose an object key under `root_prefix`
///
/// Trims whitespace and strips a single leading `/` from `relative_path`,
/// then prepends `root_prefix/` when the prefix is non-empty and `bucket/`
/// when `include_bucket` is set.
///
/// Applying this twice to the same key prepends the prefix twice; call sites
/// compose exactly once.
pub fn compose(root_prefix: &str, bucket: &str, relative_path: &str, include_bucket: bool) -> String {
    let path = relative_path.trim();
    let path = path.strip_prefix('/').unwrap_or(path);

    let mut composed = String::with_capacity(bucket.len() + root_prefix.len() + path.len() + 2);
    if include_bucket {
        composed.push_str(bucket);
        composed.push('/');
    }
    if !root_prefix.is_empty() {
        composed.push_str(root_prefix);
        composed.push('/');
    }
    composed.push_str(path);
    composed
}

/// Normalize a root prefix: trim whitespace, drop one leading and one
/// trailing `/`
pub fn normalize_root(root: &str) -> String {
    let root = root.trim();
    let root = root.strip_prefix('/').unwrap_or(root);
    let root = root.strip_suffix('/').unwrap_or(root);
    root.to_string()
}

/// Percent-encode an object key, keeping `/` and `+` literal
pub fn encode_key(key: &str) -> String {
    utf8_percent_encode(key, KEY_ENCODE_SET).to_string()
}
