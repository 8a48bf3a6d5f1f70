//! Cache key generation
//!
//! Keys keep the resource family readable (`api_rooms`, `api_rooms_<hash>`)
//! so pattern invalidation can target a family, while request parameters are
//! folded into a SHA-256 suffix.

use sha2::{Digest, Sha256};

/// Prefix of every façade-generated key
pub const KEY_PREFIX: &str = "api_";

/// Namespace for records in the durable mirror
pub const DURABLE_NAMESPACE: &str = "freshgate_cache_";

/// Generate a deterministic cache key from a resource name and parameters.
///
/// Parameters are sorted, so the same set in a different order yields the
/// same key. Without parameters the key is just `api_<resource>`.
pub fn cache_key(resource: &str, params: &[(&str, &str)]) -> String {
    if params.is_empty() {
        return format!("{}{}", KEY_PREFIX, resource);
    }

    let mut hasher = Sha256::new();

    let mut sorted_params: Vec<_> = params.iter().collect();
    sorted_params.sort_by_key(|(k, _)| *k);

    for (k, v) in sorted_params {
        hasher.update(k.as_bytes());
        hasher.update(b"=");
        hasher.update(v.as_bytes());
        hasher.update(b"&");
    }

    // 16 hex chars is plenty to tell parameter sets apart within one family
    let digest = format!("{:x}", hasher.finalize());
    format!("{}{}_{}", KEY_PREFIX, resource, &digest[..16])
}

/// Regex source matching every key of a resource family (`room` → `^api_room`)
pub fn family_pattern(resource: &str) -> String {
    format!("^{}{}", regex::escape(KEY_PREFIX), regex::escape(resource))
}

/// Key under which a logical cache key is mirrored durably
pub fn durable_key(key: &str) -> String {
    format!("{}{}", DURABLE_NAMESPACE, key)
}

/// Recover the logical key from a durable key, if it is in our namespace
pub fn logical_key(durable: &str) -> Option<&str> {
    durable.strip_prefix(DURABLE_NAMESPACE)
}
