//! HMAC-SHA256 signed paths with expiry and key rotation.

use std::{
    collections::BTreeMap,
    time::{SystemTime, UNIX_EPOCH},
};

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::{BlobError, BlobResult};

type HmacSha256 = Hmac<Sha256>;

/// Key id used for the legacy single `secret` setting.
pub const LEGACY_KEY_ID: &str = "default";

#[derive(Clone)]
pub struct PathSigner {
    keys: BTreeMap<String, String>,
    active_key_id: String,
}

impl std::fmt::Debug for PathSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathSigner")
            .field("key_ids", &self.keys.keys().collect::<Vec<_>>())
            .field("active_key_id", &self.active_key_id)
            .finish()
    }
}

impl PathSigner {
    /// Creates a signer that signs with `active_key_id` and accepts
    /// signatures made with any of `keys`.
    pub fn new(keys: BTreeMap<String, String>, active_key_id: impl Into<String>) -> BlobResult<Self> {
        let active_key_id = active_key_id.into();
        if !keys.contains_key(&active_key_id) {
            return Err(BlobError::Configuration {
                reason: format!("active signing key '{}' is not configured", active_key_id),
            });
        }
        Ok(Self {
            keys,
            active_key_id,
        })
    }

    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self {
            keys: BTreeMap::from([(LEGACY_KEY_ID.to_string(), secret.into())]),
            active_key_id: LEGACY_KEY_ID.to_string(),
        }
    }

    /// Returns `path?signature=<hex>&expires=<expires>`.
    pub fn sign(&self, method: &str, path: &str, expires: u64) -> String {
        let secret = &self.keys[&self.active_key_id];
        let signature = hex::encode(mac(secret, method, path, expires).finalize().into_bytes());
        format!("{}?signature={}&expires={}", path, signature, expires)
    }

    pub fn signature_valid(&self, method: &str, url: &str) -> bool {
        self.signature_valid_at(method, url, unix_now())
    }

    /// Checks `url` (path plus query) against every known key.
    pub fn signature_valid_at(&self, method: &str, url: &str, now: u64) -> bool {
        let (path, query) = url.split_once('?').unwrap_or((url, ""));
        let mut signature = None;
        let mut expires = None;
        for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match name.as_ref() {
                "signature" => signature = Some(value.into_owned()),
                "expires" => expires = value.parse::<u64>().ok(),
                _ => {}
            }
        }
        let (Some(signature), Some(expires)) = (signature, expires) else {
            return false;
        };
        if now > expires {
            return false;
        }
        let Ok(signature) = hex::decode(signature) else {
            return false;
        };
        self.keys
            .values()
            .any(|secret| mac(secret, method, path, expires).verify_slice(&signature).is_ok())
    }
}

fn mac(secret: &str, method: &str, path: &str, expires: u64) -> HmacSha256 {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(method.to_lowercase().as_bytes());
    mac.update(path.as_bytes());
    mac.update(expires.to_string().as_bytes());
    mac
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: u64 = 3600;

    #[test]
    fn test_signature_valid_until_expiry() {
        let signer = PathSigner::with_secret("geheim");
        let now = 1_700_000_000;
        let url = signer.sign("get", "/packages/my-guid", now + HOUR);

        assert!(signer.signature_valid_at("GET", &url, now + HOUR / 2));
        assert!(!signer.signature_valid_at("GET", &url, now + 2 * HOUR));
    }

    #[test]
    fn test_signature_bound_to_method_and_path() {
        let signer = PathSigner::with_secret("geheim");
        let now = 1_700_000_000;
        let url = signer.sign("put", "/droplets/guid", now + HOUR);

        assert!(signer.signature_valid_at("put", &url, now));
        assert!(!signer.signature_valid_at("get", &url, now));
        let tampered = url.replace("/droplets/guid", "/droplets/other");
        assert!(!signer.signature_valid_at("put", &tampered, now));
        assert!(!signer.signature_valid_at("put", "/droplets/guid", now));
    }

    #[test]
    fn test_rotated_keys_still_validate() {
        let old = PathSigner::new(
            BTreeMap::from([("k1".to_string(), "first".to_string())]),
            "k1",
        )
        .unwrap();
        let rotated = PathSigner::new(
            BTreeMap::from([
                ("k1".to_string(), "first".to_string()),
                ("k2".to_string(), "second".to_string()),
            ]),
            "k2",
        )
        .unwrap();
        let now = 1_700_000_000;

        let issued_before_rotation = old.sign("get", "/buildpacks/b", now + HOUR);
        assert!(rotated.signature_valid_at("get", &issued_before_rotation, now));

        let issued_after_rotation = rotated.sign("get", "/buildpacks/b", now + HOUR);
        assert!(!old.signature_valid_at("get", &issued_after_rotation, now));
    }

    #[test]
    fn test_unknown_active_key_is_rejected() {
        let result = PathSigner::new(BTreeMap::new(), "missing");
        assert!(matches!(result, Err(BlobError::Configuration { .. })));
    }
}
