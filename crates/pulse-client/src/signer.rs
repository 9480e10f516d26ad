//! Configuration request signing
//!
//! Configuration fetches are authenticated with an HMAC-SHA256 signature
//! over the canonical `key=<apiKey>&t=<timestamp>` message, keyed by the
//! account's REST API secret and sent hex-encoded in the `s` parameter.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Sign a configuration request.
///
/// Returns the lowercase hex HMAC-SHA256 of `key=<api_key>&t=<timestamp_ms>`
/// under `secret_key`.
pub fn sign_config_request(api_key: &str, secret_key: &str, timestamp_ms: u64) -> String {
    let message = format!("key={api_key}&t={timestamp_ms}");
    #[allow(clippy::expect_used)]
    let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_deterministic_hex_sha256() {
        let a = sign_config_request("KEY", "secret", 1_700_000_000_000);
        let b = sign_config_request("KEY", "secret", 1_700_000_000_000);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn signature_depends_on_key_secret_and_timestamp() {
        let base = sign_config_request("KEY", "secret", 1);
        assert_ne!(base, sign_config_request("KEY2", "secret", 1));
        assert_ne!(base, sign_config_request("KEY", "secret2", 1));
        assert_ne!(base, sign_config_request("KEY", "secret", 2));
    }
}
