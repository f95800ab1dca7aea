//! Webhook authentication: HMAC-SHA256 over the raw request body.
//!
//! The body bytes are verified exactly as received; nothing re-serializes the
//! payload before the MAC is checked. Comparison is constant time via
//! [`Mac::verify_slice`].

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signature header prefix used by the source provider (`sha256=<hex>`).
pub const SRC_SIGNATURE_PREFIX: &str = "sha256=";

/// Allowed clock skew when timestamp verification is enabled.
pub const TIMESTAMP_TOLERANCE_SECS: i64 = 300;

/// Compute the hex HMAC-SHA256 of `body` under `secret`.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a hex-encoded signature (optionally prefixed, e.g. `sha256=`)
/// against the raw body. Returns false on any mismatch, including malformed
/// hex or a wrong prefix.
pub fn verify(secret: &str, body: &[u8], signature_header: &str, prefix: &str) -> bool {
    let hex_part = match signature_header.strip_prefix(prefix) {
        Some(rest) if !prefix.is_empty() => rest,
        _ if prefix.is_empty() => signature_header,
        _ => return false,
    };

    let provided = match hex::decode(hex_part) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(body);
    mac.verify_slice(&provided).is_ok()
}

/// Check a provider-supplied unix-seconds timestamp against `now`, within
/// ±[`TIMESTAMP_TOLERANCE_SECS`]. Only consulted when the per-provider
/// timestamp switch is on.
pub fn verify_timestamp(header_value: &str, now: DateTime<Utc>) -> bool {
    let ts: i64 = match header_value.trim().parse() {
        Ok(ts) => ts,
        Err(_) => return false,
    };
    (now.timestamp() - ts).abs() <= TIMESTAMP_TOLERANCE_SECS
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn valid_signature_verifies() {
        let body = br#"{"action":"opened"}"#;
        let sig = sign("topsecret", body);
        assert!(verify("topsecret", body, &sig, ""));
        assert!(verify("topsecret", body, &format!("sha256={sig}"), SRC_SIGNATURE_PREFIX));
    }

    #[test]
    fn wrong_secret_or_body_fails() {
        let body = br#"{"action":"opened"}"#;
        let sig = sign("topsecret", body);
        assert!(!verify("othersecret", body, &sig, ""));
        assert!(!verify("topsecret", br#"{"action":"closed"}"#, &sig, ""));
    }

    #[test]
    fn malformed_header_fails() {
        let body = b"payload";
        assert!(!verify("s", body, "not-hex!", ""));
        assert!(!verify("s", body, "", ""));
        // Missing required prefix.
        let sig = sign("s", body);
        assert!(!verify("s", body, &sig, SRC_SIGNATURE_PREFIX));
    }

    #[test]
    fn timestamp_window() {
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        assert!(verify_timestamp("1700000000", now));
        assert!(verify_timestamp("1699999800", now));
        assert!(verify_timestamp(&format!("{}", 1_700_000_000 + 299), now));
        assert!(!verify_timestamp(&format!("{}", 1_700_000_000 + 301), now));
        assert!(!verify_timestamp(&format!("{}", 1_700_000_000 - 301), now));
        assert!(!verify_timestamp("garbage", now));
    }
}
