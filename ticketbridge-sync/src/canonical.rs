//! Deterministic JSON serialization for content hashing.
//!
//! Equivalent payloads must hash equal: object keys are sorted, insignificant
//! whitespace is dropped, and numbers with no fractional part are rendered as
//! integers so that `1.0` and `1` canonicalize identically.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Canonicalize an already-parsed JSON value.
pub fn canonicalize(value: &serde_json::Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

/// Parse raw bytes as JSON and canonicalize.
pub fn canonicalize_bytes(bytes: &[u8]) -> Result<String, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_slice(bytes)?;
    Ok(canonicalize(&value))
}

fn write_value(out: &mut String, value: &serde_json::Value) {
    match value {
        serde_json::Value::Null => out.push_str("null"),
        serde_json::Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        serde_json::Value::Number(n) => write_number(out, n),
        serde_json::Value::String(s) => {
            // serde_json's string serialization is deterministic.
            out.push_str(&serde_json::Value::String(s.clone()).to_string());
        }
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::Value::String((*key).clone()).to_string());
                out.push(':');
                write_value(out, &map[*key]);
            }
            out.push('}');
        }
    }
}

fn write_number(out: &mut String, n: &serde_json::Number) {
    if let Some(i) = n.as_i64() {
        out.push_str(&i.to_string());
    } else if let Some(u) = n.as_u64() {
        out.push_str(&u.to_string());
    } else if let Some(f) = n.as_f64() {
        // Integral floats collapse onto the integer rendering; 2^53 bounds the
        // range in which f64 represents integers exactly.
        if f.fract() == 0.0 && f.abs() < 9_007_199_254_740_992.0 {
            out.push_str(&(f as i64).to_string());
        } else {
            out.push_str(&f.to_string());
        }
    } else {
        out.push_str(&n.to_string());
    }
}

/// Lowercase hex SHA-256.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Content hash over `provider || "\0" || event_kind || "\0" || canonical_body`.
pub fn content_hash(provider: &str, event_kind: &str, canonical_body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(provider.as_bytes());
    hasher.update(b"\0");
    hasher.update(event_kind.as_bytes());
    hasher.update(b"\0");
    hasher.update(canonical_body.as_bytes());
    hex::encode(hasher.finalize())
}

/// Delivery fingerprint: the content hash alone, or combined with the
/// provider-supplied delivery id when one was present.
pub fn fingerprint(content_hash: &str, delivery_id: Option<&str>) -> String {
    match delivery_id {
        Some(id) => {
            let mut hasher = Sha256::new();
            hasher.update(content_hash.as_bytes());
            hasher.update(id.as_bytes());
            hex::encode(hasher.finalize())
        }
        None => content_hash.to_string(),
    }
}

/// Hash of a normalized record (IssueRecord / PageRecord), used for echo
/// suppression. Records serialize with ordered collections, so this is
/// deterministic for equal content.
pub fn record_hash<T: Serialize>(record: &T) -> String {
    let value = serde_json::to_value(record).expect("record serialization cannot fail");
    sha256_hex(canonicalize(&value).as_bytes())
}

/// Like [`record_hash`], minus the named top-level fields. Volatile metadata
/// (server timestamps, permalinks) must not defeat echo detection: the hash
/// of the content we wrote has to match the hash of the webhook that write
/// triggers.
pub fn record_hash_excluding<T: Serialize>(record: &T, exclude: &[&str]) -> String {
    let mut value = serde_json::to_value(record).expect("record serialization cannot fail");
    if let Some(map) = value.as_object_mut() {
        for key in exclude {
            map.remove(*key);
        }
    }
    sha256_hex(canonicalize(&value).as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sorts_keys_and_strips_whitespace() {
        let v: serde_json::Value =
            serde_json::from_str(r#"{ "b" : 1, "a" : { "d" : 2, "c" : 3 } }"#).unwrap();
        assert_eq!(canonicalize(&v), r#"{"a":{"c":3,"d":2},"b":1}"#);
    }

    #[test]
    fn normalizes_integral_floats() {
        let v = json!({"n": 1.0, "m": 2.5, "k": 42});
        assert_eq!(canonicalize(&v), r#"{"k":42,"m":2.5,"n":1}"#);
    }

    #[test]
    fn canonicalization_is_idempotent() {
        let v = json!({"z": [1, 2.0, {"y": null, "x": "s"}], "a": true});
        let once = canonicalize(&v);
        let reparsed: serde_json::Value = serde_json::from_str(&once).unwrap();
        assert_eq!(canonicalize(&reparsed), once);
    }

    #[test]
    fn equivalent_payloads_hash_equal() {
        let a = canonicalize_bytes(br#"{"num": 7.0, "tag": "x"}"#).unwrap();
        let b = canonicalize_bytes(br#"{ "tag" : "x", "num" : 7 }"#).unwrap();
        assert_eq!(a, b);
        assert_eq!(
            content_hash("src", "issue.opened", &a),
            content_hash("src", "issue.opened", &b)
        );
    }

    #[test]
    fn provider_and_kind_separate_hash_domains() {
        let body = r#"{"a":1}"#;
        assert_ne!(
            content_hash("src", "issue.opened", body),
            content_hash("tgt", "issue.opened", body)
        );
        assert_ne!(
            content_hash("src", "issue.opened", body),
            content_hash("src", "issue.closed", body)
        );
    }

    #[test]
    fn fingerprint_includes_delivery_id_when_present() {
        let ch = content_hash("src", "issue.opened", r#"{"a":1}"#);
        assert_eq!(fingerprint(&ch, None), ch);
        let with_id = fingerprint(&ch, Some("delivery-1"));
        assert_ne!(with_id, ch);
        assert_eq!(with_id, fingerprint(&ch, Some("delivery-1")));
        assert_ne!(with_id, fingerprint(&ch, Some("delivery-2")));
    }

    #[test]
    fn unicode_strings_survive_canonicalization() {
        let v = json!({"title": "héllo \u{1F980} wörld"});
        let c = canonicalize(&v);
        let reparsed: serde_json::Value = serde_json::from_str(&c).unwrap();
        assert_eq!(reparsed["title"], "héllo \u{1F980} wörld");
    }
}
