//! Request fingerprints used as de-duplication keys.
//!
//! A fingerprint joins the upper-cased method, the request path and canonical renderings of
//! the query params and body. Object keys are sorted recursively before rendering so the
//! insertion order chosen by a caller never changes the key. Opaque parts are rendered as
//! an `o:`-tagged JSON string literal, so neither the placeholder nor the delimiter can be
//! forged by caller-supplied text.

use std::fmt;

use http::Method;
use serde::Serialize;
use serde_json::Value;

/// Separator between fingerprint fields. Not valid inside JSON text outside of strings.
pub const FINGERPRINT_DELIMITER: char = '\u{1f}';

/// Rendering of an absent or empty payload. No JSON text and no tagged opaque part
/// renders to it.
pub const EMPTY_PLACEHOLDER: &str = "~";

/// Prefix of rendered opaque parts. No JSON text starts with it.
pub const OPAQUE_TAG: &str = "o:";

/// One request part (query params or body).
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    /// Structured content; rendered canonically.
    Json(Value),
    /// Content without a canonical form (raw text, form bodies); rendered verbatim.
    Opaque(String),
}

impl Payload {
    pub fn json(value: Value) -> Self {
        Payload::Json(value)
    }

    pub fn opaque(raw: impl Into<String>) -> Self {
        Payload::Opaque(raw.into())
    }

    /// Serializes any value into a payload. Values serde cannot express as JSON (maps with
    /// non-string keys, failing `Serialize` impls) degrade to their `Debug` rendering.
    pub fn from_serialize<T>(value: &T) -> Self
    where
        T: Serialize + fmt::Debug + ?Sized,
    {
        match serde_json::to_value(value) {
            Ok(json) => Payload::Json(json),
            Err(_) => Payload::Opaque(format!("{value:?}")),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Payload::Json(Value::Null) => true,
            Payload::Json(Value::Object(map)) => map.is_empty(),
            Payload::Json(_) => false,
            Payload::Opaque(raw) => raw.is_empty(),
        }
    }

    /// Rendering used inside a fingerprint.
    pub fn canonical(&self) -> String {
        match self {
            Payload::Json(value) => canonical_json_string(value),
            Payload::Opaque(raw) => {
                // A JSON string literal escapes control characters, the delimiter included.
                let literal = serde_json::to_string(raw).unwrap_or_else(|_| format!("{raw:?}"));
                format!("{OPAQUE_TAG}{literal}")
            }
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Payload::Json(value) => Some(value),
            Payload::Opaque(_) => None,
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Json(value)
    }
}

/// Deterministic key identifying "the same logical request".
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn compute(
        method: &Method,
        url: &str,
        params: Option<&Payload>,
        body: Option<&Payload>,
    ) -> Self {
        let mut key = String::with_capacity(url.len() + 32);
        key.push_str(&method.as_str().to_ascii_uppercase());
        key.push(FINGERPRINT_DELIMITER);
        push_escaped_url(&mut key, url);
        key.push(FINGERPRINT_DELIMITER);
        key.push_str(&render_part(params));
        key.push(FINGERPRINT_DELIMITER);
        key.push_str(&render_part(body));
        Fingerprint(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, part) in self.0.split(FINGERPRINT_DELIMITER).enumerate() {
            if idx > 0 {
                f.write_str(" | ")?;
            }
            f.write_str(part)?;
        }
        Ok(())
    }
}

pub fn compute_fingerprint(
    method: &Method,
    url: &str,
    params: Option<&Payload>,
    body: Option<&Payload>,
) -> Fingerprint {
    Fingerprint::compute(method, url, params, body)
}

/// The delimiter is percent-encoded in the URL field so a path cannot spill into the
/// payload fields.
fn push_escaped_url(key: &mut String, url: &str) {
    for ch in url.chars() {
        if ch == FINGERPRINT_DELIMITER {
            key.push_str("%1F");
        } else {
            key.push(ch);
        }
    }
}

fn render_part(part: Option<&Payload>) -> String {
    match part {
        Some(payload) if !payload.is_empty() => payload.canonical(),
        _ => EMPTY_PLACEHOLDER.to_string(),
    }
}

pub fn canonicalize_json_value(value: &Value) -> Value {
    match value {
        Value::Array(values) => Value::Array(values.iter().map(canonicalize_json_value).collect()),
        Value::Object(map) => {
            let mut entries = map.iter().collect::<Vec<_>>();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));

            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in entries {
                out.insert(k.clone(), canonicalize_json_value(v));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

pub fn canonical_json_string(value: &Value) -> String {
    let canonical = canonicalize_json_value(value);
    serde_json::to_string(&canonical).unwrap_or_else(|_| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn key_order_does_not_matter() {
        let a = Payload::json(json!({"b": 1, "a": {"d": 4, "c": 3}}));
        let b = Payload::json(json!({"a": {"c": 3, "d": 4}, "b": 1}));
        let fa = Fingerprint::compute(&Method::GET, "/user/list", Some(&a), None);
        let fb = Fingerprint::compute(&Method::GET, "/user/list", Some(&b), None);
        assert_eq!(fa, fb);
    }

    #[test]
    fn arrays_keep_their_order() {
        let a = Payload::json(json!({"ids": [1, 2]}));
        let b = Payload::json(json!({"ids": [2, 1]}));
        assert_ne!(
            Fingerprint::compute(&Method::POST, "/x", None, Some(&a)),
            Fingerprint::compute(&Method::POST, "/x", None, Some(&b))
        );
    }

    #[test]
    fn method_is_upper_cased() {
        let lower = Method::from_bytes(b"get").unwrap();
        assert_eq!(
            Fingerprint::compute(&lower, "/x", None, None),
            Fingerprint::compute(&Method::GET, "/x", None, None)
        );
    }

    #[test]
    fn every_field_contributes() {
        let params = Payload::json(json!({"page": 1}));
        let base = Fingerprint::compute(&Method::GET, "/a", Some(&params), None);
        assert_ne!(base, Fingerprint::compute(&Method::POST, "/a", Some(&params), None));
        assert_ne!(base, Fingerprint::compute(&Method::GET, "/b", Some(&params), None));
        assert_ne!(
            base,
            Fingerprint::compute(&Method::GET, "/a", Some(&Payload::json(json!({"page": 2}))), None)
        );
        assert_ne!(base, Fingerprint::compute(&Method::GET, "/a", None, Some(&params)));
    }

    #[test]
    fn absent_and_empty_parts_share_a_placeholder() {
        let none = Fingerprint::compute(&Method::GET, "/a", None, None);
        let empty = Fingerprint::compute(
            &Method::GET,
            "/a",
            Some(&Payload::json(json!({}))),
            Some(&Payload::json(Value::Null)),
        );
        assert_eq!(none, empty);
        assert!(none.as_str().ends_with(EMPTY_PLACEHOLDER));
        assert!(!none.as_str().contains("null"));
    }

    #[test]
    fn placeholder_does_not_collide_with_literal_strings() {
        let literal = Payload::json(json!("null"));
        assert_ne!(
            Fingerprint::compute(&Method::GET, "/a", Some(&literal), None),
            Fingerprint::compute(&Method::GET, "/a", None, None)
        );
    }

    #[test]
    fn opaque_text_cannot_pose_as_an_absent_part() {
        let tilde = Payload::opaque(EMPTY_PLACEHOLDER);
        assert_ne!(
            Fingerprint::compute(&Method::POST, "/form", None, Some(&tilde)),
            Fingerprint::compute(&Method::POST, "/form", None, None)
        );
    }

    #[test]
    fn opaque_text_cannot_shift_field_boundaries() {
        let smuggled = Payload::opaque("x\u{1f}o:\"y\"");
        let split_body = Payload::opaque("y");
        let split_params = Payload::opaque("x");
        let joined = Fingerprint::compute(&Method::POST, "/form", Some(&smuggled), None);
        let split = Fingerprint::compute(&Method::POST, "/form", Some(&split_params), Some(&split_body));
        assert_ne!(joined, split);
        assert_eq!(joined.as_str().matches(FINGERPRINT_DELIMITER).count(), 3);

        let url = Fingerprint::compute(&Method::GET, "/a\u{1f}~", None, None);
        assert_eq!(url.as_str().matches(FINGERPRINT_DELIMITER).count(), 3);
    }

    #[test]
    fn opaque_payloads_are_not_reordered() {
        let a = Payload::opaque("b=1&a=2");
        let b = Payload::opaque("a=2&b=1");
        assert_ne!(
            Fingerprint::compute(&Method::POST, "/form", None, Some(&a)),
            Fingerprint::compute(&Method::POST, "/form", None, Some(&b))
        );
    }

    #[test]
    fn unserializable_values_fall_back_to_debug() {
        let mut map = HashMap::new();
        map.insert((1, 2), "tuple keys are not valid JSON object keys");
        let payload = Payload::from_serialize(&map);
        assert!(matches!(payload, Payload::Opaque(ref raw) if raw.contains("tuple keys")));
    }

    #[test]
    fn display_replaces_delimiter() {
        let fp = Fingerprint::compute(&Method::GET, "/a", None, None);
        assert_eq!(fp.to_string(), "GET | /a | ~ | ~");
    }
}
