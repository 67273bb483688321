//! Options accepted by `fetch`.
//!
//! Only `method`, `headers`, `body`, `timeout` and `follow_redirects` are
//! recognized; any other key in a JSON options object is ignored. Absent
//! fields fall back to GET, no headers, no body, the configured default
//! timeout, and following redirects.

use std::fmt;

use serde::de::{Deserializer, MapAccess, Visitor};
use serde::Deserialize;

use crate::error::FetchError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FetchOptions {
    pub method: Option<String>,
    /// Kept in the order given.
    #[serde(deserialize_with = "header_pairs")]
    pub headers: Vec<(String, String)>,
    #[serde(deserialize_with = "body_bytes")]
    pub body: Option<Vec<u8>>,
    /// Milliseconds. Zero means the configured default.
    pub timeout: Option<u64>,
    pub follow_redirects: Option<bool>,
}

impl FetchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a script-side options object encoded as JSON.
    pub fn from_json(raw: &str) -> Result<Self, FetchError> {
        serde_json::from_str(raw).map_err(|e| FetchError::InvalidOption {
            key: "options",
            reason: e.to_string(),
        })
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.timeout = Some(ms);
        self
    }

    pub fn follow_redirects(mut self, follow: bool) -> Self {
        self.follow_redirects = Some(follow);
        self
    }
}

fn header_pairs<'de, D>(deserializer: D) -> Result<Vec<(String, String)>, D::Error>
where
    D: Deserializer<'de>,
{
    struct PairsVisitor;

    impl<'de> Visitor<'de> for PairsVisitor {
        type Value = Vec<(String, String)>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map of header names to string values")
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E> {
            Ok(Vec::new())
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut pairs = Vec::new();
            while let Some((name, value)) = map.next_entry::<String, String>()? {
                pairs.push((name, value));
            }
            Ok(pairs)
        }
    }

    deserializer.deserialize_any(PairsVisitor)
}

fn body_bytes<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.map(String::into_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_is_all_defaults() {
        let options = FetchOptions::from_json("{}").unwrap();
        assert_eq!(options, FetchOptions::default());
    }

    #[test]
    fn recognized_keys_parse() {
        let options = FetchOptions::from_json(
            r#"{
                "method": "post",
                "headers": {"X-B": "2", "X-A": "1"},
                "body": "payload",
                "timeout": 2500,
                "follow_redirects": false
            }"#,
        )
        .unwrap();
        assert_eq!(options.method.as_deref(), Some("post"));
        assert_eq!(
            options.headers,
            vec![("X-B".to_string(), "2".to_string()), ("X-A".to_string(), "1".to_string())]
        );
        assert_eq!(options.body.as_deref(), Some(&b"payload"[..]));
        assert_eq!(options.timeout, Some(2500));
        assert_eq!(options.follow_redirects, Some(false));
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let options = FetchOptions::from_json(r#"{"retries": 3, "method": "GET"}"#).unwrap();
        assert_eq!(options.method.as_deref(), Some("GET"));
    }

    #[test]
    fn null_headers_mean_none() {
        let options = FetchOptions::from_json(r#"{"headers": null}"#).unwrap();
        assert!(options.headers.is_empty());
    }

    #[test]
    fn malformed_options_are_an_admission_error() {
        let err = FetchOptions::from_json(r#"{"timeout": "soon"}"#).unwrap_err();
        assert!(matches!(err, FetchError::InvalidOption { key: "options", .. }));
        assert!(err.is_admission());
    }

    #[test]
    fn builder_collects_fields() {
        let options = FetchOptions::new()
            .method("PUT")
            .header("Content-Type", "text/plain")
            .body("abc")
            .timeout_ms(50)
            .follow_redirects(false);
        assert_eq!(options.method.as_deref(), Some("PUT"));
        assert_eq!(options.headers.len(), 1);
        assert_eq!(options.body, Some(b"abc".to_vec()));
        assert_eq!(options.timeout, Some(50));
        assert_eq!(options.follow_redirects, Some(false));
    }
}
