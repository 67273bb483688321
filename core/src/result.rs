//! The value a suspended task is resumed with.
//!
//! Scripts discriminate on `ok`. Serialised, a result is either
//! `{"ok": true, "status", "body", "headers", "truncated"}` or
//! `{"ok": false, "error"}`; the two shapes never mix.

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

use crate::error::FetchError;

/// A completed exchange. Any status code, including 4xx and 5xx, lands here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub body: Vec<u8>,
    /// The kept subset of response headers, in canonical casing.
    pub headers: Vec<(String, String)>,
    /// The server sent more than the configured maximum; `body` holds the
    /// first `max_response_body` bytes.
    pub truncated: bool,
}

impl FetchResponse {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Outcome delivered to the task that called `fetch`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchResult {
    Ok(FetchResponse),
    Err(FetchError),
}

impl FetchResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, FetchResult::Ok(_))
    }

    pub fn response(&self) -> Option<&FetchResponse> {
        match self {
            FetchResult::Ok(r) => Some(r),
            FetchResult::Err(_) => None,
        }
    }

    pub fn error(&self) -> Option<&FetchError> {
        match self {
            FetchResult::Ok(_) => None,
            FetchResult::Err(e) => Some(e),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        // Serialising these types cannot fail: every key is a string.
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl From<Result<FetchResponse, FetchError>> for FetchResult {
    fn from(outcome: Result<FetchResponse, FetchError>) -> Self {
        match outcome {
            Ok(r) => FetchResult::Ok(r),
            Err(e) => FetchResult::Err(e),
        }
    }
}

impl From<FetchError> for FetchResult {
    fn from(err: FetchError) -> Self {
        FetchResult::Err(err)
    }
}

struct HeaderMap<'a>(&'a [(String, String)]);

impl Serialize for HeaderMap<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|(k, v)| (k, v)))
    }
}

impl Serialize for FetchResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FetchResult::Ok(r) => {
                let mut map = serializer.serialize_map(Some(5))?;
                map.serialize_entry("ok", &true)?;
                map.serialize_entry("status", &r.status)?;
                map.serialize_entry("body", &r.body_text())?;
                map.serialize_entry("headers", &HeaderMap(&r.headers))?;
                map.serialize_entry("truncated", &r.truncated)?;
                map.end()
            }
            FetchResult::Err(e) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("ok", &false)?;
                map.serialize_entry("error", &e.to_string())?;
                map.end()
            }
        }
    }
}
