//! Request and response descriptors that cross the worker boundary.
//!
//! # Design
//! Descriptors are plain owned values. A `RequestDescriptor` belongs to the
//! dispatcher until it is enqueued, then to the worker until the exchange
//! finishes; a `ResponseDescriptor` belongs to the worker until it is
//! published, then to the pump. Nothing is shared, so the body buffers are
//! freed exactly once by whoever holds the descriptor when it is dropped.

use std::fmt;
use std::str::FromStr;

use crate::error::FetchError;
use crate::registry::ContinuationHandle;
use crate::result::FetchResponse;

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Head => "HEAD",
        }
    }

    /// Whether a request body is sent for this method.
    pub fn sends_body(self) -> bool {
        matches!(
            self,
            HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch | HttpMethod::Delete
        )
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "DELETE" => Ok(HttpMethod::Delete),
            "PATCH" => Ok(HttpMethod::Patch),
            "HEAD" => Ok(HttpMethod::Head),
            _ => Err(format!("unsupported method {s:?}")),
        }
    }
}

/// Ordered (name, value) pairs with a fixed capacity.
///
/// Pushing past capacity drops the pair and reports it; this is load
/// shedding, not an error. Names and values are cut to `max_len - 1` bytes
/// on a character boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderList {
    entries: Vec<(String, String)>,
    capacity: usize,
    max_len: usize,
}

impl HeaderList {
    pub fn new(capacity: usize, max_len: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity,
            max_len,
        }
    }

    /// Returns `false` if the list was already full and the pair was dropped.
    pub fn push(&mut self, name: &str, value: &str) -> bool {
        if self.entries.len() >= self.capacity {
            return false;
        }
        let limit = self.max_len.saturating_sub(1);
        self.entries.push((
            truncate_on_char_boundary(name, limit).to_string(),
            truncate_on_char_boundary(value, limit).to_string(),
        ));
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn into_pairs(self) -> Vec<(String, String)> {
        self.entries
    }
}

fn truncate_on_char_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// A request on its way from a suspended task to the worker.
#[derive(Debug)]
pub struct RequestDescriptor {
    pub handle: ContinuationHandle,
    pub url: String,
    pub method: HttpMethod,
    pub headers: HeaderList,
    /// Owned by whoever holds the descriptor; the worker drops it after the
    /// exchange regardless of outcome.
    pub body: Option<Vec<u8>>,
    pub timeout_ms: u64,
    pub follow_redirects: bool,
}

/// Outcome of one exchange, correlated to its task by `handle`.
#[derive(Debug)]
pub struct ResponseDescriptor {
    pub handle: ContinuationHandle,
    /// Exactly one branch is populated: the response, or the error message.
    pub outcome: Result<FetchResponse, FetchError>,
}
