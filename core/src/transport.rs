//! Boundary with the network client and the link-state probe.
//!
//! # Design
//! The bridge never speaks HTTP itself. The worker hands each request to a
//! `Transport` as one blocking call and marshals whatever comes back. The
//! transport must honour the timeout, redirect policy and body cap it is
//! given; it must not buffer more than `max_body_len + 1` bytes of a
//! response. `UreqTransport` is the production implementation.

use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;
use ureq::tls::TlsConfig;
use ureq::RequestBuilder;

use crate::config::TlsPolicy;
use crate::error::TransportError;
use crate::http::{HeaderList, HttpMethod};

/// Redirect hop limit when a request asks to follow redirects.
const MAX_REDIRECTS: u32 = 10;

/// Everything the network client needs for one exchange.
#[derive(Debug)]
pub struct ExchangeRequest<'a> {
    pub url: &'a str,
    pub method: HttpMethod,
    pub headers: &'a HeaderList,
    pub body: Option<&'a [u8]>,
    pub timeout: Duration,
    pub follow_redirects: bool,
    pub max_body_len: usize,
}

/// Raw result of one exchange. Non-2xx statuses are still responses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExchangeResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub truncated: bool,
}

/// A blocking network client.
pub trait Transport: Send + Sync {
    fn exchange(&self, request: &ExchangeRequest<'_>) -> Result<ExchangeResponse, TransportError>;
}

/// Reports whether a network link is currently up.
pub trait Connectivity: Send + Sync {
    fn is_connected(&self) -> bool;
}

/// For hosts whose link is managed elsewhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysConnected;

impl Connectivity for AlwaysConnected {
    fn is_connected(&self) -> bool {
        true
    }
}

/// Link state the host flips as WiFi associates and drops.
#[derive(Debug, Clone, Default)]
pub struct ConnectivityFlag(Arc<AtomicBool>);

impl ConnectivityFlag {
    pub fn new(connected: bool) -> Self {
        Self(Arc::new(AtomicBool::new(connected)))
    }

    pub fn set(&self, connected: bool) {
        self.0.store(connected, Ordering::SeqCst);
    }
}

impl Connectivity for ConnectivityFlag {
    fn is_connected(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// `Transport` backed by a shared `ureq` agent.
///
/// 4xx/5xx responses come back as data; only transport-level failures are
/// errors.
#[derive(Debug, Clone)]
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    pub fn new(tls: &TlsPolicy) -> Self {
        let mut builder = ureq::Agent::config_builder().http_status_as_error(false);
        if tls.accept_invalid_certs {
            warn!("TLS certificate verification is disabled by configuration");
            builder = builder.tls_config(TlsConfig::builder().disable_verification(true).build());
        }
        Self {
            agent: builder.build().new_agent(),
        }
    }

    fn prepare<B>(&self, builder: RequestBuilder<B>, request: &ExchangeRequest<'_>) -> RequestBuilder<B> {
        let redirects = if request.follow_redirects { MAX_REDIRECTS } else { 0 };
        let mut builder = builder
            .config()
            .timeout_global(Some(request.timeout))
            .max_redirects(redirects)
            .build();
        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }
        builder
    }
}

impl Transport for UreqTransport {
    fn exchange(&self, request: &ExchangeRequest<'_>) -> Result<ExchangeResponse, TransportError> {
        let url = request.url;
        let body = request.body.unwrap_or(&[][..]);
        let sent = match request.method {
            HttpMethod::Get => self.prepare(self.agent.get(url), request).call(),
            HttpMethod::Head => self.prepare(self.agent.head(url), request).call(),
            HttpMethod::Post => self.prepare(self.agent.post(url), request).send(body),
            HttpMethod::Put => self.prepare(self.agent.put(url), request).send(body),
            HttpMethod::Patch => self.prepare(self.agent.patch(url), request).send(body),
            HttpMethod::Delete if request.body.is_some() => self
                .prepare(self.agent.delete(url).force_send_body(), request)
                .send(body),
            HttpMethod::Delete => self.prepare(self.agent.delete(url), request).call(),
        };
        let mut response = sent.map_err(map_ureq_error)?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let (body, truncated) = if request.method == HttpMethod::Head {
            (Vec::new(), false)
        } else {
            read_capped(response.body_mut().as_reader(), request.max_body_len)
                .map_err(map_io_error)?
        };

        Ok(ExchangeResponse {
            status,
            headers,
            body,
            truncated,
        })
    }
}

/// Read at most `max + 1` bytes so an oversized body is detected without
/// being buffered in full.
pub(crate) fn read_capped(reader: impl Read, max: usize) -> io::Result<(Vec<u8>, bool)> {
    let mut body = Vec::new();
    reader.take(max as u64 + 1).read_to_end(&mut body)?;
    let truncated = body.len() > max;
    body.truncate(max);
    Ok((body, truncated))
}

fn map_ureq_error(err: ureq::Error) -> TransportError {
    match err {
        ureq::Error::Timeout(_) => TransportError::Timeout,
        ureq::Error::HostNotFound | ureq::Error::ConnectionFailed => {
            TransportError::Connect(err.to_string())
        }
        ureq::Error::Io(e) => map_io_error(e),
        other => TransportError::Protocol(other.to_string()),
    }
}

fn map_io_error(err: io::Error) -> TransportError {
    match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TransportError::Timeout,
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted => TransportError::Connect(err.to_string()),
        _ => TransportError::Protocol(err.to_string()),
    }
}
