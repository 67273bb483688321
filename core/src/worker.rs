//! The network worker: one dedicated thread, one exchange at a time.
//!
//! # Design
//! The worker blocks on the request channel (the only place it waits for
//! work), performs the exchange through the `Transport`, and publishes a
//! response with a blocking send. Every request it receives yields exactly
//! one response: link-down, transport errors and even a panicking transport
//! become `success = false` descriptors. The request's body is dropped
//! once the exchange is over, whatever the outcome.
//!
//! The loop ends when the bridge closes the request channel, or when a
//! publish fails because the bridge has dropped the response channel.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::channel::{BoundedReceiver, BoundedSender};
use crate::config::BridgeConfig;
use crate::error::FetchError;
use crate::http::{HeaderList, HttpMethod, RequestDescriptor, ResponseDescriptor};
use crate::result::FetchResponse;
use crate::transport::{Connectivity, ExchangeRequest, ExchangeResponse, Transport};

/// Response headers passed back to scripts. Everything else is discarded.
pub const IMPORTANT_HEADERS: [&str; 8] = [
    "Content-Type",
    "Content-Length",
    "Location",
    "Set-Cookie",
    "Cache-Control",
    "ETag",
    "Last-Modified",
    "X-Request-Id",
];

pub(crate) struct Worker {
    requests: BoundedReceiver<RequestDescriptor>,
    responses: BoundedSender<ResponseDescriptor>,
    transport: Arc<dyn Transport>,
    connectivity: Arc<dyn Connectivity>,
    max_response_body: usize,
    max_headers: usize,
    max_header_len: usize,
}

impl Worker {
    pub(crate) fn new(
        config: &BridgeConfig,
        requests: BoundedReceiver<RequestDescriptor>,
        responses: BoundedSender<ResponseDescriptor>,
        transport: Arc<dyn Transport>,
        connectivity: Arc<dyn Connectivity>,
    ) -> Self {
        Self {
            requests,
            responses,
            transport,
            connectivity,
            max_response_body: config.max_response_body,
            max_headers: config.max_headers,
            max_header_len: config.max_header_len,
        }
    }

    /// Start the worker on its own named thread.
    pub(crate) fn spawn(self, stack_size: Option<usize>) -> io::Result<JoinHandle<()>> {
        let mut builder = thread::Builder::new().name("net-worker".into());
        if let Some(size) = stack_size {
            builder = builder.stack_size(size);
        }
        builder.spawn(move || self.run())
    }

    pub(crate) fn run(self) {
        debug!("network worker started");
        while let Ok(request) = self.requests.recv() {
            let handle = request.handle;
            let outcome = self.process(request);
            if let Err(e) = &outcome {
                debug!(%handle, error = %e, "exchange failed");
            }
            // Ownership of the response and its buffers moves to the pump.
            if self.responses.send(ResponseDescriptor { handle, outcome }).is_err() {
                debug!(%handle, "response channel closed, dropping response");
                break;
            }
        }
        info!("network worker stopped");
    }

    /// Run one exchange. Consumes the request so its body is freed here.
    fn process(&self, request: RequestDescriptor) -> Result<FetchResponse, FetchError> {
        if !self.connectivity.is_connected() {
            return Err(FetchError::LinkLost);
        }

        debug!(
            handle = %request.handle,
            method = %request.method,
            url = %request.url,
            "starting exchange"
        );
        let exchange = ExchangeRequest {
            url: &request.url,
            method: request.method,
            headers: &request.headers,
            body: if request.method.sends_body() {
                request.body.as_deref()
            } else {
                None
            },
            timeout: Duration::from_millis(request.timeout_ms),
            follow_redirects: request.follow_redirects,
            max_body_len: self.max_response_body,
        };

        let attempt = panic::catch_unwind(AssertUnwindSafe(|| self.transport.exchange(&exchange)));
        match attempt {
            Ok(Ok(response)) => Ok(self.shape(response, request.method)),
            Ok(Err(e)) => Err(FetchError::Exchange(e.to_string())),
            Err(_) => {
                warn!(handle = %request.handle, "network client panicked");
                Err(FetchError::Exchange("network client panicked".into()))
            }
        }
    }

    /// Apply the body cap and keep only the important headers.
    fn shape(&self, response: ExchangeResponse, method: HttpMethod) -> FetchResponse {
        let ExchangeResponse {
            status,
            headers,
            mut body,
            mut truncated,
        } = response;

        if method == HttpMethod::Head {
            body.clear();
        } else if body.len() > self.max_response_body {
            body.truncate(self.max_response_body);
            truncated = true;
        }

        let mut kept = HeaderList::new(self.max_headers, self.max_header_len);
        for name in IMPORTANT_HEADERS {
            let found = headers
                .iter()
                .find(|(k, v)| k.eq_ignore_ascii_case(name) && !v.is_empty());
            if let Some((_, value)) = found {
                if !kept.push(name, value) {
                    break;
                }
            }
        }

        FetchResponse {
            status,
            body,
            headers: kept.into_pairs(),
            truncated,
        }
    }
}
