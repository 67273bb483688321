//! The script-facing bridge: dispatch, pump and lifecycle.
//!
//! # Design
//! `NetBridge` is owned by the script runtime and used only from the
//! scheduler's thread. `fetch` validates, registers the calling task and
//! enqueues without blocking; the task is then suspended until a later
//! `pump` hands it back with its result. If admission fails, the task is
//! returned immediately together with the error, never suspended.
//!
//! Channels and the worker are created on first use. `shutdown` closes both
//! channels and hands back any tasks still waiting; the worker finishes its
//! current exchange, fails to publish, and exits on its own.

use std::sync::mpsc::TryRecvError;
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{debug, error, info, warn};
use url::Url;

use crate::channel::{bounded, BoundedReceiver, BoundedSender, SendRejected};
use crate::config::BridgeConfig;
use crate::error::{ConfigError, FetchError};
use crate::http::{HeaderList, HttpMethod, RequestDescriptor, ResponseDescriptor};
use crate::options::FetchOptions;
use crate::registry::{ContinuationHandle, ContinuationRegistry};
use crate::result::FetchResult;
use crate::transport::{Connectivity, Transport, UreqTransport};
use crate::worker::Worker;

/// Content type used by `post` when the caller gives none.
pub const DEFAULT_POST_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// The runtime's side of suspend/resume.
pub trait TaskHost<T> {
    type Error: std::fmt::Display;

    /// Resume a suspended task with its result. An `Err` means the task
    /// raised while running; the pump logs it and carries on.
    fn resume(&mut self, task: T, result: FetchResult) -> Result<(), Self::Error>;
}

/// What happened to a `fetch` call.
#[derive(Debug)]
pub enum Admission<T> {
    /// Accepted; the task is parked until `pump` resumes it.
    Suspended(ContinuationHandle),
    /// Not accepted; the caller keeps running with `error` as its result.
    Rejected { task: T, error: FetchError },
}

impl<T> Admission<T> {
    pub fn is_suspended(&self) -> bool {
        matches!(self, Admission::Suspended(_))
    }
}

/// Counts from one `pump` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpReport {
    pub delivered: usize,
    /// Responses whose handle was not registered; discarded.
    pub orphaned: usize,
    /// Resumed tasks that raised an error.
    pub resume_failures: usize,
}

/// Tasks released by `take_ready`, in arrival order.
#[derive(Debug)]
pub struct Ready<T> {
    pub results: Vec<(T, FetchResult)>,
    /// Responses whose handle was not registered; discarded.
    pub orphaned: usize,
}

struct WorkerLink {
    requests: BoundedSender<RequestDescriptor>,
    responses: BoundedReceiver<ResponseDescriptor>,
    worker: JoinHandle<()>,
}

pub struct NetBridge<T> {
    config: BridgeConfig,
    transport: Arc<dyn Transport>,
    connectivity: Arc<dyn Connectivity>,
    link: Option<WorkerLink>,
    registry: ContinuationRegistry<T>,
}

impl<T> NetBridge<T> {
    pub fn new(
        config: BridgeConfig,
        transport: Arc<dyn Transport>,
        connectivity: Arc<dyn Connectivity>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            transport,
            connectivity,
            link: None,
            registry: ContinuationRegistry::new(),
        })
    }

    /// A bridge that talks HTTP through `ureq`.
    pub fn with_ureq(config: BridgeConfig, connectivity: Arc<dyn Connectivity>) -> Result<Self, ConfigError> {
        let transport = Arc::new(UreqTransport::new(&config.tls));
        Self::new(config, transport, connectivity)
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Create the channels and start the worker. Does nothing if already
    /// running.
    pub fn init(&mut self) -> Result<(), FetchError> {
        if self.link.is_some() {
            return Ok(());
        }
        let (req_tx, req_rx) = bounded(self.config.request_queue_capacity);
        let (resp_tx, resp_rx) = bounded(self.config.response_queue_capacity);
        let worker = Worker::new(
            &self.config,
            req_rx,
            resp_tx,
            Arc::clone(&self.transport),
            Arc::clone(&self.connectivity),
        );
        let handle = worker.spawn(self.config.worker_stack_size).map_err(|e| {
            error!(error = %e, "failed to start network worker");
            FetchError::NotInitialized
        })?;
        self.link = Some(WorkerLink {
            requests: req_tx,
            responses: resp_rx,
            worker: handle,
        });
        info!(
            request_capacity = self.config.request_queue_capacity,
            response_capacity = self.config.response_queue_capacity,
            "network bridge initialized"
        );
        Ok(())
    }

    /// True while the channels exist and the worker thread is alive.
    pub fn is_running(&self) -> bool {
        self.link.as_ref().is_some_and(|l| !l.worker.is_finished())
    }

    /// Tasks currently suspended on a request.
    pub fn pending(&self) -> usize {
        self.registry.len()
    }

    /// Requests accepted but not yet picked up by the worker.
    pub fn queued_requests(&self) -> usize {
        self.link.as_ref().map_or(0, |l| l.requests.len())
    }

    /// Start a request on behalf of `task`.
    ///
    /// On `Suspended` the bridge owns `task` until `pump` resumes it. On
    /// `Rejected` nothing was enqueued and no buffer outlives the call.
    pub fn fetch(&mut self, task: T, url: &str, options: FetchOptions) -> Admission<T> {
        let request = match self.build_request(url, options) {
            Ok(r) => r,
            Err(error) => return self.reject(task, url, error),
        };
        if !self.connectivity.is_connected() {
            return self.reject(task, url, FetchError::NotConnected);
        }
        if let Err(error) = self.init() {
            return self.reject(task, url, error);
        }
        let Some(link) = self.link.as_ref() else {
            return self.reject(task, url, FetchError::NotInitialized);
        };

        // The task is only registered once the worker owns the request;
        // nothing can resolve the handle before then because `pump` runs on
        // this same thread.
        let handle = self.registry.reserve();
        // Ownership of the descriptor and its body moves to the worker.
        match link.requests.try_send(request.into_descriptor(handle)) {
            Ok(()) => {
                self.registry.insert(handle, task);
                debug!(%handle, url, "request enqueued, task suspended");
                Admission::Suspended(handle)
            }
            Err(SendRejected::Full(descriptor)) => {
                drop(descriptor);
                self.reject(task, url, FetchError::QueueFull)
            }
            Err(SendRejected::Disconnected(descriptor)) => {
                drop(descriptor);
                self.link = None;
                self.reject(task, url, FetchError::NotInitialized)
            }
        }
    }

    /// `fetch` with default options.
    pub fn get(&mut self, task: T, url: &str) -> Admission<T> {
        self.fetch(task, url, FetchOptions::new())
    }

    /// POST `body` with the given content type, or
    /// `application/x-www-form-urlencoded` when `None`.
    pub fn post(
        &mut self,
        task: T,
        url: &str,
        body: impl Into<Vec<u8>>,
        content_type: Option<&str>,
    ) -> Admission<T> {
        let options = FetchOptions::new()
            .method(HttpMethod::Post.as_str())
            .header("Content-Type", content_type.unwrap_or(DEFAULT_POST_CONTENT_TYPE))
            .body(body);
        self.fetch(task, url, options)
    }

    /// POST `value` encoded as JSON.
    pub fn post_json(&mut self, task: T, url: &str, value: &serde_json::Value) -> Admission<T> {
        match serde_json::to_vec(value) {
            Ok(body) => self.post(task, url, body, Some("application/json")),
            Err(e) => {
                let error = FetchError::InvalidOption {
                    key: "body",
                    reason: format!("failed to encode JSON: {e}"),
                };
                self.reject(task, url, error)
            }
        }
    }

    /// Drain every ready response without blocking and resume its task.
    ///
    /// Call once per scheduler tick. Ready results are collected before any
    /// task runs, so nothing here is borrowed while `host` resumes tasks.
    pub fn pump<H: TaskHost<T>>(&mut self, host: &mut H) -> PumpReport {
        let ready = self.take_ready();
        let mut report = PumpReport {
            orphaned: ready.orphaned,
            ..PumpReport::default()
        };
        for (task, result) in ready.results {
            if let Err(e) = host.resume(task, result) {
                warn!(error = %e, "task raised after resume");
                report.resume_failures += 1;
            }
            report.delivered += 1;
        }
        report
    }

    /// Release every task whose response has arrived, paired with its
    /// result, without resuming anything.
    ///
    /// For runtimes that resume tasks themselves and need the bridge free
    /// while doing so, e.g. to let a resumed task `fetch` again.
    pub fn take_ready(&mut self) -> Ready<T> {
        let mut ready = Ready {
            results: Vec::new(),
            orphaned: 0,
        };
        let Some(link) = self.link.as_ref() else {
            return ready;
        };

        let mut worker_gone = false;
        loop {
            let response = match link.responses.try_recv() {
                Ok(r) => r,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    worker_gone = true;
                    break;
                }
            };
            let handle = response.handle;
            let Some(task) = self.registry.release(handle) else {
                warn!(%handle, "response for unknown continuation discarded");
                ready.orphaned += 1;
                continue;
            };
            let result = FetchResult::from(response.outcome);
            debug!(%handle, ok = result.is_ok(), "task ready to resume");
            ready.results.push((task, result));
        }

        if worker_gone {
            // Nothing can answer the remaining continuations any more.
            warn!(pending = self.registry.len(), "network worker exited unexpectedly");
            self.link = None;
            ready.results.extend(
                self.registry
                    .drain()
                    .into_iter()
                    .map(|task| (task, FetchResult::Err(FetchError::WorkerStopped))),
            );
        }
        ready
    }

    /// Close the channels and release every suspended task.
    ///
    /// Requests still queued or in flight are abandoned. The returned tasks
    /// were never resumed; the runtime decides what to do with them. Safe to
    /// call repeatedly.
    pub fn shutdown(&mut self) -> Vec<T> {
        let abandoned = self.registry.drain();
        if let Some(link) = self.link.take() {
            // Dropping both ends stops the worker after its current exchange.
            // It is not joined, so shutdown never waits on network latency.
            drop(link);
            info!(abandoned = abandoned.len(), "network bridge shut down");
        }
        abandoned
    }

    fn reject(&self, task: T, url: &str, error: FetchError) -> Admission<T> {
        warn!(url = %truncate_for_log(url), error = %error, "fetch rejected");
        Admission::Rejected { task, error }
    }

    /// Validate and assemble a request. Nothing is allocated before the URL
    /// length check.
    fn build_request(&self, url: &str, options: FetchOptions) -> Result<PreparedRequest, FetchError> {
        if url.len() >= self.config.max_url_len {
            return Err(FetchError::UrlTooLong);
        }
        let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl(e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchError::InvalidUrl(format!(
                "unsupported scheme '{}'",
                parsed.scheme()
            )));
        }
        if parsed.host_str().is_none_or(str::is_empty) {
            return Err(FetchError::InvalidUrl("missing host".into()));
        }

        let method = match options.method.as_deref() {
            Some(m) => m
                .parse::<HttpMethod>()
                .map_err(|reason| FetchError::InvalidOption { key: "method", reason })?,
            None => HttpMethod::Get,
        };

        let body = match options.body {
            Some(b) if b.len() > self.config.max_request_body => {
                return Err(FetchError::BodyTooLarge {
                    len: b.len(),
                    max: self.config.max_request_body,
                });
            }
            Some(b) if b.is_empty() => None,
            other => other,
        };

        let mut headers = HeaderList::new(self.config.max_headers, self.config.max_header_len);
        for (name, value) in &options.headers {
            if !headers.push(name, value) {
                debug!(dropped = %name, "header capacity reached");
            }
        }

        let timeout_ms = match options.timeout {
            Some(ms) if ms > 0 => ms,
            _ => self.config.default_timeout_ms,
        };

        Ok(PreparedRequest {
            url: url.to_string(),
            method,
            headers,
            body,
            timeout_ms,
            follow_redirects: options.follow_redirects.unwrap_or(true),
        })
    }
}

/// A validated request that has not been given a continuation yet.
struct PreparedRequest {
    url: String,
    method: HttpMethod,
    headers: HeaderList,
    body: Option<Vec<u8>>,
    timeout_ms: u64,
    follow_redirects: bool,
}

impl PreparedRequest {
    fn into_descriptor(self, handle: ContinuationHandle) -> RequestDescriptor {
        RequestDescriptor {
            handle,
            url: self.url,
            method: self.method,
            headers: self.headers,
            body: self.body,
            timeout_ms: self.timeout_ms,
            follow_redirects: self.follow_redirects,
        }
    }
}

impl<T> Drop for NetBridge<T> {
    fn drop(&mut self) {
        let abandoned = self.shutdown();
        if !abandoned.is_empty() {
            debug!(count = abandoned.len(), "dropping suspended tasks with the bridge");
        }
    }
}

fn truncate_for_log(url: &str) -> &str {
    let mut end = url.len().min(96);
    while !url.is_char_boundary(end) {
        end -= 1;
    }
    &url[..end]
}
