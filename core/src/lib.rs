//! Asynchronous network bridge for a cooperatively scheduled script runtime.
//!
//! # Overview
//! Scripts call `fetch` from inside a task. The request is handed to a
//! single worker thread over a bounded channel and the task is suspended;
//! the worker performs the blocking exchange and posts the outcome on a
//! second bounded channel; the runtime's main loop calls `pump` once per
//! tick, which resumes each waiting task with its result. The scheduler's
//! thread never blocks on the network.
//!
//! # Design
//! - `NetBridge` is an explicit object owned by the runtime, not a global.
//! - Suspended tasks live in a `ContinuationRegistry` keyed by an opaque
//!   `ContinuationHandle`; each is released exactly once.
//! - Descriptors are moved across the channels, never shared, so every
//!   buffer has a single owner at any time.
//! - Channel capacities and body/header caps are fixed per bridge and are
//!   the backpressure policy: a full request channel fails `fetch`
//!   immediately instead of queueing without bound.
//! - The HTTP client itself sits behind the `Transport` trait;
//!   `UreqTransport` is the bundled implementation.

pub mod bridge;
pub mod channel;
pub mod config;
pub mod error;
pub mod http;
pub mod options;
pub mod registry;
pub mod result;
pub mod transport;
mod worker;

pub use bridge::{Admission, NetBridge, PumpReport, Ready, TaskHost, DEFAULT_POST_CONTENT_TYPE};
pub use config::{BridgeConfig, TlsPolicy, MIN_WORKER_STACK};
pub use error::{ConfigError, FetchError, TransportError};
pub use http::{HeaderList, HttpMethod};
pub use options::FetchOptions;
pub use registry::{ContinuationHandle, ContinuationRegistry};
pub use result::{FetchResponse, FetchResult};
pub use transport::{
    AlwaysConnected, Connectivity, ConnectivityFlag, ExchangeRequest, ExchangeResponse, Transport,
    UreqTransport,
};
pub use worker::IMPORTANT_HEADERS;
