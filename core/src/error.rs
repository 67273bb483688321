//! Error types for the network bridge.
//!
//! # Design
//! `FetchError` is the one taxonomy scripts ever see. Its `Display` output is
//! the exact `error` string placed in a failed result, so the wording here is
//! part of the script-facing contract. Admission errors are reported
//! synchronously from `fetch`; everything else arrives later through the pump.

use thiserror::Error;

/// Why a fetch did not produce a successful exchange.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The URL is at or above the configured maximum length.
    #[error("URL too long")]
    UrlTooLong,

    /// The URL could not be parsed or uses an unsupported scheme.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// A recognized option carried a value that cannot be used.
    #[error("Invalid option '{key}': {reason}")]
    InvalidOption { key: &'static str, reason: String },

    /// The request body exceeds the configured maximum.
    #[error("Request body too large ({len} > {max} bytes)")]
    BodyTooLarge { len: usize, max: usize },

    /// The request channel is at capacity.
    #[error("Request queue full")]
    QueueFull,

    /// No network link is up.
    #[error("WiFi not connected")]
    NotConnected,

    /// The link dropped after the request was accepted; reported by the
    /// worker. Scripts see the same message as `NotConnected`.
    #[error("WiFi not connected")]
    LinkLost,

    /// The worker context could not be started.
    #[error("HTTP module not initialized")]
    NotInitialized,

    /// Connection, TLS, timeout or protocol failure inside the worker.
    #[error("HTTP error: {0}")]
    Exchange(String),

    /// The worker went away after accepting the request.
    #[error("HTTP worker stopped")]
    WorkerStopped,
}

impl FetchError {
    /// True for errors detected before a request is accepted onto the
    /// request channel. These never suspend the caller.
    pub fn is_admission(&self) -> bool {
        !matches!(
            self,
            FetchError::LinkLost | FetchError::Exchange(_) | FetchError::WorkerStopped
        )
    }
}

/// Failure reported by a `Transport` for a single exchange.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("timed out")]
    Timeout,

    #[error("{0}")]
    Protocol(String),
}

/// Invalid `BridgeConfig`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("max_header_len must be at least 2, got {0}")]
    HeaderLenTooSmall(usize),

    #[error("worker_stack_size must be at least {min} bytes, got {size}")]
    StackTooSmall { size: usize, min: usize },

    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
}
