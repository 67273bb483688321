//! Limits and policies for the network bridge.
//!
//! # Design
//! Every capacity here is fixed for the lifetime of a bridge instance. The
//! channel capacities bound how many requests and responses can be in flight
//! at once, and the body/header caps bound how much transient memory one
//! exchange may hold. None of them are resized at runtime.

use serde::Deserialize;

use crate::error::ConfigError;

/// Smallest worker stack accepted when one is set explicitly.
pub const MIN_WORKER_STACK: usize = 512 * 1024;

/// Tunables for a `NetBridge`. Missing JSON fields take the defaults below;
/// unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub request_queue_capacity: usize,
    pub response_queue_capacity: usize,
    /// URLs must be strictly shorter than this many bytes.
    pub max_url_len: usize,
    pub max_request_body: usize,
    pub max_response_body: usize,
    /// Applies to both request headers and the kept response headers.
    pub max_headers: usize,
    /// Header names and values are cut to `max_header_len - 1` bytes.
    pub max_header_len: usize,
    pub default_timeout_ms: u64,
    /// Worker thread stack in bytes. `None` uses the platform default.
    pub worker_stack_size: Option<usize>,
    pub tls: TlsPolicy,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            request_queue_capacity: 4,
            response_queue_capacity: 4,
            max_url_len: 512,
            max_request_body: 32 * 1024,
            max_response_body: 128 * 1024,
            max_headers: 16,
            max_header_len: 256,
            default_timeout_ms: 10_000,
            worker_stack_size: None,
            tls: TlsPolicy::default(),
        }
    }
}

/// Certificate handling for `https://` targets.
///
/// Verification is on unless a deployment explicitly opts out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TlsPolicy {
    pub accept_invalid_certs: bool,
}

impl BridgeConfig {
    /// Parse a JSON document and validate it.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: BridgeConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject limits that would make the bridge unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("request_queue_capacity", self.request_queue_capacity),
            ("response_queue_capacity", self.response_queue_capacity),
            ("max_url_len", self.max_url_len),
            ("max_response_body", self.max_response_body),
            ("max_headers", self.max_headers),
        ];
        for (field, value) in checks {
            if value == 0 {
                return Err(ConfigError::Zero(field));
            }
        }
        // A header length of 1 would leave no room for any byte.
        if self.max_header_len < 2 {
            return Err(ConfigError::HeaderLenTooSmall(self.max_header_len));
        }
        if self.default_timeout_ms == 0 {
            return Err(ConfigError::Zero("default_timeout_ms"));
        }
        if let Some(size) = self.worker_stack_size {
            if size < MIN_WORKER_STACK {
                return Err(ConfigError::StackTooSmall {
                    size,
                    min: MIN_WORKER_STACK,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_device_limits() {
        let config = BridgeConfig::default();
        assert_eq!(config.request_queue_capacity, 4);
        assert_eq!(config.response_queue_capacity, 4);
        assert_eq!(config.max_url_len, 512);
        assert_eq!(config.max_request_body, 32 * 1024);
        assert_eq!(config.max_response_body, 128 * 1024);
        assert_eq!(config.max_headers, 16);
        assert_eq!(config.max_header_len, 256);
        assert_eq!(config.default_timeout_ms, 10_000);
        assert!(!config.tls.accept_invalid_certs);
        assert_eq!(config.worker_stack_size, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn embedded_sized_stack_is_rejected() {
        let err = BridgeConfig::from_json(r#"{"worker_stack_size": 32768}"#).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::StackTooSmall {
                size: 32768,
                min: MIN_WORKER_STACK
            }
        ));
    }

    #[test]
    fn explicit_stack_at_the_floor_is_accepted() {
        let raw = format!(r#"{{"worker_stack_size": {MIN_WORKER_STACK}}}"#);
        let config = BridgeConfig::from_json(&raw).unwrap();
        assert_eq!(config.worker_stack_size, Some(MIN_WORKER_STACK));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = BridgeConfig::from_json(r#"{"request_queue_capacity": 2}"#).unwrap();
        assert_eq!(config.request_queue_capacity, 2);
        assert_eq!(config.max_url_len, 512);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let config = BridgeConfig::from_json(r#"{"colour": "blue"}"#).unwrap();
        assert_eq!(config, BridgeConfig::default());
    }

    #[test]
    fn tls_opt_in_parses() {
        let config = BridgeConfig::from_json(r#"{"tls": {"accept_invalid_certs": true}}"#).unwrap();
        assert!(config.tls.accept_invalid_certs);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let err = BridgeConfig::from_json(r#"{"response_queue_capacity": 0}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Zero("response_queue_capacity")));
    }

    #[test]
    fn tiny_header_len_is_rejected() {
        let config = BridgeConfig {
            max_header_len: 1,
            ..BridgeConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::HeaderLenTooSmall(1))));
    }

    #[test]
    fn malformed_json_is_rejected() {
        let err = BridgeConfig::from_json("{not json").unwrap_err();
        assert!(matches!(err, ConfigError::Json(_)));
    }
}
