//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parse)
//! - Check route definitions are well-formed
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: MuxConfig → Result<(), Vec<ValidationError>>
//! - Route ambiguity needs the method table and is checked when the route
//!   table is compiled, still before the listener starts accepting

use std::net::SocketAddr;

use axum::http::Method;
use thiserror::Error;

use crate::classify::predicates::RPC_PREFACE;
use crate::config::schema::{MuxConfig, TransportMode};

/// Upper bound on the classifier buffer.
pub const MAX_PEEK_LIMIT: usize = 64 * 1024;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {reason}")]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Validate a configuration, collecting every problem found.
pub fn validate_config(config: &MuxConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be > 0"));
    }

    if config.listener.transport == TransportMode::Tls {
        if config.tls.cert_path.is_empty() {
            errors.push(ValidationError::new("tls.cert_path", "required in tls mode"));
        }
        if config.tls.key_path.is_empty() {
            errors.push(ValidationError::new("tls.key_path", "required in tls mode"));
        }
        if config.tls.server_name.is_empty() {
            errors.push(ValidationError::new("tls.server_name", "required in tls mode"));
        }
        if config.tls.handshake_timeout_ms == 0 {
            errors.push(ValidationError::new("tls.handshake_timeout_ms", "must be > 0"));
        }
    }

    let peek = config.classifier.max_peek_bytes;
    if peek < RPC_PREFACE.len() || peek > MAX_PEEK_LIMIT {
        errors.push(ValidationError::new(
            "classifier.max_peek_bytes",
            format!("must be between {} and {}", RPC_PREFACE.len(), MAX_PEEK_LIMIT),
        ));
    }
    if config.classifier.peek_timeout_ms == 0 {
        errors.push(ValidationError::new("classifier.peek_timeout_ms", "must be > 0"));
    }

    if config.rpc.max_message_bytes == 0 {
        errors.push(ValidationError::new("rpc.max_message_bytes", "must be > 0"));
    }

    if let Some(addr) = &config.gateway.upstream_address {
        if addr.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::new(
                "gateway.upstream_address",
                format!("'{}' is not a socket address", addr),
            ));
        }
    }
    if config.gateway.request_timeout_secs == 0 {
        errors.push(ValidationError::new("gateway.request_timeout_secs", "must be > 0"));
    }
    if config.gateway.connect_timeout_secs == 0 {
        errors.push(ValidationError::new("gateway.connect_timeout_secs", "must be > 0"));
    }

    for (i, route) in config.gateway.routes.iter().enumerate() {
        let field = format!("gateway.routes[{}]", i);
        if route.method.parse::<Method>().is_err() {
            errors.push(ValidationError::new(
                format!("{field}.method"),
                format!("'{}' is not an HTTP method", route.method),
            ));
        }
        if !route.path.starts_with('/') {
            errors.push(ValidationError::new(
                format!("{field}.path"),
                "must start with '/'",
            ));
        }
        if !route.rpc.contains('/') {
            errors.push(ValidationError::new(
                format!("{field}.rpc"),
                "expected 'package.Service/Method'",
            ));
        }
        if let Some(body) = &route.body {
            if body != "*" {
                errors.push(ValidationError::new(
                    format!("{field}.body"),
                    "only \"*\" is supported",
                ));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::RouteConfig;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&MuxConfig::default()).is_ok());
    }

    #[test]
    fn peek_limit_must_hold_the_preface() {
        let mut config = MuxConfig::default();
        config.classifier.max_peek_bytes = 8;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "classifier.max_peek_bytes");
    }

    #[test]
    fn tls_fields_ignored_in_plaintext_mode() {
        let mut config = MuxConfig::default();
        config.listener.transport = TransportMode::Plaintext;
        config.tls.cert_path.clear();
        config.tls.key_path.clear();

        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn bad_routes_reported_per_field() {
        let mut config = MuxConfig::default();
        config.gateway.routes = vec![RouteConfig {
            method: "GE T".into(),
            path: "v1/echo".into(),
            rpc: "Echo".into(),
            body: Some("value".into()),
        }];

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "gateway.routes[0].method",
                "gateway.routes[0].path",
                "gateway.routes[0].rpc",
                "gateway.routes[0].body",
            ]
        );
    }
}
