//! Error types shared across the proxy.
//!
//! # Design Decisions
//! - Errors are classified where they happen; the kind decides the status
//! - `status()` of `None` means log only, nothing is written to the client
//! - Construction failures are a separate type and abort handler build

use axum::http::{Method, StatusCode};
use thiserror::Error;

use crate::http::transport::TransportError;

/// Boxed error used at trait seams.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Error kinds surfaced to the error handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NoUpstream,
    ProxyUnavailable,
    ProxyTimeout,
    ProxyRoundtrip,
    ProxyProtocolSwitch,
    ProxyBidirectionalCom,
    ProxyNoRecovery,
    PreProxyHook,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NoUpstream => "NoUpstream",
            ErrorKind::ProxyUnavailable => "ProxyUnavailable",
            ErrorKind::ProxyTimeout => "ProxyTimeout",
            ErrorKind::ProxyRoundtrip => "ProxyRoundtrip",
            ErrorKind::ProxyProtocolSwitch => "ProxyProtocolSwitch",
            ErrorKind::ProxyBidirectionalCom => "ProxyBidirectionalCom",
            ErrorKind::ProxyNoRecovery => "ProxyNoRecovery",
            ErrorKind::PreProxyHook => "PreProxyHook",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runtime error raised while relaying a request.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("no upstream found for {method} {path}")]
    NoUpstream { method: Method, path: String },

    #[error("no active upstream available for {path}")]
    ProxyUnavailable { path: String },

    #[error("round trip to {upstream} exceeded its deadline")]
    ProxyTimeout {
        upstream: String,
        #[source]
        source: TransportError,
    },

    #[error("round trip to {upstream} failed")]
    ProxyRoundtrip {
        upstream: String,
        #[source]
        source: TransportError,
    },

    #[error("protocol switch failed: {reason}")]
    ProxyProtocolSwitch { reason: String },

    #[error("bidirectional copy with {upstream} failed")]
    ProxyBidirectionalCom {
        upstream: String,
        #[source]
        source: std::io::Error,
    },

    #[error("relay with {upstream} aborted")]
    ProxyNoRecovery {
        upstream: String,
        #[source]
        source: BoxError,
    },

    #[error("pre-proxy hook rejected the request: {message}")]
    Hook { status: StatusCode, message: String },
}

impl ProxyError {
    /// Rejection raised by a pre-proxy hook.
    pub fn hook(status: StatusCode, message: impl Into<String>) -> Self {
        ProxyError::Hook {
            status,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ProxyError::NoUpstream { .. } => ErrorKind::NoUpstream,
            ProxyError::ProxyUnavailable { .. } => ErrorKind::ProxyUnavailable,
            ProxyError::ProxyTimeout { .. } => ErrorKind::ProxyTimeout,
            ProxyError::ProxyRoundtrip { .. } => ErrorKind::ProxyRoundtrip,
            ProxyError::ProxyProtocolSwitch { .. } => ErrorKind::ProxyProtocolSwitch,
            ProxyError::ProxyBidirectionalCom { .. } => ErrorKind::ProxyBidirectionalCom,
            ProxyError::ProxyNoRecovery { .. } => ErrorKind::ProxyNoRecovery,
            ProxyError::Hook { .. } => ErrorKind::PreProxyHook,
        }
    }

    /// Status to render, or `None` when the error is only logged.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ProxyError::NoUpstream { .. } => Some(StatusCode::NOT_FOUND),
            ProxyError::ProxyUnavailable { .. } => Some(StatusCode::BAD_GATEWAY),
            ProxyError::ProxyTimeout { .. } => Some(StatusCode::GATEWAY_TIMEOUT),
            ProxyError::ProxyRoundtrip { .. } | ProxyError::ProxyProtocolSwitch { .. } => {
                Some(StatusCode::INTERNAL_SERVER_ERROR)
            }
            ProxyError::ProxyBidirectionalCom { .. } | ProxyError::ProxyNoRecovery { .. } => None,
            ProxyError::Hook { status, .. } => Some(*status),
        }
    }
}

/// Failure to build a handler component from its spec.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("create component: bad path pattern {pattern:?}")]
    BadPathPattern {
        pattern: String,
        #[source]
        source: BoxError,
    },

    #[error("create component: bad upstream url {url:?}")]
    BadUpstreamUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("create component: upstream url {0:?} has no host")]
    UpstreamWithoutHost(String),

    #[error("create component: upstream url {url:?} uses unsupported scheme {scheme:?}")]
    UnsupportedScheme { url: String, scheme: String },

    #[error("create component: upstream {url} weight {weight} exceeds {max}")]
    WeightTooLarge { url: String, weight: i32, max: i32 },

    #[error("create component: invalid HTTP method {0:?}")]
    BadMethod(String),

    #[error("create component: invalid header name {0:?}")]
    BadHeaderName(String),

    #[error("create component: unknown {kind} {name:?}")]
    UnknownReference { kind: &'static str, name: String },

    #[error("create component: invalid health check for {upstream}: {reason}")]
    InvalidHealthCheck { upstream: String, reason: String },

    #[error("create component: active health checks require a tokio runtime")]
    NoRuntime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_map_to_boundary_statuses() {
        let err = ProxyError::NoUpstream {
            method: Method::GET,
            path: "/".into(),
        };
        assert_eq!(err.kind(), ErrorKind::NoUpstream);
        assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));

        let err = ProxyError::ProxyUnavailable { path: "/".into() };
        assert_eq!(err.status(), Some(StatusCode::BAD_GATEWAY));

        let err = ProxyError::ProxyTimeout {
            upstream: "http://a".into(),
            source: TransportError::DeadlineExceeded,
        };
        assert_eq!(err.status(), Some(StatusCode::GATEWAY_TIMEOUT));

        let err = ProxyError::ProxyProtocolSwitch {
            reason: "mismatch".into(),
        };
        assert_eq!(err.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));

        let err = ProxyError::ProxyNoRecovery {
            upstream: "http://a".into(),
            source: "gone".into(),
        };
        assert_eq!(err.kind(), ErrorKind::ProxyNoRecovery);
        assert_eq!(err.status(), None);
    }

    #[test]
    fn test_hook_rejection_keeps_its_status() {
        let err = ProxyError::hook(StatusCode::FORBIDDEN, "denied");
        assert_eq!(err.kind(), ErrorKind::PreProxyHook);
        assert_eq!(err.status(), Some(StatusCode::FORBIDDEN));
        assert_eq!(err.to_string(), "pre-proxy hook rejected the request: denied");
    }

    #[test]
    fn test_build_errors_read_as_create_component() {
        let err = BuildError::BadMethod("G ET".into());
        assert!(err.to_string().starts_with("create component:"));
        let err = BuildError::UnsupportedScheme {
            url: "https://a/".into(),
            scheme: "https".into(),
        };
        assert_eq!(
            err.to_string(),
            "create component: upstream url \"https://a/\" uses unsupported scheme \"https\""
        );
    }
}
