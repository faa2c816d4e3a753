//! Failure taxonomy for HTTP API calls.
//!
//! [`ApiError`] is the error type a transport layer hands to the executor.
//! It separates transport failures (nothing came back) from application
//! failures (an HTTP error status came back) and classifies both into
//! [`ErrorCategory`] by variant and status code alone.

use std::io;

use thiserror::Error;

use crate::retry::{Classify, ErrorCategory};

/// Why a request never produced a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// The peer refused or dropped the connection.
    ConnectionRefused,
    /// Connect or read timed out.
    Timeout,
    /// DNS lookup failed.
    UnknownHost,
    /// TLS handshake or certificate validation failed.
    Tls,
    /// Any other transport failure.
    Other,
}

/// A failed API call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// No response was received.
    #[error("{method} {endpoint}: {message}")]
    Transport {
        /// What went wrong on the wire.
        kind: TransportKind,
        /// Endpoint being called.
        endpoint: String,
        /// HTTP method used.
        method: String,
        /// Human-readable detail.
        message: String,
    },
    /// The server answered with an error status.
    #[error("{method} {endpoint} returned HTTP {status}")]
    Application {
        /// HTTP status code.
        status: u16,
        /// Response body, if captured.
        body: Option<String>,
        /// Endpoint being called.
        endpoint: String,
        /// HTTP method used.
        method: String,
    },
}

impl ApiError {
    /// Transport failure of `kind`.
    pub fn transport(
        kind: TransportKind,
        endpoint: impl Into<String>,
        method: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Transport {
            kind,
            endpoint: endpoint.into(),
            method: method.into(),
            message: message.into(),
        }
    }

    /// The connection was refused.
    pub fn connect_refused(endpoint: impl Into<String>, method: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        let message = format!("failed to connect to endpoint: {}", endpoint);
        Self::transport(TransportKind::ConnectionRefused, endpoint, method, message)
    }

    /// The connection timed out.
    pub fn timed_out(endpoint: impl Into<String>, method: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        let message = format!("connection timed out for endpoint: {}", endpoint);
        Self::transport(TransportKind::Timeout, endpoint, method, message)
    }

    /// The host name did not resolve.
    pub fn unknown_host(endpoint: impl Into<String>, method: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        let message = format!("unknown host when connecting to endpoint: {}", endpoint);
        Self::transport(TransportKind::UnknownHost, endpoint, method, message)
    }

    /// TLS negotiation failed.
    pub fn tls(
        endpoint: impl Into<String>,
        method: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::transport(TransportKind::Tls, endpoint, method, message)
    }

    /// The server returned `status` without a captured body.
    pub fn status(status: u16, endpoint: impl Into<String>, method: impl Into<String>) -> Self {
        Self::Application {
            status,
            body: None,
            endpoint: endpoint.into(),
            method: method.into(),
        }
    }

    /// The server returned `status` with `body`.
    pub fn status_with_body(
        status: u16,
        body: impl Into<String>,
        endpoint: impl Into<String>,
        method: impl Into<String>,
    ) -> Self {
        Self::Application {
            status,
            body: Some(body.into()),
            endpoint: endpoint.into(),
            method: method.into(),
        }
    }

    /// Wrap an I/O error raised while calling `endpoint`.
    pub fn from_io(err: &io::Error, endpoint: impl Into<String>, method: impl Into<String>) -> Self {
        let kind = match err.category() {
            ErrorCategory::ConnectionError => TransportKind::ConnectionRefused,
            ErrorCategory::NetworkTimeout => TransportKind::Timeout,
            _ => TransportKind::Other,
        };
        Self::transport(kind, endpoint, method, err.to_string())
    }

    /// Endpoint being called.
    pub fn endpoint(&self) -> &str {
        match self {
            Self::Transport { endpoint, .. } | Self::Application { endpoint, .. } => endpoint,
        }
    }

    /// HTTP method used.
    pub fn method(&self) -> &str {
        match self {
            Self::Transport { method, .. } | Self::Application { method, .. } => method,
        }
    }

    /// Returns true if no response was received.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// Response body of an application failure.
    pub fn body(&self) -> Option<&str> {
        match self {
            Self::Application { body, .. } => body.as_deref(),
            Self::Transport { .. } => None,
        }
    }
}

impl Classify for ApiError {
    fn category(&self) -> ErrorCategory {
        match self {
            Self::Transport { kind, .. } => match kind {
                TransportKind::ConnectionRefused => ErrorCategory::ConnectionError,
                TransportKind::Timeout => ErrorCategory::NetworkTimeout,
                TransportKind::UnknownHost => ErrorCategory::DnsResolutionError,
                TransportKind::Tls => ErrorCategory::SslError,
                TransportKind::Other => ErrorCategory::Unknown,
            },
            Self::Application { status, .. } => ErrorCategory::from_status(*status),
        }
    }

    fn status_code(&self) -> Option<u16> {
        match self {
            Self::Application { status, .. } => Some(*status),
            Self::Transport { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_categories() {
        assert_eq!(
            ApiError::connect_refused("/users", "GET").category(),
            ErrorCategory::ConnectionError
        );
        assert_eq!(
            ApiError::timed_out("/users", "GET").category(),
            ErrorCategory::NetworkTimeout
        );
        assert_eq!(
            ApiError::unknown_host("/users", "GET").category(),
            ErrorCategory::DnsResolutionError
        );
        assert_eq!(
            ApiError::tls("/users", "GET", "bad certificate").category(),
            ErrorCategory::SslError
        );
        assert_eq!(ApiError::timed_out("/users", "GET").status_code(), None);
    }

    #[test]
    fn application_categories() {
        let throttled = ApiError::status(429, "/users", "POST");
        assert_eq!(throttled.category(), ErrorCategory::ClientThrottled);
        assert_eq!(throttled.status_code(), Some(429));
        assert_eq!(
            ApiError::status(502, "/users", "GET").category(),
            ErrorCategory::ServerError
        );
        assert_eq!(
            ApiError::status(400, "/users", "POST").category(),
            ErrorCategory::ClientError
        );
    }

    #[test]
    fn context_is_preserved() {
        let err = ApiError::status_with_body(404, "{\"error\":\"missing\"}", "/users/9", "DELETE");
        assert_eq!(err.endpoint(), "/users/9");
        assert_eq!(err.method(), "DELETE");
        assert_eq!(err.body(), Some("{\"error\":\"missing\"}"));
        assert!(!err.is_transport());
        assert_eq!(err.to_string(), "DELETE /users/9 returned HTTP 404");
    }

    #[test]
    fn transport_display() {
        let err = ApiError::connect_refused("/users", "GET");
        assert_eq!(err.to_string(), "GET /users: failed to connect to endpoint: /users");
        assert!(err.is_transport());
    }

    #[test]
    fn from_io_maps_kind() {
        let reset = io::Error::from(io::ErrorKind::ConnectionReset);
        let err = ApiError::from_io(&reset, "/users", "GET");
        assert_eq!(err.category(), ErrorCategory::ConnectionError);

        let other = io::Error::other("weird");
        assert_eq!(
            ApiError::from_io(&other, "/users", "GET").category(),
            ErrorCategory::Unknown
        );
    }
}
