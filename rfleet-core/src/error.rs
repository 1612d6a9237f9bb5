//! Error types for reconciliation and fleet operations.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Maximum number of response body bytes shown when an error is rendered.
pub const MAX_ERROR_BODY: usize = 512;

/// Boxed cause of a transport failure.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while talking to or reconciling devices.
#[derive(Debug, Error)]
pub enum FleetError {
    /// Malformed or missing identity/desired-state input. Detected before any I/O.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Lookup-only request found no matching resource.
    #[error("not found: {0}")]
    NotFound(String),

    /// The request could not be completed at all.
    #[error("transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// The device answered with a non-success status.
    ///
    /// `body` is kept whole so [`scrub`](FleetError::scrub) sees every byte;
    /// only the rendered message is cut to [`MAX_ERROR_BODY`].
    #[error("http error {status}: {}", truncate(.body, MAX_ERROR_BODY))]
    Http { status: u16, body: String },

    /// The device answered, but not with the shape we expected.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The device accepted a secret-bearing resource but would not disclose the secret.
    ///
    /// `cause` is set when the last read path failed outright rather than
    /// leaving the field out.
    #[error("secret unreadable: field '{field}' of {resource} not returned by any read path")]
    SecretUnreadable {
        resource: String,
        field: String,
        #[source]
        cause: Option<Box<FleetError>>,
    },

    /// A fan-out slot did not finish within the task timeout.
    #[error("task timed out after {timeout_ms}ms")]
    TaskTimeout { timeout_ms: u64 },

    /// A fan-out slot failed unexpectedly (panicked or was cancelled).
    #[error("task aborted: {0}")]
    TaskAborted(String),
}

/// Error classification, stable across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    TransportError,
    HttpError,
    MalformedResponse,
    SecretUnreadable,
    TaskTimeout,
    TaskAborted,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::InvalidArgument => "invalid-argument",
            ErrorKind::NotFound => "not-found",
            ErrorKind::TransportError => "transport-error",
            ErrorKind::HttpError => "http-error",
            ErrorKind::MalformedResponse => "malformed-response",
            ErrorKind::SecretUnreadable => "secret-unreadable",
            ErrorKind::TaskTimeout => "task-timeout",
            ErrorKind::TaskAborted => "task-aborted",
        };
        f.write_str(s)
    }
}

impl FleetError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedResponse(msg.into())
    }

    /// Transport failure with an underlying cause attached.
    pub fn transport(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transport {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// HTTP rejection. The body is truncated on display, not here.
    pub fn http(status: u16, body: impl Into<String>) -> Self {
        Self::Http {
            status,
            body: body.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            FleetError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            FleetError::NotFound(_) => ErrorKind::NotFound,
            FleetError::Transport { .. } => ErrorKind::TransportError,
            FleetError::Http { .. } => ErrorKind::HttpError,
            FleetError::MalformedResponse(_) => ErrorKind::MalformedResponse,
            FleetError::SecretUnreadable { .. } => ErrorKind::SecretUnreadable,
            FleetError::TaskTimeout { .. } => ErrorKind::TaskTimeout,
            FleetError::TaskAborted(_) => ErrorKind::TaskAborted,
        }
    }

    /// HTTP status code, if the device responded.
    pub fn status(&self) -> Option<u16> {
        match self {
            FleetError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether retrying the same call later could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            FleetError::Transport { .. } | FleetError::TaskTimeout { .. } => true,
            FleetError::Http { status, .. } => *status >= 500 || *status == 429,
            FleetError::SecretUnreadable { cause, .. } => {
                cause.as_ref().is_some_and(|c| c.is_retryable())
            }
            _ => false,
        }
    }

    /// Replace every occurrence of `secret` in the error's text payloads.
    ///
    /// Device error bodies may echo the request, so anything that travelled
    /// alongside a secret goes through here before reaching a caller.
    pub fn scrub(self, secret: &str) -> Self {
        if secret.is_empty() {
            return self;
        }
        let clean = |s: String| s.replace(secret, "[REDACTED]");
        match self {
            FleetError::InvalidArgument(m) => FleetError::InvalidArgument(clean(m)),
            FleetError::NotFound(m) => FleetError::NotFound(clean(m)),
            FleetError::MalformedResponse(m) => FleetError::MalformedResponse(clean(m)),
            FleetError::TaskAborted(m) => FleetError::TaskAborted(clean(m)),
            FleetError::Http { status, body } => FleetError::Http {
                status,
                body: clean(body),
            },
            FleetError::Transport { message, source } => {
                let leaks = source
                    .as_ref()
                    .is_some_and(|s| s.to_string().contains(secret));
                FleetError::Transport {
                    message: clean(message),
                    source: if leaks { None } else { source },
                }
            }
            other => other,
        }
    }
}

/// Truncate to at most `max` bytes on a char boundary.
fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

/// Result type for fleet operations.
pub type Result<T> = std::result::Result<T, FleetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_display_is_kebab_case() {
        assert_eq!(ErrorKind::TaskTimeout.to_string(), "task-timeout");
        assert_eq!(ErrorKind::SecretUnreadable.to_string(), "secret-unreadable");
        assert_eq!(
            serde_json::to_string(&ErrorKind::InvalidArgument).unwrap(),
            "\"invalid-argument\""
        );
    }

    #[test]
    fn test_http_body_is_truncated_on_display() {
        let err = FleetError::http(400, "x".repeat(2000));
        assert_eq!(
            err.to_string().len(),
            "http error 400: ".len() + MAX_ERROR_BODY + 3
        );
        assert!(err.to_string().ends_with("..."));
        match err {
            FleetError::Http { status, body } => {
                assert_eq!(status, 400);
                assert_eq!(body.len(), 2000);
            }
            _ => panic!("expected http error"),
        }
    }

    #[test]
    fn test_scrub_covers_secret_across_display_cut() {
        let secret = "privkey-primary-1";
        // Put the secret so the display cut lands in its middle.
        for offset in 1..secret.len() {
            let body = format!("{}{secret}\"}}", "x".repeat(MAX_ERROR_BODY - offset));
            let shown = FleetError::http(400, body).scrub(secret).to_string();
            for len in 4..=secret.len() {
                assert!(
                    !shown.contains(&secret[..len]),
                    "offset {offset}: {shown}"
                );
            }
        }
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        let s = "ä".repeat(300); // 600 bytes
        let t = truncate(&s, 511);
        assert!(t.ends_with("..."));
        assert_eq!(t.len(), 510 + 3);
    }

    #[test]
    fn test_status_and_retryable() {
        assert_eq!(FleetError::http(503, "busy").status(), Some(503));
        assert!(FleetError::http(503, "busy").is_retryable());
        assert!(!FleetError::http(400, "bad").is_retryable());
        assert!(FleetError::TaskTimeout { timeout_ms: 10 }.is_retryable());
        assert!(!FleetError::invalid_argument("x").is_retryable());
        assert_eq!(FleetError::not_found("x").status(), None);
    }

    #[test]
    fn test_scrub_removes_secret_from_body() {
        let err = FleetError::http(400, "bad value 'sekrit-key=' for private-key");
        let scrubbed = err.scrub("sekrit-key=");
        assert_eq!(scrubbed.kind(), ErrorKind::HttpError);
        assert!(!scrubbed.to_string().contains("sekrit-key="));
        assert!(scrubbed.to_string().contains("[REDACTED]"));
    }

    #[test]
    fn test_secret_unreadable_retryable_follows_cause() {
        let unreadable = |cause: Option<FleetError>| FleetError::SecretUnreadable {
            resource: "interface/wireguard wg0".into(),
            field: "private-key".into(),
            cause: cause.map(Box::new),
        };
        assert!(!unreadable(None).is_retryable());
        assert!(!unreadable(Some(FleetError::http(404, "no such command"))).is_retryable());
        assert!(unreadable(Some(FleetError::http(503, "busy"))).is_retryable());

        let err = unreadable(Some(FleetError::http(400, "bad proplist")));
        let cause = std::error::Error::source(&err).unwrap();
        assert!(cause.to_string().contains("bad proplist"));
    }

    #[test]
    fn test_scrub_drops_leaking_source() {
        let source = std::io::Error::other("connection reset while sending sekrit");
        let err = FleetError::transport("PATCH failed", source).scrub("sekrit");
        match err {
            FleetError::Transport { source, .. } => assert!(source.is_none()),
            _ => panic!("expected transport error"),
        }
    }
}
