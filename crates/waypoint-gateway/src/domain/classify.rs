//! Failure classification shared by the retry and circuit breaker filters.
//!
//! 503 and 429 are deliberately not retryable but still count against the
//! circuit breaker.

use crate::domain::error::ProxyError;
use crate::domain::filters::RetryableErrors;
use axum::http::StatusCode;

/// How one outcome should be treated by the resilience filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Classification {
    /// Another attempt may succeed
    pub retryable: bool,
    /// Counts as a failure in a circuit breaker window
    pub circuit_countable: bool,
    /// The upstream itself asked us to slow down
    pub rate_limited: bool,
    /// The caller's fault; stop immediately
    pub fatal: bool,
}

impl Classification {
    const SUCCESS: Self = Self {
        retryable: false,
        circuit_countable: false,
        rate_limited: false,
        fatal: false,
    };

    pub fn is_failure(&self) -> bool {
        self.retryable || self.circuit_countable || self.fatal
    }
}

/// Statuses a filter must treat as a failed call.
pub fn is_failure_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

pub fn classify_status(status: StatusCode) -> Classification {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Classification {
            circuit_countable: true,
            rate_limited: true,
            ..Classification::SUCCESS
        };
    }
    if status == StatusCode::SERVICE_UNAVAILABLE {
        return Classification {
            circuit_countable: true,
            ..Classification::SUCCESS
        };
    }
    if status.is_server_error() {
        return Classification {
            retryable: true,
            circuit_countable: true,
            ..Classification::SUCCESS
        };
    }
    if status.is_client_error() {
        return Classification {
            fatal: true,
            ..Classification::SUCCESS
        };
    }
    Classification::SUCCESS
}

/// Classify a failed attempt against a route's allow-list.
///
/// An allow-listed kind name is retryable even when its status alone would
/// not be (e.g. `UpstreamStatusError` listed and the upstream answered 503).
pub fn classify_error(err: &ProxyError, retryable: &RetryableErrors) -> Classification {
    let listed = retryable.contains(err.kind_name());
    match err {
        ProxyError::Connect(_)
        | ProxyError::Timeout(_)
        | ProxyError::Body(_)
        | ProxyError::Request(_) => Classification {
            retryable: listed,
            circuit_countable: true,
            ..Classification::SUCCESS
        },
        ProxyError::UpstreamStatus { status, .. } => {
            let mut classification = classify_status(*status);
            if listed && !classification.fatal {
                classification.retryable = true;
            }
            classification
        }
        ProxyError::RetriesExhausted { source, .. } => Classification {
            retryable: listed,
            ..classify_error(source, &RetryableErrors::none())
        },
        ProxyError::PayloadTooLarge { .. } => Classification {
            fatal: true,
            ..Classification::SUCCESS
        },
    }
}

/// True when a message carries a `429` or `5xx ` status marker.
///
/// Upstream status errors render as `"<code> <reason>: <body>"`, so an
/// error that only survived as text can still be recognised.
pub fn message_has_failure_marker(message: &str) -> bool {
    let bytes = message.as_bytes();
    bytes.windows(3).enumerate().any(|(i, w)| {
        let starts_number = i == 0 || !bytes[i - 1].is_ascii_digit();
        let ends_number = bytes.get(i + 3).map_or(true, |b| !b.is_ascii_digit());
        if !(starts_number && ends_number) {
            return false;
        }
        if w == b"429" {
            return true;
        }
        w[0] == b'5' && w[1].is_ascii_digit() && w[2].is_ascii_digit() && bytes.get(i + 3) == Some(&b' ')
    })
}
