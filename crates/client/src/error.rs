//! Error taxonomy for the persistence client.
//!
//! Errors are either retryable (the request may succeed if repeated) or
//! terminal. [`ClientError::is_retryable`] is the only place that
//! classification is made.

/// Errors from the persistence REST layer.
///
/// Payloads are plain strings so one failed fetch can be handed to every
/// caller that was waiting on it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClientError {
    /// The request never produced a response (connect, DNS, TLS, timeout).
    #[error("Network error: {0}")]
    Network(String),

    /// The server answered with a non-2xx status.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// The `error` field of the response body, or the raw body.
        message: String,
    },

    /// The response body was not the JSON shape we expected.
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// The request could not be built (bad URL, unserializable body).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ClientError {
    /// HTTP status of an [`ClientError::Api`] error.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether repeating the same request could succeed.
    ///
    /// Network failures, 5xx, 408 and 429 are retryable; other statuses,
    /// decode failures and invalid requests are terminal.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Api { status, .. } => is_retryable_status(*status),
            Self::Decode(_) | Self::InvalidRequest(_) => false,
        }
    }
}

/// 5xx, 408 (request timeout) and 429 (too many requests).
pub fn is_retryable_status(status: u16) -> bool {
    (500..600).contains(&status) || status == 408 || status == 429
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else if e.is_builder() {
            Self::InvalidRequest(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn api(status: u16) -> ClientError {
        ClientError::Api {
            status,
            message: "boom".into(),
        }
    }

    #[test]
    fn server_errors_are_retryable() {
        for status in [500, 502, 503, 504, 599] {
            assert!(api(status).is_retryable(), "{status} should retry");
        }
    }

    #[test]
    fn timeout_and_rate_limit_are_retryable() {
        assert!(api(408).is_retryable());
        assert!(api(429).is_retryable());
    }

    #[test]
    fn other_client_errors_are_terminal() {
        for status in [400, 401, 403, 404, 409, 422] {
            assert!(!api(status).is_retryable(), "{status} should not retry");
        }
    }

    #[test]
    fn network_errors_retry_but_decode_errors_do_not() {
        assert!(ClientError::Network("connection refused".into()).is_retryable());
        assert!(!ClientError::Decode("expected value".into()).is_retryable());
        assert!(!ClientError::InvalidRequest("bad url".into()).is_retryable());
    }

    #[test]
    fn display_includes_status_and_message() {
        assert_eq!(api(503).to_string(), "API error (503): boom");
    }
}
