/// Errors crossing the boundary to the job backend.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The credential was rejected (401/403). Refresh it and retry.
    #[error("Authentication rejected: {0}")]
    Auth(String),

    /// Transport-level failure (DNS, TCP, TLS, timeout, dropped socket).
    #[error("Network error: {0}")]
    Network(String),

    /// The backend rejected the request as invalid (4xx).
    #[error("Request rejected ({status}): {body}")]
    Validation {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The backend failed (5xx).
    #[error("Server error ({status}): {body}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// A 2xx response whose body could not be decoded.
    #[error("Malformed response: {0}")]
    Decode(String),
}

impl TransportError {
    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => TransportError::Auth(body),
            400..=499 => TransportError::Validation { status, body },
            _ => TransportError::Server { status, body },
        }
    }

    /// Whether a later identical attempt may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::Network(_) | TransportError::Server { .. }
        )
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            TransportError::Decode(err.to_string())
        } else {
            TransportError::Network(err.to_string())
        }
    }
}
