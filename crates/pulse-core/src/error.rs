use thiserror::Error;

/// Client-side fault taxonomy. Poll-budget exhaustion and backend-reported
/// check failures are terminal `CheckOutcome`s rather than errors, so they
/// have no variant here.
#[derive(Debug, Error)]
pub enum PulseError {
    /// Local pre-flight rejection; no network call was made.
    #[error("validation failed: {0}")]
    Validation(String),
    /// Network failure, or a non-2xx response from the backend.
    #[error("transport error: {message}")]
    Transport {
        message: String,
        status: Option<u16>,
    },
    /// A response arrived but could not be decoded into the expected shape.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Explicit 401/403; the stored credential has already been cleared.
    #[error("authorization required (status {status})")]
    Authorization { status: u16 },
}

impl PulseError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            status: None,
        }
    }

    pub fn is_authorization(&self) -> bool {
        matches!(self, Self::Authorization { .. })
    }
}
