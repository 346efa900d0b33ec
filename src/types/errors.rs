//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation and provide
//! clear error messages with context.
//!
//! `Router::route` never surfaces these to callers; every routing failure is
//! converted into a FAILURE `ServiceResponse` with a stable error code. The
//! variants here exist for the seams below the router: transport, discovery,
//! queue stores, and configuration parsing.

use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the mesh runtime.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed input detected before any side effect.
    #[error("validation error: {0}")]
    Validation(String),

    /// Circuit breaker is open for the target route; no transport attempt was made.
    #[error("circuit open: {0}")]
    CircuitOpen(String),

    /// Transport-level failure on a remote call (connect, timeout, non-2xx).
    #[error("transport error: {0}")]
    Transport(String),

    /// Remote call nominally succeeded but returned no body.
    #[error("empty response: {0}")]
    EmptyResponse(String),

    /// Queue store could not accept or yield an item.
    #[error("queue unavailable: {0}")]
    QueueUnavailable(String),

    /// Local handler raised an unexpected fault.
    #[error("handler fault: {0}")]
    HandlerFault(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

// Convenience constructors
impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn circuit_open(msg: impl Into<String>) -> Self {
        Self::CircuitOpen(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn empty_response(msg: impl Into<String>) -> Self {
        Self::EmptyResponse(msg.into())
    }

    pub fn queue_unavailable(msg: impl Into<String>) -> Self {
        Self::QueueUnavailable(msg.into())
    }

    pub fn handler_fault(msg: impl Into<String>) -> Self {
        Self::HandlerFault(msg.into())
    }
}

impl Error {
    /// Human-readable detail used on FAILURE responses.
    ///
    /// Surfaces the underlying message verbatim; falls back to the variant
    /// name when the message is empty.
    pub fn summarize(&self) -> String {
        let msg = match self {
            Error::Validation(m)
            | Error::CircuitOpen(m)
            | Error::Transport(m)
            | Error::EmptyResponse(m)
            | Error::QueueUnavailable(m)
            | Error::HandlerFault(m) => m.clone(),
            Error::Serialization(e) => e.to_string(),
            Error::Io(e) => e.to_string(),
        };
        if msg.trim().is_empty() {
            self.variant_name().to_string()
        } else {
            msg
        }
    }

    fn variant_name(&self) -> &'static str {
        match self {
            Error::Validation(_) => "Validation",
            Error::CircuitOpen(_) => "CircuitOpen",
            Error::Transport(_) => "Transport",
            Error::EmptyResponse(_) => "EmptyResponse",
            Error::QueueUnavailable(_) => "QueueUnavailable",
            Error::HandlerFault(_) => "HandlerFault",
            Error::Serialization(_) => "Serialization",
            Error::Io(_) => "Io",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summarize_surfaces_message_verbatim() {
        let err = Error::transport("connection refused");
        assert_eq!(err.summarize(), "connection refused");
    }

    #[test]
    fn summarize_falls_back_to_variant_name_when_blank() {
        let err = Error::transport("   ");
        assert_eq!(err.summarize(), "Transport");
    }
}
