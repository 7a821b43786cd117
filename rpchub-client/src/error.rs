//! Client-side connection error types.
//!
//! [`ConnectionError`] wraps [`rpchub_core::HubError`] with the
//! state-machine and invocation failures that only make sense from the
//! client side. Two variants carry fixed message text that callers may
//! match on directly, since a connection library's users script against
//! these strings.

use rpchub_core::HubError;

/// Errors produced by the client connection core.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ConnectionError {
    /// An operation was attempted from a state that doesn't permit it.
    /// The message text is part of the contract callers depend on.
    #[error("{0}")]
    InvalidState(String),

    /// The transport or duplex pipe failed.
    #[error("transport failure: {0}")]
    TransportFailure(#[from] HubError),

    /// The remote `Completion` for a pending invocation carried an error.
    #[error("invocation failed: {0}")]
    InvocationFailed(String),

    /// The operation was cancelled before it completed.
    #[error("operation cancelled")]
    Cancelled,

    /// The operation was attempted against a disposed connection.
    /// Reported as `InvalidState` per the error taxonomy.
    #[error("{0}")]
    Disposed(String),
}

impl ConnectionError {
    pub const CANNOT_START: &'static str =
        "Cannot start a connection that is not in the Disconnected state.";
    pub const CANNOT_SEND: &'static str =
        "Cannot send messages when the connection is not in the Connected state.";
    pub const DISPOSED: &'static str = "Cannot start a connection that has been disposed.";

    pub fn cannot_start() -> Self {
        ConnectionError::InvalidState(Self::CANNOT_START.to_string())
    }

    pub fn cannot_send() -> Self {
        ConnectionError::InvalidState(Self::CANNOT_SEND.to_string())
    }

    pub fn disposed() -> Self {
        ConnectionError::Disposed(Self::DISPOSED.to_string())
    }

    pub fn invocation_failed(message: impl Into<String>) -> Self {
        ConnectionError::InvocationFailed(message.into())
    }

    /// Whether this failure is safe to retry (transport-level, not a
    /// programming error like wrong state).
    pub fn is_retryable(&self) -> bool {
        matches!(self, ConnectionError::TransportFailure(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_state_messages_match_the_fixed_contract() {
        assert_eq!(
            ConnectionError::cannot_start().to_string(),
            "Cannot start a connection that is not in the Disconnected state."
        );
        assert_eq!(
            ConnectionError::cannot_send().to_string(),
            "Cannot send messages when the connection is not in the Connected state."
        );
        assert_eq!(
            ConnectionError::disposed().to_string(),
            "Cannot start a connection that has been disposed."
        );
    }

    #[test]
    fn transport_failure_is_retryable() {
        let err = ConnectionError::from(HubError::transport("reset"));
        assert!(err.is_retryable());
        assert!(!ConnectionError::cannot_start().is_retryable());
    }
}
