//! Shared error taxonomy for the hub RPC protocol.
//!
//! [`HubError`] covers the failures that can originate below the
//! application layer: malformed frames, codec failures, and byte-pipe
//! termination. Client- and server-only error kinds (wrong connection
//! state, cancellation) live in their respective crates and wrap this
//! type rather than duplicating it.

use std::io;

/// Errors produced by framing, codecs, and the duplex byte pipe.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// A frame was malformed, missing a required field, or used an
    /// unrecognized discriminator. Raised synchronously from the parser,
    /// never as a partial-data return.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A message failed to serialize or deserialize under the negotiated
    /// codec.
    #[error("codec error: {0}")]
    Codec(String),

    /// The duplex pipe's writer was completed with a terminal error, and
    /// that error surfaced on the paired reader.
    #[error("transport error: {0}")]
    Transport(String),

    /// A write was attempted on a pipe half after `Complete()` was called.
    #[error("pipe closed")]
    Closed,
}

impl HubError {
    /// Build a [`HubError::Protocol`] from a message.
    pub fn protocol(msg: impl Into<String>) -> Self {
        HubError::Protocol(msg.into())
    }

    /// Build a [`HubError::Codec`] from a message.
    pub fn codec(msg: impl Into<String>) -> Self {
        HubError::Codec(msg.into())
    }

    /// Build a [`HubError::Transport`] from a message.
    pub fn transport(msg: impl Into<String>) -> Self {
        HubError::Transport(msg.into())
    }
}

impl From<serde_json::Error> for HubError {
    fn from(e: serde_json::Error) -> Self {
        HubError::Codec(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for HubError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        HubError::Codec(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for HubError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        HubError::Codec(e.to_string())
    }
}

impl From<io::Error> for HubError {
    fn from(e: io::Error) -> Self {
        HubError::Transport(e.to_string())
    }
}

/// Clone-through wrapper so `HubError` can be stored and replayed to
/// multiple waiters (pending invocations, fan-out handlers) without
/// requiring `HubError: Clone` on every variant — `io::Error` inside
/// `Transport` isn't `Clone`, so we degrade to the rendered message.
impl Clone for HubError {
    fn clone(&self) -> Self {
        match self {
            HubError::Protocol(s) => HubError::Protocol(s.clone()),
            HubError::Codec(s) => HubError::Codec(s.clone()),
            HubError::Transport(s) => HubError::Transport(s.clone()),
            HubError::Closed => HubError::Closed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_roundtrip_message() {
        let e = HubError::protocol("bad frame");
        assert_eq!(e.to_string(), "protocol error: bad frame");
    }

    #[test]
    fn clone_preserves_variant() {
        let e = HubError::transport("reset");
        let c = e.clone();
        assert!(matches!(c, HubError::Transport(m) if m == "reset"));
    }
}
