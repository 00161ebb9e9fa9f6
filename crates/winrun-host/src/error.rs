//! Error types for the streaming core.
//!
//! The transient/permanent split on [`CloseReason`] is what drives stream
//! reconnect policy: a dropped connection is retried with backoff, while an
//! authentication failure or missing shared memory will not get better by
//! retrying and fails the stream immediately.

use std::time::Duration;

use thiserror::Error;
use winrun_proto::{ProtocolError, ProtocolVersion};

/// Why a window stream's transport closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The connection attempt itself failed.
    ConnectionFailed(String),
    /// An established connection dropped.
    Disconnected(String),
    /// The guest cannot provide shared-memory frames. Permanent.
    SharedMemoryUnavailable(String),
    /// The transport rejected our credentials. Permanent.
    AuthenticationFailed(String),
}

impl CloseReason {
    /// Whether reconnecting can possibly help.
    ///
    /// Permanent reasons skip the backoff machinery entirely and fail the
    /// stream.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::SharedMemoryUnavailable(_) | Self::AuthenticationFailed(_))
    }

    /// Human-readable detail string.
    #[must_use]
    pub fn detail(&self) -> &str {
        match self {
            Self::ConnectionFailed(s)
            | Self::Disconnected(s)
            | Self::SharedMemoryUnavailable(s)
            | Self::AuthenticationFailed(s) => s,
        }
    }
}

/// Errors surfaced by the control channel.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ControlError {
    /// Operation requires an established connection.
    #[error("control channel is not connected")]
    NotConnected,

    /// No matching response arrived within the deadline.
    #[error("request {message_id} timed out after {elapsed:?}")]
    Timeout {
        /// Correlation id of the abandoned request.
        message_id: u32,
        /// How long we waited.
        elapsed: Duration,
    },

    /// The request was cancelled before a response arrived.
    #[error("request cancelled")]
    Cancelled,

    /// The guest acknowledged with `success = false`.
    #[error("guest error {code}: {message}")]
    GuestError {
        /// Guest error code.
        code: u32,
        /// Guest error description.
        message: String,
    },

    /// The transport failed while sending.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// The initial connection could not be established.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The peer speaks a protocol version we cannot interoperate with.
    #[error("incompatible protocol version: local {local}, remote {remote}")]
    IncompatibleVersion {
        /// Our version.
        local: ProtocolVersion,
        /// The guest's version.
        remote: ProtocolVersion,
    },

    /// A framing or payload error on the inbound stream.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The guest answered a request with a response of the wrong shape.
    #[error("unexpected response to request {message_id}")]
    UnexpectedResponse {
        /// Correlation id the mismatched response answered.
        message_id: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permanence_split() {
        assert!(CloseReason::SharedMemoryUnavailable("no socket".into()).is_permanent());
        assert!(CloseReason::AuthenticationFailed("bad ticket".into()).is_permanent());
        assert!(!CloseReason::Disconnected("guest rebooted".into()).is_permanent());
        assert!(!CloseReason::ConnectionFailed("refused".into()).is_permanent());
    }
}
