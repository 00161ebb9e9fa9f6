//! IPC error types.

use std::time::Duration;

use thiserror::Error;

use crate::auth::AuthRejection;

/// Errors surfaced to IPC clients and internal callers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IpcError {
    /// The daemon socket is missing or refused the connection.
    #[error("daemon unreachable: {0}")]
    DaemonUnreachable(String),

    /// The connection was rejected before any request was processed.
    #[error("connection rejected: {0}")]
    ConnectionRejected(String),

    /// The client exceeded its request budget.
    #[error("throttled; retry after {retry_after:?}")]
    Throttled {
        /// How long until the cooldown lifts.
        retry_after: Duration,
    },

    /// The client failed one of the authentication checks.
    #[error("unauthorized: {reason}")]
    Unauthorized {
        /// Which check failed.
        reason: AuthRejection,
    },

    /// Malformed frame or payload on the socket.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Catch-all for unexpected failures.
    #[error("internal error: {message}")]
    Internal {
        /// Failure description.
        message: String,
    },
}
