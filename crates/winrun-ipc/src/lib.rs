//! Privileged IPC layer between the WinRun daemon and its local clients.
//!
//! The CLI and the per-window UI talk to the daemon over a Unix socket
//! with length-prefixed JSON frames. Every connection is authenticated
//! (group membership, code signature, team and bundle identity) and every
//! request passes the per-client token-bucket rate limiter before reaching
//! the typed handler.

pub mod auth;
pub mod error;
pub mod rate_limiter;
pub mod requests;
pub mod server;

pub use auth::{
    AuthConfig, AuthRejection, ClientAuthenticator, ClientIdentity, CodeSignatureInfo,
    GroupMembership,
};
pub use error::IpcError;
pub use rate_limiter::{RateLimiter, RateLimiterConfig, RateLimiterMetrics};
pub use requests::{
    IpcRequest, IpcResponse, ProvisioningReport, ProvisioningUpdate, ShortcutSyncReport,
    VmStatusReport, read_frame, write_frame,
};
pub use server::{CodeSignatureLookup, IpcHandler, IpcServer, IpcServerConfig, NoSignatureLookup};
