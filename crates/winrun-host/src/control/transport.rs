//! Byte-stream transports the control channel runs over.
//!
//! The channel itself only needs an ordered duplex byte stream; in
//! production that is the Spice agent port exposed as a Unix socket by the
//! hypervisor, and in tests an in-memory duplex pipe.

use std::path::PathBuf;
use std::pin::Pin;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixStream;

use crate::error::ControlError;

/// An established duplex byte stream, type-erased.
pub type ControlStream = Pin<Box<dyn ControlIo>>;

/// Marker trait for the boxed stream type.
pub trait ControlIo: AsyncRead + AsyncWrite + Send {}

impl<T: AsyncRead + AsyncWrite + Send> ControlIo for T {}

/// Factory for control-channel connections.
///
/// Reconnection creates a fresh stream through the same transport, so the
/// transport owns the address/path and the channel owns the session.
#[async_trait]
pub trait ControlTransport: Send + Sync + 'static {
    /// Open a new duplex stream to the guest agent port.
    async fn connect(&self) -> Result<ControlStream, ControlError>;
}

/// Unix-socket transport to the hypervisor's agent port.
pub struct UnixControlTransport {
    path: PathBuf,
}

impl UnixControlTransport {
    /// Transport connecting to the socket at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ControlTransport for UnixControlTransport {
    async fn connect(&self) -> Result<ControlStream, ControlError> {
        let stream = UnixStream::connect(&self.path).await.map_err(|e| {
            ControlError::ConnectionFailed(format!("{}: {e}", self.path.display()))
        })?;
        Ok(Box::pin(stream))
    }
}
