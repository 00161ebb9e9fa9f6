//! Error types for wire protocol framing and payload codecs.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while framing, parsing, or negotiating the agent protocol.
///
/// `UnknownMessageType` is terminal for a connection: the parser consumes
/// nothing, and the caller is expected to disconnect rather than resynchronize
/// on a stream it no longer understands.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Type byte is not in the catalog, or arrived from the wrong direction.
    #[error("unknown message type {type_byte:#04x}")]
    UnknownMessageType {
        /// The offending type byte.
        type_byte: u8,
    },

    /// Declared payload length exceeds the protocol maximum.
    #[error("payload of {size} bytes exceeds maximum of {max}")]
    PayloadTooLarge {
        /// Declared payload size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// JSON payload could not be decoded into the typed message.
    #[error("payload decode failure for {type_byte:#04x}: {detail}")]
    DecodeFailure {
        /// Type byte whose payload failed to decode.
        type_byte: u8,
        /// Serde error description.
        detail: String,
    },

    /// JSON payload could not be encoded.
    #[error("payload encode failure: {0}")]
    EncodeFailure(String),

    /// Peer protocol version cannot interoperate with ours.
    #[error("incompatible protocol version: local {local}, remote {remote}")]
    IncompatibleVersion {
        /// Our version.
        local: crate::version::ProtocolVersion,
        /// The peer's version.
        remote: crate::version::ProtocolVersion,
    },
}
