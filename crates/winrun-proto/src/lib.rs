//! Wire protocol between the WinRun host and the Windows in-guest agent.
//!
//! Every control message is one envelope: a type byte, a little-endian u32
//! payload length, and a JSON payload with camelCase field names. Types below
//! `0x80` travel host→guest; the rest travel guest→host. Frame pixels
//! normally bypass this channel entirely via the shared-memory rings in
//! `winrun-shm`; the envelope stream carries control traffic, input, and the
//! out-of-band `FrameReady` notifications.
//!
//! This crate is transport-agnostic and sans-IO: it only turns bytes into
//! typed messages and back. The async plumbing lives in `winrun-host`.

pub mod envelope;
pub mod errors;
pub mod message_type;
pub mod messages;
pub mod version;

pub use envelope::{HEADER_LEN, MAX_PAYLOAD_SIZE, TryRead, deserialize, serialize, try_read};
pub use errors::ProtocolError;
pub use message_type::{Direction, MessageType};
pub use messages::Message;
pub use version::{CURRENT_VERSION, ProtocolVersion};
