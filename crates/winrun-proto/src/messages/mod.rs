//! Typed message payloads for the complete wire catalog.
//!
//! Envelope headers are raw binary for cheap framing, but payloads are JSON
//! with camelCase field names so the C# agent and the Swift-era tooling can
//! interoperate without generated code. The [`Message`] enum covers every
//! catalog entry; the type byte in the envelope header decides which payload
//! shape to parse, so no variant tag is ever serialized.
//!
//! # Invariants
//!
//! Each variant maps to exactly one [`MessageType`] (enforced by match
//! exhaustiveness). Round-trip encoding must produce an equivalent value.

pub mod input;
pub mod provision;
pub mod session;
pub mod window;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::errors::{ProtocolError, Result};
use crate::message_type::MessageType;

/// All possible envelope payloads.
///
/// The payload type is determined by the envelope's type byte, so only the
/// inner struct content is serialized (no discriminator in the JSON). This
/// also prevents a peer from sending mismatched type/payload pairs.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    // Host → guest
    /// Launch a Windows program.
    LaunchProgram(session::LaunchProgram),
    /// Request an icon bitmap.
    RequestIcon(session::RequestIcon),
    /// Push clipboard contents to the guest.
    ClipboardData(input::ClipboardData),
    /// Forward a mouse event.
    MouseInput(input::MouseInput),
    /// Forward a keyboard event.
    KeyboardInput(input::KeyboardInput),
    /// Forward a drag-and-drop event.
    DragDropEvent(input::DragDropEvent),
    /// List guest sessions.
    ListSessions(session::ListSessions),
    /// Close one guest session.
    CloseSession(session::CloseSession),
    /// List guest shortcuts.
    ListShortcuts(session::ListShortcuts),
    /// Request guest shutdown.
    Shutdown(session::Shutdown),

    // Guest → host
    /// Window state update.
    WindowMetadata(window::WindowMetadata),
    /// Frame pushed by message.
    FrameData(window::FrameData),
    /// Handshake capabilities.
    CapabilityFlags(session::CapabilityFlags),
    /// DPI information.
    DpiInfo(window::DpiInfo),
    /// Icon bitmap.
    IconData(window::IconData),
    /// New shortcut detected.
    ShortcutDetected(session::ShortcutDetected),
    /// Guest clipboard changed.
    ClipboardChanged(input::ClipboardChanged),
    /// Liveness signal.
    Heartbeat(session::Heartbeat),
    /// Resource usage report.
    TelemetryReport(session::TelemetryReport),
    /// Provisioning progress.
    ProvisionProgress(provision::ProvisionProgress),
    /// Provisioning error.
    ProvisionError(provision::ProvisionError),
    /// Provisioning finished.
    ProvisionComplete(provision::ProvisionComplete),
    /// Session list reply.
    SessionList(session::SessionList),
    /// Shortcut list reply.
    ShortcutList(session::ShortcutList),
    /// Ring slot written.
    FrameReady(window::FrameReady),
    /// Per-window buffer allocated.
    WindowBufferAllocated(window::WindowBufferAllocated),
    /// Guest error.
    Error(session::GuestError),
    /// Acknowledgement.
    Ack(session::Ack),
}

fn decode_as<T: DeserializeOwned>(ty: MessageType, bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes)
        .map_err(|e| ProtocolError::DecodeFailure { type_byte: ty.to_u8(), detail: e.to_string() })
}

fn encode_as<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| ProtocolError::EncodeFailure(e.to_string()))
}

impl Message {
    /// The catalog entry corresponding to this payload.
    #[must_use]
    pub const fn message_type(&self) -> MessageType {
        match self {
            Self::LaunchProgram(_) => MessageType::LaunchProgram,
            Self::RequestIcon(_) => MessageType::RequestIcon,
            Self::ClipboardData(_) => MessageType::ClipboardData,
            Self::MouseInput(_) => MessageType::MouseInput,
            Self::KeyboardInput(_) => MessageType::KeyboardInput,
            Self::DragDropEvent(_) => MessageType::DragDropEvent,
            Self::ListSessions(_) => MessageType::ListSessions,
            Self::CloseSession(_) => MessageType::CloseSession,
            Self::ListShortcuts(_) => MessageType::ListShortcuts,
            Self::Shutdown(_) => MessageType::Shutdown,
            Self::WindowMetadata(_) => MessageType::WindowMetadata,
            Self::FrameData(_) => MessageType::FrameData,
            Self::CapabilityFlags(_) => MessageType::CapabilityFlags,
            Self::DpiInfo(_) => MessageType::DpiInfo,
            Self::IconData(_) => MessageType::IconData,
            Self::ShortcutDetected(_) => MessageType::ShortcutDetected,
            Self::ClipboardChanged(_) => MessageType::ClipboardChanged,
            Self::Heartbeat(_) => MessageType::Heartbeat,
            Self::TelemetryReport(_) => MessageType::TelemetryReport,
            Self::ProvisionProgress(_) => MessageType::ProvisionProgress,
            Self::ProvisionError(_) => MessageType::ProvisionError,
            Self::ProvisionComplete(_) => MessageType::ProvisionComplete,
            Self::SessionList(_) => MessageType::SessionList,
            Self::ShortcutList(_) => MessageType::ShortcutList,
            Self::FrameReady(_) => MessageType::FrameReady,
            Self::WindowBufferAllocated(_) => MessageType::WindowBufferAllocated,
            Self::Error(_) => MessageType::Error,
            Self::Ack(_) => MessageType::Ack,
        }
    }

    /// Serialize only the payload (no envelope header).
    pub fn encode_payload(&self) -> Result<Vec<u8>> {
        match self {
            Self::LaunchProgram(inner) => encode_as(inner),
            Self::RequestIcon(inner) => encode_as(inner),
            Self::ClipboardData(inner) => encode_as(inner),
            Self::MouseInput(inner) => encode_as(inner),
            Self::KeyboardInput(inner) => encode_as(inner),
            Self::DragDropEvent(inner) => encode_as(inner),
            Self::ListSessions(inner) => encode_as(inner),
            Self::CloseSession(inner) => encode_as(inner),
            Self::ListShortcuts(inner) => encode_as(inner),
            Self::Shutdown(inner) => encode_as(inner),
            Self::WindowMetadata(inner) => encode_as(inner),
            Self::FrameData(inner) => encode_as(inner),
            Self::CapabilityFlags(inner) => encode_as(inner),
            Self::DpiInfo(inner) => encode_as(inner),
            Self::IconData(inner) => encode_as(inner),
            Self::ShortcutDetected(inner) => encode_as(inner),
            Self::ClipboardChanged(inner) => encode_as(inner),
            Self::Heartbeat(inner) => encode_as(inner),
            Self::TelemetryReport(inner) => encode_as(inner),
            Self::ProvisionProgress(inner) => encode_as(inner),
            Self::ProvisionError(inner) => encode_as(inner),
            Self::ProvisionComplete(inner) => encode_as(inner),
            Self::SessionList(inner) => encode_as(inner),
            Self::ShortcutList(inner) => encode_as(inner),
            Self::FrameReady(inner) => encode_as(inner),
            Self::WindowBufferAllocated(inner) => encode_as(inner),
            Self::Error(inner) => encode_as(inner),
            Self::Ack(inner) => encode_as(inner),
        }
    }

    /// Decode a payload of the given catalog type.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::DecodeFailure`] when the JSON does not match the
    ///   payload shape for `ty`.
    pub fn decode_payload(ty: MessageType, bytes: &[u8]) -> Result<Self> {
        Ok(match ty {
            MessageType::LaunchProgram => Self::LaunchProgram(decode_as(ty, bytes)?),
            MessageType::RequestIcon => Self::RequestIcon(decode_as(ty, bytes)?),
            MessageType::ClipboardData => Self::ClipboardData(decode_as(ty, bytes)?),
            MessageType::MouseInput => Self::MouseInput(decode_as(ty, bytes)?),
            MessageType::KeyboardInput => Self::KeyboardInput(decode_as(ty, bytes)?),
            MessageType::DragDropEvent => Self::DragDropEvent(decode_as(ty, bytes)?),
            MessageType::ListSessions => Self::ListSessions(decode_as(ty, bytes)?),
            MessageType::CloseSession => Self::CloseSession(decode_as(ty, bytes)?),
            MessageType::ListShortcuts => Self::ListShortcuts(decode_as(ty, bytes)?),
            MessageType::Shutdown => Self::Shutdown(decode_as(ty, bytes)?),
            MessageType::WindowMetadata => Self::WindowMetadata(decode_as(ty, bytes)?),
            MessageType::FrameData => Self::FrameData(decode_as(ty, bytes)?),
            MessageType::CapabilityFlags => Self::CapabilityFlags(decode_as(ty, bytes)?),
            MessageType::DpiInfo => Self::DpiInfo(decode_as(ty, bytes)?),
            MessageType::IconData => Self::IconData(decode_as(ty, bytes)?),
            MessageType::ShortcutDetected => Self::ShortcutDetected(decode_as(ty, bytes)?),
            MessageType::ClipboardChanged => Self::ClipboardChanged(decode_as(ty, bytes)?),
            MessageType::Heartbeat => Self::Heartbeat(decode_as(ty, bytes)?),
            MessageType::TelemetryReport => Self::TelemetryReport(decode_as(ty, bytes)?),
            MessageType::ProvisionProgress => Self::ProvisionProgress(decode_as(ty, bytes)?),
            MessageType::ProvisionError => Self::ProvisionError(decode_as(ty, bytes)?),
            MessageType::ProvisionComplete => Self::ProvisionComplete(decode_as(ty, bytes)?),
            MessageType::SessionList => Self::SessionList(decode_as(ty, bytes)?),
            MessageType::ShortcutList => Self::ShortcutList(decode_as(ty, bytes)?),
            MessageType::FrameReady => Self::FrameReady(decode_as(ty, bytes)?),
            MessageType::WindowBufferAllocated => {
                Self::WindowBufferAllocated(decode_as(ty, bytes)?)
            },
            MessageType::Error => Self::Error(decode_as(ty, bytes)?),
            MessageType::Ack => Self::Ack(decode_as(ty, bytes)?),
        })
    }

    /// Correlation id carried by this message, when it has one.
    ///
    /// Responses (`Ack`, `Error`, `SessionList`, `ShortcutList`, `IconData`)
    /// may carry the id of the request they answer; requests always carry
    /// their own id. Unsolicited notifications return `None`.
    #[must_use]
    pub fn message_id(&self) -> Option<u32> {
        match self {
            Self::LaunchProgram(m) => Some(m.message_id),
            Self::RequestIcon(m) => Some(m.message_id),
            Self::ListSessions(m) => Some(m.message_id),
            Self::CloseSession(m) => Some(m.message_id),
            Self::ListShortcuts(m) => Some(m.message_id),
            Self::Shutdown(m) => Some(m.message_id),
            Self::SessionList(m) => m.message_id,
            Self::ShortcutList(m) => m.message_id,
            Self::IconData(m) => m.message_id,
            Self::Error(m) => m.message_id,
            Self::Ack(m) => Some(m.message_id),
            _ => None,
        }
    }
}
