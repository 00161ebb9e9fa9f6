//! Message type catalog and direction rules.
//!
//! Every envelope starts with a single type byte. Types below `0x80` travel
//! host→guest; types at or above `0x80` travel guest→host. `0xFE` (Error) and
//! `0xFF` (Ack) are guest→host replies. The split lets either side reject a
//! message that arrives from the wrong direction without touching its payload.

use crate::errors::ProtocolError;

/// Which side of the connection originates a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Sent by the macOS host to the Windows guest agent.
    HostToGuest,
    /// Sent by the Windows guest agent to the macOS host.
    GuestToHost,
}

/// Complete wire message catalog.
///
/// Discriminants are the on-wire type bytes and are part of the protocol
/// contract; never renumber an existing entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    // Host → guest
    /// Launch a Windows program inside the guest.
    LaunchProgram = 0x01,
    /// Request the icon for a shortcut or executable.
    RequestIcon = 0x02,
    /// Push host clipboard contents to the guest.
    ClipboardData = 0x03,
    /// Forward a mouse event to a guest window.
    MouseInput = 0x04,
    /// Forward a keyboard event to a guest window.
    KeyboardInput = 0x05,
    /// Forward a drag-and-drop event to a guest window.
    DragDropEvent = 0x06,
    /// Ask the guest for its open application sessions.
    ListSessions = 0x08,
    /// Close one guest application session.
    CloseSession = 0x09,
    /// Ask the guest for detected Start-menu shortcuts.
    ListShortcuts = 0x0A,
    /// Request a clean guest shutdown.
    Shutdown = 0x0F,

    // Guest → host
    /// Window geometry/title/state update.
    WindowMetadata = 0x80,
    /// Frame pixels pushed by message (non-shared-memory fallback).
    FrameData = 0x81,
    /// Handshake: capability bits and versions.
    CapabilityFlags = 0x82,
    /// Monitor DPI and scale information.
    DpiInfo = 0x83,
    /// Icon bitmap reply to [`MessageType::RequestIcon`].
    IconData = 0x84,
    /// A new shortcut appeared in the guest.
    ShortcutDetected = 0x85,
    /// Guest clipboard contents changed.
    ClipboardChanged = 0x86,
    /// Periodic liveness signal.
    Heartbeat = 0x87,
    /// Guest resource usage report.
    TelemetryReport = 0x88,
    /// Post-install provisioning progress.
    ProvisionProgress = 0x89,
    /// Post-install provisioning error.
    ProvisionError = 0x8A,
    /// Post-install provisioning finished.
    ProvisionComplete = 0x8B,
    /// Reply to [`MessageType::ListSessions`].
    SessionList = 0x8C,
    /// Reply to [`MessageType::ListShortcuts`].
    ShortcutList = 0x8D,
    /// A ring slot was written; drain the window's ring.
    FrameReady = 0x8E,
    /// The guest carved a per-window buffer out of the shared region.
    WindowBufferAllocated = 0x8F,
    /// Guest-reported error.
    Error = 0xFE,
    /// Generic acknowledgement with optional error detail.
    Ack = 0xFF,
}

impl MessageType {
    /// Parse a type byte. `None` if it is not in the catalog.
    #[must_use]
    pub fn from_u8(byte: u8) -> Option<Self> {
        Some(match byte {
            0x01 => Self::LaunchProgram,
            0x02 => Self::RequestIcon,
            0x03 => Self::ClipboardData,
            0x04 => Self::MouseInput,
            0x05 => Self::KeyboardInput,
            0x06 => Self::DragDropEvent,
            0x08 => Self::ListSessions,
            0x09 => Self::CloseSession,
            0x0A => Self::ListShortcuts,
            0x0F => Self::Shutdown,
            0x80 => Self::WindowMetadata,
            0x81 => Self::FrameData,
            0x82 => Self::CapabilityFlags,
            0x83 => Self::DpiInfo,
            0x84 => Self::IconData,
            0x85 => Self::ShortcutDetected,
            0x86 => Self::ClipboardChanged,
            0x87 => Self::Heartbeat,
            0x88 => Self::TelemetryReport,
            0x89 => Self::ProvisionProgress,
            0x8A => Self::ProvisionError,
            0x8B => Self::ProvisionComplete,
            0x8C => Self::SessionList,
            0x8D => Self::ShortcutList,
            0x8E => Self::FrameReady,
            0x8F => Self::WindowBufferAllocated,
            0xFE => Self::Error,
            0xFF => Self::Ack,
            _ => return None,
        })
    }

    /// The on-wire type byte.
    #[must_use]
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Which side originates this message type.
    #[must_use]
    pub fn direction(self) -> Direction {
        if (self as u8) < 0x80 { Direction::HostToGuest } else { Direction::GuestToHost }
    }

    /// Parse a type byte and enforce the direction invariant.
    ///
    /// A type byte on the wrong side of `0x80` for the claimed origin is
    /// indistinguishable from garbage and is reported as
    /// [`ProtocolError::UnknownMessageType`].
    pub fn from_u8_inbound(byte: u8, origin: Direction) -> Result<Self, ProtocolError> {
        match Self::from_u8(byte) {
            Some(ty) if ty.direction() == origin => Ok(ty),
            _ => Err(ProtocolError::UnknownMessageType { type_byte: byte }),
        }
    }
}
