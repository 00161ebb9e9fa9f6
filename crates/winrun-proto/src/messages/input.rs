//! Input forwarding payloads: mouse, keyboard, drag-and-drop, clipboard.
//!
//! The numeric codes are shared with the in-guest agent and are part of the
//! wire contract. Enums serialize as their raw numbers (not strings) so the
//! agent can switch on them directly.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A numeric code arrived that is outside the catalog for its field.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("value {value} is not a valid {field}")]
pub struct InvalidCode {
    /// Field the value was destined for.
    pub field: &'static str,
    /// The out-of-range value.
    pub value: u32,
}

macro_rules! wire_code_enum {
    (
        $(#[$meta:meta])*
        $name:ident : $field:literal {
            $( $(#[$vmeta:meta])* $variant:ident = $value:expr ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(into = "u32", try_from = "u32")]
        #[repr(u32)]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $value, )+
        }

        impl From<$name> for u32 {
            fn from(v: $name) -> u32 {
                v as u32
            }
        }

        impl TryFrom<u32> for $name {
            type Error = InvalidCode;

            fn try_from(value: u32) -> Result<Self, InvalidCode> {
                match value {
                    $( $value => Ok(Self::$variant), )+
                    _ => Err(InvalidCode { field: $field, value }),
                }
            }
        }
    };
}

wire_code_enum! {
    /// Mouse button identifiers.
    MouseButton : "mouse button" {
        /// Primary button.
        Left = 1,
        /// Secondary button.
        Right = 2,
        /// Wheel button.
        Middle = 4,
        /// Thumb button 1 (back).
        Extra1 = 5,
        /// Thumb button 2 (forward).
        Extra2 = 6,
    }
}

wire_code_enum! {
    /// Mouse event kinds.
    MouseEventType : "mouse event type" {
        /// Pointer moved.
        Move = 0,
        /// Button pressed.
        Press = 1,
        /// Button released.
        Release = 2,
        /// Wheel scrolled.
        Scroll = 3,
    }
}

wire_code_enum! {
    /// Keyboard event kinds.
    KeyEventType : "key event type" {
        /// Key pressed.
        Down = 0,
        /// Key released.
        Up = 1,
    }
}

wire_code_enum! {
    /// Drag-and-drop event kinds.
    DragEventType : "drag event type" {
        /// Drag entered the window.
        Enter = 0,
        /// Drag moved within the window.
        Move = 1,
        /// Drag left the window.
        Leave = 2,
        /// Payload dropped.
        Drop = 3,
    }
}

wire_code_enum! {
    /// Pixel formats for frame payloads and ring slots.
    PixelFormat : "pixel format" {
        /// 8-bit blue/green/red/alpha.
        Bgra32 = 0,
        /// 8-bit red/green/blue/alpha.
        Rgba32 = 1,
    }
}

/// Modifier-key bitfield accompanying mouse and keyboard events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyModifiers(pub u32);

impl KeyModifiers {
    /// Shift held.
    pub const SHIFT: u32 = 0x01;
    /// Control held.
    pub const CONTROL: u32 = 0x02;
    /// Alt/Option held.
    pub const ALT: u32 = 0x04;
    /// Command/Windows held.
    pub const COMMAND: u32 = 0x08;
    /// Caps Lock active.
    pub const CAPS_LOCK: u32 = 0x10;
    /// Num Lock active.
    pub const NUM_LOCK: u32 = 0x20;

    /// Whether all bits in `mask` are set.
    #[must_use]
    pub fn contains(self, mask: u32) -> bool {
        self.0 & mask == mask
    }
}

/// Clipboard data formats exchanged between host and guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClipboardFormat {
    /// UTF-8 plain text.
    PlainText,
    /// Rich Text Format.
    Rtf,
    /// HTML fragment.
    Html,
    /// PNG image bytes.
    Png,
    /// TIFF image bytes.
    Tiff,
    /// File URL list.
    FileUrl,
}

/// Mouse event forwarded to a guest window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MouseInput {
    /// Target guest window.
    pub window_id: u64,
    /// What happened.
    pub event_type: MouseEventType,
    /// X coordinate in window-local pixels.
    pub x: f64,
    /// Y coordinate in window-local pixels.
    pub y: f64,
    /// Button involved; absent for pure moves and scrolls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub button: Option<MouseButton>,
    /// Horizontal scroll delta (scroll events only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scroll_delta_x: Option<f64>,
    /// Vertical scroll delta (scroll events only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scroll_delta_y: Option<f64>,
    /// Modifier keys held during the event.
    #[serde(default)]
    pub modifiers: KeyModifiers,
}

/// Keyboard event forwarded to a guest window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyboardInput {
    /// Target guest window.
    pub window_id: u64,
    /// Press or release.
    pub event_type: KeyEventType,
    /// Windows virtual-key code.
    pub key_code: u16,
    /// Modifier keys held during the event.
    #[serde(default)]
    pub modifiers: KeyModifiers,
    /// Translated character, when one exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character: Option<String>,
}

/// Drag-and-drop event forwarded to a guest window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DragDropEvent {
    /// Target guest window.
    pub window_id: u64,
    /// Drag phase.
    pub event_type: DragEventType,
    /// X coordinate in window-local pixels.
    pub x: f64,
    /// Y coordinate in window-local pixels.
    pub y: f64,
    /// Files being dragged; present on enter and drop.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub file_paths: Vec<String>,
}

/// Clipboard contents pushed host→guest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipboardData {
    /// Format of `data`.
    pub format: ClipboardFormat,
    /// Raw clipboard bytes.
    pub data: Vec<u8>,
}

/// Notification that the guest clipboard changed, with the new contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipboardChanged {
    /// Format of `data`.
    pub format: ClipboardFormat,
    /// Raw clipboard bytes.
    pub data: Vec<u8>,
}
