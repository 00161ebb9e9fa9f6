//! Window tracking and frame delivery payloads.

use serde::{Deserialize, Serialize};

use crate::messages::input::PixelFormat;

/// Geometry, title, and state of one guest window.
///
/// Sent whenever any field changes; the host treats each update as a full
/// replacement, not a delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowMetadata {
    /// Stable window identifier (guest HWND-derived).
    pub window_id: u64,
    /// Current title bar text.
    pub title: String,
    /// Left edge in guest virtual-screen coordinates.
    pub x: i32,
    /// Top edge in guest virtual-screen coordinates.
    pub y: i32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Whether the window is minimized.
    #[serde(default)]
    pub is_minimized: bool,
    /// Whether the window is maximized.
    #[serde(default)]
    pub is_maximized: bool,
    /// Whether the window has keyboard focus.
    #[serde(default)]
    pub is_focused: bool,
    /// Owning guest process id, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_id: Option<u32>,
    /// Owning executable path, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executable_path: Option<String>,
}

/// Frame pixels pushed by message.
///
/// Fallback path for guests that cannot map the shared region; the normal
/// path is a ring slot plus [`FrameReady`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameData {
    /// Source window.
    pub window_id: u64,
    /// Monotonic frame counter per window.
    pub frame_number: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Bytes per row.
    pub stride: u32,
    /// Pixel layout of `data`.
    pub format: PixelFormat,
    /// Whether `data` is compressed.
    #[serde(default)]
    pub is_compressed: bool,
    /// Pixel bytes (`stride × height` when uncompressed).
    pub data: Vec<u8>,
}

/// Out-of-band notification that a ring slot was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameReady {
    /// Window whose ring has a new frame.
    pub window_id: u64,
    /// Slot index the guest wrote (informational; the host drains in order).
    pub slot_index: u32,
    /// Frame number written to that slot.
    pub frame_number: u32,
}

/// Guest announcement that a per-window buffer was carved out of the shared
/// region.
///
/// The router validates the bounds and the ring header at `buffer_offset`
/// before creating a reader. When `uses_shared_memory` is false the guest will
/// push frames via [`FrameData`] messages instead and no reader is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowBufferAllocated {
    /// Window this buffer serves.
    pub window_id: u64,
    /// Byte offset of the buffer inside the shared region.
    pub buffer_offset: u64,
    /// Total buffer size in bytes (header plus all slots).
    pub buffer_size: u64,
    /// Size of each slot in bytes.
    pub slot_size: u32,
    /// Number of slots in the ring.
    pub slot_count: u32,
    /// Whether slot payloads are compressed.
    #[serde(default)]
    pub is_compressed: bool,
    /// Whether this replaces an earlier buffer for the same window.
    #[serde(default)]
    pub is_reallocation: bool,
    /// False when the guest will push frames by message instead.
    pub uses_shared_memory: bool,
}

/// Monitor DPI and scale information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DpiInfo {
    /// Window the DPI applies to; absent for the primary monitor default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_id: Option<u64>,
    /// Dots per inch.
    pub dpi: u32,
    /// Scale factor relative to 96 DPI.
    pub scale_factor: f64,
}

/// Icon bitmap reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IconData {
    /// Correlation id of the [`crate::messages::session::RequestIcon`];
    /// absent when the guest pushes an icon proactively.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<u32>,
    /// Path the icon belongs to.
    pub path: String,
    /// PNG-encoded bitmap.
    pub data: Vec<u8>,
    /// Bitmap width in pixels.
    pub width: u32,
    /// Bitmap height in pixels.
    pub height: u32,
}
