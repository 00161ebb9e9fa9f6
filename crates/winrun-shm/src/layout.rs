//! Fixed binary layouts of the per-window frame rings.
//!
//! All multi-byte integers are little endian, matching the guest. Fields are
//! stored as raw byte arrays to avoid alignment traps when the structs are
//! cast from raw shared memory, in the same way the envelope layer treats its
//! headers. The layouts are part of the wire contract with the guest agent;
//! never reorder or resize a field.
//!
//! ```text
//! per-window buffer, carved out of the shared region at bufferOffset:
//!
//!   SharedFrameBufferHeader   64 bytes, 8-byte aligned
//!   FrameSlot[slot_count]     each slot_size bytes, 8-byte aligned
//!     FrameSlotHeader         36 bytes
//!     pixel payload           data_size bytes (≤ slot_size − 36)
//! ```

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Ring buffer magic number ("WRFB" in ASCII).
pub const BUFFER_MAGIC: u32 = 0x5752_4642;

/// Current ring layout version.
pub const LAYOUT_VERSION: u32 = 1;

/// Size of [`SharedFrameBufferHeader`] in bytes.
pub const HEADER_SIZE: usize = 64;

/// Size of [`FrameSlotHeader`] in bytes.
pub const SLOT_HEADER_SIZE: usize = 36;

/// Required alignment of a per-window buffer inside the region.
pub const BUFFER_ALIGN: usize = 8;

/// Byte offset of `write_index` within the buffer header.
pub const WRITE_INDEX_OFFSET: usize = 28;

/// Byte offset of `read_index` within the buffer header.
pub const READ_INDEX_OFFSET: usize = 32;

/// Byte offset of `flags` within the buffer header.
pub const FLAGS_OFFSET: usize = 36;

/// Header flag bit: a host reader is currently attached to this ring.
pub const FLAG_HOST_ACTIVE: u32 = 0x1;

/// Slot flag bit: payload is compressed.
pub const SLOT_FLAG_COMPRESSED: u32 = 0x1;

/// Slot flag bit: payload is a key frame.
pub const SLOT_FLAG_KEY_FRAME: u32 = 0x2;

/// Ring buffer header at the start of every per-window buffer.
///
/// The producer (guest) advances `write_index`; the consumer (host reader)
/// advances `read_index`. Both are free-running u32 counters; the slot in use
/// is `index % slot_count` and occupancy is `(write − read) mod slot_count`.
/// The writer keeps one slot free so that formula never aliases a full ring
/// with an empty one.
#[repr(C)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct SharedFrameBufferHeader {
    magic: [u8; 4],
    version: [u8; 4],
    total_size: [u8; 4],
    slot_count: [u8; 4],
    slot_size: [u8; 4],
    max_width: [u8; 4],
    max_height: [u8; 4],
    write_index: [u8; 4],
    read_index: [u8; 4],
    flags: [u8; 4],
    reserved: [u8; 24],
}

// Layout is a wire contract; a drifting field offset would corrupt the
// guest's view of the ring.
const _: () = {
    assert!(size_of::<SharedFrameBufferHeader>() == HEADER_SIZE);
    assert!(core::mem::offset_of!(SharedFrameBufferHeader, write_index) == WRITE_INDEX_OFFSET);
    assert!(core::mem::offset_of!(SharedFrameBufferHeader, read_index) == READ_INDEX_OFFSET);
    assert!(core::mem::offset_of!(SharedFrameBufferHeader, flags) == FLAGS_OFFSET);
};

impl SharedFrameBufferHeader {
    /// Build a fresh header for a ring with the given geometry.
    ///
    /// Indices start at zero and no flags are set.
    #[must_use]
    pub fn new(geometry: RingGeometry, total_size: u32) -> Self {
        Self {
            magic: BUFFER_MAGIC.to_le_bytes(),
            version: LAYOUT_VERSION.to_le_bytes(),
            total_size: total_size.to_le_bytes(),
            slot_count: geometry.slot_count.to_le_bytes(),
            slot_size: geometry.slot_size.to_le_bytes(),
            max_width: geometry.max_width.to_le_bytes(),
            max_height: geometry.max_height.to_le_bytes(),
            write_index: [0; 4],
            read_index: [0; 4],
            flags: [0; 4],
            reserved: [0; 24],
        }
    }

    /// Magic number; must equal [`BUFFER_MAGIC`].
    #[must_use]
    pub fn magic(&self) -> u32 {
        u32::from_le_bytes(self.magic)
    }

    /// Layout version; must equal [`LAYOUT_VERSION`].
    #[must_use]
    pub fn version(&self) -> u32 {
        u32::from_le_bytes(self.version)
    }

    /// Total buffer size in bytes, header included.
    #[must_use]
    pub fn total_size(&self) -> u32 {
        u32::from_le_bytes(self.total_size)
    }

    /// Number of slots in the ring.
    #[must_use]
    pub fn slot_count(&self) -> u32 {
        u32::from_le_bytes(self.slot_count)
    }

    /// Size of each slot in bytes, slot header included.
    #[must_use]
    pub fn slot_size(&self) -> u32 {
        u32::from_le_bytes(self.slot_size)
    }

    /// Maximum frame width this ring was sized for.
    #[must_use]
    pub fn max_width(&self) -> u32 {
        u32::from_le_bytes(self.max_width)
    }

    /// Maximum frame height this ring was sized for.
    #[must_use]
    pub fn max_height(&self) -> u32 {
        u32::from_le_bytes(self.max_height)
    }

    /// Serialize to raw bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out.copy_from_slice(IntoBytes::as_bytes(self));
        out
    }
}

/// Geometry of one ring, fixed at allocation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingGeometry {
    /// Number of slots.
    pub slot_count: u32,
    /// Bytes per slot, slot header included.
    pub slot_size: u32,
    /// Maximum frame width.
    pub max_width: u32,
    /// Maximum frame height.
    pub max_height: u32,
}

impl RingGeometry {
    /// Bytes required for a buffer with this geometry.
    #[must_use]
    pub fn required_len(&self) -> usize {
        HEADER_SIZE + self.slot_count as usize * self.slot_size as usize
    }

    /// Largest payload one slot can carry.
    #[must_use]
    pub fn max_payload(&self) -> usize {
        (self.slot_size as usize).saturating_sub(SLOT_HEADER_SIZE)
    }
}

/// Per-frame header at the start of every slot.
#[repr(C, packed)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct FrameSlotHeader {
    window_id: [u8; 8],
    frame_number: [u8; 4],
    width: [u8; 4],
    height: [u8; 4],
    stride: [u8; 4],
    format: [u8; 4],
    data_size: [u8; 4],
    flags: [u8; 4],
}

const _: () = assert!(size_of::<FrameSlotHeader>() == SLOT_HEADER_SIZE);

impl FrameSlotHeader {
    /// Build a slot header for one frame.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        window_id: u64,
        frame_number: u32,
        width: u32,
        height: u32,
        stride: u32,
        format: u32,
        data_size: u32,
        flags: u32,
    ) -> Self {
        Self {
            window_id: window_id.to_le_bytes(),
            frame_number: frame_number.to_le_bytes(),
            width: width.to_le_bytes(),
            height: height.to_le_bytes(),
            stride: stride.to_le_bytes(),
            format: format.to_le_bytes(),
            data_size: data_size.to_le_bytes(),
            flags: flags.to_le_bytes(),
        }
    }

    /// Window that produced the frame.
    #[must_use]
    pub fn window_id(&self) -> u64 {
        u64::from_le_bytes(self.window_id)
    }

    /// Monotonic frame counter per window.
    #[must_use]
    pub fn frame_number(&self) -> u32 {
        u32::from_le_bytes(self.frame_number)
    }

    /// Frame width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        u32::from_le_bytes(self.width)
    }

    /// Frame height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        u32::from_le_bytes(self.height)
    }

    /// Bytes per row.
    #[must_use]
    pub fn stride(&self) -> u32 {
        u32::from_le_bytes(self.stride)
    }

    /// Pixel format code (see `winrun-proto` pixel formats).
    #[must_use]
    pub fn format(&self) -> u32 {
        u32::from_le_bytes(self.format)
    }

    /// Payload length in bytes; must not exceed `slot_size − 36`.
    #[must_use]
    pub fn data_size(&self) -> u32 {
        u32::from_le_bytes(self.data_size)
    }

    /// Slot flag bits ([`SLOT_FLAG_COMPRESSED`], [`SLOT_FLAG_KEY_FRAME`]).
    #[must_use]
    pub fn flags(&self) -> u32 {
        u32::from_le_bytes(self.flags)
    }

    /// Serialize to raw bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; SLOT_HEADER_SIZE] {
        let mut out = [0u8; SLOT_HEADER_SIZE];
        out.copy_from_slice(IntoBytes::as_bytes(self));
        out
    }
}
