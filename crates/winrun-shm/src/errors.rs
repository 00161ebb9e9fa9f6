//! Error types for shared-memory regions and rings.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ShmError>;

/// Errors from region mapping, ring validation, and ring access.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShmError {
    /// Buffer is smaller than the ring header.
    #[error("buffer of {actual} bytes is smaller than the required {required}")]
    BufferTooSmall {
        /// Bytes available.
        actual: usize,
        /// Bytes required.
        required: usize,
    },

    /// Magic number at the buffer start does not match.
    #[error("invalid ring magic {found:#010x}")]
    InvalidMagic {
        /// The value found in memory.
        found: u32,
    },

    /// Ring layout version is not one we understand.
    #[error("unsupported ring layout version {found}")]
    InvalidVersion {
        /// The value found in memory.
        found: u32,
    },

    /// A buffer or slot range escapes its containing allocation.
    #[error("range [{offset}, {offset}+{len}) escapes allocation of {bound} bytes")]
    BoundsViolation {
        /// Start of the offending range.
        offset: u64,
        /// Length of the offending range.
        len: u64,
        /// Size of the containing allocation.
        bound: usize,
    },

    /// Buffer offset violates the 8-byte alignment requirement.
    #[error("buffer offset {offset} is not {align}-byte aligned")]
    Misaligned {
        /// The offending offset.
        offset: usize,
        /// Required alignment.
        align: usize,
    },

    /// Slot geometry is internally inconsistent.
    #[error("invalid ring geometry: {detail}")]
    InvalidGeometry {
        /// What is inconsistent.
        detail: String,
    },

    /// Frame payload does not fit in one slot.
    #[error("frame of {size} bytes exceeds slot payload capacity of {max}")]
    FrameTooLarge {
        /// Payload size.
        size: usize,
        /// Largest payload a slot can carry.
        max: usize,
    },

    /// The ring has no free slot for another frame.
    #[error("ring is full ({slot_count} slots)")]
    RingFull {
        /// Ring capacity.
        slot_count: u32,
    },

    /// The anonymous region mapping failed.
    #[error("region allocation failed: {0}")]
    RegionAllocation(String),
}
