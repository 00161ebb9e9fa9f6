//! Guest-side producer for one per-window frame ring.
//!
//! The real producer is the Windows agent; this implementation exists so the
//! host test suites and the demo tooling can fill rings with known frames,
//! and it documents the producer half of the protocol contract.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::errors::{Result, ShmError};
use crate::layout::{
    BUFFER_ALIGN, FrameSlotHeader, HEADER_SIZE, READ_INDEX_OFFSET, RingGeometry,
    SLOT_FLAG_COMPRESSED, SLOT_FLAG_KEY_FRAME, SLOT_HEADER_SIZE, SharedFrameBufferHeader,
    WRITE_INDEX_OFFSET,
};
use crate::region::RegionView;

/// One frame to be written into a ring slot.
#[derive(Debug, Clone)]
pub struct FrameSpec {
    /// Window producing the frame.
    pub window_id: u64,
    /// Monotonic frame counter per window.
    pub frame_number: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Bytes per row.
    pub stride: u32,
    /// Pixel format code.
    pub format: u32,
    /// Whether `data` is compressed.
    pub is_compressed: bool,
    /// Whether `data` is a key frame.
    pub is_key_frame: bool,
    /// Pixel bytes.
    pub data: Vec<u8>,
}

/// Producer handle for one per-window ring.
pub struct RingWriter {
    view: RegionView,
    offset: usize,
    len: usize,
    geometry: RingGeometry,
}

impl RingWriter {
    /// Initialize a fresh ring at `offset` within `view` and return its
    /// producer handle.
    ///
    /// Writes the ring header with zeroed indices. The buffer must be
    /// 8-byte aligned and large enough for the geometry.
    pub fn init(view: RegionView, offset: usize, len: usize, geometry: RingGeometry) -> Result<Self> {
        if offset % BUFFER_ALIGN != 0 {
            return Err(ShmError::Misaligned { offset, align: BUFFER_ALIGN });
        }
        if geometry.slot_count == 0 || (geometry.slot_size as usize) <= SLOT_HEADER_SIZE {
            return Err(ShmError::InvalidGeometry {
                detail: format!(
                    "{} slots of {} bytes",
                    geometry.slot_count, geometry.slot_size
                ),
            });
        }
        let required = geometry.required_len();
        if len < required {
            return Err(ShmError::BufferTooSmall { actual: len, required });
        }
        view.bounded_ptr(offset, len)?;

        let writer = Self { view, offset, len, geometry };
        let header = SharedFrameBufferHeader::new(geometry, len as u32);
        writer.copy_in(0, &header.to_bytes())?;
        Ok(writer)
    }

    /// Append one frame.
    ///
    /// # Errors
    ///
    /// - [`ShmError::FrameTooLarge`] when the payload exceeds the slot
    ///   capacity.
    /// - [`ShmError::RingFull`] when no slot is free. One slot always stays
    ///   free so occupancy never reaches `slot_count`.
    pub fn write_frame(&mut self, frame: &FrameSpec) -> Result<()> {
        let max_payload = self.geometry.max_payload();
        if frame.data.len() > max_payload {
            return Err(ShmError::FrameTooLarge { size: frame.data.len(), max: max_payload });
        }

        let write = self.write_index().load(Ordering::Relaxed);
        let read = self.read_index().load(Ordering::Acquire);
        if write.wrapping_sub(read) >= self.geometry.slot_count - 1 {
            return Err(ShmError::RingFull { slot_count: self.geometry.slot_count });
        }

        let slot = (write % self.geometry.slot_count) as usize;
        let slot_offset = HEADER_SIZE + slot * self.geometry.slot_size as usize;

        let mut flags = 0u32;
        if frame.is_compressed {
            flags |= SLOT_FLAG_COMPRESSED;
        }
        if frame.is_key_frame {
            flags |= SLOT_FLAG_KEY_FRAME;
        }
        let header = FrameSlotHeader::new(
            frame.window_id,
            frame.frame_number,
            frame.width,
            frame.height,
            frame.stride,
            frame.format,
            frame.data.len() as u32,
            flags,
        );

        self.copy_in(slot_offset, &header.to_bytes())?;
        self.copy_in(slot_offset + SLOT_HEADER_SIZE, &frame.data)?;

        // Publish: payload bytes must be visible before the index moves.
        self.write_index().store(write.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Number of frames the consumer has not yet read.
    #[must_use]
    pub fn pending_frames(&self) -> u32 {
        let write = self.write_index().load(Ordering::Relaxed);
        let read = self.read_index().load(Ordering::Acquire);
        write.wrapping_sub(read) % self.geometry.slot_count
    }

    /// Overwrite the `data_size` field of a slot header with a bogus value.
    #[cfg(test)]
    pub(crate) fn corrupt_slot_data_size(&mut self, slot: usize, bogus: u32) {
        let slot_offset = HEADER_SIZE + slot * self.geometry.slot_size as usize;
        // data_size sits 28 bytes into the slot header.
        let field_offset = slot_offset + 28;
        #[allow(clippy::unwrap_used)]
        self.copy_in(field_offset, &bogus.to_le_bytes()).unwrap();
    }

    fn write_index(&self) -> &AtomicU32 {
        self.header_atomic(WRITE_INDEX_OFFSET)
    }

    fn read_index(&self) -> &AtomicU32 {
        self.header_atomic(READ_INDEX_OFFSET)
    }

    fn header_atomic(&self, field_offset: usize) -> &AtomicU32 {
        // INVARIANT: init() verified the full ring range and alignment.
        #[allow(clippy::expect_used)]
        let ptr = self
            .view
            .bounded_ptr(self.offset + field_offset, 4)
            .expect("invariant: header fields verified in-bounds at init");
        // SAFETY: in-bounds, 4-byte aligned, accessed only atomically from
        // both sides of the mapping.
        #[allow(unsafe_code)]
        unsafe {
            AtomicU32::from_ptr(ptr.as_ptr().cast())
        }
    }

    fn copy_in(&self, ring_offset: usize, src: &[u8]) -> Result<()> {
        let end = ring_offset.checked_add(src.len()).ok_or(ShmError::BoundsViolation {
            offset: ring_offset as u64,
            len: src.len() as u64,
            bound: self.len,
        })?;
        if end > self.len {
            return Err(ShmError::BoundsViolation {
                offset: ring_offset as u64,
                len: src.len() as u64,
                bound: self.len,
            });
        }
        let dst = self.view.bounded_ptr(self.offset + ring_offset, src.len())?;
        // SAFETY: destination range is inside the ring and the region
        // (checked above); source is a local slice, so no overlap.
        #[allow(unsafe_code)]
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), dst.as_ptr(), src.len());
        }
        Ok(())
    }
}
