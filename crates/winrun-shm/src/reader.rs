//! Host-side consumer of one per-window frame ring.
//!
//! The reader treats the shared memory as hostile input: the header is
//! validated on attach, every slot header is bounds-checked before the
//! payload is touched, and pixel bytes are always copied out into
//! caller-owned memory. No reference into the region is ever held across a
//! return, and the only synchronization with the guest producer is an
//! acquire load of `write_index` paired with a release store of
//! `read_index`.

use std::sync::atomic::{AtomicU32, Ordering};

use zerocopy::FromBytes;

use crate::errors::{Result, ShmError};
use crate::layout::{
    BUFFER_ALIGN, BUFFER_MAGIC, FLAG_HOST_ACTIVE, FLAGS_OFFSET, FrameSlotHeader, HEADER_SIZE,
    LAYOUT_VERSION, READ_INDEX_OFFSET, SLOT_FLAG_COMPRESSED, SLOT_FLAG_KEY_FRAME,
    SLOT_HEADER_SIZE, SharedFrameBufferHeader, WRITE_INDEX_OFFSET,
};
use crate::region::RegionView;

/// One frame copied out of a ring slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Window that produced the frame.
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
    /// Whether the payload is compressed.
    pub is_compressed: bool,
    /// Whether the payload is a key frame.
    pub is_key_frame: bool,
    /// Pixel bytes, exactly `data_size` long.
    pub data: Vec<u8>,
}

/// Consumer handle for one per-window ring.
///
/// Exactly one reader exists per window at a time; the frame router enforces
/// this by owning all readers. The reader does not own the memory.
#[derive(Debug)]
pub struct RingReader {
    view: RegionView,
    /// Byte offset of the ring inside the region.
    offset: usize,
    /// Total ring length in bytes.
    len: usize,
    slot_count: u32,
    slot_size: u32,
    max_width: u32,
    max_height: u32,
    /// Malformed slots skipped so far.
    dropped: u64,
}

impl RingReader {
    /// Attach to the ring at `offset` within `view` and validate its header.
    ///
    /// # Errors
    ///
    /// - [`ShmError::BoundsViolation`] when `[offset, offset+len)` escapes
    ///   the region.
    /// - [`ShmError::Misaligned`] when `offset` is not 8-byte aligned.
    /// - Any header validation error from [`RingReader::validate`].
    pub fn attach(view: RegionView, offset: usize, len: usize) -> Result<Self> {
        if offset % BUFFER_ALIGN != 0 {
            return Err(ShmError::Misaligned { offset, align: BUFFER_ALIGN });
        }
        view.bounded_ptr(offset, len)?;

        let mut reader = Self {
            view,
            offset,
            len,
            slot_count: 0,
            slot_size: 0,
            max_width: 0,
            max_height: 0,
            dropped: 0,
        };
        reader.validate()?;
        Ok(reader)
    }

    /// Re-validate the ring header and refresh the cached geometry.
    ///
    /// # Errors
    ///
    /// - [`ShmError::BufferTooSmall`] when the ring is shorter than the
    ///   header.
    /// - [`ShmError::InvalidMagic`] / [`ShmError::InvalidVersion`] when the
    ///   header does not carry the expected constants.
    /// - [`ShmError::InvalidGeometry`] when the slot geometry does not fit
    ///   the ring length.
    pub fn validate(&mut self) -> Result<()> {
        if self.len < HEADER_SIZE {
            return Err(ShmError::BufferTooSmall { actual: self.len, required: HEADER_SIZE });
        }

        let mut bytes = [0u8; HEADER_SIZE];
        self.copy_out(0, &mut bytes)?;
        // INVARIANT: the source slice is exactly HEADER_SIZE bytes.
        #[allow(clippy::expect_used)]
        let header = SharedFrameBufferHeader::read_from_bytes(&bytes)
            .expect("invariant: header buffer is exactly HEADER_SIZE bytes");

        if header.magic() != BUFFER_MAGIC {
            return Err(ShmError::InvalidMagic { found: header.magic() });
        }
        if header.version() != LAYOUT_VERSION {
            return Err(ShmError::InvalidVersion { found: header.version() });
        }

        let slot_count = header.slot_count();
        let slot_size = header.slot_size();
        if slot_count == 0 {
            return Err(ShmError::InvalidGeometry { detail: "slot count is zero".into() });
        }
        if (slot_size as usize) <= SLOT_HEADER_SIZE {
            return Err(ShmError::InvalidGeometry {
                detail: format!("slot size {slot_size} leaves no payload room"),
            });
        }
        let required = HEADER_SIZE + slot_count as usize * slot_size as usize;
        if required > self.len {
            return Err(ShmError::InvalidGeometry {
                detail: format!("{slot_count} slots of {slot_size} bytes need {required} bytes"),
            });
        }

        self.slot_count = slot_count;
        self.slot_size = slot_size;
        self.max_width = header.max_width();
        self.max_height = header.max_height();
        Ok(())
    }

    /// Number of frames waiting in the ring: `(write − read) mod slot_count`.
    #[must_use]
    pub fn available_frame_count(&self) -> u32 {
        let write = self.write_index().load(Ordering::Acquire);
        let read = self.read_index().load(Ordering::Relaxed);
        write.wrapping_sub(read) % self.slot_count
    }

    /// Whether at least one frame is waiting.
    #[must_use]
    pub fn has_frames(&self) -> bool {
        let write = self.write_index().load(Ordering::Acquire);
        let read = self.read_index().load(Ordering::Relaxed);
        write != read
    }

    /// Pop the next frame, copying its pixels into caller-owned memory.
    ///
    /// `None` when the ring is empty. A malformed slot (payload larger than
    /// the slot, or geometry beyond the ring's declared maximum) is dropped:
    /// the read index still advances, the drop counter increments, a warning
    /// is logged, and the next slot is tried. Corrupt guest state never
    /// panics the host.
    pub fn read_next_frame(&mut self) -> Option<Frame> {
        loop {
            let write = self.write_index().load(Ordering::Acquire);
            let read = self.read_index().load(Ordering::Relaxed);
            if write == read {
                return None;
            }

            let slot = (read % self.slot_count) as usize;
            let slot_offset = HEADER_SIZE + slot * self.slot_size as usize;

            let mut header_bytes = [0u8; SLOT_HEADER_SIZE];
            if self.copy_out(slot_offset, &mut header_bytes).is_err() {
                // Geometry was validated at attach; hitting this means the
                // header changed under us. Treat it like a malformed slot.
                self.skip_slot(read, "slot range escaped the ring");
                continue;
            }
            // INVARIANT: the source slice is exactly SLOT_HEADER_SIZE bytes.
            #[allow(clippy::expect_used)]
            let header = FrameSlotHeader::read_from_bytes(&header_bytes)
                .expect("invariant: slot header buffer is exactly SLOT_HEADER_SIZE bytes");

            let data_size = header.data_size() as usize;
            let max_payload = self.slot_size as usize - SLOT_HEADER_SIZE;
            if data_size > max_payload {
                self.skip_slot(read, "declared payload exceeds slot capacity");
                continue;
            }
            if header.width() == 0
                || header.height() == 0
                || header.width() > self.max_width
                || header.height() > self.max_height
            {
                self.skip_slot(read, "impossible frame dimensions");
                continue;
            }

            let mut data = vec![0u8; data_size];
            if self.copy_out(slot_offset + SLOT_HEADER_SIZE, &mut data).is_err() {
                self.skip_slot(read, "payload range escaped the ring");
                continue;
            }

            let flags = header.flags();
            self.read_index().store(read.wrapping_add(1), Ordering::Release);

            return Some(Frame {
                window_id: header.window_id(),
                frame_number: header.frame_number(),
                width: header.width(),
                height: header.height(),
                stride: header.stride(),
                format: header.format(),
                is_compressed: flags & SLOT_FLAG_COMPRESSED != 0,
                is_key_frame: flags & SLOT_FLAG_KEY_FRAME != 0,
                data,
            });
        }
    }

    /// Set or clear the `hostActive` bit in the ring header.
    pub fn set_host_active(&self, active: bool) {
        let flags = self.header_atomic(FLAGS_OFFSET);
        if active {
            flags.fetch_or(FLAG_HOST_ACTIVE, Ordering::AcqRel);
        } else {
            flags.fetch_and(!FLAG_HOST_ACTIVE, Ordering::AcqRel);
        }
    }

    /// Whether the `hostActive` bit is currently set.
    #[must_use]
    pub fn host_active(&self) -> bool {
        self.header_atomic(FLAGS_OFFSET).load(Ordering::Acquire) & FLAG_HOST_ACTIVE != 0
    }

    /// Malformed slots skipped since attach.
    #[must_use]
    pub fn dropped_frames(&self) -> u64 {
        self.dropped
    }

    /// Ring slot count.
    #[must_use]
    pub fn slot_count(&self) -> u32 {
        self.slot_count
    }

    fn skip_slot(&mut self, read: u32, reason: &str) {
        self.read_index().store(read.wrapping_add(1), Ordering::Release);
        self.dropped += 1;
        tracing::warn!(offset = self.offset, slot = read % self.slot_count, reason, "dropping malformed ring slot");
    }

    fn write_index(&self) -> &AtomicU32 {
        self.header_atomic(WRITE_INDEX_OFFSET)
    }

    fn read_index(&self) -> &AtomicU32 {
        self.header_atomic(READ_INDEX_OFFSET)
    }

    fn header_atomic(&self, field_offset: usize) -> &AtomicU32 {
        // INVARIANT: attach() verified the full ring range and 8-byte
        // alignment, and every header field offset is 4-byte aligned, so
        // the pointer is in bounds and aligned for AtomicU32.
        #[allow(clippy::expect_used)]
        let ptr = self
            .view
            .bounded_ptr(self.offset + field_offset, 4)
            .expect("invariant: header fields verified in-bounds at attach");
        // SAFETY: in-bounds (checked above), 4-byte aligned (buffer is
        // 8-byte aligned, field offsets are multiples of 4), and both sides
        // of the mapping access these words only atomically.
        #[allow(unsafe_code)]
        unsafe {
            AtomicU32::from_ptr(ptr.as_ptr().cast())
        }
    }

    /// Copy `dst.len()` bytes out of the ring starting at `ring_offset`.
    fn copy_out(&self, ring_offset: usize, dst: &mut [u8]) -> Result<()> {
        let end = ring_offset.checked_add(dst.len()).ok_or(ShmError::BoundsViolation {
            offset: ring_offset as u64,
            len: dst.len() as u64,
            bound: self.len,
        })?;
        if end > self.len {
            return Err(ShmError::BoundsViolation {
                offset: ring_offset as u64,
                len: dst.len() as u64,
                bound: self.len,
            });
        }
        let src = self.view.bounded_ptr(self.offset + ring_offset, dst.len())?;
        // SAFETY: source range is inside the ring (checked against self.len)
        // and inside the region (bounded_ptr); destination is a fresh local
        // slice, so the ranges cannot overlap.
        #[allow(unsafe_code)]
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), dst.as_mut_ptr(), dst.len());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::RingGeometry;
    use crate::region::SharedMemoryRegion;
    use crate::writer::{FrameSpec, RingWriter};

    const GEOMETRY: RingGeometry =
        RingGeometry { slot_count: 4, slot_size: 4096, max_width: 64, max_height: 64 };

    fn setup() -> (SharedMemoryRegion, RingWriter) {
        let region = SharedMemoryRegion::allocate(GEOMETRY.required_len()).unwrap();
        let writer = RingWriter::init(region.view(), 0, GEOMETRY.required_len(), GEOMETRY).unwrap();
        (region, writer)
    }

    fn frame(window_id: u64, frame_number: u32, fill: u8) -> FrameSpec {
        FrameSpec {
            window_id,
            frame_number,
            width: 8,
            height: 8,
            stride: 32,
            format: 0,
            is_compressed: false,
            is_key_frame: frame_number == 1,
            data: vec![fill; 32 * 8],
        }
    }

    #[test]
    fn empty_ring_has_no_frames() {
        let (region, _writer) = setup();
        let mut reader = RingReader::attach(region.view(), 0, GEOMETRY.required_len()).unwrap();
        assert!(!reader.has_frames());
        assert_eq!(reader.available_frame_count(), 0);
        assert_eq!(reader.read_next_frame(), None);
    }

    #[test]
    fn write_then_read_round_trip() {
        let (region, mut writer) = setup();
        let mut reader = RingReader::attach(region.view(), 0, GEOMETRY.required_len()).unwrap();

        writer.write_frame(&frame(42, 1, 0xAB)).unwrap();
        assert!(reader.has_frames());
        assert_eq!(reader.available_frame_count(), 1);

        let got = reader.read_next_frame().unwrap();
        assert_eq!(got.window_id, 42);
        assert_eq!(got.frame_number, 1);
        assert_eq!(got.width, 8);
        assert_eq!(got.data, vec![0xAB; 256]);
        assert!(got.is_key_frame);
        assert_eq!(reader.read_next_frame(), None);
    }

    #[test]
    fn frames_delivered_in_order_across_wrap() {
        let (region, mut writer) = setup();
        let mut reader = RingReader::attach(region.view(), 0, GEOMETRY.required_len()).unwrap();

        // Cycle enough frames to wrap the 4-slot ring several times.
        for n in 1..=11u32 {
            writer.write_frame(&frame(7, n, n as u8)).unwrap();
            let got = reader.read_next_frame().unwrap();
            assert_eq!(got.frame_number, n);
            assert_eq!(got.data[0], n as u8);
        }
        assert_eq!(reader.dropped_frames(), 0);
    }

    #[test]
    fn available_count_uses_mod_rule_mid_wrap() {
        let (region, mut writer) = setup();
        let mut reader = RingReader::attach(region.view(), 0, GEOMETRY.required_len()).unwrap();

        // Advance both indices past the slot count, then leave two pending.
        for n in 1..=5u32 {
            writer.write_frame(&frame(7, n, 0)).unwrap();
            reader.read_next_frame().unwrap();
        }
        writer.write_frame(&frame(7, 6, 0)).unwrap();
        writer.write_frame(&frame(7, 7, 0)).unwrap();

        assert_eq!(reader.available_frame_count(), 2);
        assert!(reader.available_frame_count() <= GEOMETRY.slot_count);
    }

    #[test]
    fn writer_refuses_when_full() {
        let (region, mut writer) = setup();
        let _reader = RingReader::attach(region.view(), 0, GEOMETRY.required_len()).unwrap();

        // One slot stays free: capacity is slot_count - 1.
        for n in 1..=3u32 {
            writer.write_frame(&frame(7, n, 0)).unwrap();
        }
        let err = writer.write_frame(&frame(7, 4, 0)).unwrap_err();
        assert_eq!(err, ShmError::RingFull { slot_count: 4 });
    }

    #[test]
    fn malformed_slot_is_skipped_not_fatal() {
        let (region, mut writer) = setup();
        let mut reader = RingReader::attach(region.view(), 0, GEOMETRY.required_len()).unwrap();

        writer.write_frame(&frame(7, 1, 1)).unwrap();
        writer.write_frame(&frame(7, 2, 2)).unwrap();

        // Corrupt the first slot's data_size to exceed the slot capacity.
        writer.corrupt_slot_data_size(0, GEOMETRY.slot_size);

        let got = reader.read_next_frame().unwrap();
        assert_eq!(got.frame_number, 2);
        assert_eq!(reader.dropped_frames(), 1);
    }

    #[test]
    fn impossible_dimensions_are_skipped() {
        let (region, mut writer) = setup();
        let mut reader = RingReader::attach(region.view(), 0, GEOMETRY.required_len()).unwrap();

        let mut bad = frame(7, 1, 1);
        bad.width = 4096; // beyond max_width
        bad.data = vec![0; 64];
        writer.write_frame(&bad).unwrap();

        assert_eq!(reader.read_next_frame(), None);
        assert_eq!(reader.dropped_frames(), 1);
    }

    #[test]
    fn host_active_flag() {
        let (region, _writer) = setup();
        let reader = RingReader::attach(region.view(), 0, GEOMETRY.required_len()).unwrap();

        assert!(!reader.host_active());
        reader.set_host_active(true);
        assert!(reader.host_active());
        reader.set_host_active(false);
        assert!(!reader.host_active());
    }

    #[test]
    fn attach_rejects_bad_magic() {
        let region = SharedMemoryRegion::allocate(GEOMETRY.required_len()).unwrap();
        // Region is zeroed; the magic check fails before anything else.
        let err = RingReader::attach(region.view(), 0, GEOMETRY.required_len()).unwrap_err();
        assert_eq!(err, ShmError::InvalidMagic { found: 0 });
    }

    #[test]
    fn attach_rejects_short_buffer() {
        let region = SharedMemoryRegion::allocate(4096).unwrap();
        let err = RingReader::attach(region.view(), 0, 32).unwrap_err();
        assert_eq!(err, ShmError::BufferTooSmall { actual: 32, required: HEADER_SIZE });
    }

    #[test]
    fn attach_rejects_misaligned_offset() {
        let region = SharedMemoryRegion::allocate(8192).unwrap();
        let err = RingReader::attach(region.view(), 12, 4096).unwrap_err();
        assert_eq!(err, ShmError::Misaligned { offset: 12, align: 8 });
    }

    #[test]
    fn attach_rejects_out_of_bounds() {
        let region = SharedMemoryRegion::allocate(4096).unwrap();
        let err = RingReader::attach(region.view(), 0, 8192).unwrap_err();
        assert!(matches!(err, ShmError::BoundsViolation { .. }));
    }
}
