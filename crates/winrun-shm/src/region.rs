//! The host-allocated shared memory region.
//!
//! The region is one fixed-size byte range the hypervisor maps into the
//! guest. The frame router is its single owner; everything else sees only a
//! [`RegionView`] — a bounds-carrying raw pointer that rings are carved out
//! of. Views never own the memory and must not outlive the region, which the
//! router guarantees by dropping all readers before the region.

use std::ptr::NonNull;

use memmap2::MmapMut;

use crate::errors::{Result, ShmError};

/// Owner of the shared byte range.
///
/// Backed by an anonymous mapping so the page range is stable for the
/// region's whole lifetime (the guest maps the same physical pages).
pub struct SharedMemoryRegion {
    map: MmapMut,
}

impl SharedMemoryRegion {
    /// Allocate a zeroed region of `len` bytes.
    pub fn allocate(len: usize) -> Result<Self> {
        if len == 0 {
            return Err(ShmError::RegionAllocation("region length must be non-zero".into()));
        }
        let map = MmapMut::map_anon(len).map_err(|e| ShmError::RegionAllocation(e.to_string()))?;
        Ok(Self { map })
    }

    /// Size of the region in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the region is empty (never true for a constructed region).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// A borrowing view over the whole region.
    #[must_use]
    pub fn view(&self) -> RegionView {
        // INVARIANT: the mapping is non-empty (checked in allocate) and lives
        // as long as self; MmapMut never returns a null base.
        #[allow(clippy::expect_used)]
        let base = NonNull::new(self.map.as_ptr().cast_mut())
            .expect("invariant: anonymous mapping has a non-null base");
        RegionView { base, len: self.map.len() }
    }
}

/// Bounds-carrying raw view of the shared region.
///
/// `Copy` so the router can hand it to every ring without reference
/// gymnastics. All access goes through offset-checked raw reads/writes in the
/// ring types; the view itself only carries the base and the bound.
#[derive(Clone, Copy, Debug)]
pub struct RegionView {
    base: NonNull<u8>,
    len: usize,
}

// SAFETY: the view is a pointer + length into memory that is valid for the
// region's lifetime and only accessed through atomic or volatile operations
// with explicit bounds checks. Concurrent access from guest and host is the
// entire point of the region; the ring protocol (acquire/release on the
// indices) is what makes it sound.
#[allow(unsafe_code)]
unsafe impl Send for RegionView {}
#[allow(unsafe_code)]
unsafe impl Sync for RegionView {}

impl RegionView {
    /// Wrap an externally mapped byte range.
    ///
    /// `None` when `base` is null or `len` is zero.
    ///
    /// # Safety
    ///
    /// `base` must point to a readable and writable allocation of at least
    /// `len` bytes that outlives every ring created from this view.
    #[allow(unsafe_code)]
    #[must_use]
    pub unsafe fn from_raw(base: *mut u8, len: usize) -> Option<Self> {
        if len == 0 {
            return None;
        }
        NonNull::new(base).map(|base| Self { base, len })
    }

    /// Size of the viewed range in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the viewed range is empty (never true by construction).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Base pointer of the viewed range.
    #[must_use]
    pub fn base_ptr(&self) -> NonNull<u8> {
        self.base
    }

    /// Check that `[offset, offset + len)` lies inside the view and return a
    /// pointer to its start.
    pub(crate) fn bounded_ptr(&self, offset: usize, len: usize) -> Result<NonNull<u8>> {
        let end = offset.checked_add(len).ok_or(ShmError::BoundsViolation {
            offset: offset as u64,
            len: len as u64,
            bound: self.len,
        })?;
        if end > self.len {
            return Err(ShmError::BoundsViolation {
                offset: offset as u64,
                len: len as u64,
                bound: self.len,
            });
        }
        // SAFETY: offset + len <= self.len, so the pointer stays inside the
        // allocation the view was constructed over.
        #[allow(unsafe_code)]
        let ptr = unsafe { self.base.add(offset) };
        Ok(ptr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_and_view() {
        let region = SharedMemoryRegion::allocate(4096).unwrap();
        assert_eq!(region.len(), 4096);
        let view = region.view();
        assert_eq!(view.len(), 4096);
    }

    #[test]
    fn zero_length_rejected() {
        assert!(SharedMemoryRegion::allocate(0).is_err());
    }

    #[test]
    fn bounds_checking() {
        let region = SharedMemoryRegion::allocate(128).unwrap();
        let view = region.view();

        assert!(view.bounded_ptr(0, 128).is_ok());
        assert!(view.bounded_ptr(64, 64).is_ok());
        assert!(view.bounded_ptr(64, 65).is_err());
        assert!(view.bounded_ptr(usize::MAX, 2).is_err());
    }
}
