//! Shared-memory frame transport between the WinRun host and guest.
//!
//! The host allocates one fixed-size region that the hypervisor maps into
//! the guest. Per window, the guest carves a contiguous buffer out of the
//! region and runs a single-producer/single-consumer frame ring in it: a
//! 64-byte header followed by fixed-size slots, each carrying a 36-byte
//! frame header and the pixel payload. The guest writes slots and bumps
//! `write_index`; the host copies frames out and bumps `read_index`. The
//! out-of-band `FrameReady` notification travels over the control channel
//! (`winrun-proto`), not through the region.
//!
//! # Memory discipline
//!
//! This is the only crate in the workspace that touches raw shared memory,
//! and the only one allowed to use `unsafe`. The rules, enforced by the
//! reader and writer types:
//!
//! - validate the ring header (magic, version, geometry) before any slot
//!   access;
//! - never trust a slot's `data_size` without re-checking it against the
//!   slot capacity;
//! - copy payloads out; never hand references into the region to callers;
//! - synchronize exclusively through acquire/release atomics on the two
//!   ring indices.

#![allow(unsafe_code)]

pub mod errors;
pub mod layout;
pub mod reader;
pub mod region;
pub mod writer;

pub use errors::ShmError;
pub use layout::{BUFFER_MAGIC, HEADER_SIZE, LAYOUT_VERSION, RingGeometry, SLOT_HEADER_SIZE};
pub use reader::{Frame, RingReader};
pub use region::{RegionView, SharedMemoryRegion};
pub use writer::{FrameSpec, RingWriter};
