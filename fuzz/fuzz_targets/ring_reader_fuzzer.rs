//! Fuzz target for the shared-memory ring reader.
//!
//! The ring contents are attacker-controlled (a compromised guest writes
//! them), so the reader must survive arbitrary bytes: bad headers are
//! rejected at attach, malformed slots are dropped, and nothing panics or
//! reads out of bounds.

#![no_main]

use libfuzzer_sys::fuzz_target;
use winrun_shm::{RingReader, SharedMemoryRegion};

fuzz_target!(|data: &[u8]| {
    if data.is_empty() || data.len() > 64 * 1024 {
        return;
    }

    let region = match SharedMemoryRegion::allocate(data.len()) {
        Ok(region) => region,
        Err(_) => return,
    };

    // Seed the region with the fuzz input.
    let view = region.view();
    let base = view.base_ptr().as_ptr();
    unsafe {
        std::ptr::copy_nonoverlapping(data.as_ptr(), base, data.len());
    }

    let Ok(mut reader) = RingReader::attach(view, 0, data.len()) else {
        return;
    };

    // Drain whatever the "guest" claims is there; bounded by slot count so
    // corrupt indices cannot loop forever.
    let budget = reader.slot_count().saturating_add(1);
    for _ in 0..budget {
        if reader.read_next_frame().is_none() {
            break;
        }
    }
    let _ = reader.available_frame_count();
    reader.set_host_active(true);
    reader.set_host_active(false);
});
