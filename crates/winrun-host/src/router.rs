//! Frame router: single owner of the shared region and frame dispatch.
//!
//! The router is the meeting point of three event sources that must not
//! race: buffer allocations announced by the guest, stream registrations
//! from the UI, and `FrameReady` notifications. All three serialize on one
//! internal lock, which gives the ordering guarantee that a `FrameReady`
//! processed after a `handleBufferAllocation` for the same window always
//! sees the reader.
//!
//! Streams are held weakly: the UI owns the strong reference, and a window
//! that closes simply drops its stream — the router prunes the dead entry
//! the next time it routes to it. Buffer descriptors are kept even when
//! they fail validation so diagnostics can inspect what the guest claimed.

use std::collections::HashMap;
use std::sync::{Mutex, Weak};
use std::sync::Arc;

use winrun_proto::Message;
use winrun_proto::messages::input::ClipboardChanged;
use winrun_proto::messages::window::{FrameReady, WindowBufferAllocated, WindowMetadata};
use winrun_shm::{HEADER_SIZE, RegionView, RingReader, ShmError};

use crate::control::ControlDelegate;

/// Stream-side interface the router drives.
///
/// `WindowStream` implements this; tests substitute recorders. Attach and
/// detach pass ring-reader ownership: the router creates readers, streams
/// hold them while registered.
pub trait WindowSink: Send + Sync {
    /// Take ownership of the window's ring reader. Replaces any previous
    /// reader (reallocation).
    fn attach_reader(&self, reader: RingReader);

    /// Release the ring reader, clearing its host-active flag.
    fn detach_reader(&self);

    /// Drain frames from the attached reader until empty or until
    /// `frame_number` was delivered.
    fn handle_frame_ready(&self, frame_number: u32);

    /// Window metadata changed.
    fn handle_metadata(&self, metadata: WindowMetadata);

    /// Guest clipboard contents changed.
    fn handle_clipboard(&self, clipboard: ClipboardChanged);
}

struct BufferEntry {
    descriptor: WindowBufferAllocated,
    /// Reader created before any stream registered for the window.
    pending_reader: Option<RingReader>,
}

#[derive(Default)]
struct RouterInner {
    region: Option<RegionView>,
    buffers: HashMap<u64, BufferEntry>,
    streams: HashMap<u64, Weak<dyn WindowSink>>,
    /// FrameReady notifications with no registered stream.
    dropped_notifications: u64,
}

/// Owner of the shared region and per-window frame dispatch.
#[derive(Default)]
pub struct FrameRouter {
    inner: Mutex<RouterInner>,
}

impl FrameRouter {
    /// Create an empty router with no region.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the shared region. Idempotent; replaces any previous region.
    ///
    /// Descriptors that arrived before the region are re-processed, so late
    /// region setup still ends with every valid ring readable.
    pub fn set_shared_memory_region(&self, region: RegionView) {
        let mut inner = self.lock();
        inner.region = Some(region);

        let window_ids: Vec<u64> = inner.buffers.keys().copied().collect();
        for window_id in window_ids {
            Self::create_reader_locked(&mut inner, window_id);
        }
    }

    /// Remove the region, dropping every reader.
    pub fn clear_shared_memory_region(&self) {
        let mut inner = self.lock();
        inner.region = None;
        for entry in inner.buffers.values_mut() {
            entry.pending_reader = None;
        }
        let sinks: Vec<Arc<dyn WindowSink>> =
            inner.streams.values().filter_map(Weak::upgrade).collect();
        drop(inner);
        for sink in sinks {
            sink.detach_reader();
        }
    }

    /// Register a stream for `window_id`, attaching its reader when one
    /// exists or can be created.
    pub fn register_stream<S>(&self, window_id: u64, stream: &Arc<S>)
    where
        S: WindowSink + 'static,
    {
        let dyn_stream = Arc::clone(stream) as Arc<dyn WindowSink>;
        let sink: Weak<dyn WindowSink> = Arc::downgrade(&dyn_stream);
        self.register_sink(window_id, sink);
    }

    /// Type-erased registration; see [`FrameRouter::register_stream`].
    pub fn register_sink(&self, window_id: u64, sink: Weak<dyn WindowSink>) {
        let mut inner = self.lock();
        inner.streams.insert(window_id, sink);

        // A descriptor may have arrived first; hand over or create the
        // reader now.
        if let Some(entry) = inner.buffers.get_mut(&window_id) {
            if let Some(reader) = entry.pending_reader.take() {
                if let Some(sink) = inner.streams.get(&window_id).and_then(Weak::upgrade) {
                    sink.attach_reader(reader);
                }
            } else {
                Self::create_reader_locked(&mut inner, window_id);
            }
        }
    }

    /// Remove the registration for `window_id` and detach its reader.
    pub fn unregister_stream(&self, window_id: u64) {
        let sink = {
            let mut inner = self.lock();
            inner.streams.remove(&window_id).and_then(|weak| weak.upgrade())
        };
        if let Some(sink) = sink {
            sink.detach_reader();
        }
    }

    /// Remove every registration, reader, and buffer descriptor.
    pub fn unregister_all_streams(&self) {
        let sinks: Vec<Arc<dyn WindowSink>> = {
            let mut inner = self.lock();
            let sinks = inner.streams.values().filter_map(Weak::upgrade).collect();
            inner.streams.clear();
            inner.buffers.clear();
            sinks
        };
        for sink in sinks {
            sink.detach_reader();
        }
    }

    /// Process a `WindowBufferAllocated` descriptor from the guest.
    ///
    /// The descriptor is always stored. A reader is created only when the
    /// region is present, the descriptor asks for shared memory, and both
    /// the bounds and the ring header validate. A reallocation replaces the
    /// existing reader.
    pub fn handle_buffer_allocation(&self, descriptor: WindowBufferAllocated) {
        let mut inner = self.lock();
        let window_id = descriptor.window_id;

        if descriptor.is_reallocation {
            tracing::debug!(window_id, "ring reallocated by guest");
        }
        inner
            .buffers
            .insert(window_id, BufferEntry { descriptor, pending_reader: None });

        Self::create_reader_locked(&mut inner, window_id);
    }

    /// Route a `FrameReady` notification to the window's stream.
    ///
    /// With no registered (or still-alive) stream, the notification is
    /// dropped and counted.
    pub fn route_frame_ready(&self, notification: FrameReady) {
        let mut inner = self.lock();
        let window_id = notification.window_id;

        let sink = match inner.streams.get(&window_id) {
            Some(weak) => match weak.upgrade() {
                Some(sink) => Some(sink),
                None => {
                    // Stream dropped without unregistering; prune.
                    inner.streams.remove(&window_id);
                    None
                },
            },
            None => None,
        };

        match sink {
            Some(sink) => sink.handle_frame_ready(notification.frame_number),
            None => {
                inner.dropped_notifications += 1;
                tracing::debug!(window_id, "FrameReady for unregistered window dropped");
            },
        }
    }

    /// FrameReady notifications dropped for lack of a registered stream.
    #[must_use]
    pub fn dropped_notifications(&self) -> u64 {
        self.lock().dropped_notifications
    }

    /// Whether a buffer descriptor is stored for `window_id`.
    #[must_use]
    pub fn has_buffer(&self, window_id: u64) -> bool {
        self.lock().buffers.contains_key(&window_id)
    }

    /// Create a reader for `window_id` if the region, descriptor, and
    /// registration state allow it, and deliver it to the stream or park it.
    fn create_reader_locked(inner: &mut RouterInner, window_id: u64) {
        let Some(region) = inner.region else { return };
        let Some(entry) = inner.buffers.get_mut(&window_id) else { return };
        let descriptor = entry.descriptor;

        if !descriptor.uses_shared_memory {
            // Guest will push frames by message; nothing to read.
            return;
        }

        match Self::validate_and_attach(region, &descriptor) {
            Ok(reader) => {
                let sink = inner.streams.get(&window_id).and_then(Weak::upgrade);
                match sink {
                    Some(sink) => sink.attach_reader(reader),
                    None => {
                        // INVARIANT: entry still present, we hold the lock.
                        if let Some(entry) = inner.buffers.get_mut(&window_id) {
                            entry.pending_reader = Some(reader);
                        }
                    },
                }
            },
            Err(e) => {
                // Keep the descriptor for diagnostics; no reader.
                tracing::warn!(
                    window_id,
                    offset = descriptor.buffer_offset,
                    size = descriptor.buffer_size,
                    error = %e,
                    "rejecting invalid buffer descriptor"
                );
            },
        }
    }

    fn validate_and_attach(
        region: RegionView,
        descriptor: &WindowBufferAllocated,
    ) -> Result<RingReader, ShmError> {
        let end = descriptor
            .buffer_offset
            .checked_add(descriptor.buffer_size)
            .ok_or(ShmError::BoundsViolation {
                offset: descriptor.buffer_offset,
                len: descriptor.buffer_size,
                bound: region.len(),
            })?;
        if end > region.len() as u64 {
            return Err(ShmError::BoundsViolation {
                offset: descriptor.buffer_offset,
                len: descriptor.buffer_size,
                bound: region.len(),
            });
        }

        let slots_len =
            u64::from(descriptor.slot_count) * u64::from(descriptor.slot_size) + HEADER_SIZE as u64;
        if slots_len > descriptor.buffer_size {
            return Err(ShmError::InvalidGeometry {
                detail: format!(
                    "{} slots of {} bytes exceed buffer of {} bytes",
                    descriptor.slot_count, descriptor.slot_size, descriptor.buffer_size
                ),
            });
        }

        RingReader::attach(
            region,
            descriptor.buffer_offset as usize,
            descriptor.buffer_size as usize,
        )
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RouterInner> {
        #[allow(clippy::expect_used)]
        self.inner.lock().expect("router lock poisoned")
    }
}

impl ControlDelegate for FrameRouter {
    fn did_receive_frame_ready(&self, notification: FrameReady) {
        self.route_frame_ready(notification);
    }

    fn did_receive_buffer_allocation(&self, descriptor: WindowBufferAllocated) {
        self.handle_buffer_allocation(descriptor);
    }

    fn did_receive_message(&self, message: &Message) {
        match message {
            Message::WindowMetadata(metadata) => {
                let sink = {
                    let inner = self.lock();
                    inner.streams.get(&metadata.window_id).and_then(Weak::upgrade)
                };
                if let Some(sink) = sink {
                    sink.handle_metadata(metadata.clone());
                }
            },
            Message::ClipboardChanged(clipboard) => {
                // Clipboard is guest-global; every projected window shell
                // sees the update.
                let sinks: Vec<Arc<dyn WindowSink>> = {
                    let inner = self.lock();
                    inner.streams.values().filter_map(Weak::upgrade).collect()
                };
                for sink in sinks {
                    sink.handle_clipboard(clipboard.clone());
                }
            },
            _ => {},
        }
    }
}
