//! Per-window stream state machine.
//!
//! A window stream is the host-side endpoint of one projected window:
//! it owns the connect/reconnect lifecycle, drains frames from the ring
//! reader the router attaches, forwards input events to the guest, and
//! reports everything to its delegate.
//!
//! # Lifecycle
//!
//! ```text
//! disconnected ──connect()──> connecting ──open──> connected
//!      ▲                          │                    │
//!      │                          │ transient close    │ transient close
//!   disconnect()                  ▼                    ▼
//!      │                  reconnecting(n) <────────────┘
//!      │                          │ backoff exhausted / permanent close
//!      └───────────               ▼
//!                               failed
//! ```
//!
//! A permanent close (authentication failure, shared memory unavailable)
//! goes straight to `failed` with no retry. Manual `reconnect()` resets the
//! attempt counter and starts a fresh lifecycle from any state.

pub mod delegate;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use winrun_core::BackoffPolicy;
use winrun_proto::Message;
use winrun_proto::messages::input::{
    ClipboardChanged, ClipboardData, ClipboardFormat, DragDropEvent, KeyboardInput, MouseInput,
};
use winrun_proto::messages::window::WindowMetadata;
use winrun_shm::{Frame, RingReader};

pub use delegate::WindowStreamDelegate;

use crate::error::CloseReason;
use crate::router::WindowSink;

/// Fire-and-forget sender for host→guest messages.
///
/// The control channel implements this; streams use it for the input path.
/// Implementations log failures rather than surfacing them, matching the
/// silently-drop contract for input on a broken connection.
pub trait MessageSender: Send + Sync + 'static {
    /// Queue one message toward the guest.
    fn send_message(&self, message: Message);
}

/// Events a per-window transport pushes after a successful open.
#[derive(Debug)]
pub enum TransportEvent {
    /// The transport closed; the reason decides reconnect behavior.
    Closed(CloseReason),
}

/// An open per-window connection.
#[derive(Debug)]
pub struct WindowConnection {
    /// Close notifications from the transport.
    pub events: mpsc::Receiver<TransportEvent>,
}

/// Opens per-window channels on the streaming transport.
#[async_trait]
pub trait WindowTransport: Send + Sync + 'static {
    /// Open the channel for `window_id`; resolves once the subscription is
    /// live.
    async fn open(&self, window_id: u64) -> Result<WindowConnection, CloseReason>;
}

/// Stream lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamLifecycle {
    /// No connection and none in progress.
    Disconnected,
    /// Transport open in flight.
    Connecting,
    /// Frames and input are flowing.
    Connected,
    /// Waiting out the backoff before retry `attempt`.
    Reconnecting {
        /// 1-based retry attempt being waited for.
        attempt: u32,
    },
    /// Terminal failure; only a manual `reconnect()` leaves this state.
    Failed,
}

/// Counters for one stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamMetrics {
    /// Frames delivered to the delegate.
    pub frames_received: u64,
    /// Metadata updates delivered to the delegate.
    pub metadata_updates: u64,
    /// Frames dropped while paused or while the delivery queue was full.
    pub frames_dropped: u64,
}

/// Window stream configuration.
#[derive(Debug, Clone)]
pub struct WindowStreamConfig {
    /// Reconnect delay schedule.
    pub backoff: BackoffPolicy,
    /// Frames allowed in the delegate queue before new ones are dropped.
    pub max_frames_in_flight: usize,
}

impl Default for WindowStreamConfig {
    fn default() -> Self {
        Self { backoff: BackoffPolicy::default(), max_frames_in_flight: 32 }
    }
}

enum DelegateEvent {
    State(StreamLifecycle),
    Frame(Frame),
    Metadata(WindowMetadata),
    Clipboard(ClipboardChanged),
    Closed,
}

struct StreamState {
    lifecycle: StreamLifecycle,
    paused: bool,
    user_initiated_close: bool,
    reconnect_attempt: u32,
    reader: Option<RingReader>,
    metrics: StreamMetrics,
    last_failure: Option<CloseReason>,
}

/// Host endpoint of one projected window.
///
/// The UI owns the strong reference; the router keeps only a weak one, so a
/// closed window tears its stream down without unhooking anything first.
pub struct WindowStream {
    window_id: u64,
    transport: Arc<dyn WindowTransport>,
    sender: Arc<dyn MessageSender>,
    config: WindowStreamConfig,
    state: Mutex<StreamState>,
    events_tx: mpsc::UnboundedSender<DelegateEvent>,
    frames_in_flight: Arc<AtomicUsize>,
    /// Bumped by `disconnect()`/`reconnect()` so async tasks belonging to an
    /// abandoned lifecycle cannot mutate the new one.
    generation: AtomicU64,
}

impl WindowStream {
    /// Create a stream and spawn its delegate dispatcher.
    ///
    /// Must be called inside a tokio runtime.
    #[must_use]
    pub fn new(
        window_id: u64,
        transport: Arc<dyn WindowTransport>,
        sender: Arc<dyn MessageSender>,
        delegate: Arc<dyn WindowStreamDelegate>,
        config: WindowStreamConfig,
    ) -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let frames_in_flight = Arc::new(AtomicUsize::new(0));

        let stream = Arc::new(Self {
            window_id,
            transport,
            sender,
            config,
            state: Mutex::new(StreamState {
                lifecycle: StreamLifecycle::Disconnected,
                paused: false,
                user_initiated_close: false,
                reconnect_attempt: 0,
                reader: None,
                metrics: StreamMetrics::default(),
                last_failure: None,
            }),
            events_tx,
            frames_in_flight: Arc::clone(&frames_in_flight),
            generation: AtomicU64::new(0),
        });

        tokio::spawn(dispatch_events(window_id, events_rx, delegate, frames_in_flight));
        stream
    }

    /// The window this stream serves.
    #[must_use]
    pub fn window_id(&self) -> u64 {
        self.window_id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn lifecycle(&self) -> StreamLifecycle {
        self.lock().lifecycle
    }

    /// Snapshot of the stream counters.
    #[must_use]
    pub fn metrics(&self) -> StreamMetrics {
        self.lock().metrics
    }

    /// The close reason that put the stream in `Failed`, if any.
    #[must_use]
    pub fn last_failure(&self) -> Option<CloseReason> {
        self.lock().last_failure.clone()
    }

    /// Whether frame delivery is paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    /// Start connecting. A duplicate call while not disconnected is a no-op.
    pub fn connect(self: &Arc<Self>) {
        let generation = {
            let mut st = self.lock();
            if st.lifecycle != StreamLifecycle::Disconnected {
                return;
            }
            st.lifecycle = StreamLifecycle::Connecting;
            st.user_initiated_close = false;
            st.reconnect_attempt = 0;
            st.last_failure = None;
            self.emit(DelegateEvent::State(StreamLifecycle::Connecting));
            self.generation.load(Ordering::Acquire)
        };
        self.spawn_open(generation);
    }

    /// Tear the stream down. Emits `Disconnected` and then `did_close`
    /// exactly once per lifecycle.
    pub fn disconnect(&self) {
        let mut st = self.lock();
        if st.lifecycle == StreamLifecycle::Disconnected {
            return;
        }
        self.generation.fetch_add(1, Ordering::AcqRel);
        st.user_initiated_close = true;
        let was_failed = st.lifecycle == StreamLifecycle::Failed;
        st.lifecycle = StreamLifecycle::Disconnected;
        st.reconnect_attempt = 0;
        self.emit(DelegateEvent::State(StreamLifecycle::Disconnected));
        if !was_failed {
            // Failed already emitted its terminal close.
            self.emit(DelegateEvent::Closed);
        }
    }

    /// Force a fresh connection attempt, resetting the retry counter.
    ///
    /// Legal from any state, including `Failed`.
    pub fn reconnect(self: &Arc<Self>) {
        let generation = {
            let mut st = self.lock();
            let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
            st.user_initiated_close = false;
            st.reconnect_attempt = 0;
            st.last_failure = None;
            st.lifecycle = StreamLifecycle::Connecting;
            self.emit(DelegateEvent::State(StreamLifecycle::Connecting));
            generation
        };
        self.spawn_open(generation);
    }

    /// Stop delivering frames. Input keeps flowing; lifecycle is unchanged.
    pub fn pause(&self) {
        self.lock().paused = true;
    }

    /// Resume frame delivery.
    pub fn resume(&self) {
        self.lock().paused = false;
    }

    /// Forward a mouse event; silently dropped unless connected.
    pub fn send_mouse_event(&self, input: MouseInput) {
        self.forward(Message::MouseInput(input));
    }

    /// Forward a keyboard event; silently dropped unless connected.
    pub fn send_keyboard_event(&self, input: KeyboardInput) {
        self.forward(Message::KeyboardInput(input));
    }

    /// Forward a drag-and-drop event; silently dropped unless connected.
    pub fn send_drag_drop_event(&self, event: DragDropEvent) {
        self.forward(Message::DragDropEvent(event));
    }

    /// Push clipboard contents to the guest; silently dropped unless
    /// connected.
    pub fn send_clipboard(&self, data: ClipboardData) {
        self.forward(Message::ClipboardData(data));
    }

    /// Ask the guest to publish its clipboard in `format`.
    ///
    /// Wire convention: an empty `ClipboardData` of the requested format;
    /// the agent answers with `ClipboardChanged`.
    pub fn request_clipboard(&self, format: ClipboardFormat) {
        self.forward(Message::ClipboardData(ClipboardData { format, data: Vec::new() }));
    }

    fn forward(&self, message: Message) {
        if self.lock().lifecycle != StreamLifecycle::Connected {
            return;
        }
        self.sender.send_message(message);
    }

    fn spawn_open(self: &Arc<Self>, generation: u64) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            match this.transport.open(this.window_id).await {
                Ok(connection) => this.on_open(connection, generation),
                Err(reason) => this.on_close(reason, generation),
            }
        });
    }

    fn on_open(self: &Arc<Self>, connection: WindowConnection, generation: u64) {
        {
            let mut st = self.lock();
            if self.generation.load(Ordering::Acquire) != generation
                || st.lifecycle != StreamLifecycle::Connecting
            {
                return;
            }
            st.lifecycle = StreamLifecycle::Connected;
            st.reconnect_attempt = 0;
            self.emit(DelegateEvent::State(StreamLifecycle::Connected));
        }

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut events = connection.events;
            let reason = match events.recv().await {
                Some(TransportEvent::Closed(reason)) => reason,
                None => CloseReason::Disconnected("transport dropped".to_string()),
            };
            this.on_close(reason, generation);
        });
    }

    fn on_close(self: &Arc<Self>, reason: CloseReason, generation: u64) {
        let (delay, attempt) = {
            let mut st = self.lock();
            if self.generation.load(Ordering::Acquire) != generation
                || st.user_initiated_close
                || matches!(st.lifecycle, StreamLifecycle::Disconnected | StreamLifecycle::Failed)
            {
                return;
            }

            let attempt = st.reconnect_attempt + 1;
            if reason.is_permanent() || self.config.backoff.is_exhausted(attempt) {
                tracing::warn!(
                    window_id = self.window_id,
                    reason = reason.detail(),
                    permanent = reason.is_permanent(),
                    "window stream failed"
                );
                st.lifecycle = StreamLifecycle::Failed;
                st.last_failure = Some(reason);
                self.emit(DelegateEvent::State(StreamLifecycle::Failed));
                self.emit(DelegateEvent::Closed);
                return;
            }

            st.reconnect_attempt = attempt;
            st.lifecycle = StreamLifecycle::Reconnecting { attempt };
            self.emit(DelegateEvent::State(StreamLifecycle::Reconnecting { attempt }));
            (self.config.backoff.delay_for_attempt(attempt), attempt)
        };

        tracing::debug!(
            window_id = self.window_id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "scheduling stream reconnect"
        );

        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut st = this.lock();
                // Cooperative cancellation point between reconnect waits.
                if this.generation.load(Ordering::Acquire) != generation
                    || !matches!(st.lifecycle, StreamLifecycle::Reconnecting { .. })
                {
                    return;
                }
                st.lifecycle = StreamLifecycle::Connecting;
                this.emit(DelegateEvent::State(StreamLifecycle::Connecting));
            }
            match this.transport.open(this.window_id).await {
                Ok(connection) => this.on_open(connection, generation),
                Err(reason) => this.on_close(reason, generation),
            }
        });
    }

    fn emit(&self, event: DelegateEvent) {
        // The dispatcher outlives every strong reference; send can only fail
        // during teardown, where dropping the event is fine.
        let _ = self.events_tx.send(event);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StreamState> {
        #[allow(clippy::expect_used)]
        self.state.lock().expect("stream state lock poisoned")
    }
}

impl WindowSink for WindowStream {
    fn attach_reader(&self, reader: RingReader) {
        reader.set_host_active(true);
        let mut st = self.lock();
        if let Some(old) = st.reader.take() {
            old.set_host_active(false);
        }
        st.reader = Some(reader);
    }

    fn detach_reader(&self) {
        let mut st = self.lock();
        if let Some(reader) = st.reader.take() {
            reader.set_host_active(false);
        }
    }

    fn handle_frame_ready(&self, frame_number: u32) {
        let mut st = self.lock();
        let StreamState { reader, metrics, paused, .. } = &mut *st;
        let Some(reader) = reader.as_mut() else { return };
        let paused = *paused;

        while let Some(frame) = reader.read_next_frame() {
            let delivered_number = frame.frame_number;
            if paused {
                // Paused streams drain but do not deliver or count.
                metrics.frames_dropped += 1;
            } else if self.frames_in_flight.load(Ordering::Acquire)
                >= self.config.max_frames_in_flight
            {
                metrics.frames_dropped += 1;
                tracing::warn!(window_id = self.window_id, "frame queue full, dropping frame");
            } else {
                metrics.frames_received += 1;
                self.frames_in_flight.fetch_add(1, Ordering::AcqRel);
                let _ = self.events_tx.send(DelegateEvent::Frame(frame));
            }
            if delivered_number == frame_number {
                break;
            }
        }
    }

    fn handle_metadata(&self, metadata: WindowMetadata) {
        {
            let mut st = self.lock();
            st.metrics.metadata_updates += 1;
        }
        self.emit(DelegateEvent::Metadata(metadata));
    }

    fn handle_clipboard(&self, clipboard: ClipboardChanged) {
        self.emit(DelegateEvent::Clipboard(clipboard));
    }
}

/// Dispatcher task: delivers events to the delegate on its own task, never
/// the transport's.
async fn dispatch_events(
    window_id: u64,
    mut events_rx: mpsc::UnboundedReceiver<DelegateEvent>,
    delegate: Arc<dyn WindowStreamDelegate>,
    frames_in_flight: Arc<AtomicUsize>,
) {
    while let Some(event) = events_rx.recv().await {
        match event {
            DelegateEvent::State(state) => delegate.did_change_state(window_id, state),
            DelegateEvent::Frame(frame) => {
                delegate.did_update_frame(window_id, frame);
                frames_in_flight.fetch_sub(1, Ordering::AcqRel);
            },
            DelegateEvent::Metadata(metadata) => delegate.did_update_metadata(window_id, metadata),
            DelegateEvent::Clipboard(clipboard) => {
                delegate.did_receive_clipboard(window_id, clipboard);
            },
            DelegateEvent::Closed => delegate.did_close(window_id),
        }
    }
}
