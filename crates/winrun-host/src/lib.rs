//! Host-side streaming core for WinRun.
//!
//! Three cooperating pieces, each an isolated owner of its own state:
//!
//! - [`control::ControlChannel`] — the framed request/response duplex to the
//!   in-guest agent, with correlation ids, timeouts, and delegate fan-out of
//!   unsolicited messages.
//! - [`router::FrameRouter`] — single owner of the shared memory region;
//!   validates guest buffer descriptors, creates ring readers, and routes
//!   `FrameReady` notifications to the right stream.
//! - [`stream::WindowStream`] — the per-window state machine: connect,
//!   reconnect with exponential backoff, pause/resume, frame drain, and
//!   input forwarding.
//!
//! Wiring: the router implements [`control::ControlDelegate`], so handing it
//! to the channel connects the frame path end to end. The UI owns streams
//! strongly and registers them with the router, which holds them weakly.

pub mod control;
pub mod error;
pub mod router;
pub mod stream;

pub use control::{
    ControlChannel, ControlChannelConfig, ControlDelegate, ControlTransport, UnixControlTransport,
};
pub use error::{CloseReason, ControlError};
pub use router::{FrameRouter, WindowSink};
pub use stream::{
    MessageSender, StreamLifecycle, StreamMetrics, WindowConnection, WindowStream,
    WindowStreamConfig, WindowStreamDelegate, WindowTransport,
};
