//! Control-channel delegate hooks.

use winrun_proto::Message;
use winrun_proto::messages::window::{FrameReady, WindowBufferAllocated};

/// Observer for control-channel lifecycle and unsolicited guest messages.
///
/// All methods default to no-ops so implementors pick only what they need.
/// Request/response traffic never reaches the delegate; it resolves the
/// pending waiter instead. The two frame-path notifications get dedicated
/// hooks so the frame router can implement this trait directly.
pub trait ControlDelegate: Send + Sync + 'static {
    /// Connection established and version-negotiated.
    fn did_connect(&self) {}

    /// Connection lost or closed; all pending requests have been failed.
    fn did_disconnect(&self, reason: &str) {
        let _ = reason;
    }

    /// Unsolicited guest message outside the frame path.
    fn did_receive_message(&self, message: &Message) {
        let _ = message;
    }

    /// A ring slot was written for a window.
    fn did_receive_frame_ready(&self, notification: FrameReady) {
        let _ = notification;
    }

    /// The guest allocated (or reallocated) a per-window ring.
    fn did_receive_buffer_allocation(&self, descriptor: WindowBufferAllocated) {
        let _ = descriptor;
    }
}

/// Delegate that ignores everything; useful for tools that only issue
/// requests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullDelegate;

impl ControlDelegate for NullDelegate {}
