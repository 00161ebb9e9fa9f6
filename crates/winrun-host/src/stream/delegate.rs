//! Window-stream delegate hooks.

use winrun_proto::messages::input::ClipboardChanged;
use winrun_proto::messages::window::WindowMetadata;
use winrun_shm::Frame;

use super::StreamLifecycle;

/// Observer for one window stream.
///
/// All methods default to no-ops. Callbacks are dispatched from the stream's
/// own dispatcher task, never from the transport callback task, and observe
/// the happens-before order of the producing events. `did_close` is terminal
/// for a lifecycle; a manual reconnect starts a new one.
pub trait WindowStreamDelegate: Send + Sync + 'static {
    /// Lifecycle transition.
    fn did_change_state(&self, window_id: u64, state: StreamLifecycle) {
        let _ = (window_id, state);
    }

    /// A frame was drained from the window's ring.
    fn did_update_frame(&self, window_id: u64, frame: Frame) {
        let _ = (window_id, frame);
    }

    /// The window's metadata changed.
    fn did_update_metadata(&self, window_id: u64, metadata: WindowMetadata) {
        let _ = (window_id, metadata);
    }

    /// Guest clipboard contents arrived for this window.
    fn did_receive_clipboard(&self, window_id: u64, clipboard: ClipboardChanged) {
        let _ = (window_id, clipboard);
    }

    /// The stream's lifecycle ended (user disconnect or terminal failure).
    fn did_close(&self, window_id: u64) {
        let _ = window_id;
    }
}
