//! Control-channel delegate for the daemon.
//!
//! Fans the guest's unsolicited traffic out to its consumers: frame-path
//! notifications go to the router, provisioning reports go to whatever
//! guest-event channel the active provisioning run installed, and
//! everything else is logged at debug.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use winrun_host::control::ControlDelegate;
use winrun_host::router::FrameRouter;
use winrun_proto::Message;
use winrun_proto::messages::window::{FrameReady, WindowBufferAllocated};
use winrun_provision::GuestEvent;

/// Daemon-side control delegate.
pub struct DaemonControlDelegate {
    router: Arc<FrameRouter>,
    provision_tx: Mutex<Option<mpsc::Sender<GuestEvent>>>,
}

impl DaemonControlDelegate {
    /// Delegate routing frames into `router`.
    #[must_use]
    pub fn new(router: Arc<FrameRouter>) -> Self {
        Self { router, provision_tx: Mutex::new(None) }
    }

    /// Install the guest-event sender for an active provisioning run.
    pub fn set_provision_sender(&self, tx: mpsc::Sender<GuestEvent>) {
        #[allow(clippy::expect_used)]
        let mut slot = self.provision_tx.lock().expect("provision sender lock poisoned");
        *slot = Some(tx);
    }

    fn forward_provision_event(&self, event: GuestEvent) {
        #[allow(clippy::expect_used)]
        let slot = self.provision_tx.lock().expect("provision sender lock poisoned");
        match slot.as_ref() {
            Some(tx) => {
                if tx.try_send(event).is_err() {
                    tracing::warn!("provisioning event channel full or closed; dropping event");
                }
            },
            None => {
                tracing::debug!("guest provisioning event with no active run; dropping");
            },
        }
    }
}

impl ControlDelegate for DaemonControlDelegate {
    fn did_connect(&self) {
        tracing::info!("guest agent control channel connected");
    }

    fn did_disconnect(&self, reason: &str) {
        tracing::warn!(reason, "guest agent control channel disconnected");
    }

    fn did_receive_frame_ready(&self, notification: FrameReady) {
        self.router.route_frame_ready(notification);
    }

    fn did_receive_buffer_allocation(&self, descriptor: WindowBufferAllocated) {
        self.router.handle_buffer_allocation(descriptor);
    }

    fn did_receive_message(&self, message: &Message) {
        match message {
            Message::ProvisionProgress(progress) => {
                self.forward_provision_event(GuestEvent::Progress(progress.clone()));
            },
            Message::ProvisionError(error) => {
                self.forward_provision_event(GuestEvent::Error(error.clone()));
            },
            Message::ProvisionComplete(complete) => {
                self.forward_provision_event(GuestEvent::Complete(complete.clone()));
            },
            // Metadata and clipboard still need the router's window fan-out.
            other => self.router.did_receive_message(other),
        }
    }
}
