//! Guest provisioning event stream.
//!
//! During post-install the in-guest setup service reports progress over the
//! control channel. The coordinator consumes those reports through the
//! [`GuestEventSource`] seam: production feeds a channel from the control
//! channel's delegate, tests inject a scripted source, and when nothing is
//! attached at all a deterministic simulated progression substitutes.

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::mpsc;
use winrun_proto::messages::provision::{
    GuestProvisionPhase, ProvisionComplete, ProvisionError, ProvisionProgress,
};

/// One report from the in-guest setup service.
#[derive(Debug, Clone, PartialEq)]
pub enum GuestEvent {
    /// Sub-phase progress.
    Progress(ProvisionProgress),
    /// Recoverable or fatal error.
    Error(ProvisionError),
    /// Final report.
    Complete(ProvisionComplete),
}

/// Source of guest provisioning events.
#[async_trait]
pub trait GuestEventSource: Send + 'static {
    /// Next event; `None` when the stream ended without a completion.
    async fn next_event(&mut self) -> Option<GuestEvent>;
}

/// Channel-backed source for production use.
///
/// The daemon implements the control-channel delegate, converts
/// `ProvisionProgress`/`ProvisionError`/`ProvisionComplete` messages into
/// [`GuestEvent`]s, and pushes them into the sender half.
pub struct ChannelEventSource {
    rx: mpsc::Receiver<GuestEvent>,
}

/// Create a connected sender/source pair.
#[must_use]
pub fn guest_event_channel(capacity: usize) -> (mpsc::Sender<GuestEvent>, ChannelEventSource) {
    let (tx, rx) = mpsc::channel(capacity);
    (tx, ChannelEventSource { rx })
}

#[async_trait]
impl GuestEventSource for ChannelEventSource {
    async fn next_event(&mut self) -> Option<GuestEvent> {
        self.rx.recv().await
    }
}

/// Scripted source: yields a fixed sequence, then ends.
pub struct ScriptedEventSource {
    events: VecDeque<GuestEvent>,
}

impl ScriptedEventSource {
    /// Source that will replay `events` in order.
    #[must_use]
    pub fn new(events: Vec<GuestEvent>) -> Self {
        Self { events: events.into_iter().collect() }
    }

    /// The deterministic progression used when no control channel is
    /// attached: one full-progress report per guest sub-phase, then a
    /// successful completion.
    #[must_use]
    pub fn simulated() -> Self {
        let step = |phase: GuestProvisionPhase, message: &str| {
            GuestEvent::Progress(ProvisionProgress {
                phase,
                percent: 100.0,
                message: message.to_string(),
            })
        };
        Self::new(vec![
            step(GuestProvisionPhase::Drivers, "Drivers installed"),
            step(GuestProvisionPhase::Agent, "Agent installed"),
            step(GuestProvisionPhase::Optimize, "System optimized"),
            step(GuestProvisionPhase::Finalize, "Finalized"),
            GuestEvent::Complete(ProvisionComplete {
                success: true,
                disk_usage_mb: 14_336,
                windows_version: "Windows 11 (simulated)".to_string(),
                agent_version: "0.0.0-simulated".to_string(),
                error_message: None,
            }),
        ])
    }
}

#[async_trait]
impl GuestEventSource for ScriptedEventSource {
    async fn next_event(&mut self) -> Option<GuestEvent> {
        self.events.pop_front()
    }
}

/// A source that never yields; for watchdog timeout tests.
pub struct SilentEventSource;

#[async_trait]
impl GuestEventSource for SilentEventSource {
    async fn next_event(&mut self) -> Option<GuestEvent> {
        std::future::pending().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_source_replays_in_order() {
        let mut source = ScriptedEventSource::simulated();
        let mut phases = Vec::new();
        while let Some(event) = source.next_event().await {
            match event {
                GuestEvent::Progress(p) => phases.push(p.phase),
                GuestEvent::Complete(c) => {
                    assert!(c.success);
                    break;
                },
                GuestEvent::Error(e) => panic!("unexpected error event: {e:?}"),
            }
        }
        assert_eq!(
            phases,
            vec![
                GuestProvisionPhase::Drivers,
                GuestProvisionPhase::Agent,
                GuestProvisionPhase::Optimize,
                GuestProvisionPhase::Finalize,
            ]
        );
    }

    #[tokio::test]
    async fn channel_source_forwards_events() {
        let (tx, mut source) = guest_event_channel(4);
        tx.send(GuestEvent::Progress(ProvisionProgress {
            phase: GuestProvisionPhase::Drivers,
            percent: 10.0,
            message: "virtio".to_string(),
        }))
        .await
        .unwrap();
        drop(tx);

        assert!(matches!(source.next_event().await, Some(GuestEvent::Progress(_))));
        assert_eq!(source.next_event().await, None);
    }
}
