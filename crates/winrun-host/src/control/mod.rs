//! Control channel: framed request/response duplex with the guest agent.
//!
//! One channel per VM carries everything that is not pixel data: input
//! forwarding, session and shortcut queries, clipboard sync, provisioning
//! progress, and the out-of-band `FrameReady` notifications. Requests carry
//! a monotonic `messageId`; a pending-waiter table maps ids to oneshot
//! senders that are resolved exactly once — by the matching response, by
//! timeout (the entry is removed so a late response is dropped), or by
//! disconnect (all waiters fail with `NotConnected`). Unsolicited guest
//! messages bypass the table and fan out through [`ControlDelegate`].
//!
//! # Handshake
//!
//! The guest opens the conversation with `CapabilityFlags`. The host accepts
//! iff the protocol majors are equal and the guest minor is not newer than
//! ours; otherwise the connection fails with `IncompatibleVersion` before
//! any other traffic is processed.

pub mod delegate;
pub mod transport;

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use winrun_proto::messages::session::{
    Ack, CapabilityFlags, CloseSession, GuestSession, LaunchProgram, ListSessions, ListShortcuts,
    RequestIcon, Shutdown, WindowsShortcut,
};
use winrun_proto::messages::window::IconData;
use winrun_proto::{CURRENT_VERSION, Direction, Message, MessageType, ProtocolVersion};

pub use delegate::{ControlDelegate, NullDelegate};
pub use transport::{ControlStream, ControlTransport, UnixControlTransport};

use crate::error::ControlError;
use crate::stream::MessageSender;

/// Default deadline for a request to be answered.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default deadline for the guest to open with `CapabilityFlags`.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Control channel configuration.
#[derive(Debug, Clone)]
pub struct ControlChannelConfig {
    /// Deadline for each request.
    pub request_timeout: Duration,
    /// Deadline for the capability handshake.
    pub handshake_timeout: Duration,
    /// Protocol version we negotiate with.
    pub local_version: ProtocolVersion,
}

impl Default for ControlChannelConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            local_version: CURRENT_VERSION,
        }
    }
}

type Waiter = oneshot::Sender<Result<Message, ControlError>>;

/// State shared between the channel handle and its reader task.
struct Shared {
    connected: AtomicBool,
    next_message_id: AtomicU32,
    generation: AtomicU64,
    pending: Mutex<HashMap<u32, Waiter>>,
    writer: tokio::sync::Mutex<Option<WriteHalf<ControlStream>>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    guest_capabilities: Mutex<Option<CapabilityFlags>>,
    heartbeats_received: AtomicU64,
    last_heartbeat_uptime: AtomicU64,
}

impl Shared {
    fn fail_all_pending(&self, error: &ControlError) {
        #[allow(clippy::expect_used)]
        let waiters: Vec<Waiter> = {
            let mut pending = self.pending.lock().expect("pending lock poisoned");
            pending.drain().map(|(_, tx)| tx).collect()
        };
        for tx in waiters {
            let _ = tx.send(Err(error.clone()));
        }
    }

    async fn write_bytes(&self, bytes: &[u8]) -> Result<(), ControlError> {
        let mut writer = self.writer.lock().await;
        let Some(writer) = writer.as_mut() else {
            return Err(ControlError::NotConnected);
        };
        writer.write_all(bytes).await.map_err(|e| ControlError::SendFailed(e.to_string()))?;
        writer.flush().await.map_err(|e| ControlError::SendFailed(e.to_string()))
    }
}

/// Request/response channel to the guest agent.
pub struct ControlChannel {
    transport: Arc<dyn ControlTransport>,
    delegate: Arc<dyn ControlDelegate>,
    config: ControlChannelConfig,
    shared: Arc<Shared>,
}

impl ControlChannel {
    /// Create a channel over `transport`, delivering unsolicited messages to
    /// `delegate`.
    #[must_use]
    pub fn new(
        transport: Arc<dyn ControlTransport>,
        delegate: Arc<dyn ControlDelegate>,
        config: ControlChannelConfig,
    ) -> Self {
        Self {
            transport,
            delegate,
            config,
            shared: Arc::new(Shared {
                connected: AtomicBool::new(false),
                next_message_id: AtomicU32::new(1),
                generation: AtomicU64::new(0),
                pending: Mutex::new(HashMap::new()),
                writer: tokio::sync::Mutex::new(None),
                reader_task: Mutex::new(None),
                guest_capabilities: Mutex::new(None),
                heartbeats_received: AtomicU64::new(0),
                last_heartbeat_uptime: AtomicU64::new(0),
            }),
        }
    }

    /// Whether the channel is currently connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// The guest's negotiated capabilities. `None` before connect.
    #[must_use]
    pub fn guest_capabilities(&self) -> Option<CapabilityFlags> {
        #[allow(clippy::expect_used)]
        self.shared.guest_capabilities.lock().expect("capabilities lock poisoned").clone()
    }

    /// Number of heartbeats received since the channel was created.
    #[must_use]
    pub fn heartbeats_received(&self) -> u64 {
        self.shared.heartbeats_received.load(Ordering::Relaxed)
    }

    /// Guest uptime from the most recent heartbeat, in seconds.
    #[must_use]
    pub fn last_heartbeat_uptime(&self) -> u64 {
        self.shared.last_heartbeat_uptime.load(Ordering::Relaxed)
    }

    /// Connect and perform the capability handshake.
    ///
    /// # Errors
    ///
    /// - [`ControlError::ConnectionFailed`] when the transport cannot open a
    ///   stream or the guest never sends `CapabilityFlags`.
    /// - [`ControlError::IncompatibleVersion`] when version negotiation
    ///   fails; the stream is dropped.
    pub async fn connect(&self) -> Result<(), ControlError> {
        if self.is_connected() {
            return Ok(());
        }

        let stream = self.transport.connect().await?;
        let (mut read_half, write_half) = tokio::io::split(stream);

        let mut buf = BytesMut::with_capacity(64 * 1024);
        let caps =
            tokio::time::timeout(self.config.handshake_timeout, read_handshake(&mut read_half, &mut buf))
                .await
                .map_err(|_| {
                    ControlError::ConnectionFailed("handshake timed out".to_string())
                })??;

        let remote = caps.protocol_version;
        if !self.config.local_version.accepts(remote) {
            return Err(ControlError::IncompatibleVersion {
                local: self.config.local_version,
                remote,
            });
        }

        tracing::info!(
            agent_version = %caps.agent_version,
            os_version = %caps.os_version,
            capabilities = caps.capabilities,
            version = %remote,
            "guest agent connected"
        );

        {
            #[allow(clippy::expect_used)]
            let mut slot =
                self.shared.guest_capabilities.lock().expect("capabilities lock poisoned");
            *slot = Some(caps);
        }
        *self.shared.writer.lock().await = Some(write_half);

        let generation = self.shared.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.shared.connected.store(true, Ordering::Release);

        let task = tokio::spawn(read_loop(
            read_half,
            buf,
            Arc::clone(&self.shared),
            Arc::clone(&self.delegate),
            generation,
        ));
        {
            #[allow(clippy::expect_used)]
            let mut slot = self.shared.reader_task.lock().expect("reader task lock poisoned");
            if let Some(old) = slot.replace(task) {
                old.abort();
            }
        }

        self.delegate.did_connect();
        Ok(())
    }

    /// Disconnect and fail all pending requests with `NotConnected`.
    pub async fn disconnect(&self) {
        if !self.shared.connected.swap(false, Ordering::AcqRel) {
            return;
        }
        self.shared.generation.fetch_add(1, Ordering::AcqRel);
        {
            #[allow(clippy::expect_used)]
            let task = self.shared.reader_task.lock().expect("reader task lock poisoned").take();
            if let Some(task) = task {
                task.abort();
            }
        }
        *self.shared.writer.lock().await = None;
        self.shared.fail_all_pending(&ControlError::NotConnected);
        self.delegate.did_disconnect("disconnect requested");
    }

    /// Fire-and-forget send of one message.
    ///
    /// # Errors
    ///
    /// - [`ControlError::NotConnected`] before connect.
    /// - [`ControlError::SendFailed`] on transport write failure.
    pub async fn send(&self, message: &Message) -> Result<(), ControlError> {
        if !self.is_connected() {
            return Err(ControlError::NotConnected);
        }
        let bytes = winrun_proto::serialize(message)?;
        self.shared.write_bytes(&bytes).await
    }

    /// Ask the guest for its open application sessions.
    pub async fn list_sessions(&self) -> Result<Vec<GuestSession>, ControlError> {
        let message_id = self.next_message_id();
        let response =
            self.request(message_id, Message::ListSessions(ListSessions { message_id })).await?;
        match response {
            Message::SessionList(list) => Ok(list.sessions),
            _ => Err(ControlError::UnexpectedResponse { message_id }),
        }
    }

    /// Close one guest application session.
    pub async fn close_session(&self, session_id: &str) -> Result<(), ControlError> {
        let message_id = self.next_message_id();
        let message = Message::CloseSession(CloseSession {
            message_id,
            session_id: session_id.to_string(),
        });
        self.expect_ack(message_id, message).await
    }

    /// Ask the guest for detected Start-menu shortcuts.
    pub async fn list_shortcuts(&self) -> Result<Vec<WindowsShortcut>, ControlError> {
        let message_id = self.next_message_id();
        let response =
            self.request(message_id, Message::ListShortcuts(ListShortcuts { message_id })).await?;
        match response {
            Message::ShortcutList(list) => Ok(list.shortcuts),
            _ => Err(ControlError::UnexpectedResponse { message_id }),
        }
    }

    /// Launch a program inside the guest.
    pub async fn launch_program(
        &self,
        windows_path: &str,
        arguments: Vec<String>,
        working_directory: Option<String>,
    ) -> Result<(), ControlError> {
        let message_id = self.next_message_id();
        let message = Message::LaunchProgram(LaunchProgram {
            message_id,
            windows_path: windows_path.to_string(),
            arguments,
            working_directory,
        });
        self.expect_ack(message_id, message).await
    }

    /// Request an icon bitmap for a shortcut or executable.
    pub async fn request_icon(
        &self,
        path: &str,
        size_px: Option<u32>,
    ) -> Result<IconData, ControlError> {
        let message_id = self.next_message_id();
        let message =
            Message::RequestIcon(RequestIcon { message_id, path: path.to_string(), size_px });
        let response = self.request(message_id, message).await?;
        match response {
            Message::IconData(icon) => Ok(icon),
            _ => Err(ControlError::UnexpectedResponse { message_id }),
        }
    }

    /// Request a clean guest shutdown.
    pub async fn shutdown_guest(&self, timeout_ms: u32) -> Result<(), ControlError> {
        let message_id = self.next_message_id();
        self.expect_ack(message_id, Message::Shutdown(Shutdown { message_id, timeout_ms })).await
    }

    async fn expect_ack(&self, message_id: u32, message: Message) -> Result<(), ControlError> {
        match self.request(message_id, message).await? {
            Message::Ack(Ack { success: true, .. }) => Ok(()),
            _ => Err(ControlError::UnexpectedResponse { message_id }),
        }
    }

    fn next_message_id(&self) -> u32 {
        // Skip 0 so a zeroed field never collides with a live request.
        loop {
            let id = self.shared.next_message_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }

    /// Send a request and wait for its correlated response.
    async fn request(&self, message_id: u32, message: Message) -> Result<Message, ControlError> {
        if !self.is_connected() {
            return Err(ControlError::NotConnected);
        }

        let (tx, rx) = oneshot::channel();
        {
            #[allow(clippy::expect_used)]
            let mut pending = self.shared.pending.lock().expect("pending lock poisoned");
            pending.insert(message_id, tx);
        }
        // Removes the entry on every exit path that did not resolve it, so a
        // late response after timeout or caller cancellation is dropped.
        let guard = PendingGuard { shared: &self.shared, message_id };

        let bytes = winrun_proto::serialize(&message)?;
        self.shared.write_bytes(&bytes).await?;

        match tokio::time::timeout(self.config.request_timeout, rx).await {
            Err(_) => Err(ControlError::Timeout {
                message_id,
                elapsed: self.config.request_timeout,
            }),
            // Waiter dropped without resolution (disconnect raced us).
            Ok(Err(_)) => Err(ControlError::NotConnected),
            Ok(Ok(result)) => {
                drop(guard);
                result
            },
        }
    }
}

impl MessageSender for ControlChannel {
    fn send_message(&self, message: Message) {
        if !self.is_connected() {
            return;
        }
        let bytes = match winrun_proto::serialize(&message) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize outbound message");
                return;
            },
        };
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            if let Err(e) = shared.write_bytes(&bytes).await {
                tracing::debug!(error = %e, "fire-and-forget send failed");
            }
        });
    }
}

/// Removes a pending-table entry unless the request resolved first.
struct PendingGuard<'a> {
    shared: &'a Shared,
    message_id: u32,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        #[allow(clippy::expect_used)]
        let mut pending = self.shared.pending.lock().expect("pending lock poisoned");
        pending.remove(&self.message_id);
    }
}

/// Read envelopes until the opening `CapabilityFlags` arrives.
async fn read_handshake(
    read_half: &mut ReadHalf<ControlStream>,
    buf: &mut BytesMut,
) -> Result<CapabilityFlags, ControlError> {
    loop {
        let outcome = winrun_proto::try_read(buf, Direction::GuestToHost)?;
        if let Some(message) = outcome.message {
            buf.advance(outcome.consumed);
            match message {
                Message::CapabilityFlags(caps) => return Ok(caps),
                other => {
                    return Err(ControlError::ConnectionFailed(format!(
                        "expected CapabilityFlags, got {:?}",
                        other.message_type()
                    )));
                },
            }
        }

        let read = read_half
            .read_buf(buf)
            .await
            .map_err(|e| ControlError::ConnectionFailed(e.to_string()))?;
        if read == 0 {
            return Err(ControlError::ConnectionFailed(
                "guest closed the connection during handshake".to_string(),
            ));
        }
    }
}

/// Reader task: parse envelopes, resolve waiters, fan out notifications.
async fn read_loop(
    mut read_half: ReadHalf<ControlStream>,
    mut buf: BytesMut,
    shared: Arc<Shared>,
    delegate: Arc<dyn ControlDelegate>,
    generation: u64,
) {
    let reason = 'conn: loop {
        loop {
            match winrun_proto::try_read(&buf, Direction::GuestToHost) {
                Ok(outcome) => {
                    let Some(message) = outcome.message else { break };
                    buf.advance(outcome.consumed);
                    dispatch(&shared, &delegate, message);
                },
                Err(e) => {
                    tracing::warn!(error = %e, "protocol error on control channel");
                    break 'conn e.to_string();
                },
            }
        }

        match read_half.read_buf(&mut buf).await {
            Ok(0) => break 'conn "guest closed the connection".to_string(),
            Ok(_) => {},
            Err(e) => break 'conn e.to_string(),
        }
    };

    // A newer connection may already be live; only tear down our own.
    if shared.generation.load(Ordering::Acquire) != generation {
        return;
    }
    shared.connected.store(false, Ordering::Release);
    *shared.writer.lock().await = None;
    shared.fail_all_pending(&ControlError::NotConnected);
    delegate.did_disconnect(&reason);
}

fn dispatch(shared: &Shared, delegate: &Arc<dyn ControlDelegate>, message: Message) {
    // Correlated responses resolve their waiter and go no further.
    if let Some(message_id) = message.message_id() {
        let is_response = matches!(
            message.message_type(),
            MessageType::Ack
                | MessageType::Error
                | MessageType::SessionList
                | MessageType::ShortcutList
                | MessageType::IconData
        );
        if is_response {
            #[allow(clippy::expect_used)]
            let waiter = {
                let mut pending = shared.pending.lock().expect("pending lock poisoned");
                pending.remove(&message_id)
            };
            if let Some(tx) = waiter {
                let result = match message {
                    Message::Ack(Ack { success: false, error_code, error_message, .. }) => {
                        Err(ControlError::GuestError {
                            code: error_code.unwrap_or(0),
                            message: error_message.unwrap_or_default(),
                        })
                    },
                    Message::Error(err) => {
                        Err(ControlError::GuestError { code: err.code, message: err.message })
                    },
                    other => Ok(other),
                };
                let _ = tx.send(result);
            } else {
                tracing::debug!(message_id, "dropping late or unknown response");
            }
            return;
        }
    }

    match message {
        Message::FrameReady(notification) => delegate.did_receive_frame_ready(notification),
        Message::WindowBufferAllocated(descriptor) => {
            delegate.did_receive_buffer_allocation(descriptor);
        },
        Message::Heartbeat(beat) => {
            shared.heartbeats_received.fetch_add(1, Ordering::Relaxed);
            shared.last_heartbeat_uptime.store(beat.uptime_seconds, Ordering::Relaxed);
            delegate.did_receive_message(&Message::Heartbeat(beat));
        },
        other => delegate.did_receive_message(&other),
    }
}
