//! The IPC server: accept, authenticate, rate-limit, dispatch.
//!
//! Every request travels the same path: peer credentials → authenticator →
//! rate limiter → typed handler. Authentication happens once per
//! connection; the rate limiter runs per request and answers with a
//! `throttled` error frame (connection stays open, so a well-behaved
//! client can back off and retry).

use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use winrun_core::env::Environment;
use winrun_proto::messages::session::{GuestSession, WindowsShortcut};
use winrun_provision::SetupConfig;

use crate::auth::{
    AuthConfig, ClientAuthenticator, ClientIdentity, CodeSignatureInfo, GroupMembership,
};
use crate::error::IpcError;
use crate::rate_limiter::{RateLimiter, RateLimiterConfig};
use crate::requests::{
    IpcRequest, IpcResponse, ProvisioningReport, ProvisioningUpdate, ShortcutSyncReport,
    VmStatusReport, read_frame, write_frame,
};

/// Platform lookup of a process's code-signing facts.
pub trait CodeSignatureLookup: Send + Sync + 'static {
    /// Signature info for `pid`; `None` when the binary is unsigned.
    fn signature_for_pid(&self, pid: i32) -> Option<CodeSignatureInfo>;
}

/// Lookup that reports every client as unsigned; development only.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSignatureLookup;

impl CodeSignatureLookup for NoSignatureLookup {
    fn signature_for_pid(&self, _pid: i32) -> Option<CodeSignatureInfo> {
        None
    }
}

/// Application-level operations behind the IPC surface.
///
/// The daemon implements this against the control channel, the VM façade,
/// and the provisioning coordinator.
#[async_trait]
pub trait IpcHandler: Send + Sync + 'static {
    /// Current VM status.
    async fn vm_status(&self) -> Result<VmStatusReport, IpcError>;

    /// Launch a Windows program.
    async fn launch_program(
        &self,
        windows_path: String,
        arguments: Vec<String>,
        working_directory: Option<String>,
    ) -> Result<(), IpcError>;

    /// List guest application sessions.
    async fn list_sessions(&self) -> Result<Vec<GuestSession>, IpcError>;

    /// Close one guest session.
    async fn close_session(&self, session_id: String) -> Result<(), IpcError>;

    /// List detected shortcuts.
    async fn list_shortcuts(&self) -> Result<Vec<WindowsShortcut>, IpcError>;

    /// Create host launchers for the given shortcuts.
    async fn sync_shortcuts(&self, windows_paths: Vec<String>)
    -> Result<ShortcutSyncReport, IpcError>;

    /// Run provisioning, streaming progress through `progress`.
    async fn start_provisioning(
        &self,
        config: SetupConfig,
        progress: mpsc::Sender<ProvisioningUpdate>,
    ) -> Result<ProvisioningReport, IpcError>;

    /// Cancel an active provisioning run.
    async fn cancel_provisioning(&self) -> Result<(), IpcError>;
}

/// Server policy: authentication plus rate limiting.
#[derive(Debug, Clone)]
pub struct IpcServerConfig {
    /// Authentication policy.
    pub auth: AuthConfig,
    /// Rate limiter tunables.
    pub rate_limit: RateLimiterConfig,
}

impl IpcServerConfig {
    /// Development preset: permissive auth, generous limits, 1 s cooldown.
    #[must_use]
    pub fn development() -> Self {
        Self { auth: AuthConfig::development(), rate_limit: RateLimiterConfig::development() }
    }

    /// Production preset: signature + prefix enforcement, 5 s cooldown.
    #[must_use]
    pub fn production(team: impl Into<String>, bundle_prefix: impl Into<String>) -> Self {
        Self {
            auth: AuthConfig::production(team, bundle_prefix),
            rate_limit: RateLimiterConfig::production(),
        }
    }
}

/// Authenticated, rate-limited IPC server over a Unix socket.
pub struct IpcServer<E: Environment> {
    env: E,
    authenticator: ClientAuthenticator,
    limiter: RateLimiter<E::Instant>,
    signatures: Arc<dyn CodeSignatureLookup>,
    handler: Arc<dyn IpcHandler>,
}

impl<E: Environment> IpcServer<E>
where
    E::Instant: std::ops::Add<std::time::Duration, Output = E::Instant>,
{
    /// Build a server with the given policy and collaborators.
    #[must_use]
    pub fn new(
        env: E,
        config: IpcServerConfig,
        groups: Arc<dyn GroupMembership>,
        signatures: Arc<dyn CodeSignatureLookup>,
        handler: Arc<dyn IpcHandler>,
    ) -> Arc<Self> {
        Arc::new(Self {
            env,
            authenticator: ClientAuthenticator::new(config.auth, groups),
            limiter: RateLimiter::new(config.rate_limit),
            signatures,
            handler,
        })
    }

    /// Accept loop; runs until the listener fails.
    pub async fn serve(self: Arc<Self>, listener: UnixListener) -> std::io::Result<()> {
        loop {
            let (stream, _addr) = listener.accept().await?;
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = server.handle_connection(stream).await {
                    tracing::debug!(error = %e, "IPC connection ended with error");
                }
            });
        }
    }

    async fn handle_connection(&self, stream: UnixStream) -> Result<(), IpcError> {
        let identity = self.identify(&stream)?;
        let client_key = (u64::from(identity.uid) << 32) | u64::from(identity.pid as u32);

        let (mut reader, writer) = stream.into_split();
        let writer = Arc::new(tokio::sync::Mutex::new(writer));

        if let Err(rejection) = self.authenticator.authenticate(&identity) {
            tracing::warn!(uid = identity.uid, pid = identity.pid, %rejection, "IPC client rejected");
            let error = IpcError::Unauthorized { reason: rejection };
            let mut w = writer.lock().await;
            write_frame(&mut *w, &IpcResponse::from_error(&error)).await?;
            return Err(error);
        }

        tracing::debug!(uid = identity.uid, pid = identity.pid, "IPC client connected");

        loop {
            let Some(request) = read_frame::<_, IpcRequest>(&mut reader).await? else {
                return Ok(());
            };

            if let Err(error) = self.limiter.check_request(client_key, self.env.now()) {
                let mut w = writer.lock().await;
                write_frame(&mut *w, &IpcResponse::from_error(&error)).await?;
                continue;
            }

            self.dispatch(request, &writer).await?;
        }
    }

    fn identify(&self, stream: &UnixStream) -> Result<ClientIdentity, IpcError> {
        let cred = stream
            .peer_cred()
            .map_err(|e| IpcError::ConnectionRejected(format!("peer credentials: {e}")))?;
        let pid = cred.pid().unwrap_or_default();
        Ok(ClientIdentity {
            uid: cred.uid(),
            pid,
            signature: self.signatures.signature_for_pid(pid),
        })
    }

    async fn dispatch(
        &self,
        request: IpcRequest,
        writer: &Arc<tokio::sync::Mutex<tokio::net::unix::OwnedWriteHalf>>,
    ) -> Result<(), IpcError> {
        let response = match request {
            IpcRequest::VmStatus => {
                self.handler.vm_status().await.map(IpcResponse::VmStatus)
            },
            IpcRequest::LaunchProgram { windows_path, arguments, working_directory } => self
                .handler
                .launch_program(windows_path, arguments, working_directory)
                .await
                .map(|()| IpcResponse::Ack),
            IpcRequest::ListSessions => self
                .handler
                .list_sessions()
                .await
                .map(|sessions| IpcResponse::Sessions { sessions }),
            IpcRequest::CloseSession { session_id } => {
                self.handler.close_session(session_id).await.map(|()| IpcResponse::Ack)
            },
            IpcRequest::ListShortcuts => self
                .handler
                .list_shortcuts()
                .await
                .map(|shortcuts| IpcResponse::Shortcuts { shortcuts }),
            IpcRequest::SyncShortcuts { windows_paths } => self
                .handler
                .sync_shortcuts(windows_paths)
                .await
                .map(IpcResponse::ShortcutSync),
            IpcRequest::StartProvisioning { config } => {
                return self.run_provisioning(config, writer).await;
            },
            IpcRequest::CancelProvisioning => {
                self.handler.cancel_provisioning().await.map(|()| IpcResponse::Ack)
            },
        };

        let frame = match response {
            Ok(response) => response,
            Err(error) => IpcResponse::from_error(&error),
        };
        let mut w = writer.lock().await;
        write_frame(&mut *w, &frame).await
    }

    /// Provisioning streams progress frames before the final result.
    async fn run_provisioning(
        &self,
        config: SetupConfig,
        writer: &Arc<tokio::sync::Mutex<tokio::net::unix::OwnedWriteHalf>>,
    ) -> Result<(), IpcError> {
        let (tx, mut rx) = mpsc::channel::<ProvisioningUpdate>(32);

        let forward_writer = Arc::clone(writer);
        let forwarder = tokio::spawn(async move {
            while let Some(update) = rx.recv().await {
                let mut w = forward_writer.lock().await;
                if write_frame(&mut *w, &IpcResponse::ProvisioningProgress(update)).await.is_err()
                {
                    break;
                }
            }
        });

        let result = self.handler.start_provisioning(config, tx).await;
        // Drain remaining progress before the result frame so ordering on
        // the socket matches the run.
        let _ = forwarder.await;

        let frame = match result {
            Ok(report) => IpcResponse::ProvisioningResult(report),
            Err(error) => IpcResponse::from_error(&error),
        };
        let mut w = writer.lock().await;
        write_frame(&mut *w, &frame).await
    }
}
