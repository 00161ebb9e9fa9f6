//! IPC server tests over a real Unix socket.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use winrun_core::SystemEnv;
use winrun_ipc::auth::AllowAllGroups;
use winrun_ipc::rate_limiter::RateLimiterConfig;
use winrun_ipc::{
    AuthConfig, GroupMembership, IpcError, IpcHandler, IpcRequest, IpcResponse, IpcServer,
    IpcServerConfig, NoSignatureLookup, ProvisioningReport, ProvisioningUpdate,
    ShortcutSyncReport, VmStatusReport, read_frame, write_frame,
};
use winrun_proto::messages::session::{GuestSession, WindowsShortcut};
use winrun_provision::{ProvisioningPhase, SetupConfig};

struct StubHandler;

#[async_trait]
impl IpcHandler for StubHandler {
    async fn vm_status(&self) -> Result<VmStatusReport, IpcError> {
        Ok(VmStatusReport {
            status: "running".to_string(),
            uptime_seconds: 120,
            active_sessions: 2,
        })
    }

    async fn launch_program(
        &self,
        windows_path: String,
        _arguments: Vec<String>,
        _working_directory: Option<String>,
    ) -> Result<(), IpcError> {
        if windows_path.ends_with("missing.exe") {
            return Err(IpcError::Internal { message: "no such program".to_string() });
        }
        Ok(())
    }

    async fn list_sessions(&self) -> Result<Vec<GuestSession>, IpcError> {
        Ok(vec![GuestSession {
            session_id: "sess-1".to_string(),
            executable_path: "C:\\Windows\\notepad.exe".to_string(),
            process_id: 77,
            window_ids: vec![100],
            uptime_seconds: 3,
        }])
    }

    async fn close_session(&self, _session_id: String) -> Result<(), IpcError> {
        Ok(())
    }

    async fn list_shortcuts(&self) -> Result<Vec<WindowsShortcut>, IpcError> {
        Ok(vec![])
    }

    async fn sync_shortcuts(
        &self,
        windows_paths: Vec<String>,
    ) -> Result<ShortcutSyncReport, IpcError> {
        Ok(ShortcutSyncReport {
            created: windows_paths.len() as u32,
            skipped: 0,
            failed: 0,
            launcher_paths: windows_paths,
        })
    }

    async fn start_provisioning(
        &self,
        _config: SetupConfig,
        progress: mpsc::Sender<ProvisioningUpdate>,
    ) -> Result<ProvisioningReport, IpcError> {
        for (overall, phase) in [
            (0.02, ProvisioningPhase::CreatingDisk),
            (0.65, ProvisioningPhase::PostInstallProvisioning),
        ] {
            let _ = progress
                .send(ProvisioningUpdate {
                    overall_progress: overall,
                    phase,
                    message: format!("{phase:?}"),
                })
                .await;
        }
        Ok(ProvisioningReport {
            success: true,
            final_phase: ProvisioningPhase::Complete,
            duration_seconds: 12.5,
            windows_version: "Windows 11 26100".to_string(),
            error_message: None,
        })
    }

    async fn cancel_provisioning(&self) -> Result<(), IpcError> {
        Ok(())
    }
}

struct RejectAllGroups;

impl GroupMembership for RejectAllGroups {
    fn is_member(&self, _uid: u32, _group: &str) -> bool {
        false
    }
}

async fn start_server(config: IpcServerConfig, groups: Arc<dyn GroupMembership>) -> UnixStream {
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("winrun.sock");
    let listener = UnixListener::bind(&socket_path).unwrap();

    let server = IpcServer::new(
        SystemEnv::new(),
        config,
        groups,
        Arc::new(NoSignatureLookup),
        Arc::new(StubHandler),
    );
    tokio::spawn(async move {
        let _dir = dir; // keep the socket directory alive
        let _ = server.serve(listener).await;
    });

    UnixStream::connect(&socket_path).await.unwrap()
}

async fn roundtrip(stream: &mut UnixStream, request: &IpcRequest) -> IpcResponse {
    write_frame(stream, request).await.unwrap();
    read_frame::<_, IpcResponse>(stream).await.unwrap().expect("response frame")
}

#[tokio::test]
async fn vm_status_round_trip() {
    let mut stream =
        start_server(IpcServerConfig::development(), Arc::new(AllowAllGroups)).await;

    let response = roundtrip(&mut stream, &IpcRequest::VmStatus).await;
    match response {
        IpcResponse::VmStatus(report) => {
            assert_eq!(report.status, "running");
            assert_eq!(report.active_sessions, 2);
        },
        other => panic!("unexpected response: {other:?}"),
    }
}

#[tokio::test]
async fn typed_requests_dispatch() {
    let mut stream =
        start_server(IpcServerConfig::development(), Arc::new(AllowAllGroups)).await;

    let response = roundtrip(&mut stream, &IpcRequest::ListSessions).await;
    assert!(matches!(response, IpcResponse::Sessions { sessions } if sessions.len() == 1));

    let response = roundtrip(
        &mut stream,
        &IpcRequest::CloseSession { session_id: "sess-1".to_string() },
    )
    .await;
    assert_eq!(response, IpcResponse::Ack);

    let response = roundtrip(
        &mut stream,
        &IpcRequest::SyncShortcuts {
            windows_paths: vec!["C:\\a.lnk".to_string(), "C:\\b.lnk".to_string()],
        },
    )
    .await;
    assert!(matches!(response, IpcResponse::ShortcutSync(report) if report.created == 2));
}

#[tokio::test]
async fn handler_errors_become_error_frames() {
    let mut stream =
        start_server(IpcServerConfig::development(), Arc::new(AllowAllGroups)).await;

    let response = roundtrip(
        &mut stream,
        &IpcRequest::LaunchProgram {
            windows_path: "C:\\missing.exe".to_string(),
            arguments: vec![],
            working_directory: None,
        },
    )
    .await;
    assert!(matches!(response, IpcResponse::Error { kind, .. } if kind == "internal"));
}

#[tokio::test]
async fn unauthorized_client_is_rejected_up_front() {
    let mut stream =
        start_server(IpcServerConfig::development(), Arc::new(RejectAllGroups)).await;

    // The rejection frame arrives without any request.
    let response: Option<IpcResponse> = read_frame(&mut stream).await.unwrap();
    assert!(
        matches!(response, Some(IpcResponse::Error { kind, .. }) if kind == "unauthorized"),
    );
}

#[tokio::test]
async fn burst_exhaustion_throttles_with_retry_after() {
    let config = IpcServerConfig {
        auth: AuthConfig::development(),
        rate_limit: RateLimiterConfig {
            max_requests_per_window: 3,
            window: Duration::from_secs(60),
            burst_allowance: 2,
            cooldown: Duration::from_secs(1),
        },
    };
    let mut stream = start_server(config, Arc::new(AllowAllGroups)).await;

    for _ in 0..5 {
        let response = roundtrip(&mut stream, &IpcRequest::VmStatus).await;
        assert!(matches!(response, IpcResponse::VmStatus(_)));
    }

    let response = roundtrip(&mut stream, &IpcRequest::VmStatus).await;
    match response {
        IpcResponse::Error { kind, retry_after_ms, .. } => {
            assert_eq!(kind, "throttled");
            assert!(retry_after_ms.is_some_and(|ms| ms > 0));
        },
        other => panic!("expected throttle, got {other:?}"),
    }

    // The connection survives throttling; after the cooldown the client
    // can continue.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    let response = roundtrip(&mut stream, &IpcRequest::VmStatus).await;
    assert!(matches!(response, IpcResponse::VmStatus(_)));
}

#[tokio::test]
async fn provisioning_streams_progress_then_result() {
    let mut stream =
        start_server(IpcServerConfig::development(), Arc::new(AllowAllGroups)).await;

    let config = SetupConfig::new("/tmp/win.iso", "/tmp/windows.img");
    write_frame(&mut stream, &IpcRequest::StartProvisioning { config }).await.unwrap();

    let mut progress = Vec::new();
    let report = loop {
        let response: IpcResponse =
            read_frame(&mut stream).await.unwrap().expect("stream ended early");
        match response {
            IpcResponse::ProvisioningProgress(update) => progress.push(update.overall_progress),
            IpcResponse::ProvisioningResult(report) => break report,
            other => panic!("unexpected frame: {other:?}"),
        }
    };

    assert_eq!(progress, vec![0.02, 0.65]);
    assert!(report.success);
    assert_eq!(report.final_phase, ProvisioningPhase::Complete);
}
