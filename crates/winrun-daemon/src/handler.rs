//! IPC handler: bridges client requests onto the control channel and the
//! provisioning coordinator.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use winrun_core::SystemEnv;
use winrun_host::control::ControlChannel;
use winrun_host::error::ControlError;
use winrun_ipc::auth::GroupMembership;
use winrun_ipc::{
    IpcError, IpcHandler, ProvisioningReport, ProvisioningUpdate, ShortcutSyncReport,
    VmStatusReport,
};
use winrun_proto::messages::session::{GuestSession, WindowsShortcut};
use winrun_provision::coordinator::{ProvisioningDelegate, ProvisioningState};
use winrun_provision::guest::guest_event_channel;
use winrun_provision::{ProvisioningCoordinator, ProvisioningPhase, SetupConfig};

use crate::bridge::DaemonControlDelegate;

/// Group membership via the `id` utility (`id -Gn <uid>`).
///
/// Subprocess contract, same as the other platform collaborators: exit
/// code plus whitespace-separated group names on stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellGroupMembership;

impl GroupMembership for ShellGroupMembership {
    fn is_member(&self, uid: u32, group: &str) -> bool {
        let output = std::process::Command::new("id").arg("-Gn").arg(uid.to_string()).output();
        match output {
            Ok(output) if output.status.success() => String::from_utf8_lossy(&output.stdout)
                .split_whitespace()
                .any(|g| g == group),
            _ => false,
        }
    }
}

/// Forwards coordinator progress to the active IPC progress stream.
#[derive(Default)]
pub struct ProgressFan {
    sender: Mutex<Option<mpsc::Sender<ProvisioningUpdate>>>,
    last_phase: Mutex<ProvisioningPhaseCell>,
}

struct ProvisioningPhaseCell(ProvisioningPhase);

impl Default for ProvisioningPhaseCell {
    fn default() -> Self {
        Self(ProvisioningPhase::Idle)
    }
}

impl ProgressFan {
    /// Attach the progress stream of a new provisioning request.
    pub fn set_sender(&self, tx: mpsc::Sender<ProvisioningUpdate>) {
        #[allow(clippy::expect_used)]
        let mut slot = self.sender.lock().expect("progress sender lock poisoned");
        *slot = Some(tx);
    }

    /// Detach after the run finished.
    pub fn clear(&self) {
        #[allow(clippy::expect_used)]
        let mut slot = self.sender.lock().expect("progress sender lock poisoned");
        *slot = None;
    }
}

impl ProvisioningDelegate for ProgressFan {
    fn provisioning_state_did_change(&self, state: &ProvisioningState) {
        #[allow(clippy::expect_used)]
        let mut last = self.last_phase.lock().expect("phase cell lock poisoned");
        last.0 = state.phase;
    }

    fn provisioning_progress(&self, overall_progress: f64, message: &str) {
        let phase = {
            #[allow(clippy::expect_used)]
            let last = self.last_phase.lock().expect("phase cell lock poisoned");
            last.0
        };
        #[allow(clippy::expect_used)]
        let slot = self.sender.lock().expect("progress sender lock poisoned");
        if let Some(tx) = slot.as_ref() {
            let _ = tx.try_send(ProvisioningUpdate {
                overall_progress,
                phase,
                message: message.to_string(),
            });
        }
    }
}

/// The daemon's implementation of the typed IPC surface.
pub struct DaemonHandler {
    channel: Arc<ControlChannel>,
    coordinator: Arc<ProvisioningCoordinator<SystemEnv>>,
    bridge: Arc<DaemonControlDelegate>,
    progress_fan: Arc<ProgressFan>,
    launchers_dir: PathBuf,
}

impl DaemonHandler {
    /// Handler wiring the IPC surface onto the daemon's components.
    #[must_use]
    pub fn new(
        channel: Arc<ControlChannel>,
        coordinator: Arc<ProvisioningCoordinator<SystemEnv>>,
        bridge: Arc<DaemonControlDelegate>,
        progress_fan: Arc<ProgressFan>,
        launchers_dir: PathBuf,
    ) -> Self {
        Self { channel, coordinator, bridge, progress_fan, launchers_dir }
    }
}

fn map_control(error: ControlError) -> IpcError {
    match error {
        ControlError::NotConnected => {
            IpcError::Internal { message: "guest agent is not connected".to_string() }
        },
        other => IpcError::Internal { message: other.to_string() },
    }
}

#[async_trait]
impl IpcHandler for DaemonHandler {
    async fn vm_status(&self) -> Result<VmStatusReport, IpcError> {
        if !self.channel.is_connected() {
            return Ok(VmStatusReport {
                status: "stopped".to_string(),
                uptime_seconds: 0,
                active_sessions: 0,
            });
        }

        let sessions = self.channel.list_sessions().await.map(|s| s.len() as u32).unwrap_or(0);
        Ok(VmStatusReport {
            status: "running".to_string(),
            uptime_seconds: self.channel.last_heartbeat_uptime(),
            active_sessions: sessions,
        })
    }

    async fn launch_program(
        &self,
        windows_path: String,
        arguments: Vec<String>,
        working_directory: Option<String>,
    ) -> Result<(), IpcError> {
        self.channel
            .launch_program(&windows_path, arguments, working_directory)
            .await
            .map_err(map_control)
    }

    async fn list_sessions(&self) -> Result<Vec<GuestSession>, IpcError> {
        self.channel.list_sessions().await.map_err(map_control)
    }

    async fn close_session(&self, session_id: String) -> Result<(), IpcError> {
        self.channel.close_session(&session_id).await.map_err(map_control)
    }

    async fn list_shortcuts(&self) -> Result<Vec<WindowsShortcut>, IpcError> {
        self.channel.list_shortcuts().await.map_err(map_control)
    }

    async fn sync_shortcuts(
        &self,
        windows_paths: Vec<String>,
    ) -> Result<ShortcutSyncReport, IpcError> {
        tokio::fs::create_dir_all(&self.launchers_dir)
            .await
            .map_err(|e| IpcError::Internal { message: format!("launchers dir: {e}") })?;

        let mut report = ShortcutSyncReport::default();
        for windows_path in windows_paths {
            let name = launcher_name(&windows_path);
            let launcher = self.launchers_dir.join(format!("{name}.command"));

            if tokio::fs::try_exists(&launcher).await.unwrap_or(false) {
                report.skipped += 1;
                report.launcher_paths.push(launcher.display().to_string());
                continue;
            }

            let script = format!("#!/bin/sh\nexec winrun launch \"{windows_path}\"\n");
            match tokio::fs::write(&launcher, script).await {
                Ok(()) => {
                    #[cfg(unix)]
                    {
                        use std::os::unix::fs::PermissionsExt;
                        let _ = tokio::fs::set_permissions(
                            &launcher,
                            std::fs::Permissions::from_mode(0o755),
                        )
                        .await;
                    }
                    report.created += 1;
                    report.launcher_paths.push(launcher.display().to_string());
                },
                Err(e) => {
                    tracing::warn!(path = %launcher.display(), error = %e, "launcher write failed");
                    report.failed += 1;
                },
            }
        }
        Ok(report)
    }

    async fn start_provisioning(
        &self,
        config: SetupConfig,
        progress: mpsc::Sender<ProvisioningUpdate>,
    ) -> Result<ProvisioningReport, IpcError> {
        // Guest provisioning reports flow control-channel → bridge →
        // coordinator for the lifetime of this run.
        let (tx, source) = guest_event_channel(64);
        self.bridge.set_provision_sender(tx);
        self.coordinator.set_guest_event_source(Box::new(source));
        self.progress_fan.set_sender(progress);

        let outcome = self.coordinator.start_provisioning(config).await;
        self.progress_fan.clear();

        let result = outcome.map_err(|e| IpcError::Internal { message: e.to_string() })?;
        Ok(ProvisioningReport {
            success: result.success,
            final_phase: result.final_phase,
            duration_seconds: result.duration_seconds,
            windows_version: result.windows_version,
            error_message: result.error.map(|e| e.to_string()),
        })
    }

    async fn cancel_provisioning(&self) -> Result<(), IpcError> {
        self.coordinator.cancel();
        Ok(())
    }
}

fn launcher_name(windows_path: &str) -> String {
    let file = windows_path.rsplit(['\\', '/']).next().unwrap_or(windows_path);
    let stem = file.strip_suffix(".lnk").unwrap_or(file);
    stem.chars().map(|c| if c.is_alphanumeric() || c == ' ' || c == '-' { c } else { '_' }).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launcher_names_are_sanitized() {
        assert_eq!(
            launcher_name("C:\\Users\\win\\Start Menu\\Notepad.lnk"),
            "Notepad".to_string()
        );
        assert_eq!(launcher_name("Weird/Name:v2.lnk"), "Name_v2".to_string());
    }
}
