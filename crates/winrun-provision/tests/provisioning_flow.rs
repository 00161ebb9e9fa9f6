//! End-to-end provisioning pipeline tests with fake collaborators.
//!
//! The VM façade, image attacher, and guest event stream are all
//! in-process fakes; timers run on tokio's paused clock so the 30-minute
//! watchdog and the 100 ms cancellation poller elapse instantly.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use winrun_core::SystemEnv;
use winrun_provision::config::SetupConfig;
use winrun_provision::coordinator::{
    CoordinatorConfig, ProvisioningCoordinator, ProvisioningDelegate, ProvisioningResult,
    ProvisioningState,
};
use winrun_provision::error::ProvisioningError;
use winrun_provision::guest::{GuestEvent, ScriptedEventSource, guest_event_channel};
use winrun_provision::iso::wim::WIM_MAGIC;
use winrun_provision::iso::{DirectWimInspector, IsoValidator};
use winrun_provision::phase::ProvisioningPhase;
use winrun_provision::vm::VmFacade;
use winrun_provision::{ImageAttacher, InstallerVmSpec, MountHandle};
use winrun_proto::messages::provision::{
    GuestProvisionPhase, ProvisionComplete, ProvisionError, ProvisionProgress,
};

/// Minimal WIM image with the given XML metadata fields.
fn synthetic_wim(display_name: &str, arch: u32, build: u32) -> Vec<u8> {
    let xml = format!(
        "<WIM><IMAGE INDEX=\"1\"><DISPLAYNAME>{display_name}</DISPLAYNAME>\
         <WINDOWS><ARCH>{arch}</ARCH><VERSION><BUILD>{build}</BUILD></VERSION></WINDOWS>\
         </IMAGE></WIM>"
    );
    let mut xml_bytes = vec![0xFF, 0xFE];
    for unit in xml.encode_utf16() {
        xml_bytes.extend_from_slice(&unit.to_le_bytes());
    }
    let mut out = vec![0u8; 208];
    out[..8].copy_from_slice(WIM_MAGIC);
    out[80..88].copy_from_slice(&208u64.to_le_bytes());
    out[88..96].copy_from_slice(&(xml_bytes.len() as u64).to_le_bytes());
    out.extend_from_slice(&xml_bytes);
    out
}

struct FakeAttacher {
    mount_point: PathBuf,
}

#[async_trait]
impl ImageAttacher for FakeAttacher {
    async fn attach_read_only(
        &self,
        _image: &Path,
    ) -> Result<MountHandle, ProvisioningError> {
        Ok(MountHandle { mount_point: self.mount_point.clone(), device: "/dev/disk9".into() })
    }

    async fn detach(&self, _handle: &MountHandle) -> Result<(), ProvisioningError> {
        Ok(())
    }
}

#[derive(Default)]
struct FakeVm {
    /// When set, `wait_for_install_complete` never resolves.
    install_hangs: AtomicBool,
    snapshots: Mutex<Vec<String>>,
    stops: AtomicU32,
    installer_specs: Mutex<Vec<InstallerVmSpec>>,
}

#[async_trait]
impl VmFacade for FakeVm {
    async fn start_installer(&self, spec: &InstallerVmSpec) -> Result<(), ProvisioningError> {
        self.installer_specs.lock().unwrap().push(spec.clone());
        Ok(())
    }

    async fn wait_for_install_complete(&self) -> Result<(), ProvisioningError> {
        if self.install_hangs.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn start_provisioned(&self) -> Result<(), ProvisioningError> {
        Ok(())
    }

    async fn create_snapshot(&self, name: &str) -> Result<(), ProvisioningError> {
        self.snapshots.lock().unwrap().push(name.to_string());
        Ok(())
    }

    async fn stop(&self) -> Result<(), ProvisioningError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct RecordingDelegate {
    progress: Mutex<Vec<f64>>,
    states: Mutex<Vec<ProvisioningPhase>>,
    completions: Mutex<Vec<ProvisioningResult>>,
}

impl ProvisioningDelegate for RecordingDelegate {
    fn provisioning_state_did_change(&self, state: &ProvisioningState) {
        self.states.lock().unwrap().push(state.phase);
    }

    fn provisioning_progress(&self, overall_progress: f64, _message: &str) {
        self.progress.lock().unwrap().push(overall_progress);
    }

    fn provisioning_did_complete(&self, result: &ProvisioningResult) {
        self.completions.lock().unwrap().push(result.clone());
    }
}

struct Fixture {
    coordinator: Arc<ProvisioningCoordinator<SystemEnv>>,
    vm: Arc<FakeVm>,
    delegate: Arc<RecordingDelegate>,
    config: SetupConfig,
    _mount_dir: tempfile::TempDir,
    _work_dir: tempfile::TempDir,
}

fn fixture_with_edition(display_name: &str, arch: u32, build: u32) -> Fixture {
    let mount_dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(mount_dir.path().join("sources")).unwrap();
    std::fs::write(
        mount_dir.path().join("sources/install.wim"),
        synthetic_wim(display_name, arch, build),
    )
    .unwrap();

    let work_dir = tempfile::tempdir().unwrap();
    let iso_path = work_dir.path().join("windows.iso");
    std::fs::write(&iso_path, b"iso-stub").unwrap();
    let mut config = SetupConfig::new(iso_path, work_dir.path().join("WinRun/windows.img"));
    config.disk_size_gb = 32;

    let vm = Arc::new(FakeVm::default());
    let delegate = Arc::new(RecordingDelegate::default());
    let validator = IsoValidator::new(
        Arc::new(FakeAttacher { mount_point: mount_dir.path().to_path_buf() }),
        Arc::new(DirectWimInspector),
    );
    let coordinator = Arc::new(ProvisioningCoordinator::new(
        SystemEnv::new(),
        vm.clone(),
        validator,
        delegate.clone(),
        CoordinatorConfig::default(),
    ));

    Fixture { coordinator, vm, delegate, config, _mount_dir: mount_dir, _work_dir: work_dir }
}

fn fixture() -> Fixture {
    fixture_with_edition("Windows 11 IoT Enterprise LTSC", 12, 26100)
}

/// Poll until the coordinator enters `phase`; panics if it never does.
async fn wait_for_phase(
    coordinator: &ProvisioningCoordinator<SystemEnv>,
    phase: ProvisioningPhase,
) {
    for _ in 0..300 {
        if coordinator.state().phase == phase {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("coordinator never reached {phase:?}, at {:?}", coordinator.state().phase);
}

#[tokio::test(start_paused = true)]
async fn happy_path_reaches_complete() {
    let fx = fixture();

    let result = fx.coordinator.start_provisioning(fx.config.clone()).await.unwrap();

    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(result.final_phase, ProvisioningPhase::Complete);
    assert!(result.duration_seconds >= 0.0);
    assert!(result.disk_usage_bytes > 0);
    assert!(!result.windows_version.is_empty());

    // The disk image exists and is sparse-truncated to its nominal size.
    let metadata = std::fs::metadata(&fx.config.disk_image_path).unwrap();
    assert_eq!(metadata.len(), 32 * 1024 * 1024 * 1024);

    // Golden snapshot taken after the VM stopped.
    assert_eq!(*fx.vm.snapshots.lock().unwrap(), vec!["golden".to_string()]);
    assert!(fx.vm.stops.load(Ordering::SeqCst) >= 1);

    // Exactly one completion; progress monotonically non-decreasing to 1.0.
    assert_eq!(fx.delegate.completions.lock().unwrap().len(), 1);
    let progress = fx.delegate.progress.lock().unwrap();
    assert!(progress.windows(2).all(|w| w[1] >= w[0] - 1e-9), "{progress:?}");
    assert!((progress.last().copied().unwrap() - 1.0).abs() < 1e-9);

    // Phases in declared order.
    assert_eq!(
        *fx.delegate.states.lock().unwrap(),
        vec![
            ProvisioningPhase::ValidatingIso,
            ProvisioningPhase::CreatingDisk,
            ProvisioningPhase::InstallingWindows,
            ProvisioningPhase::PostInstallProvisioning,
            ProvisioningPhase::CreatingSnapshot,
            ProvisioningPhase::Complete,
        ]
    );

    // Installer VM spec used the configured geometry with EFI boot.
    let specs = fx.vm.installer_specs.lock().unwrap();
    assert_eq!(specs.len(), 1);
    assert!(specs[0].efi_boot);
}

#[tokio::test(start_paused = true)]
async fn cancel_mid_install_yields_cancelled() {
    let fx = fixture();
    fx.vm.install_hangs.store(true, Ordering::SeqCst);

    let coordinator = Arc::clone(&fx.coordinator);
    let config = fx.config.clone();
    let run = tokio::spawn(async move { coordinator.start_provisioning(config).await });

    // Let the pipeline reach the install wait, then cancel.
    wait_for_phase(&fx.coordinator, ProvisioningPhase::InstallingWindows).await;
    fx.coordinator.cancel();

    let result = run.await.unwrap().unwrap();
    assert!(!result.success);
    assert_eq!(result.final_phase, ProvisioningPhase::Cancelled);
    assert_eq!(result.error, Some(ProvisioningError::Cancelled));
    assert_eq!(fx.coordinator.state().phase, ProvisioningPhase::Cancelled);
    assert_eq!(fx.delegate.completions.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn non_arm64_iso_fails_validation() {
    let fx = fixture_with_edition("Windows 11 Pro", 9, 22631);

    let result = fx.coordinator.start_provisioning(fx.config.clone()).await.unwrap();
    assert!(!result.success);
    assert_eq!(result.final_phase, ProvisioningPhase::Failed);
    assert!(matches!(
        result.error,
        Some(ProvisioningError::IsoArchitectureUnsupported { .. })
    ));

    // Failure context points at the validation phase, no cleanup needed.
    let ctx = fx.coordinator.failure_context().unwrap();
    assert_eq!(ctx.failed_phase, ProvisioningPhase::ValidatingIso);
    assert!(!ctx.cleanup_recommended());
}

#[tokio::test(start_paused = true)]
async fn existing_disk_fails_then_rollback_returns_to_idle() {
    let fx = fixture();

    // Occupy the disk path before the run.
    std::fs::create_dir_all(fx.config.disk_image_path.parent().unwrap()).unwrap();
    std::fs::write(&fx.config.disk_image_path, vec![0u8; 4096]).unwrap();

    let result = fx.coordinator.start_provisioning(fx.config.clone()).await.unwrap();
    assert!(!result.success);
    assert!(matches!(result.error, Some(ProvisioningError::DiskAlreadyExists { .. })));
    assert!(fx.coordinator.can_rollback());

    let rollback = fx.coordinator.rollback().await.unwrap();
    assert_eq!(rollback.freed_bytes, 4096);
    assert!(rollback.deletion_error.is_none());
    assert!(!fx.config.disk_image_path.exists());
    assert_eq!(fx.coordinator.state().phase, ProvisioningPhase::Idle);
}

#[tokio::test(start_paused = true)]
async fn rollback_from_active_state_is_rejected() {
    let fx = fixture();
    let err = fx.coordinator.rollback().await.unwrap_err();
    assert!(matches!(err, ProvisioningError::InvalidTransition { .. }));
}

#[tokio::test(start_paused = true)]
async fn retry_with_rollback_recovers_from_occupied_disk() {
    let fx = fixture();

    std::fs::create_dir_all(fx.config.disk_image_path.parent().unwrap()).unwrap();
    std::fs::write(&fx.config.disk_image_path, b"stale").unwrap();

    let first = fx.coordinator.start_provisioning(fx.config.clone()).await.unwrap();
    assert!(!first.success);
    assert!(fx.coordinator.can_retry());

    let second = fx.coordinator.retry(None, true).await.unwrap();
    assert!(second.success, "error: {:?}", second.error);
    assert_eq!(fx.coordinator.state().phase, ProvisioningPhase::Complete);
}

#[tokio::test(start_paused = true)]
async fn start_from_terminal_state_requires_reset() {
    let fx = fixture();

    let result = fx.coordinator.start_provisioning(fx.config.clone()).await.unwrap();
    assert!(result.success);

    // Complete → validatingIso is not in the table.
    let err = fx.coordinator.start_provisioning(fx.config.clone()).await.unwrap_err();
    assert!(matches!(err, ProvisioningError::InvalidTransition { .. }));

    fx.coordinator.reset().unwrap();
    // Fresh run needs a fresh disk path.
    std::fs::remove_file(&fx.config.disk_image_path).unwrap();
    let result = fx.coordinator.start_provisioning(fx.config.clone()).await.unwrap();
    assert!(result.success);
}

#[tokio::test(start_paused = true)]
async fn recoverable_guest_error_continues_fatal_terminates() {
    let fx = fixture();

    let progress = |phase, percent| {
        GuestEvent::Progress(ProvisionProgress {
            phase,
            percent,
            message: format!("{phase:?} {percent}"),
        })
    };
    fx.coordinator.set_guest_event_source(Box::new(ScriptedEventSource::new(vec![
        progress(GuestProvisionPhase::Drivers, 50.0),
        GuestEvent::Error(ProvisionError {
            phase: GuestProvisionPhase::Drivers,
            error_code: 7,
            message: "optional driver skipped".to_string(),
            is_recoverable: true,
        }),
        progress(GuestProvisionPhase::Agent, 100.0),
        GuestEvent::Complete(ProvisionComplete {
            success: true,
            disk_usage_mb: 9000,
            windows_version: "Windows 11 26100".to_string(),
            agent_version: "1.0.0".to_string(),
            error_message: None,
        }),
    ])));

    let result = fx.coordinator.start_provisioning(fx.config.clone()).await.unwrap();
    assert!(result.success, "recoverable error must not fail the run");
    assert_eq!(result.windows_version, "Windows 11 26100");
    assert_eq!(result.disk_usage_bytes, 9000 * 1024 * 1024);
}

#[tokio::test(start_paused = true)]
async fn fatal_guest_error_fails_post_install() {
    let fx = fixture();

    fx.coordinator.set_guest_event_source(Box::new(ScriptedEventSource::new(vec![
        GuestEvent::Error(ProvisionError {
            phase: GuestProvisionPhase::Agent,
            error_code: 31,
            message: "agent service refused to start".to_string(),
            is_recoverable: false,
        }),
    ])));

    let result = fx.coordinator.start_provisioning(fx.config.clone()).await.unwrap();
    assert!(!result.success);
    assert_eq!(
        result.error,
        Some(ProvisioningError::GuestProvisioningFailed {
            code: 31,
            message: "agent service refused to start".to_string(),
        })
    );
    let ctx = fx.coordinator.failure_context().unwrap();
    assert_eq!(ctx.failed_phase, ProvisioningPhase::PostInstallProvisioning);
    assert!(ctx.cleanup_recommended());
}

#[tokio::test(start_paused = true)]
async fn silent_guest_hits_the_watchdog_timeout() {
    let fx = fixture();

    // A channel source whose sender never sends keeps the processor pending.
    let (tx, source) = guest_event_channel(4);
    fx.coordinator.set_guest_event_source(Box::new(source));

    let result = fx.coordinator.start_provisioning(fx.config.clone()).await.unwrap();
    drop(tx);

    assert!(!result.success);
    assert_eq!(result.error, Some(ProvisioningError::Timeout));
    assert_eq!(result.final_phase, ProvisioningPhase::Failed);
}

#[tokio::test(start_paused = true)]
async fn cancel_during_post_install_wins_over_silence() {
    let fx = fixture();

    let (tx, source) = guest_event_channel(4);
    fx.coordinator.set_guest_event_source(Box::new(source));

    let coordinator = Arc::clone(&fx.coordinator);
    let config = fx.config.clone();
    let run = tokio::spawn(async move { coordinator.start_provisioning(config).await });

    wait_for_phase(&fx.coordinator, ProvisioningPhase::PostInstallProvisioning).await;
    fx.coordinator.cancel();

    let result = run.await.unwrap().unwrap();
    drop(tx);
    assert_eq!(result.final_phase, ProvisioningPhase::Cancelled);
    assert_eq!(result.error, Some(ProvisioningError::Cancelled));
}
