//! Provisioning coordinator: the ordered phase machine.
//!
//! One coordinator owns one provisioning pipeline:
//! validate → createDisk → installWindows → postInstallProvisioning →
//! createSnapshot, strictly sequential, with cooperative cancellation
//! checked between phases and inside every long wait.
//!
//! Post-install is guarded by three concurrent watchdogs: the guest message
//! processor (terminates on completion or a non-recoverable error), the
//! overall timeout, and a 100 ms cancellation poller. Whichever finishes
//! first cancels the others via `select!`.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use winrun_core::env::Environment;

use crate::config::{InstallerVmSpec, SetupConfig};
use crate::disk::{self, DiskCreationResult};
use crate::error::{ProvisioningError, Result};
use crate::failure::SetupFailureContext;
use crate::guest::{GuestEvent, GuestEventSource, ScriptedEventSource};
use crate::iso::{IsoValidation, IsoValidator};
use crate::phase::{self, ProvisioningPhase, is_valid_transition, overall_progress};
use crate::vm::{GOLDEN_SNAPSHOT_NAME, VmFacade};

/// Default overall deadline for guest post-install provisioning.
pub const DEFAULT_POST_INSTALL_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Default cancellation poll interval.
pub const DEFAULT_CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Observable pipeline state.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisioningState {
    /// Current phase.
    pub phase: ProvisioningPhase,
    /// Progress within the phase, 0..=1.
    pub phase_progress: f64,
    /// Human-readable status line.
    pub message: String,
    /// Error description once failed.
    pub error: Option<String>,
}

impl ProvisioningState {
    fn idle() -> Self {
        Self {
            phase: ProvisioningPhase::Idle,
            phase_progress: 0.0,
            message: "Idle".to_string(),
            error: None,
        }
    }
}

/// Final report of one provisioning run.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisioningResult {
    /// Whether the pipeline reached `complete`.
    pub success: bool,
    /// Terminal phase (`complete`, `failed`, or `cancelled`).
    pub final_phase: ProvisioningPhase,
    /// Wall-clock duration of the run in seconds.
    pub duration_seconds: f64,
    /// Guest-reported disk usage in bytes (zero when unknown).
    pub disk_usage_bytes: u64,
    /// Guest-reported Windows version (empty when unknown).
    pub windows_version: String,
    /// Guest-reported agent version (empty when unknown).
    pub agent_version: String,
    /// The terminating error, when not successful.
    pub error: Option<ProvisioningError>,
}

/// Outcome of a rollback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackResult {
    /// Bytes nominally freed by deleting the disk image.
    pub freed_bytes: u64,
    /// Deletion failure, captured rather than thrown.
    pub deletion_error: Option<String>,
}

/// Observer for pipeline progress and completion.
///
/// All methods default to no-ops.
pub trait ProvisioningDelegate: Send + Sync + 'static {
    /// The phase machine transitioned.
    fn provisioning_state_did_change(&self, state: &ProvisioningState) {
        let _ = state;
    }

    /// Overall progress (0..=1, monotonically non-decreasing during a run).
    fn provisioning_progress(&self, overall_progress: f64, message: &str) {
        let _ = (overall_progress, message);
    }

    /// The run finished; fired exactly once per `start_provisioning`.
    fn provisioning_did_complete(&self, result: &ProvisioningResult) {
        let _ = result;
    }
}

/// Delegate that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProvisioningDelegate;

impl ProvisioningDelegate for NullProvisioningDelegate {}

/// Coordinator tunables.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Deadline for guest post-install provisioning.
    pub post_install_timeout: Duration,
    /// Cancellation poll interval.
    pub cancel_poll_interval: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            post_install_timeout: DEFAULT_POST_INSTALL_TIMEOUT,
            cancel_poll_interval: DEFAULT_CANCEL_POLL_INTERVAL,
        }
    }
}

struct RunContext<I> {
    config: SetupConfig,
    iso_validation: Option<IsoValidation>,
    disk_result: Option<DiskCreationResult>,
    windows_version: String,
    agent_version: String,
    disk_usage_bytes: u64,
    #[allow(dead_code)]
    started_at: I,
}

struct Inner<I> {
    state: ProvisioningState,
    context: Option<RunContext<I>>,
    last_error: Option<ProvisioningError>,
    failed_phase: Option<ProvisioningPhase>,
}

/// Drives the provisioning pipeline.
pub struct ProvisioningCoordinator<E: Environment> {
    env: E,
    vm: Arc<dyn VmFacade>,
    validator: IsoValidator,
    delegate: Arc<dyn ProvisioningDelegate>,
    config: CoordinatorConfig,
    guest_events: Mutex<Option<Box<dyn GuestEventSource>>>,
    inner: Mutex<Inner<E::Instant>>,
    cancel_requested: AtomicBool,
}

impl<E: Environment> ProvisioningCoordinator<E> {
    /// Create an idle coordinator.
    #[must_use]
    pub fn new(
        env: E,
        vm: Arc<dyn VmFacade>,
        validator: IsoValidator,
        delegate: Arc<dyn ProvisioningDelegate>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            env,
            vm,
            validator,
            delegate,
            config,
            guest_events: Mutex::new(None),
            inner: Mutex::new(Inner {
                state: ProvisioningState::idle(),
                context: None,
                last_error: None,
                failed_phase: None,
            }),
            cancel_requested: AtomicBool::new(false),
        }
    }

    /// Install the guest event source for the next run.
    ///
    /// Production attaches a channel fed by the control channel's delegate;
    /// with no source attached, post-install falls back to the
    /// deterministic simulated progression.
    pub fn set_guest_event_source(&self, source: Box<dyn GuestEventSource>) {
        #[allow(clippy::expect_used)]
        let mut slot = self.guest_events.lock().expect("guest event lock poisoned");
        *slot = Some(source);
    }

    /// Snapshot of the observable state.
    #[must_use]
    pub fn state(&self) -> ProvisioningState {
        self.lock().state.clone()
    }

    /// The error that terminated the last run, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<ProvisioningError> {
        self.lock().last_error.clone()
    }

    /// Whether `retry` is currently legal.
    #[must_use]
    pub fn can_retry(&self) -> bool {
        matches!(
            self.lock().state.phase,
            ProvisioningPhase::Failed | ProvisioningPhase::Cancelled
        )
    }

    /// Whether `rollback` is currently legal.
    #[must_use]
    pub fn can_rollback(&self) -> bool {
        self.can_retry()
    }

    /// Failure context for the last failed run, for UI presentation.
    #[must_use]
    pub fn failure_context(&self) -> Option<SetupFailureContext> {
        let inner = self.lock();
        let phase = inner.failed_phase?;
        let error = inner.last_error.clone()?;
        Some(SetupFailureContext::new(phase, error))
    }

    /// Request cancellation of the active run.
    ///
    /// Observed between phases and by every long-wait watchdog.
    pub fn cancel(&self) {
        tracing::info!("provisioning cancellation requested");
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    /// Run the full pipeline.
    ///
    /// Returns the run report; `provisioning_did_complete` fires exactly
    /// once before this returns. The only `Err` is an invalid start (a run
    /// is already active, or the machine is in a terminal state that was
    /// not reset).
    pub async fn start_provisioning(&self, config: SetupConfig) -> Result<ProvisioningResult> {
        self.transition(ProvisioningPhase::ValidatingIso, "Validating Windows ISO")?;
        self.cancel_requested.store(false, Ordering::SeqCst);

        let started_at = self.env.now();
        {
            let mut inner = self.lock();
            inner.last_error = None;
            inner.failed_phase = None;
            inner.state.error = None;
            inner.context = Some(RunContext {
                config: config.clone(),
                iso_validation: None,
                disk_result: None,
                windows_version: String::new(),
                agent_version: String::new(),
                disk_usage_bytes: 0,
                started_at,
            });
        }

        let outcome = self.run_phases(&config).await;

        let result = match outcome {
            Ok(()) => self.build_result(true, ProvisioningPhase::Complete, None, started_at),
            Err(error) => {
                let terminal = if error.is_cancelled() {
                    ProvisioningPhase::Cancelled
                } else {
                    ProvisioningPhase::Failed
                };
                self.abort(terminal, &error).await;
                self.build_result(false, terminal, Some(error), started_at)
            },
        };

        self.delegate.provisioning_did_complete(&result);
        Ok(result)
    }

    /// Return a terminal machine to idle without touching the disk.
    pub fn reset(&self) -> Result<()> {
        self.transition(ProvisioningPhase::Idle, "Idle")
    }

    /// Delete the partial disk image and return to idle.
    ///
    /// Only legal from `failed` or `cancelled`. Deletion errors are
    /// captured in the result, never thrown; the transition to idle always
    /// happens.
    pub async fn rollback(&self) -> Result<RollbackResult> {
        let disk_path = {
            let inner = self.lock();
            if !matches!(
                inner.state.phase,
                ProvisioningPhase::Failed | ProvisioningPhase::Cancelled
            ) {
                return Err(ProvisioningError::InvalidTransition {
                    from: inner.state.phase,
                    to: ProvisioningPhase::Idle,
                });
            }
            inner.context.as_ref().map(|c| c.config.disk_image_path.clone())
        };

        let result = match disk_path {
            Some(path) => match disk::delete_disk_image(&path).await {
                Ok(freed_bytes) => RollbackResult { freed_bytes, deletion_error: None },
                Err(detail) => {
                    tracing::warn!(error = %detail, "rollback could not delete disk image");
                    RollbackResult { freed_bytes: 0, deletion_error: Some(detail) }
                },
            },
            None => RollbackResult { freed_bytes: 0, deletion_error: None },
        };

        self.transition(ProvisioningPhase::Idle, "Idle")?;
        Ok(result)
    }

    /// Re-run provisioning after a failure or cancellation.
    ///
    /// Reuses the previous configuration unless a new one is supplied;
    /// optionally rolls back the partial disk first.
    pub async fn retry(
        &self,
        config: Option<SetupConfig>,
        perform_rollback: bool,
    ) -> Result<ProvisioningResult> {
        {
            let inner = self.lock();
            if !matches!(
                inner.state.phase,
                ProvisioningPhase::Failed | ProvisioningPhase::Cancelled
            ) {
                return Err(ProvisioningError::InvalidTransition {
                    from: inner.state.phase,
                    to: ProvisioningPhase::ValidatingIso,
                });
            }
        }

        let config = match config {
            Some(config) => config,
            None => self
                .lock()
                .context
                .as_ref()
                .map(|c| c.config.clone())
                .ok_or_else(|| ProvisioningError::ConfigInvalid {
                    reason: "no previous configuration to retry with".to_string(),
                })?,
        };

        if perform_rollback {
            self.rollback().await?;
        } else {
            self.transition(ProvisioningPhase::Idle, "Idle")?;
        }

        self.start_provisioning(config).await
    }

    async fn run_phases(&self, config: &SetupConfig) -> Result<()> {
        // Phase 1: validate (entered by start_provisioning).
        config.validate()?;
        let validation = self.validator.validate(&config.iso_path).await?;
        if !validation.is_usable {
            return Err(ProvisioningError::IsoArchitectureUnsupported {
                architecture: validation.architecture.clone(),
            });
        }
        self.with_context(|ctx| ctx.iso_validation = Some(validation));
        self.set_phase_progress(1.0, "ISO validated");
        self.check_cancelled()?;

        // Phase 2: disk.
        self.transition(ProvisioningPhase::CreatingDisk, "Creating disk image")?;
        let disk = disk::create_disk_image(&config.disk_image_path, config.disk_size_gb).await?;
        self.with_context(|ctx| ctx.disk_result = Some(disk));
        self.set_phase_progress(1.0, "Disk image created");
        self.check_cancelled()?;

        // Phase 3: Windows setup inside the installer VM.
        self.transition(ProvisioningPhase::InstallingWindows, "Installing Windows")?;
        let spec = InstallerVmSpec::from_config(config);
        self.vm.start_installer(&spec).await?;
        self.set_phase_progress(0.05, "Windows installer booted");
        tokio::select! {
            result = self.vm.wait_for_install_complete() => result?,
            error = self.poll_cancellation() => return Err(error),
        }
        self.set_phase_progress(1.0, "Windows installed");

        // Phase 4: guest-driven post-install.
        self.transition(ProvisioningPhase::PostInstallProvisioning, "Provisioning Windows")?;
        self.vm.start_provisioned().await?;
        self.run_post_install().await?;
        self.set_phase_progress(1.0, "Guest provisioning finished");
        self.check_cancelled()?;

        // Phase 5: golden snapshot of the provisioned disk.
        self.transition(ProvisioningPhase::CreatingSnapshot, "Creating golden snapshot")?;
        self.vm.stop().await?;
        self.vm.create_snapshot(GOLDEN_SNAPSHOT_NAME).await?;
        self.set_phase_progress(1.0, "Golden snapshot created");

        self.transition(ProvisioningPhase::Complete, "Provisioning complete")?;
        Ok(())
    }

    /// Post-install wait with its three watchdogs.
    async fn run_post_install(&self) -> Result<()> {
        let source = {
            #[allow(clippy::expect_used)]
            let mut slot = self.guest_events.lock().expect("guest event lock poisoned");
            slot.take()
        };
        let mut source =
            source.unwrap_or_else(|| Box::new(ScriptedEventSource::simulated()));

        tokio::select! {
            result = self.process_guest_events(source.as_mut()) => result,
            () = self.env.sleep(self.config.post_install_timeout) => {
                tracing::error!(
                    timeout_secs = self.config.post_install_timeout.as_secs(),
                    "guest provisioning watchdog timeout"
                );
                Err(ProvisioningError::Timeout)
            },
            error = self.poll_cancellation() => Err(error),
        }
    }

    async fn process_guest_events(&self, source: &mut dyn GuestEventSource) -> Result<()> {
        loop {
            match source.next_event().await {
                Some(GuestEvent::Progress(progress)) => {
                    let phase_progress = phase::guest_progress(progress.phase, progress.percent);
                    self.set_phase_progress(phase_progress, &progress.message);
                },
                Some(GuestEvent::Error(error)) if error.is_recoverable => {
                    tracing::warn!(
                        phase = ?error.phase,
                        code = error.error_code,
                        message = %error.message,
                        "recoverable guest provisioning error"
                    );
                },
                Some(GuestEvent::Error(error)) => {
                    return Err(ProvisioningError::GuestProvisioningFailed {
                        code: error.error_code,
                        message: error.message,
                    });
                },
                Some(GuestEvent::Complete(complete)) if complete.success => {
                    self.with_context(|ctx| {
                        ctx.windows_version = complete.windows_version.clone();
                        ctx.agent_version = complete.agent_version.clone();
                        ctx.disk_usage_bytes = complete.disk_usage_mb * 1024 * 1024;
                    });
                    return Ok(());
                },
                Some(GuestEvent::Complete(complete)) => {
                    return Err(ProvisioningError::GuestProvisioningFailed {
                        code: 0,
                        message: complete
                            .error_message
                            .unwrap_or_else(|| "guest reported failure".to_string()),
                    });
                },
                None => {
                    return Err(ProvisioningError::InternalError {
                        message: "guest event stream ended before completion".to_string(),
                    });
                },
            }
        }
    }

    /// Resolves only when cancellation is requested.
    async fn poll_cancellation(&self) -> ProvisioningError {
        loop {
            self.env.sleep(self.config.cancel_poll_interval).await;
            if self.cancel_requested.load(Ordering::SeqCst) {
                return ProvisioningError::Cancelled;
            }
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel_requested.load(Ordering::SeqCst) {
            Err(ProvisioningError::Cancelled)
        } else {
            Ok(())
        }
    }

    async fn abort(&self, terminal: ProvisioningPhase, error: &ProvisioningError) {
        let state = {
            let mut inner = self.lock();
            let from = inner.state.phase;
            debug_assert!(is_valid_transition(from, terminal), "{from:?} -> {terminal:?}");
            inner.failed_phase = Some(from);
            inner.state.phase = terminal;
            inner.state.message = error.to_string();
            inner.state.error = Some(error.to_string());
            inner.last_error = Some(error.clone());
            inner.state.clone()
        };
        tracing::warn!(terminal = ?terminal, error = %error, "provisioning aborted");

        // Best effort: never leave a half-installed VM running.
        if let Err(e) = self.vm.stop().await {
            tracing::debug!(error = %e, "VM stop after abort failed");
        }

        self.delegate.provisioning_state_did_change(&state);
    }

    fn transition(&self, to: ProvisioningPhase, message: &str) -> Result<()> {
        let state = {
            let mut inner = self.lock();
            let from = inner.state.phase;
            if !is_valid_transition(from, to) {
                return Err(ProvisioningError::InvalidTransition { from, to });
            }
            inner.state.phase = to;
            inner.state.phase_progress = 0.0;
            inner.state.message = message.to_string();
            inner.state.clone()
        };

        tracing::info!(phase = ?to, "provisioning phase entered");
        self.delegate.provisioning_state_did_change(&state);
        if to.is_active() || to == ProvisioningPhase::Complete {
            self.delegate.provisioning_progress(overall_progress(to, 0.0), message);
        }
        Ok(())
    }

    fn set_phase_progress(&self, progress: f64, message: &str) {
        let phase = {
            let mut inner = self.lock();
            inner.state.phase_progress = progress.clamp(0.0, 1.0);
            inner.state.message = message.to_string();
            inner.state.phase
        };
        self.delegate.provisioning_progress(overall_progress(phase, progress), message);
    }

    fn with_context(&self, f: impl FnOnce(&mut RunContext<E::Instant>)) {
        let mut inner = self.lock();
        if let Some(ctx) = inner.context.as_mut() {
            f(ctx);
        }
    }

    fn build_result(
        &self,
        success: bool,
        final_phase: ProvisioningPhase,
        error: Option<ProvisioningError>,
        started_at: E::Instant,
    ) -> ProvisioningResult {
        let (windows_version, agent_version, disk_usage_bytes) = {
            let inner = self.lock();
            inner.context.as_ref().map_or_else(
                || (String::new(), String::new(), 0),
                |ctx| {
                    (ctx.windows_version.clone(), ctx.agent_version.clone(), ctx.disk_usage_bytes)
                },
            )
        };

        ProvisioningResult {
            success,
            final_phase,
            duration_seconds: (self.env.now() - started_at).as_secs_f64(),
            disk_usage_bytes,
            windows_version,
            agent_version,
            error,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner<E::Instant>> {
        #[allow(clippy::expect_used)]
        self.inner.lock().expect("coordinator lock poisoned")
    }
}
