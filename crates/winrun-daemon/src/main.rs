//! WinRun privileged daemon binary.
//!
//! # Usage
//!
//! ```bash
//! # Development: permissive auth, local sockets
//! winrun-daemon --dev --socket /tmp/winrun.sock --agent-socket /tmp/winrun-agent.sock
//!
//! # Production: signature and bundle enforcement
//! winrun-daemon --allowed-team TEAM123 --bundle-prefix com.winrun.
//! ```

mod bridge;
mod handler;
mod vmm;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::UnixListener;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use winrun_core::{Environment, SystemEnv};
use winrun_host::control::{ControlChannel, ControlChannelConfig, UnixControlTransport};
use winrun_host::router::FrameRouter;
use winrun_ipc::auth::AllowAllGroups;
use winrun_ipc::{GroupMembership, IpcServer, IpcServerConfig, NoSignatureLookup};
use winrun_provision::coordinator::CoordinatorConfig;
use winrun_provision::iso::DirectWimInspector;
use winrun_provision::{HdiutilAttacher, IsoValidator, ProvisioningCoordinator};
use winrun_shm::SharedMemoryRegion;

use crate::bridge::DaemonControlDelegate;
use crate::handler::{DaemonHandler, ProgressFan, ShellGroupMembership};

/// WinRun privileged daemon
#[derive(Parser, Debug)]
#[command(name = "winrun-daemon")]
#[command(about = "WinRun VM lifecycle and streaming daemon")]
#[command(version)]
struct Args {
    /// IPC socket path for CLI/UI clients
    #[arg(long, default_value = "/var/run/winrun/winrun.sock")]
    socket: PathBuf,

    /// Guest agent control socket (exposed by the hypervisor)
    #[arg(long, default_value = "/var/run/winrun/agent.sock")]
    agent_socket: PathBuf,

    /// External hypervisor helper binary
    #[arg(long, default_value = "winrun-vmm")]
    vmm_tool: PathBuf,

    /// Directory for generated shortcut launchers
    #[arg(long, default_value = "/var/run/winrun/launchers")]
    launchers_dir: PathBuf,

    /// Shared frame memory region size in MiB
    #[arg(long, default_value = "256")]
    shared_memory_mib: usize,

    /// Development mode: permissive auth, no signature checks
    #[arg(long)]
    dev: bool,

    /// Allowed signing team (production mode)
    #[arg(long, default_value = "")]
    allowed_team: String,

    /// Allowed bundle identifier prefix (production mode)
    #[arg(long, default_value = "com.winrun.")]
    bundle_prefix: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("WinRun daemon starting");
    let env = SystemEnv::new();

    // Frame path: region → router → (control channel delegate).
    let region = SharedMemoryRegion::allocate(args.shared_memory_mib * 1024 * 1024)?;
    let router = Arc::new(FrameRouter::new());
    router.set_shared_memory_region(region.view());

    let bridge = Arc::new(DaemonControlDelegate::new(Arc::clone(&router)));
    let channel = Arc::new(ControlChannel::new(
        Arc::new(UnixControlTransport::new(&args.agent_socket)),
        Arc::clone(&bridge) as Arc<dyn winrun_host::control::ControlDelegate>,
        ControlChannelConfig::default(),
    ));

    // Provisioning pipeline.
    let progress_fan = Arc::new(ProgressFan::default());
    let validator = IsoValidator::new(
        Arc::new(HdiutilAttacher::new()),
        Arc::new(DirectWimInspector),
    );
    let coordinator = Arc::new(ProvisioningCoordinator::new(
        env.clone(),
        Arc::new(vmm::VmmCliFacade::new(&args.vmm_tool)),
        validator,
        Arc::clone(&progress_fan) as Arc<dyn winrun_provision::coordinator::ProvisioningDelegate>,
        CoordinatorConfig::default(),
    ));

    // Keep trying the agent socket; the guest may not exist yet.
    {
        let channel = Arc::clone(&channel);
        let env = env.clone();
        tokio::spawn(async move {
            loop {
                if !channel.is_connected() {
                    if let Err(e) = channel.connect().await {
                        tracing::debug!(error = %e, "agent connect attempt failed");
                    }
                }
                env.sleep(Duration::from_secs(5)).await;
            }
        });
    }

    // IPC surface.
    let handler = Arc::new(DaemonHandler::new(
        Arc::clone(&channel),
        Arc::clone(&coordinator),
        Arc::clone(&bridge),
        Arc::clone(&progress_fan),
        args.launchers_dir.clone(),
    ));

    let (ipc_config, groups): (IpcServerConfig, Arc<dyn GroupMembership>) = if args.dev {
        tracing::warn!("development mode: IPC authentication is permissive");
        (IpcServerConfig::development(), Arc::new(AllowAllGroups))
    } else {
        if args.allowed_team.is_empty() {
            tracing::warn!("no --allowed-team given; any validly signed team is rejected");
        }
        tracing::warn!(
            "code-signature lookup is delegated to the platform integration; \
             until one is wired in, clients present as unsigned"
        );
        (
            IpcServerConfig::production(args.allowed_team.clone(), args.bundle_prefix.clone()),
            Arc::new(ShellGroupMembership),
        )
    };

    if let Some(parent) = args.socket.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let _ = tokio::fs::remove_file(&args.socket).await;
    let listener = UnixListener::bind(&args.socket)?;
    tracing::info!(socket = %args.socket.display(), "IPC surface listening");

    let server =
        IpcServer::new(env, ipc_config, groups, Arc::new(NoSignatureLookup), handler);
    server.serve(listener).await?;

    Ok(())
}
