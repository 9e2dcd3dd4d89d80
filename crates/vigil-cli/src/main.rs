//! Vigil daemon entry point.
//!
//! Loads the layered configuration, boots the orchestrator with the
//! built-in factories, and runs until SIGINT/SIGTERM triggers the
//! staged shutdown.
//!
//! # Exit Codes
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0 | clean shutdown |
//! | 1 | boot failure (factory, bus) |
//! | 2 | invalid configuration or missing secrets |

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use vigil_bus::{Bus, BusSettings};
use vigil_runtime::{
    default_config_dir, ConfigLoader, ConfigService, FactoryRegistry, Orchestrator,
};

#[derive(Parser, Debug)]
#[command(name = "vigil", about = "Event-driven surveillance platform core")]
struct Args {
    /// Configuration directory holding config.toml, secrets.toml, and
    /// the snapshot history. Defaults to `~/.vigil`.
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// Environment overlay to apply (config.<env>.toml).
    #[arg(long)]
    environment: Option<String>,

    /// Default log filter when RUST_LOG is not set.
    #[arg(long, default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(args.log.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config_dir = args.config_dir.clone().unwrap_or_else(default_config_dir);
    let mut loader = ConfigLoader::new(&config_dir);
    if let Some(environment) = &args.environment {
        loader = loader.with_environment(environment.clone());
    }

    let config = match ConfigService::load(loader) {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "configuration rejected; refusing to boot");
            return ExitCode::from(2);
        }
    };

    let bus = Bus::new(BusSettings::default());
    let registry = FactoryRegistry::with_builtins(&bus);
    let mut orchestrator = Orchestrator::new(bus.clone(), config, registry);

    if let Err(err) = orchestrator.boot().await {
        error!(error = %err, "boot failed");
        bus.shutdown().await;
        return ExitCode::from(1);
    }

    let handle = orchestrator.handle();
    tokio::spawn(async move {
        wait_for_stop_signal().await;
        info!("stop signal received; beginning staged shutdown");
        handle.stop();
    });

    orchestrator.run().await;
    bus.shutdown().await;
    info!("vigil stopped");
    ExitCode::SUCCESS
}

#[cfg(unix)]
async fn wait_for_stop_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_stop_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
