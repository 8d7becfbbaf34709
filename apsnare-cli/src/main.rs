//! apsnare binary: wires signals, logging and exit codes around the
//! lifecycle controller.

use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use apsnare_attack::{HostPaths, LifecycleController, ProcessSupervisor, SystemRunner};
use apsnare_cli::Cli;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_args();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> apsnare_core::Result<()> {
    apsnare_attack::require_root()?;

    let config = cli.command.into_run_config()?;
    let controller = Arc::new(LifecycleController::new(
        config,
        HostPaths::default(),
        Arc::new(SystemRunner::new()),
        ProcessSupervisor::new(),
    ));

    // interruption funnels into the controller's idempotent teardown; a
    // second signal during an in-flight teardown is a no-op
    let interrupt_target = Arc::clone(&controller);
    tokio::spawn(async move {
        loop {
            if wait_for_shutdown_signal().await.is_err() {
                return;
            }
            info!("shutdown signal received");
            interrupt_target.teardown().await;
        }
    });

    controller.setup().await?;
    controller.run_loop().await;
    controller.teardown().await;
    Ok(())
}

async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = sigterm.recv() => Ok(()),
    }
}

fn init_tracing(verbose: u8) {
    let default_filter = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .init();
}
