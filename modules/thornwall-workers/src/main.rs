use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use thornwall_common::Config;
use thornwall_workers::app::{App, WorkerKind};
use thornwall_workers::harness;
use thornwall_workers::progress::{Bar, Renderer};

#[derive(Parser)]
#[command(name = "worker", about = "Start the thornwall worker")]
struct Cli {
    /// Number of worker instances to start.
    #[arg(short = 'w', long = "workers", default_value_t = 1, global = true)]
    workers: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start friend network workers.
    Friend,
    /// Start group member workers.
    Group,
    /// Start maintenance workers.
    Maintenance,
    /// Start the statistics worker.
    Stats,
    /// Start queue process workers.
    Queue,
    /// Start the sync worker.
    Sync,
    /// Start the reason update worker (always single-instance).
    Reason,
}

impl Command {
    fn kind(&self) -> WorkerKind {
        match self {
            Self::Friend => WorkerKind::Friend,
            Self::Group => WorkerKind::Group,
            Self::Maintenance => WorkerKind::Maintenance,
            Self::Stats => WorkerKind::Stats,
            Self::Queue => WorkerKind::Queue,
            Self::Sync => WorkerKind::Sync,
            Self::Reason => WorkerKind::Reason,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let kind = cli.command.kind();
    let count = if kind.single_instance() { 1 } else { cli.workers.max(1) };

    let config = Config::from_env()?;
    let startup_delay = config.worker.startup_delay;
    let app = Arc::new(App::initialize(config).await?);

    // Root cancellation: first SIGINT/SIGTERM stops every instance.
    let ctx = CancellationToken::new();
    spawn_signal_handler(ctx.clone());

    let bars: Vec<Bar> = (0..count).map(|i| Bar::new(format!("Worker {i}"))).collect();
    Renderer::new(bars.clone()).spawn(&ctx);

    info!(worker_kind = kind.as_str(), count, "Starting workers");

    let factory = {
        let app = app.clone();
        let bars = bars.clone();
        move |instance: usize| app.make_worker(kind, instance, bars[instance].clone())
    };
    harness::run_workers(kind.as_str(), count, startup_delay, ctx, factory).await;

    info!("All workers stopped");
    Ok(())
}

fn spawn_signal_handler(ctx: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut terminate = match tokio::signal::unix::signal(
                tokio::signal::unix::SignalKind::terminate(),
            ) {
                Ok(signal) => signal,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to install SIGTERM handler");
                    let _ = ctrl_c.await;
                    ctx.cancel();
                    return;
                }
            };

            tokio::select! {
                _ = ctrl_c => {}
                _ = terminate.recv() => {}
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }

        info!("Shutdown signal received");
        ctx.cancel();
    });
}
