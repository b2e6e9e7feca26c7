//! Entry point: loads configuration, starts the device supervisor and
//! the metrics exporter, and waits for a shutdown signal.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use storm_control_ebpf::ProgramHandle;
use storm_control_observability::{exporter, logging, StormControlCollector};
use storm_control_watcher::Supervisor;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser)]
#[command(name = "storm-control")]
#[command(about = "Broadcast/multicast storm control over XDP", long_about = None)]
struct Cli {
    /// Path to the YAML configuration file. Defaults plus environment
    /// overrides are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to the compiled XDP object file.
    #[arg(long, default_value = "/usr/lib/storm-control/xdp_kernel.o")]
    bpf_object: PathBuf,

    /// Address the Prometheus exporter listens on.
    #[arg(long, default_value = "0.0.0.0:9090")]
    metrics_addr: SocketAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = storm_control_config::read_config(cli.config.as_deref())
        .context("reading configuration")?;
    logging::init(&config.logger).context("initializing logging")?;

    if !config.watcher.block_enabled {
        tracing::warn!("block action disabled in configuration");
    }

    let program = Arc::new(ProgramHandle::load(&cli.bpf_object).context("loading xdp program")?);
    let supervisor = Arc::new(
        Supervisor::new(config.watcher, Arc::clone(&program)).context("constructing device supervisor")?,
    );

    let collector = StormControlCollector::new(Arc::clone(&program), supervisor.interface_table())
        .context("constructing metrics collector")?;
    let registry = prometheus::Registry::new();
    registry.register(Box::new(collector)).context("registering metrics collector")?;

    let exporter_cancel = CancellationToken::new();
    let exporter_handle = tokio::spawn(exporter::serve(cli.metrics_addr, registry, exporter_cancel.clone()));

    let supervisor_handle = {
        let supervisor = Arc::clone(&supervisor);
        tokio::spawn(async move { supervisor.start().await })
    };

    wait_for_shutdown_signal().await;
    info!("shutdown signal received");

    supervisor.stop().await;
    exporter_cancel.cancel();

    let _ = supervisor_handle.await;
    match exporter_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "exporter shut down with an error"),
        Err(e) => tracing::warn!(error = %e, "exporter task panicked"),
    }

    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt()).expect("installing SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("installing SIGTERM handler");

    tokio::select! {
        _ = sigint.recv() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
