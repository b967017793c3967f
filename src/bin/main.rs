//! skydns-sync binary entry point.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use skydns_sync::{telemetry, Config, DockerEventSource, EtcdRegistry, SyncEngine};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Sync Docker container DNS intents into a SkyDNS/CoreDNS etcd registry.
#[derive(Parser, Debug)]
#[command(name = "skydns-sync")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML).
    #[arg(short, long, default_value = "skydns-sync.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = telemetry::init(&config.log) {
        eprintln!("telemetry error: {err}");
        return ExitCode::FAILURE;
    }

    info!(
        config_file = %args.config.display(),
        hostname = %config.app.hostname,
        label_prefix = %config.app.docker_label_prefix,
        etcd_prefix = %config.etcd.path_prefix,
        "starting skydns-sync"
    );

    // Graceful shutdown on SIGINT/SIGTERM.
    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let registry = match EtcdRegistry::connect(&config.etcd, config.app.hostname.clone()).await {
        Ok(registry) => registry,
        Err(err) => {
            error!(error = %err, "failed to connect to etcd");
            return ExitCode::FAILURE;
        }
    };

    let engine = SyncEngine::new(config.app, registry, DockerEventSource::new());
    match engine.run(cancel).await {
        Ok(()) => {
            info!("skydns-sync shutdown complete");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(error = %err, "sync engine failed");
            ExitCode::FAILURE
        }
    }
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
            _ = sigterm.recv() => info!("received SIGTERM"),
        }
        cancel.cancel();
    });
}
