use anyhow::{Context, Result};
use clap::Parser;
use kestrel_controller::args::Args;
use kestrel_controller::{logging, Bootstrap, Collaborators};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::{Ipv4Addr, SocketAddr};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = logging::init(args.logformat, &args.loglevel) {
        eprintln!("Failed to initialize logging: {:#}", e);
        std::process::exit(1);
    }

    if let Err(e) = run(args).await {
        tracing::error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    if args.metrics_port != 0 {
        install_metrics_exporter(args.metrics_port);
    }

    let settings = args.into_settings();
    tracing::info!(
        "Replicas: {}, shard: {}",
        settings.sharding.replicas,
        settings.sharding.shard
    );

    Bootstrap::new(settings, Collaborators::production())
        .run(shutdown_signal())
        .await
        .context("Application controller failed")?;

    Ok(())
}

fn install_metrics_exporter(port: u16) {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!("Serving metrics on {}", addr),
        Err(e) => tracing::warn!("Failed to start metrics exporter on {}: {}", addr, e),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
