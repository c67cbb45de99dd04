use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use tokio::net::TcpListener;
use tracing::{info, warn};

use runplane_kernel::metrics::register_metrics;
use runplane_kernel::{build_router, ControlPlane, ServeHealth, ServeState};

use super::context::CliContext;

#[derive(Args, Clone)]
pub struct ServeArgs {
    /// Address to bind (defaults to `server.host`)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind (defaults to `server.port`)
    #[arg(long)]
    pub port: Option<u16>,

    /// Seconds between maintenance passes (finished-run pruning, token sweeps)
    #[arg(long, default_value_t = 60)]
    pub maintenance_interval: u64,
}

pub async fn cmd_serve(args: ServeArgs, ctx: &CliContext) -> Result<()> {
    let mut config = ctx.config().clone();
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    let host = config.server.host.clone();
    let port = config.server.port;

    register_metrics();
    let plane = Arc::new(
        ControlPlane::builder(config)
            .build()
            .context("failed to assemble control plane")?,
    );
    let health = Arc::new(ServeHealth::new());
    health.mark_live();
    if plane.worker().is_enabled() && plane.config().worker.base_url.is_none() {
        warn!("browser automation enabled without a worker url; browser routes will fail");
        health.mark_unready("worker url is not configured");
    } else {
        health.mark_ready();
    }

    let maintenance =
        plane.spawn_maintenance(Duration::from_secs(args.maintenance_interval.max(1)));
    let router = build_router(ServeState::with_health(Arc::clone(&plane), health));

    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .with_context(|| format!("invalid bind address {host}:{port}"))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind control plane on {addr}"))?;
    info!(
        %addr,
        automation = plane.worker().is_enabled(),
        config = ?ctx.config_path(),
        "runplane control plane listening"
    );

    let served = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;

    maintenance.abort();
    plane.shutdown();
    served.context("control plane server exited unexpectedly")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(?err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
