use crate::config::Config;
use crate::error::Result;
use crate::Platform;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Ingress controller: builds the platform, starts the background workers
/// and serves the gateway.
pub async fn start(host: &str, port: u16, data_dir: PathBuf) -> Result<()> {
    let config = Config {
        host: host.to_string(),
        port,
        data_dir,
        ..Config::from_env()
    };
    let addr = format!("{}:{}", config.host, config.port);
    let platform = Arc::new(Platform::with_config(config)?);

    platform.start_workers();
    let app = super::create_router(platform.clone());

    info!("alertplane starting on http://{}", addr);
    info!("─────────────────────────────────────────");
    info!("  ✓ Webhook ingress (signed alerts)");
    info!("  ✓ Incident deduplication");
    info!("  ✓ Escalation scheduler");
    info!("  ✓ Workflow engine");
    info!("  ✓ Runbooks");
    info!("  ✓ Audit log");
    info!("─────────────────────────────────────────");
    info!("Data directory: {}", platform.config.data_dir.display());
    info!("Ready for connections");

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
