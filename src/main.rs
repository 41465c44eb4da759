use alertplane::gateway;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(long, default_value_t = 8080, env = "ALERTPLANE_PORT")]
    port: u16,

    /// Data directory
    #[arg(long, default_value = ".alertplane", env = "ALERTPLANE_DATA_DIR")]
    data_dir: PathBuf,

    /// Host to bind to
    #[arg(long, default_value = "0.0.0.0", env = "ALERTPLANE_HOST")]
    host: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
    let args = Args::parse();

    info!("Starting alertplane on {}:{}", args.host, args.port);
    info!("Data directory: {:?}", args.data_dir);

    gateway::ingress::start(&args.host, args.port, args.data_dir).await?;

    Ok(())
}
