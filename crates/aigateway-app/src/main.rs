use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use aigateway_core::config::watcher::Watcher;
use aigateway_core::metrics::Metrics;
use aigateway_core::tracing_span::{Tracer, TracerConfig};
use aigateway_core::{GatewayServer, HealthServer};
use clap::Parser;
use protos::ext_proc_v3::external_processor_server::ExternalProcessorServer;
use protos::health_v1::health_server::HealthServer as HealthServiceServer;
use tracing::info;

#[derive(Parser, Debug)]
#[command(about, long_about = None)]
struct Args {
    /// Path to the YAML config file. Absent means the built-in default config.
    #[arg(short, long, value_name = "file")]
    config: Option<PathBuf>,

    /// Address the ext_proc gRPC service listens on.
    #[arg(short, long, value_name = "addr", default_value = "0.0.0.0:50051")]
    listen: SocketAddr,

    /// OTLP collector endpoint for span export. Unset disables export.
    #[arg(long, value_name = "endpoint")]
    otlp_endpoint: Option<String>,
}

fn setup_logging() {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().json())
        .with(filter)
        .init();
}

fn main() -> anyhow::Result<()> {
    setup_logging();

    let args = Args::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(args))
}

async fn run(args: Args) -> anyhow::Result<()> {
    let Args {
        config,
        listen,
        otlp_endpoint,
    } = args;

    let (watcher, config_handle) = Watcher::start(
        config.unwrap_or_else(|| PathBuf::from("aigateway.yaml")),
        Duration::from_millis(1000),
    )?;
    let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(watcher.run(shutdown_rx));

    let metrics = Arc::new(Metrics::new());
    let tracer = Arc::new(Tracer::new(&TracerConfig { otlp_endpoint })?);

    let server = GatewayServer::new(config_handle, metrics, tracer.clone());

    info!(%listen, "starting aigateway ext_proc server");
    tonic::transport::Server::builder()
        .add_service(ExternalProcessorServer::new(server))
        .add_service(HealthServiceServer::new(HealthServer))
        .serve(listen)
        .await?;

    tracer.shutdown();
    Ok(())
}
