use clap::Parser;
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use surge_common::Config;
use surge_load::metrics::{spawn_metrics_server, Aggregator, MetricsExporter};
use surge_load::{LoadTest, LoadTestSettings, WsTransport};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Opens many WebSocket connections, holds them open and counts messages.
#[derive(Parser, Debug)]
#[command(name = "surge-load", version)]
struct Args {
    /// WebSocket server address (host:port) [default: localhost:8081]
    #[arg(long)]
    server: Option<String>,

    /// WebSocket server path [default: /average-price]
    #[arg(long)]
    path: Option<String>,

    /// Number of concurrent clients [default: 10000]
    #[arg(long)]
    clients: Option<usize>,

    /// Duration of the test in seconds [default: 10]
    #[arg(long)]
    duration: Option<u64>,

    /// YAML file with the full configuration; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Serve Prometheus metrics on this port while the test runs
    #[arg(long)]
    metrics_port: Option<u16>,

    /// Emit JSON log lines
    #[arg(long)]
    json_logs: bool,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if let Some(server) = &self.server {
            config.target.server = server.clone();
        }
        if let Some(path) = &self.path {
            config.target.path = path.clone();
        }
        if let Some(clients) = self.clients {
            config.load.clients = clients;
        }
        if let Some(duration) = self.duration {
            config.load.duration_secs = duration;
        }
        if let Some(port) = self.metrics_port {
            config.metrics.enabled = true;
            config.metrics.port = port;
        }
        if self.json_logs {
            config.logging.json = true;
        }
    }
}

fn init_logging(json: bool, default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config: Config = match &args.config {
        Some(path) => {
            let config_data = fs::read_to_string(path)?;
            serde_yaml::from_str(&config_data)?
        }
        None => Config::default(),
    };
    args.apply(&mut config);

    init_logging(config.logging.json, &config.logging.filter);

    let aggregator = Arc::new(Aggregator::new());
    let master_token = CancellationToken::new();

    let metrics_server = if config.metrics.enabled {
        let exporter = Arc::new(MetricsExporter::new(Arc::clone(&aggregator))?);
        let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics.port));
        let (_, handle) = spawn_metrics_server(addr, exporter, master_token.clone())?;
        Some(handle)
    } else {
        None
    };

    let settings = LoadTestSettings::from_config(&config);
    let report = LoadTest::new(WsTransport, settings)
        .with_aggregator(aggregator)
        .run()
        .await;
    report.log();

    master_token.cancel();
    if let Some(handle) = metrics_server {
        let _ = handle.await;
    }
    info!("Shutdown complete");
    Ok(())
}
