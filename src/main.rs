use cdc_sync::source::SourceHub;
use cdc_sync::target::MemoryTarget;
use cdc_sync::{ControlPlane, EngineConfig, Error, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(name = "cdc-syncd")]
#[command(about = "Heterogeneous CDC replication engine", long_about = None)]
struct Args {
    #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
    config: PathBuf,

    #[arg(short, long, help = "Enable JSON output for logs")]
    json_logs: bool,

    #[arg(short, long, help = "Verbose logging")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.json_logs, args.verbose);

    info!("Starting cdc-syncd");
    info!("Loading configuration from {:?}", args.config);

    let config = match EngineConfig::from_file(&args.config) {
        Ok(cfg) => {
            info!("Configuration loaded successfully");
            cfg
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(Error::Config(e.to_string()));
        }
    };

    info!(
        metadata_dir = ?config.metadata_dir,
        batch_max_events = config.batch.max_events,
        batch_max_delay_ms = config.batch.max_delay_ms,
        "Configuration summary"
    );

    let target = Arc::new(MemoryTarget::new());
    let hub = SourceHub::new();
    let control = ControlPlane::open(config, target, hub).await?;

    info!("Control plane ready, waiting for commands");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping connectors");
    control.shutdown().await;

    Ok(())
}

fn init_logging(json: bool, verbose: bool) {
    let env_filter = if verbose {
        EnvFilter::new("cdc_sync=debug,info")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("cdc_sync=info,warn"))
    };

    let fmt_layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_span_list(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
