//! LeafScan
//!
//! Offline plant disease detection from leaf photographs.

use anyhow::Result;
use clap::Parser;
use leafscan_cli::cli::Cli;
use leafscan_cli::commands;
use metrics_exporter_prometheus::PrometheusHandle;
use tracing::{debug, info};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    init_tracing(cli.verbose);

    let config = cli.load_config()?;
    debug!("Configuration loaded: {:?}", config);

    let metrics_handle = if cli.metrics { Some(init_metrics()?) } else { None };

    let result = commands::run(cli.command, &config, cli.json).await;

    if let Some(handle) = metrics_handle {
        println!("{}", handle.render());
    }

    result
}

/// Initialize tracing/logging
fn init_tracing(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("leafscan=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("leafscan=info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Initialize metrics recorder and return handle for rendering
fn init_metrics() -> Result<PrometheusHandle> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install metrics: {}", e))?;

    metrics::describe_counter!(
        "leafscan_model_loads_total",
        "Model loads by path (warm, cold, failed)"
    );
    metrics::describe_counter!("leafscan_model_reloads_total", "Forced model reloads");
    metrics::describe_counter!(
        "leafscan_classifications_total",
        "Classifications by outcome"
    );
    metrics::describe_histogram!(
        "leafscan_inference_latency_us",
        metrics::Unit::Microseconds,
        "Classification latency in microseconds"
    );

    info!("Metrics recorder initialized");
    Ok(handle)
}
