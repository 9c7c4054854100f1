//! CAN Link Simulator - Main Entry Point

use can_sim::{init_logging, load_config, run_simulation};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = std::env::args().nth(1);
    let config = load_config(path.as_deref())?;
    init_logging(&config.log_level, config.log_json)?;

    info!("=== CAN Link Simulator v{} ===", env!("CARGO_PKG_VERSION"));
    info!(
        "Link at {} bit/s, {} frames/s of synthetic traffic",
        config.link.baud_rate, config.traffic_hz
    );

    let report = run_simulation(config).await?;

    info!("Final report: {}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
