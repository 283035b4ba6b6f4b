//! Price feed runner
//!
//! Runs one derivation cycle and prints the decisions as JSON

use tracing::{error, info};

use pricefeed_node::{logging, run_cycle, NodeSettings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = NodeSettings::load()?;
    logging::init(settings.log_json);

    info!("Starting price feed v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Feed config {}, chain snapshot {}, state in {}",
        settings.config_path.display(),
        settings.chain_snapshot_path.display(),
        settings.state_dir.display()
    );

    let output = match run_cycle(&settings).await {
        Ok(output) => output,
        Err(e) => {
            error!("Derivation cycle failed: {:#}", e);
            return Err(e);
        }
    };

    for (symbol, verdict) in &output.plans {
        info!("{}: {}", symbol, verdict);
    }
    for (symbol, reason) in &output.report.skipped {
        info!("{}: skipped ({})", symbol, reason);
    }

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
