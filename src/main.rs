mod batch;
mod calibration;
mod config;
mod error;
mod experiment;
mod logging;
mod node;
mod scheduler;
mod stats;
mod topology;
mod traffic;

use tracing::info;

use batch::run_batch;
use config::AppConfig;

fn main() -> anyhow::Result<()> {
    logging::init();
    info!("... CDoS simulator is started ...");

    let config = AppConfig::load()?;
    let outputs = run_batch(&config.batch, &config.defaults)?;

    for output in &outputs {
        info!(dir = %output.dir.display(), "statistics stored");
    }
    Ok(())
}
