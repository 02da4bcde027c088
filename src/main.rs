use anyhow::Result;
use tracing::{error, info};

use container_remote::{cli, logger};

fn main() -> Result<()> {
    logger::init()?;
    info!(args = ?std::env::args().collect::<Vec<_>>(), "container-remote start");

    match cli::run() {
        Ok(result) => {
            info!("container-remote finished successfully");
            Ok(result)
        }
        Err(err) => {
            error!(error = ?err, "container-remote failed");
            Err(err)
        }
    }
}
