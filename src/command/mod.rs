pub mod exec;
pub mod shell;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tracing::warn;

use crate::config::Config;
use crate::remote::{RemoteEnv, TeardownReport};
use crate::runtime::DockerCli;
use crate::spinner::with_spinner;

/// Load config, stage mounts and start the container.
pub fn start_env(config_path: Option<&Path>, reuse: bool) -> Result<RemoteEnv> {
    let config = Config::load(config_path)?;
    let runtime = DockerCli::detect(config.docker.runtime())?;
    let options = config.env_options(reuse)?;

    let msg = format!(
        "Starting {} with {} mount(s)",
        options.flags.image,
        options.mounts.len()
    );
    let env = with_spinner(&msg, || RemoteEnv::new(Arc::new(runtime), options))?;

    if let Some(container) = env.container().container() {
        println!(
            "Container {} ready: {} -> {} ({} staged)",
            container,
            env.staging_root().display(),
            env.remote_root().display(),
            env.mount_space().mounted().len()
        );
    }
    Ok(env)
}

/// Remove the container, then the staging directory, and tell the user
/// about anything left behind.
pub fn finish(env: &mut RemoteEnv) -> TeardownReport {
    let report = env.teardown();
    if report.is_clean() {
        println!("Docker environment and mount space cleaned up.");
        return report;
    }
    if !report.container_removed {
        warn!("teardown: container left running");
        eprintln!("Warning: the container could not be removed; remove it manually.");
    }
    if !report.staging_removed {
        warn!("teardown: staging directory left behind");
        eprintln!(
            "Warning: could not remove staging directory {}",
            env.staging_root().display()
        );
    }
    report
}
