//! Docker/Podman command-line runtime.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, info};

use super::{ContainerRef, ContainerRuntime, IdentityFilter, LaunchFlags};
use crate::cmd::Cmd;

/// Container runtime binary to drive
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    /// Docker (default)
    #[default]
    Docker,
    /// Podman
    Podman,
}

impl RuntimeKind {
    pub fn binary(&self) -> &'static str {
        match self {
            RuntimeKind::Docker => "docker",
            RuntimeKind::Podman => "podman",
        }
    }
}

/// [`ContainerRuntime`] that shells out to `docker` or `podman`.
#[derive(Debug, Clone)]
pub struct DockerCli {
    kind: RuntimeKind,
    program: PathBuf,
}

impl DockerCli {
    /// Locate the runtime binary on `PATH`.
    pub fn detect(kind: RuntimeKind) -> Result<Self> {
        let program = which::which(kind.binary()).with_context(|| {
            format!(
                "Container runtime '{}' not found in PATH",
                kind.binary()
            )
        })?;
        debug!(runtime = kind.binary(), program = %program.display(), "runtime:detected");
        Ok(Self { kind, program })
    }

    fn cmd(&self) -> Cmd {
        Cmd::new(&self.program)
    }
}

impl ContainerRuntime for DockerCli {
    fn name(&self) -> &str {
        self.kind.binary()
    }

    fn list(&self, filter: &IdentityFilter) -> Result<Vec<ContainerRef>> {
        let stdout = self
            .cmd()
            .args(list_args(filter))
            .run_and_capture_stdout()
            .with_context(|| format!("Failed to list containers matching {}", filter))?;
        let found = parse_ps_output(&stdout);
        debug!(filter = %filter, count = found.len(), "runtime:list");
        Ok(found)
    }

    fn remove(&self, targets: &[ContainerRef], force: bool) -> Result<()> {
        if targets.is_empty() {
            return Ok(());
        }
        let mut args = vec!["rm".to_string()];
        if force {
            args.push("--force".to_string());
        }
        args.extend(targets.iter().map(|c| c.id.clone()));

        self.cmd().args(args).run().with_context(|| {
            let ids: Vec<String> = targets.iter().map(ToString::to_string).collect();
            format!("Failed to remove container(s): {}", ids.join(", "))
        })?;
        info!(count = targets.len(), "runtime:removed containers");
        Ok(())
    }

    fn run(&self, flags: &LaunchFlags) -> Result<ContainerRef> {
        let args = run_args(flags)?;
        let id = self
            .cmd()
            .args(args)
            .run_and_capture_stdout()
            .with_context(|| format!("Failed to start container from image {}", flags.image))?;
        let container = ContainerRef::new(id, flags.name.clone());
        info!(container = %container, image = %flags.image, "runtime:started container");
        Ok(container)
    }

    fn execute(&self, container: &ContainerRef, argv: &[String]) -> Result<String> {
        debug!(container = %container, argv = ?argv, "runtime:exec");
        self.cmd()
            .arg("exec")
            .arg(container.id.as_str())
            .args(argv.iter().cloned())
            .run_and_capture_output()
    }
}

/// Arguments for listing every container (running or not) matching `filter`.
///
/// Name filters are anchored; the runtime otherwise matches substrings.
fn list_args(filter: &IdentityFilter) -> Vec<String> {
    let mut args = vec![
        "ps".to_string(),
        "--all".to_string(),
        "--no-trunc".to_string(),
        "--format".to_string(),
        "{{.ID}}\t{{.Names}}".to_string(),
    ];
    for (key, value) in filter.iter() {
        args.push("--filter".to_string());
        if key == "name" {
            args.push(format!("name=^/?{}$", regex::escape(value)));
        } else {
            args.push(format!("{}={}", key, value));
        }
    }
    args
}

fn parse_ps_output(stdout: &str) -> Vec<ContainerRef> {
    stdout
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|line| {
            let (id, names) = line.split_once('\t').unwrap_or((line, ""));
            let name = names
                .split(',')
                .map(|n| n.trim().trim_start_matches('/'))
                .find(|n| !n.is_empty())
                .map(str::to_string);
            ContainerRef::new(id.trim(), name)
        })
        .collect()
}

fn run_args(flags: &LaunchFlags) -> Result<Vec<String>> {
    let mut args = vec!["run".to_string(), "--detach".to_string()];

    if let Some(name) = &flags.name {
        args.push("--name".to_string());
        args.push(name.clone());
    }
    for volume in &flags.volumes {
        args.push("--volume".to_string());
        args.push(volume.to_arg());
    }
    args.extend(flags.extra_args()?);

    args.push(flags.image.clone());
    args.extend(flags.command.iter().cloned());
    Ok(args)
}
