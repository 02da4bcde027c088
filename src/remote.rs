//! Remote execution environment: a staged mount space bound into a
//! container, plus a relay that runs shell commands inside it.

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use anyhow::{Context, Result, bail};
use regex::Regex;
use tracing::{info, warn};

use crate::container::{ContainerHandle, RerunPolicy};
use crate::mount::MountSpace;
use crate::runtime::{ContainerRuntime, LaunchFlags, Volume};

/// Mount point of the staging root inside the container unless configured.
pub const DEFAULT_REMOTE_ROOT: &str = "/remote_root";

const SHELL: &str = "/bin/bash";
const SHELL_FLAG: &str = "-c";

/// A line that is already an explicit `/bin/bash -c "..."` invocation.
static EXPLICIT_SHELL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*/bin/bash\s+-c\s+["'](.*?)["']"#).expect("valid shell pattern")
});

/// A command to relay into the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCommand {
    /// A single shell line.
    Line(String),
    /// Pre-split tokens.
    Argv(Vec<String>),
}

impl From<&str> for RemoteCommand {
    fn from(line: &str) -> Self {
        RemoteCommand::Line(line.to_string())
    }
}

impl From<String> for RemoteCommand {
    fn from(line: String) -> Self {
        RemoteCommand::Line(line)
    }
}

impl From<Vec<String>> for RemoteCommand {
    fn from(argv: Vec<String>) -> Self {
        RemoteCommand::Argv(argv)
    }
}

impl From<&[&str]> for RemoteCommand {
    fn from(argv: &[&str]) -> Self {
        RemoteCommand::Argv(argv.iter().map(|s| s.to_string()).collect())
    }
}

/// Rewrite `cmd` into an argument vector that starts with `/bin/bash -c`.
///
/// A line that is not already an explicit bash invocation is wrapped as
/// `/bin/bash -c "<line>"`, and the line is then split with shell quoting
/// rules, so escapes inside double quotes (`\$`, `\"`) are resolved here.
/// Token lists get `/bin/bash -c` prepended unless they already start with
/// it.
pub fn normalize_command(cmd: impl Into<RemoteCommand>) -> Result<Vec<String>> {
    match cmd.into() {
        RemoteCommand::Line(line) => {
            let full = if EXPLICIT_SHELL.is_match(&line) {
                line
            } else {
                format!("{SHELL} {SHELL_FLAG} \"{line}\"")
            };
            shlex::split(&full).with_context(|| format!("Failed to tokenize command: {}", full))
        }
        RemoteCommand::Argv(argv) => {
            if argv.is_empty() {
                bail!("Cannot run an empty command");
            }
            let explicit = argv.len() >= 2
                && argv[0].trim() == SHELL
                && argv[1].trim() == SHELL_FLAG;
            if explicit {
                Ok(argv)
            } else {
                let mut full = Vec::with_capacity(argv.len() + 2);
                full.push(SHELL.to_string());
                full.push(SHELL_FLAG.to_string());
                full.extend(argv);
                Ok(full)
            }
        }
    }
}

/// Derive a staging-space name from an image reference: the repository
/// part without tag or digest, with `/` and `:` flattened so it stays one
/// path component and a valid `--volume` source.
pub fn staging_name_for_image(image: &str) -> String {
    let without_digest = image.split('@').next().unwrap_or(image);
    let repository = match without_digest.rfind(':') {
        Some(colon) if !without_digest[colon..].contains('/') => &without_digest[..colon],
        _ => without_digest,
    };
    repository.replace(['/', ':'], "-")
}

/// Inputs for [`RemoteEnv::new`].
#[derive(Debug, Clone, Default)]
pub struct RemoteEnvOptions {
    /// Container name, image, extra volumes and runtime flags.
    pub flags: LaunchFlags,
    /// Host paths to stage; may be empty.
    pub mounts: Vec<PathBuf>,
    /// Where the staging root appears in the container.
    pub remote_root: Option<PathBuf>,
    /// Parent directory for the staging root; `/tmp` when unset.
    pub staging_parent: Option<PathBuf>,
    pub policy: RerunPolicy,
}

/// Outcome of [`RemoteEnv::teardown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TeardownReport {
    pub container_removed: bool,
    pub staging_removed: bool,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.container_removed && self.staging_removed
    }
}

pub struct RemoteEnv {
    mount_space: MountSpace,
    container: ContainerHandle,
    remote_root: PathBuf,
    remote_cwd: PathBuf,
}

impl RemoteEnv {
    /// Stage every mount, then start the container with the staging root
    /// bound at the remote root.
    ///
    /// Any failure tears down what was created so far; the staging root is
    /// removed when the mount space is dropped.
    pub fn new(runtime: Arc<dyn ContainerRuntime>, options: RemoteEnvOptions) -> Result<Self> {
        let RemoteEnvOptions {
            mut flags,
            mounts,
            remote_root,
            staging_parent,
            policy,
        } = options;
        if flags.image.is_empty() {
            bail!("No image configured for the remote environment");
        }
        let remote_root = remote_root.unwrap_or_else(|| PathBuf::from(DEFAULT_REMOTE_ROOT));

        let name = staging_name_for_image(&flags.image);
        let mut mount_space = match &staging_parent {
            Some(parent) => MountSpace::with_parent(parent, Some(&name), true),
            None => MountSpace::new(Some(&name), true),
        };
        mount_space.lock()?;
        mount_space.init_staging()?;
        for mount in &mounts {
            mount_space.add(mount)?;
        }
        info!(
            staging_root = %mount_space.staging_root().display(),
            mounts = mount_space.mounted().len(),
            "remote:staging ready"
        );

        flags.volumes.push(Volume::bind(
            mount_space.staging_root(),
            remote_root.clone(),
        ));
        let container = ContainerHandle::launch(runtime, flags, policy)?;
        if container.is_reused() {
            warn!(
                staging_root = %mount_space.staging_root().display(),
                remote_root = %remote_root.display(),
                "remote:reused container does not see this run's staged mounts"
            );
        }

        Ok(Self {
            mount_space,
            container,
            remote_cwd: remote_root.clone(),
            remote_root,
        })
    }

    pub fn remote_root(&self) -> &Path {
        &self.remote_root
    }

    pub fn staging_root(&self) -> &Path {
        self.mount_space.staging_root()
    }

    pub fn mount_space(&self) -> &MountSpace {
        &self.mount_space
    }

    pub fn container(&self) -> &ContainerHandle {
        &self.container
    }

    /// Record the logical working directory inside the container.
    ///
    /// Commands are not run from it yet.
    pub fn set_remote_cwd(&mut self, cwd: impl Into<PathBuf>) {
        self.remote_cwd = cwd.into();
    }

    pub fn remote_cwd(&self) -> &Path {
        &self.remote_cwd
    }

    /// Run `cmd` in the container through `/bin/bash -c` and return its
    /// output. Execution errors are passed through unchanged.
    pub fn remote(&self, cmd: impl Into<RemoteCommand>) -> Result<String> {
        let argv = normalize_command(cmd)?;
        self.container.execute(&argv)
    }

    /// Remove the container, then the staging root. The staging root is
    /// removed even when the container could not be.
    pub fn teardown(&mut self) -> TeardownReport {
        let container_removed = self.container.remove();
        let staging_removed = match self.mount_space.remove_staging() {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "remote:failed to remove staging");
                false
            }
        };
        self.mount_space.unlock();
        info!(container_removed, staging_removed, "remote:teardown");
        TeardownReport {
            container_removed,
            staging_removed,
        }
    }
}
