use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::container::RerunPolicy;
use crate::remote::RemoteEnvOptions;
use crate::runtime::{LaunchFlags, RuntimeKind, Volume};

/// Project config file names searched in the current directory, in order.
const PROJECT_CONFIG_NAMES: [&str; 3] = [
    "configs/config.yaml",
    ".container-remote.yaml",
    ".container-remote.yml",
];

/// Container settings, read from the `docker:` section
#[derive(Debug, Deserialize, Default, Clone)]
pub struct DockerConfig {
    /// Image to start the container from, e.g. "ubuntu:22.04"
    pub image: Option<String>,

    /// Container name. Also the identity used to find a container left
    /// behind by an earlier run.
    pub name: Option<String>,

    /// Container runtime binary: docker (default) or podman
    pub runtime: Option<RuntimeKind>,

    /// Where the staged mounts appear inside the container. Default: /remote_root
    pub remote_root: Option<PathBuf>,

    /// Adopt an existing container with the same name instead of replacing it.
    /// Default: false
    pub reuse_existing: Option<bool>,

    /// Extra bind mounts, each "source:destination[:mode]" or [source, destination]
    #[serde(default)]
    pub volumes: Vec<Volume>,

    /// Command the container is started with (image default if empty)
    #[serde(default)]
    pub command: Vec<String>,

    /// Any other key is passed to the runtime as a long flag (tty: true -> --tty)
    #[serde(flatten)]
    pub flags: BTreeMap<String, serde_yaml::Value>,
}

impl DockerConfig {
    pub fn runtime(&self) -> RuntimeKind {
        self.runtime.unwrap_or_default()
    }

    pub fn reuse_existing(&self) -> bool {
        self.reuse_existing.unwrap_or(false)
    }

    pub fn launch_flags(&self) -> anyhow::Result<LaunchFlags> {
        let image = self
            .image
            .as_deref()
            .filter(|i| !i.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("Config is missing 'docker.image'"))?;
        Ok(LaunchFlags {
            image: image.to_string(),
            name: self.name.clone(),
            volumes: self.volumes.clone(),
            command: self.command.clone(),
            extra: self.flags.clone(),
        })
    }
}

/// Configuration for container-remote, read from YAML
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub docker: DockerConfig,

    /// Host paths to stage and expose under the remote root
    #[serde(default)]
    pub mounts: Vec<PathBuf>,

    /// Parent directory for staging roots. Default: /tmp
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,
}

impl Config {
    /// Load from `explicit` if given, otherwise from the first config found
    /// in the current directory or `~/.config/container-remote/`.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        debug!("config:loading");
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => {
                let start_dir = std::env::current_dir().unwrap_or_default();
                let home = home::home_dir();
                find_config(&start_dir, home.as_deref()).ok_or_else(|| {
                    anyhow::anyhow!(
                        "No config found. Looked for {} in {} and {}.\n\
                         Run 'container-remote init' to create one, or pass --config.",
                        PROJECT_CONFIG_NAMES.join(", "),
                        start_dir.display(),
                        global_config_path(home.as_deref())
                            .map(|p| p.display().to_string())
                            .unwrap_or_else(|| "~/.config/container-remote".to_string()),
                    )
                })?
            }
        };

        let config = Self::load_from_path(&path)?;
        debug!(
            path = %path.display(),
            image = ?config.docker.image,
            mounts = config.mounts.len(),
            "config:loaded"
        );
        Ok(config)
    }

    fn load_from_path(path: &Path) -> anyhow::Result<Self> {
        debug!(path = %path.display(), "config:reading file");
        let contents = fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config at {}: {}", path.display(), e))?;
        Self::parse(&contents)
            .map_err(|e| anyhow::anyhow!("Failed to parse config at {}: {}", path.display(), e))
    }

    fn parse(contents: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(contents)
    }

    /// Options for building the remote environment. `reuse` forces the
    /// reuse policy on regardless of the config.
    pub fn env_options(&self, reuse: bool) -> anyhow::Result<RemoteEnvOptions> {
        let policy = if reuse || self.docker.reuse_existing() {
            RerunPolicy::ReuseExisting
        } else {
            RerunPolicy::ForceRerun
        };
        Ok(RemoteEnvOptions {
            flags: self.docker.launch_flags()?,
            mounts: self.mounts.clone(),
            remote_root: self.docker.remote_root.clone(),
            staging_parent: self.staging_dir.clone(),
            policy,
        })
    }

    /// Write an example `.container-remote.yaml` to the current directory.
    pub fn init() -> anyhow::Result<()> {
        let config_path = PathBuf::from(".container-remote.yaml");

        if config_path.exists() {
            return Err(anyhow::anyhow!(
                ".container-remote.yaml already exists. Remove it first if you want to regenerate it."
            ));
        }

        let example_config = r#"# container-remote configuration

docker:
  # Image to run. Required.
  image: ubuntu:22.04

  # Container name. A container left over from an earlier run with the same
  # name is removed and replaced, unless reuse_existing is true.
  # name: remote-env

  # Options: docker (default), podman
  # runtime: docker

  # Where the staged mounts appear inside the container.
  # Default: /remote_root
  # remote_root: /remote_root

  # reuse_existing: false

  # Extra bind mounts that are not staged.
  # volumes:
  #   - /var/cache/apt:/var/cache/apt:ro

  # Keep the container alive so commands can be relayed into it.
  tty: true
  interactive: true

  # Any other key is passed through as a runtime flag, e.g.
  # env:
  #   - LANG=C.UTF-8
  # workdir: /remote_root

# Host paths copied into the staging directory and mounted at remote_root.
# Relative paths resolve against the directory container-remote runs in.
mounts: []
#  - ./data

# Parent directory for staging directories. Default: /tmp
# staging_dir: /tmp
"#;

        fs::write(&config_path, example_config)?;
        println!("✓ Created .container-remote.yaml");
        Ok(())
    }
}

fn global_config_path(home: Option<&Path>) -> Option<PathBuf> {
    home.map(|h| h.join(".config/container-remote/config.yaml"))
}

/// First config file found in `start_dir`, then in the global config dir.
fn find_config(start_dir: &Path, home: Option<&Path>) -> Option<PathBuf> {
    PROJECT_CONFIG_NAMES
        .iter()
        .map(|name| start_dir.join(name))
        .chain(global_config_path(home))
        .find(|candidate| candidate.is_file())
        .inspect(|found| debug!(path = %found.display(), "config:found"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const FULL: &str = r#"
docker:
  image: python:3.12-slim
  name: remote-env
  runtime: podman
  remote_root: /work
  volumes:
    - [/var/cache, /cache]
  tty: true
  env:
    - LANG=C.UTF-8
mounts:
  - ./data
  - /opt/shared
staging_dir: /var/tmp
"#;

    #[test]
    fn test_parse_full_config() {
        let config = Config::parse(FULL).unwrap();

        assert_eq!(config.docker.runtime(), RuntimeKind::Podman);
        assert_eq!(config.docker.remote_root, Some(PathBuf::from("/work")));
        assert_eq!(config.mounts.len(), 2);
        assert_eq!(config.staging_dir, Some(PathBuf::from("/var/tmp")));

        let flags = config.docker.launch_flags().unwrap();
        assert_eq!(flags.image, "python:3.12-slim");
        assert_eq!(flags.name.as_deref(), Some("remote-env"));
        assert_eq!(flags.volumes, vec![Volume::bind("/var/cache", "/cache")]);
        assert_eq!(
            flags.extra.keys().collect::<Vec<_>>(),
            vec!["env", "tty"]
        );
    }

    #[test]
    fn test_missing_image_is_an_error() {
        let config = Config::parse("docker:\n  name: x\n").unwrap();
        let err = config.docker.launch_flags().unwrap_err();
        assert!(err.to_string().contains("docker.image"));
    }

    #[test]
    fn test_missing_docker_section_fails_to_parse() {
        assert!(Config::parse("mounts: []\n").is_err());
    }

    #[test]
    fn test_env_options_policy() {
        let config = Config::parse(FULL).unwrap();
        assert_eq!(
            config.env_options(false).unwrap().policy,
            RerunPolicy::ForceRerun
        );
        assert_eq!(
            config.env_options(true).unwrap().policy,
            RerunPolicy::ReuseExisting
        );

        let reuse = Config::parse("docker:\n  image: alpine\n  reuse_existing: true\n").unwrap();
        assert_eq!(
            reuse.env_options(false).unwrap().policy,
            RerunPolicy::ReuseExisting
        );
    }

    #[test]
    fn test_env_options_carry_paths() {
        let config = Config::parse(FULL).unwrap();
        let options = config.env_options(false).unwrap();

        assert_eq!(options.remote_root, Some(PathBuf::from("/work")));
        assert_eq!(options.staging_parent, Some(PathBuf::from("/var/tmp")));
        assert_eq!(options.mounts[1], PathBuf::from("/opt/shared"));
    }

    #[test]
    fn test_find_config_prefers_project_dir() {
        let project = TempDir::new().unwrap();
        let home = TempDir::new().unwrap();
        let global = home.path().join(".config/container-remote/config.yaml");
        fs::create_dir_all(global.parent().unwrap()).unwrap();
        fs::write(&global, "docker: {image: alpine}\n").unwrap();

        assert_eq!(find_config(project.path(), Some(home.path())), Some(global));

        let local = project.path().join(".container-remote.yml");
        fs::write(&local, "docker: {image: alpine}\n").unwrap();
        assert_eq!(find_config(project.path(), Some(home.path())), Some(local));

        let configs_dir = project.path().join("configs/config.yaml");
        fs::create_dir_all(configs_dir.parent().unwrap()).unwrap();
        fs::write(&configs_dir, "docker: {image: alpine}\n").unwrap();
        assert_eq!(
            find_config(project.path(), Some(home.path())),
            Some(configs_dir)
        );
    }

    #[test]
    fn test_find_config_none() {
        let project = TempDir::new().unwrap();
        assert_eq!(find_config(project.path(), None), None);
    }

    #[test]
    fn test_load_reports_parse_errors_with_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.yaml");
        fs::write(&path, "docker: [not, a, map]\n").unwrap();

        let err = Config::load(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("bad.yaml"));
    }
}
