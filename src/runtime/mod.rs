//! Container runtime abstraction.
//!
//! The lifecycle code only needs four operations from a runtime: list by
//! filter, force-remove, run detached, and exec. [`DockerCli`] implements
//! them over the docker/podman command line.

mod docker;
#[cfg(test)]
pub mod fake;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use anyhow::{Result, bail};
use serde::Deserialize;

pub use docker::{DockerCli, RuntimeKind};

/// Trait encapsulating the container runtime operations the lifecycle needs.
pub trait ContainerRuntime: Send + Sync {
    /// Short name of the backend ("docker", "podman", ...)
    fn name(&self) -> &str;

    /// All containers, running or stopped, matching every pair of `filter`.
    fn list(&self, filter: &IdentityFilter) -> Result<Vec<ContainerRef>>;

    /// Remove `targets`. With `force`, running containers are killed first.
    fn remove(&self, targets: &[ContainerRef], force: bool) -> Result<()>;

    /// Create and start a container, returning once it is running.
    fn run(&self, flags: &LaunchFlags) -> Result<ContainerRef>;

    /// Run `argv` inside `container` and return its captured stdout.
    fn execute(&self, container: &ContainerRef, argv: &[String]) -> Result<String>;
}

/// A container known to the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRef {
    pub id: String,
    pub name: Option<String>,
}

impl ContainerRef {
    pub fn new(id: impl Into<String>, name: Option<String>) -> Self {
        Self {
            id: id.into(),
            name,
        }
    }
}

impl fmt::Display for ContainerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", name, short_id(&self.id)),
            None => f.write_str(short_id(&self.id)),
        }
    }
}

fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

/// Key/value predicate identifying the "same" container across runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityFilter(BTreeMap<String, String>);

impl IdentityFilter {
    pub fn by_name(name: impl Into<String>) -> Self {
        let mut pairs = BTreeMap::new();
        pairs.insert("name".to_string(), name.into());
        Self(pairs)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Display for IdentityFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pairs: Vec<String> = self.iter().map(|(k, v)| format!("{k}={v}")).collect();
        f.write_str(&pairs.join(","))
    }
}

/// A bind mount from a host path to a path inside the container.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "VolumeSpec")]
pub struct Volume {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub mode: Option<String>,
}

impl Volume {
    pub fn bind(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            mode: None,
        }
    }

    /// `source:destination[:mode]` as accepted by `--volume`.
    pub fn to_arg(&self) -> String {
        let mut arg = format!("{}:{}", self.source.display(), self.destination.display());
        if let Some(mode) = &self.mode {
            arg.push(':');
            arg.push_str(mode);
        }
        arg
    }
}

/// Config form of a volume: `"src:dst[:mode]"` or `[src, dst(, mode)]`.
#[derive(Deserialize)]
#[serde(untagged)]
enum VolumeSpec {
    Short(String),
    List(Vec<String>),
}

impl TryFrom<VolumeSpec> for Volume {
    type Error = String;

    fn try_from(spec: VolumeSpec) -> std::result::Result<Self, Self::Error> {
        let parts: Vec<String> = match spec {
            VolumeSpec::Short(s) => s.split(':').map(str::to_string).collect(),
            VolumeSpec::List(parts) => parts,
        };
        match parts.as_slice() {
            [source, destination] => Ok(Volume::bind(source, destination)),
            [source, destination, mode] => Ok(Volume {
                mode: Some(mode.clone()),
                ..Volume::bind(source, destination)
            }),
            _ => Err(format!(
                "volume must be 'source:destination[:mode]', got {} part(s)",
                parts.len()
            )),
        }
    }
}

/// Everything needed to create a container.
#[derive(Debug, Clone, Default)]
pub struct LaunchFlags {
    pub image: String,
    pub name: Option<String>,
    pub volumes: Vec<Volume>,
    /// Command to start the container with; the image default when empty.
    pub command: Vec<String>,
    /// Runtime-specific long flags, keyed by flag name.
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl LaunchFlags {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }

    /// Identity filter for finding this container again; empty when unnamed.
    pub fn identity_filter(&self) -> IdentityFilter {
        match &self.name {
            Some(name) => IdentityFilter::by_name(name),
            None => IdentityFilter::default(),
        }
    }

    /// Render `extra` as command-line flags.
    ///
    /// `true` becomes `--key`, `false` and null are omitted, scalars become
    /// `--key value`, sequences repeat the flag per item and mappings repeat
    /// it per `k=v` pair. Underscores in keys turn into dashes.
    pub fn extra_args(&self) -> Result<Vec<String>> {
        let mut args = Vec::new();
        for (key, value) in &self.extra {
            let flag = format!("--{}", key.replace('_', "-"));
            match value {
                serde_yaml::Value::Null | serde_yaml::Value::Bool(false) => {}
                serde_yaml::Value::Bool(true) => args.push(flag),
                serde_yaml::Value::Sequence(items) => {
                    for item in items {
                        args.push(flag.clone());
                        args.push(scalar_to_string(key, item)?);
                    }
                }
                serde_yaml::Value::Mapping(map) => {
                    for (k, v) in map {
                        args.push(flag.clone());
                        args.push(format!(
                            "{}={}",
                            scalar_to_string(key, k)?,
                            scalar_to_string(key, v)?
                        ));
                    }
                }
                scalar => {
                    args.push(flag);
                    args.push(scalar_to_string(key, scalar)?);
                }
            }
        }
        Ok(args)
    }
}

fn scalar_to_string(key: &str, value: &serde_yaml::Value) -> Result<String> {
    Ok(match value {
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        _ => bail!("Unsupported value for runtime flag '{}': {:?}", key, value),
    })
}
