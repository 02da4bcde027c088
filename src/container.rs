//! Lifecycle of the single container backing a remote environment.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use tracing::{error, info, warn};

use crate::runtime::{ContainerRef, ContainerRuntime, IdentityFilter, LaunchFlags};

/// More than one container answers to the identity filter and the policy
/// forbids deleting them.
#[derive(Debug, thiserror::Error)]
#[error("Multiple containers found with same filter ({filter}): {count}")]
pub struct MultipleContainersFound {
    pub filter: String,
    pub count: usize,
}

/// What to do with containers that already match the identity filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RerunPolicy {
    /// Force-remove every match and start a fresh container.
    #[default]
    ForceRerun,
    /// Adopt a single existing match instead of starting a new one.
    ReuseExisting,
}

impl RerunPolicy {
    pub fn force_rerun(&self) -> bool {
        matches!(self, RerunPolicy::ForceRerun)
    }
}

pub struct ContainerHandle {
    runtime: Arc<dyn ContainerRuntime>,
    flags: LaunchFlags,
    identity: IdentityFilter,
    container: Option<ContainerRef>,
    reused: bool,
}

impl ContainerHandle {
    /// Build a handle without touching the runtime.
    pub fn new(runtime: Arc<dyn ContainerRuntime>, flags: LaunchFlags) -> Self {
        let identity = flags.identity_filter();
        Self {
            runtime,
            flags,
            identity,
            container: None,
            reused: false,
        }
    }

    /// Build a handle and bring its container up according to `policy`.
    pub fn launch(
        runtime: Arc<dyn ContainerRuntime>,
        flags: LaunchFlags,
        policy: RerunPolicy,
    ) -> Result<Self> {
        let mut handle = Self::new(runtime, flags);
        handle.run(policy.force_rerun())?;
        Ok(handle)
    }

    pub fn flags(&self) -> &LaunchFlags {
        &self.flags
    }

    pub fn identity(&self) -> &IdentityFilter {
        &self.identity
    }

    /// Whether the tracked container was adopted rather than started here.
    /// An adopted container keeps the volumes of its original launch.
    pub fn is_reused(&self) -> bool {
        self.reused
    }

    /// The container this handle currently manages, if any.
    pub fn container(&self) -> Option<&ContainerRef> {
        self.container.as_ref()
    }

    /// Make sure exactly one container matching the identity filter is live.
    ///
    /// With `force_rerun`, existing matches are removed and a new container
    /// is started. Without it, a single match is adopted as-is and several
    /// matches fail with [`MultipleContainersFound`] before anything is
    /// created.
    pub fn run(&mut self, force_rerun: bool) -> Result<()> {
        let mut removed = Vec::new();

        if !self.identity.is_empty() {
            let existing = self.runtime.list(&self.identity)?;
            if !existing.is_empty() {
                if force_rerun {
                    info!(
                        filter = %self.identity,
                        count = existing.len(),
                        "container:removing existing matches"
                    );
                    self.runtime.remove(&existing, true).with_context(|| {
                        format!("Failed to clear containers matching {}", self.identity)
                    })?;
                    removed = existing;
                } else if let [only] = existing.as_slice() {
                    if self.container.as_ref() != Some(only) {
                        warn!(
                            container = %only,
                            "container:reusing existing, volumes from its original launch are kept"
                        );
                        self.container = Some(only.clone());
                        self.reused = true;
                    }
                    return Ok(());
                } else {
                    return Err(MultipleContainersFound {
                        filter: self.identity.to_string(),
                        count: existing.len(),
                    }
                    .into());
                }
            }
        }

        // A tracked container already cleared by the filter sweep is not
        // removed twice.
        if force_rerun
            && let Some(current) = self.container.take()
            && !removed.contains(&current)
        {
            info!(container = %current, "container:removing previous");
            self.runtime
                .remove(std::slice::from_ref(&current), true)
                .with_context(|| format!("Failed to remove previous container {}", current))?;
        }

        if force_rerun || self.container.is_none() {
            let container = self.runtime.run(&self.flags)?;
            info!(container = %container, "container:started");
            self.container = Some(container);
            self.reused = false;
        }
        Ok(())
    }

    /// Force-remove the tracked container. Returns `false` if the runtime
    /// refused; having nothing to remove counts as success.
    pub fn remove(&mut self) -> bool {
        match self.container.clone() {
            Some(current) => self.remove_containers(&[current]),
            None => true,
        }
    }

    /// Force-remove `targets`, forgetting the tracked container if it is
    /// among them. Failures are logged and reported as `false`.
    pub fn remove_containers(&mut self, targets: &[ContainerRef]) -> bool {
        if targets.is_empty() {
            return true;
        }
        match self.runtime.remove(targets, true) {
            Ok(()) => {
                if self
                    .container
                    .as_ref()
                    .is_some_and(|current| targets.contains(current))
                {
                    self.container = None;
                }
                info!(count = targets.len(), "container:removed");
                true
            }
            Err(e) => {
                error!(error = %e, "Failed to remove container");
                false
            }
        }
    }

    /// Run `argv` in the tracked container and return its output.
    pub fn execute(&self, argv: &[String]) -> Result<String> {
        let container = self
            .container
            .as_ref()
            .ok_or_else(|| anyhow!("No running container to execute in"))?;
        self.runtime.execute(container, argv)
    }
}

impl Drop for ContainerHandle {
    fn drop(&mut self) {
        if let Some(container) = &self.container {
            warn!(
                container = %container,
                "container:handle dropped while container is still tracked"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::fake::FakeRuntime;

    fn named(name: &str) -> LaunchFlags {
        LaunchFlags {
            name: Some(name.to_string()),
            ..LaunchFlags::new("ubuntu:22.04")
        }
    }

    #[test]
    fn test_launch_fresh() {
        let runtime = Arc::new(FakeRuntime::new());
        let handle =
            ContainerHandle::launch(runtime.clone(), named("env"), RerunPolicy::default()).unwrap();

        assert_eq!(runtime.containers().len(), 1);
        assert_eq!(handle.container(), runtime.containers().first());
    }

    #[test]
    fn test_force_rerun_replaces_existing() {
        let runtime = Arc::new(FakeRuntime::new());
        let old = runtime.seed("env");

        let handle =
            ContainerHandle::launch(runtime.clone(), named("env"), RerunPolicy::ForceRerun)
                .unwrap();

        let live = runtime.list(&IdentityFilter::by_name("env")).unwrap();
        assert_eq!(live.len(), 1);
        assert_ne!(live[0].id, old.id);
        assert_eq!(handle.container(), Some(&live[0]));
    }

    #[test]
    fn test_reuse_adopts_single_match() {
        let runtime = Arc::new(FakeRuntime::new());
        let old = runtime.seed("env");

        let handle =
            ContainerHandle::launch(runtime.clone(), named("env"), RerunPolicy::ReuseExisting)
                .unwrap();

        assert_eq!(handle.container(), Some(&old));
        assert!(handle.is_reused());
        assert!(runtime.launches().is_empty());
    }

    #[test]
    fn test_fresh_launch_is_not_reused() {
        let runtime = Arc::new(FakeRuntime::new());
        let mut handle =
            ContainerHandle::launch(runtime.clone(), named("env"), RerunPolicy::ReuseExisting)
                .unwrap();
        assert!(!handle.is_reused());

        // finding its own container again is not an adoption
        handle.run(false).unwrap();
        assert!(!handle.is_reused());
        assert_eq!(runtime.launches().len(), 1);
        handle.remove();
    }

    #[test]
    fn test_reuse_with_multiple_matches_fails() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.seed("env");
        runtime.seed("env");

        let err = match ContainerHandle::launch(
            runtime.clone(),
            named("env"),
            RerunPolicy::ReuseExisting,
        ) {
            Ok(_) => panic!("expected ambiguous lookup"),
            Err(e) => e,
        };

        let ambiguous = err.downcast_ref::<MultipleContainersFound>().unwrap();
        assert_eq!(ambiguous.count, 2);
        assert!(runtime.launches().is_empty());
        assert_eq!(runtime.containers().len(), 2);
    }

    #[test]
    fn test_unnamed_container_skips_lookup() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.seed("someone-else");

        let handle = ContainerHandle::launch(
            runtime.clone(),
            LaunchFlags::new("ubuntu"),
            RerunPolicy::ReuseExisting,
        )
        .unwrap();

        assert!(handle.identity().is_empty());
        assert_eq!(runtime.containers().len(), 2);
    }

    #[test]
    fn test_rerun_replaces_tracked_unnamed_container() {
        let runtime = Arc::new(FakeRuntime::new());
        let mut handle = ContainerHandle::launch(
            runtime.clone(),
            LaunchFlags::new("ubuntu"),
            RerunPolicy::ForceRerun,
        )
        .unwrap();
        let first = handle.container().cloned().unwrap();

        handle.run(true).unwrap();

        let containers = runtime.containers();
        assert_eq!(containers.len(), 1);
        assert_ne!(containers[0], first);
        assert_eq!(handle.container(), Some(&containers[0]));
    }

    #[test]
    fn test_rerun_without_force_keeps_tracked_container() {
        let runtime = Arc::new(FakeRuntime::new());
        let mut handle = ContainerHandle::launch(
            runtime.clone(),
            LaunchFlags::new("ubuntu"),
            RerunPolicy::ForceRerun,
        )
        .unwrap();
        let first = handle.container().cloned();

        handle.run(false).unwrap();

        assert_eq!(handle.container().cloned(), first);
        assert_eq!(runtime.launches().len(), 1);
    }

    #[test]
    fn test_remove_clears_tracked_container() {
        let runtime = Arc::new(FakeRuntime::new());
        let mut handle =
            ContainerHandle::launch(runtime.clone(), named("env"), RerunPolicy::default()).unwrap();

        assert!(handle.remove());
        assert!(handle.container().is_none());
        assert!(runtime.containers().is_empty());

        // nothing left to remove
        assert!(handle.remove());
    }

    #[test]
    fn test_remove_other_target_keeps_tracked_container() {
        let runtime = Arc::new(FakeRuntime::new());
        let stray = runtime.seed("stray");
        let mut handle =
            ContainerHandle::launch(runtime.clone(), named("env"), RerunPolicy::default()).unwrap();

        assert!(handle.remove_containers(&[stray]));
        assert!(handle.container().is_some());
        assert_eq!(runtime.containers().len(), 1);
        handle.remove();
    }

    #[test]
    fn test_remove_failure_reports_false() {
        let runtime = Arc::new(FakeRuntime::new());
        let mut handle =
            ContainerHandle::launch(runtime.clone(), named("env"), RerunPolicy::default()).unwrap();
        runtime.fail_remove(true);

        assert!(!handle.remove());
        assert!(handle.container().is_some());
    }

    #[test]
    fn test_execute_without_container_fails() {
        let runtime = Arc::new(FakeRuntime::new());
        let handle = ContainerHandle::new(runtime, LaunchFlags::new("ubuntu"));

        assert!(handle.execute(&["true".to_string()]).is_err());
    }
}
