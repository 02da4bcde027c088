//! In-memory runtime for exercising container lifecycle logic in tests.

use std::sync::Mutex;

use anyhow::{Result, anyhow, bail};

use super::{ContainerRef, ContainerRuntime, IdentityFilter, LaunchFlags};

#[derive(Default)]
struct State {
    containers: Vec<(ContainerRef, LaunchFlags)>,
    next_id: u32,
    launches: Vec<LaunchFlags>,
    executed: Vec<Vec<String>>,
    fail_remove: bool,
    fail_exec: bool,
}

#[derive(Default)]
pub struct FakeRuntime {
    state: Mutex<State>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a container as if a previous process had started it.
    pub fn seed(&self, name: &str) -> ContainerRef {
        let mut state = self.state.lock().unwrap();
        let container = next_container(&mut state, Some(name.to_string()));
        let flags = LaunchFlags {
            name: Some(name.to_string()),
            ..LaunchFlags::new("seeded")
        };
        state.containers.push((container.clone(), flags));
        container
    }

    pub fn containers(&self) -> Vec<ContainerRef> {
        let state = self.state.lock().unwrap();
        state.containers.iter().map(|(c, _)| c.clone()).collect()
    }

    /// Flags of every `run` call, in order.
    pub fn launches(&self) -> Vec<LaunchFlags> {
        self.state.lock().unwrap().launches.clone()
    }

    /// Argument vectors of every `execute` call, in order.
    pub fn executed(&self) -> Vec<Vec<String>> {
        self.state.lock().unwrap().executed.clone()
    }

    pub fn fail_remove(&self, fail: bool) {
        self.state.lock().unwrap().fail_remove = fail;
    }

    pub fn fail_exec(&self, fail: bool) {
        self.state.lock().unwrap().fail_exec = fail;
    }
}

fn next_container(state: &mut State, name: Option<String>) -> ContainerRef {
    state.next_id += 1;
    ContainerRef::new(format!("fake{:08}", state.next_id), name)
}

fn matches(container: &ContainerRef, filter: &IdentityFilter) -> bool {
    filter.iter().all(|(key, value)| match key {
        "name" => container.name.as_deref() == Some(value),
        "id" => container.id == value,
        _ => false,
    })
}

impl ContainerRuntime for FakeRuntime {
    fn name(&self) -> &str {
        "fake"
    }

    fn list(&self, filter: &IdentityFilter) -> Result<Vec<ContainerRef>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .containers
            .iter()
            .map(|(c, _)| c)
            .filter(|c| matches(c, filter))
            .cloned()
            .collect())
    }

    fn remove(&self, targets: &[ContainerRef], _force: bool) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_remove {
            bail!("simulated removal failure");
        }
        for target in targets {
            let before = state.containers.len();
            state.containers.retain(|(c, _)| c.id != target.id);
            if state.containers.len() == before {
                bail!("No such container: {}", target.id);
            }
        }
        Ok(())
    }

    fn run(&self, flags: &LaunchFlags) -> Result<ContainerRef> {
        let mut state = self.state.lock().unwrap();
        if let Some(name) = &flags.name
            && state
                .containers
                .iter()
                .any(|(c, _)| c.name.as_deref() == Some(name.as_str()))
        {
            bail!("Conflict: container name {} is already in use", name);
        }
        let container = next_container(&mut state, flags.name.clone());
        state.containers.push((container.clone(), flags.clone()));
        state.launches.push(flags.clone());
        Ok(container)
    }

    fn execute(&self, container: &ContainerRef, argv: &[String]) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        if !state.containers.iter().any(|(c, _)| c.id == container.id) {
            return Err(anyhow!("No such container: {}", container.id));
        }
        state.executed.push(argv.to_vec());
        if state.fail_exec {
            bail!("exit status 127: command not found");
        }
        Ok(format!("ran: {}", argv.join(" ")))
    }
}
