//! An in-memory container engine for tests. Every call is recorded so tests
//! can assert on the exact interaction with the engine.

use anyhow::{anyhow, Result};
use std::{
    cell::RefCell,
    collections::{BTreeMap as Map, BTreeSet as Set},
    io::Read,
    rc::Rc,
    time::Duration,
};

use crate::{
    models::{
        CommitSpec, ContainerId, ContainerSpec, ContainerStatus, ExecId, ExecOutput, ImageConfig,
        ImageId,
    },
    services::ContainerBackend,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    GetImage(String),
    PullImage(String),
    InspectImage(String),
    Tag {
        image: String,
        repository: String,
        tag: String,
    },
    Create {
        image: String,
        entrypoint: String,
        command: String,
        user: Option<String>,
    },
    Start(String),
    Inspect(String),
    Wait(String),
    Stop(String),
    Remove(String),
    Copy {
        container: String,
        destination: String,
        bytes: usize,
    },
    Commit {
        container: String,
        message: String,
    },
    CreateExec {
        container: String,
        command: String,
    },
    StartExec(String),
    InspectExec(String),
}

impl Call {
    pub fn modifies_filesystem(call: &Call) -> bool {
        matches!(call, Call::Create { .. } | Call::Copy { .. } | Call::Commit { .. })
    }
}

#[derive(Debug)]
struct Container {
    command: String,
    started: bool,
}

#[derive(Debug, Default)]
struct State {
    calls: Vec<Call>,
    images: Map<String, ImageConfig>,
    containers: Map<String, Container>,
    execs: Map<String, String>,
    commits: Vec<CommitSpec>,
    failing: Set<String>,
    failing_removal: bool,
    failing_stop: bool,
    stalled: bool,
    exiting: bool,
    next_id: usize,
}

impl State {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}{:04}", prefix, self.next_id)
    }

    fn exit_code(&self, command: &str) -> i64 {
        if self.failing.iter().any(|pattern| command.contains(pattern.as_str())) {
            1
        } else {
            0
        }
    }

    fn container(&self, container: &ContainerId) -> Result<&Container> {
        self.containers
            .get(&container.0)
            .ok_or_else(|| anyhow!("no such container: {}", container))
    }
}

#[derive(Clone, Debug, Default)]
pub struct FakeBackend {
    state: Rc<RefCell<State>>,
}

impl FakeBackend {
    pub fn with_images(names: &[&str]) -> FakeBackend {
        let backend = FakeBackend::default();
        {
            let mut state = backend.state.borrow_mut();
            for name in names {
                state.images.insert(name.to_string(), base_config());
            }
        }
        backend
    }

    /// Commands containing `pattern` exit with code 1.
    pub fn failing(self, pattern: &str) -> FakeBackend {
        self.state.borrow_mut().failing.insert(pattern.to_owned());
        self
    }

    /// Removing a container whose command fails fails as well.
    pub fn failing_removal(self) -> FakeBackend {
        self.state.borrow_mut().failing_removal = true;
        self
    }

    /// Stopping a container always fails.
    pub fn failing_stop(self) -> FakeBackend {
        self.state.borrow_mut().failing_stop = true;
        self
    }

    /// Started containers never report that they are running.
    pub fn stalled(self) -> FakeBackend {
        self.state.borrow_mut().stalled = true;
        self
    }

    /// Started containers exit right away.
    pub fn exiting(self) -> FakeBackend {
        self.state.borrow_mut().exiting = true;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.borrow().calls.clone()
    }

    pub fn count<F: Fn(&Call) -> bool>(&self, predicate: F) -> usize {
        self.state
            .borrow()
            .calls
            .iter()
            .filter(|call| predicate(call))
            .count()
    }

    /// Commands of the containers created so far that contain `pattern`.
    pub fn commands_containing(&self, pattern: &str) -> Vec<String> {
        self.state
            .borrow()
            .calls
            .iter()
            .filter_map(|call| match call {
                Call::Create { command, .. } if command.contains(pattern) => Some(command.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn commits(&self) -> Vec<CommitSpec> {
        self.state.borrow().commits.clone()
    }

    /// The image produced by the most recent commit.
    pub fn last_image(&self) -> Option<ImageId> {
        match self.state.borrow().commits.len() {
            0 => None,
            count => Some(ImageId(format!("sha256:image{:04}", count))),
        }
    }

    pub fn live_containers(&self) -> usize {
        self.state.borrow().containers.len()
    }

    fn record(&self, call: Call) {
        self.state.borrow_mut().calls.push(call);
    }
}

fn base_config() -> ImageConfig {
    let mut config = ImageConfig {
        cmd: Some(vec!["/bin/sh".to_owned()]),
        ..Default::default()
    };
    config.set_env(
        "PATH",
        "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin",
    );
    config
}

impl ContainerBackend for FakeBackend {
    fn get_image(&mut self, name: &str) -> Result<Option<ImageId>> {
        self.record(Call::GetImage(name.to_owned()));

        let state = self.state.borrow();
        Ok(state
            .images
            .get(name)
            .map(|_| ImageId(name.to_owned())))
    }

    fn pull_image(&mut self, name: &str) -> Result<ImageId> {
        self.record(Call::PullImage(name.to_owned()));

        self.state
            .borrow_mut()
            .images
            .insert(name.to_owned(), base_config());
        Ok(ImageId(name.to_owned()))
    }

    fn inspect_image(&mut self, image: &ImageId) -> Result<ImageConfig> {
        self.record(Call::InspectImage(image.0.clone()));

        self.state
            .borrow()
            .images
            .get(&image.0)
            .cloned()
            .ok_or_else(|| anyhow!("no such image: {}", image))
    }

    fn tag_image(&mut self, image: &ImageId, repository: &str, tag: &str) -> Result<()> {
        self.record(Call::Tag {
            image: image.0.clone(),
            repository: repository.to_owned(),
            tag: tag.to_owned(),
        });

        let mut state = self.state.borrow_mut();
        let config = state
            .images
            .get(&image.0)
            .cloned()
            .ok_or_else(|| anyhow!("no such image: {}", image))?;
        state.images.insert(format!("{}:{}", repository, tag), config);

        Ok(())
    }

    fn create_container(&mut self, spec: ContainerSpec) -> Result<ContainerId> {
        let command = spec.command.unwrap_or_default().join(" ");
        self.record(Call::Create {
            image: spec.image.0.clone(),
            entrypoint: spec.entrypoint.unwrap_or_default().join(" "),
            command: command.clone(),
            user: spec.config.user,
        });

        let mut state = self.state.borrow_mut();
        if !state.images.contains_key(&spec.image.0) {
            return Err(anyhow!("no such image: {}", spec.image));
        }

        let id = state.next_id("container");
        state.containers.insert(
            id.clone(),
            Container {
                command,
                started: false,
            },
        );

        Ok(ContainerId(id))
    }

    fn start_container(&mut self, container: &ContainerId) -> Result<()> {
        self.record(Call::Start(container.0.clone()));

        let mut state = self.state.borrow_mut();
        match state.containers.get_mut(&container.0) {
            Some(entry) => {
                entry.started = true;
                Ok(())
            }
            None => Err(anyhow!("no such container: {}", container)),
        }
    }

    fn inspect_container(&mut self, container: &ContainerId) -> Result<ContainerStatus> {
        self.record(Call::Inspect(container.0.clone()));

        let state = self.state.borrow();
        let entry = state.container(container)?;
        Ok(match (entry.started, state.stalled, state.exiting) {
            (true, _, true) => ContainerStatus::Exited,
            (false, _, _) | (true, true, false) => ContainerStatus::Configured,
            (true, false, false) => ContainerStatus::Running,
        })
    }

    fn wait_container(&mut self, container: &ContainerId) -> Result<i64> {
        self.record(Call::Wait(container.0.clone()));

        let state = self.state.borrow();
        let entry = state.container(container)?;
        Ok(state.exit_code(&entry.command))
    }

    fn stop_container(&mut self, container: &ContainerId, _timeout: Duration) -> Result<()> {
        self.record(Call::Stop(container.0.clone()));

        let mut state = self.state.borrow_mut();
        if state.failing_stop {
            return Err(anyhow!("container {} did not stop in time", container));
        }

        match state.containers.get_mut(&container.0) {
            Some(entry) => {
                entry.started = false;
                Ok(())
            }
            None => Err(anyhow!("no such container: {}", container)),
        }
    }

    fn remove_container(
        &mut self,
        container: &ContainerId,
        _force: bool,
        _remove_volumes: bool,
    ) -> Result<()> {
        self.record(Call::Remove(container.0.clone()));

        let mut state = self.state.borrow_mut();
        let entry = state
            .containers
            .remove(&container.0)
            .ok_or_else(|| anyhow!("no such container: {}", container))?;

        if state.failing_removal && state.exit_code(&entry.command) != 0 {
            return Err(anyhow!("container {} is busy", container));
        }

        Ok(())
    }

    fn copy_into_container(
        &mut self,
        container: &ContainerId,
        destination: &str,
        archive: &mut dyn Read,
    ) -> Result<()> {
        let mut bytes = Vec::new();
        archive.read_to_end(&mut bytes)?;

        self.record(Call::Copy {
            container: container.0.clone(),
            destination: destination.to_owned(),
            bytes: bytes.len(),
        });

        self.state.borrow().container(container).map(|_| ())
    }

    fn commit_container(&mut self, container: &ContainerId, spec: CommitSpec) -> Result<ImageId> {
        self.record(Call::Commit {
            container: container.0.clone(),
            message: spec.message.clone(),
        });

        let mut state = self.state.borrow_mut();
        state.container(container)?;

        let image = format!("sha256:image{:04}", state.commits.len() + 1);
        state.images.insert(image.clone(), spec.config.clone());
        state.commits.push(spec);

        Ok(ImageId(image))
    }

    fn create_exec(&mut self, container: &ContainerId, command: Vec<String>) -> Result<ExecId> {
        let command = command.join(" ");
        self.record(Call::CreateExec {
            container: container.0.clone(),
            command: command.clone(),
        });

        let mut state = self.state.borrow_mut();
        if !state.container(container)?.started {
            return Err(anyhow!("container {} is not running", container));
        }

        let id = state.next_id("exec");
        state.execs.insert(id.clone(), command);

        Ok(ExecId(id))
    }

    fn start_exec(&mut self, exec: &ExecId) -> Result<ExecOutput> {
        self.record(Call::StartExec(exec.0.clone()));

        let state = self.state.borrow();
        state
            .execs
            .get(&exec.0)
            .map(|_| ExecOutput::default())
            .ok_or_else(|| anyhow!("no such exec session: {}", exec.0))
    }

    fn inspect_exec(&mut self, exec: &ExecId) -> Result<i64> {
        self.record(Call::InspectExec(exec.0.clone()));

        let state = self.state.borrow();
        let command = state
            .execs
            .get(&exec.0)
            .ok_or_else(|| anyhow!("no such exec session: {}", exec.0))?;
        Ok(state.exit_code(command))
    }
}
