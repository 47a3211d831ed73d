use anyhow::Result;
use std::{io::Read, time::Duration};

use crate::{
    directives::Directive,
    errors::ScriptError,
    models::{
        CommitSpec, ContainerId, ContainerSpec, ContainerStatus, ExecId, ExecOutput, ImageConfig,
        ImageId,
    },
};

pub trait ScriptFrontend {
    fn parse(&mut self, source: &str) -> Result<Vec<Directive>, ScriptError>;
}

pub trait ContainerBackend {
    /// Returns the image id, or `None` if the engine does not know the image.
    fn get_image(&mut self, name: &str) -> Result<Option<ImageId>>;

    fn pull_image(&mut self, name: &str) -> Result<ImageId>;

    /// Reads the configuration an image was committed with.
    fn inspect_image(&mut self, image: &ImageId) -> Result<ImageConfig>;

    fn tag_image(&mut self, image: &ImageId, repository: &str, tag: &str) -> Result<()>;

    fn create_container(&mut self, spec: ContainerSpec) -> Result<ContainerId>;

    fn start_container(&mut self, container: &ContainerId) -> Result<()>;

    fn inspect_container(&mut self, container: &ContainerId) -> Result<ContainerStatus>;

    /// Blocks until the container exits and returns its exit code.
    fn wait_container(&mut self, container: &ContainerId) -> Result<i64>;

    fn stop_container(&mut self, container: &ContainerId, timeout: Duration) -> Result<()>;

    fn remove_container(
        &mut self,
        container: &ContainerId,
        force: bool,
        remove_volumes: bool,
    ) -> Result<()>;

    /// Extracts a tar stream into the container's filesystem at `destination`.
    fn copy_into_container(
        &mut self,
        container: &ContainerId,
        destination: &str,
        archive: &mut dyn Read,
    ) -> Result<()>;

    fn commit_container(&mut self, container: &ContainerId, spec: CommitSpec) -> Result<ImageId>;

    fn create_exec(&mut self, container: &ContainerId, command: Vec<String>) -> Result<ExecId>;

    fn start_exec(&mut self, exec: &ExecId) -> Result<ExecOutput>;

    fn inspect_exec(&mut self, exec: &ExecId) -> Result<i64>;
}
