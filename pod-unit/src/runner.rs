use anyhow::anyhow;
use log::{debug, info, warn};
use std::{
    thread,
    time::{Duration, Instant},
};

use crate::{
    errors::BuildError,
    models::{ContainerId, ContainerSpec, ContainerStatus, ImageConfig, ImageId, TestStats},
    services::ContainerBackend,
    testspec::TestBlock,
};

const DIRECTIVE: &str = "AFTER_RUN";

/// Runs the AFTER_RUN blocks against a container started from the final
/// image with its configured entrypoint and command.
pub struct PostBuildRunner<'a> {
    backend: &'a mut dyn ContainerBackend,
    ready_timeout: Duration,
    poll_interval: Duration,
    stop_timeout: Duration,
}

impl<'a> PostBuildRunner<'a> {
    pub fn new(
        backend: &'a mut dyn ContainerBackend,
        ready_timeout: Duration,
        poll_interval: Duration,
        stop_timeout: Duration,
    ) -> PostBuildRunner<'a> {
        PostBuildRunner {
            backend,
            ready_timeout,
            poll_interval,
            stop_timeout,
        }
    }

    pub fn run(
        &mut self,
        image: &ImageId,
        config: &ImageConfig,
        blocks: &[&TestBlock],
        stats: &mut TestStats,
    ) -> Result<(), BuildError> {
        let spec = ContainerSpec {
            image: image.clone(),
            entrypoint: config.entrypoint.clone(),
            command: config.cmd.clone(),
            config: config.clone(),
        };

        let container = self
            .backend
            .create_container(spec)
            .map_err(|err| BuildError::engine("create test container", DIRECTIVE, err))?;
        info!("running post-build tests in container {}", container);

        let result = self.run_in(&container, blocks, stats);
        let cleanup = self.cleanup(&container);

        match (result, cleanup) {
            (Ok(()), Ok(())) => Ok(()),
            (Ok(()), Err(cleanup)) => Err(BuildError::engine("clean up test container", DIRECTIVE, cleanup)),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(cleanup)) => Err(BuildError::Cleanup {
                primary: Box::new(err),
                container: container.0,
                cleanup,
            }),
        }
    }

    fn run_in(
        &mut self,
        container: &ContainerId,
        blocks: &[&TestBlock],
        stats: &mut TestStats,
    ) -> Result<(), BuildError> {
        self.backend
            .start_container(container)
            .map_err(|err| BuildError::engine("start test container", DIRECTIVE, err))?;

        self.wait_until_running(container)?;

        for block in blocks {
            debug!("running {} block", block.describe());

            for probe in block.probes.iter() {
                let command = probe.shell_command();
                let code = self.exec(container, &command)?;

                stats.record(code == 0);

                if code == 0 {
                    info!("PASS {}", command);
                } else {
                    warn!("FAIL {} (exit code {})", command, code);
                    return Err(BuildError::AssertionFailed {
                        probe: command,
                        code,
                    });
                }
            }
        }

        Ok(())
    }

    fn wait_until_running(&mut self, container: &ContainerId) -> Result<(), BuildError> {
        let started = Instant::now();

        loop {
            let status = self
                .backend
                .inspect_container(container)
                .map_err(|err| BuildError::engine("inspect test container", DIRECTIVE, err))?;

            match status {
                ContainerStatus::Running => return Ok(()),
                ContainerStatus::Exited => {
                    return Err(BuildError::engine(
                        "keep the test container running",
                        DIRECTIVE,
                        anyhow!("container {} exited before the tests ran", container),
                    ))
                }
                _ => (),
            }

            if started.elapsed() >= self.ready_timeout {
                return Err(BuildError::ReadinessTimeout {
                    container: container.0.clone(),
                    seconds: self.ready_timeout.as_secs(),
                });
            }

            thread::sleep(self.poll_interval);
        }
    }

    fn exec(&mut self, container: &ContainerId, command: &str) -> Result<i64, BuildError> {
        let engine = |err| BuildError::engine("execute probe", command, err);

        let exec = self
            .backend
            .create_exec(
                container,
                vec!["/bin/sh".to_owned(), "-c".to_owned(), command.to_owned()],
            )
            .map_err(engine)?;

        let output = self.backend.start_exec(&exec).map_err(engine)?;
        if !output.stdout.is_empty() {
            debug!("{}", output.stdout.trim_end());
        }
        if !output.stderr.is_empty() {
            debug!("{}", output.stderr.trim_end());
        }

        self.backend.inspect_exec(&exec).map_err(engine)
    }

    fn cleanup(&mut self, container: &ContainerId) -> anyhow::Result<()> {
        let stopped = self
            .backend
            .stop_container(container, self.stop_timeout)
            .map_err(|err| {
                warn!("unable to stop test container {}: {}", container, err);
                err.context(format!("unable to stop test container {}", container))
            });

        // Removal is forced, so it is still attempted after a failed stop.
        self.backend.remove_container(container, true, true)?;
        debug!("removed test container {}", container);

        stopped
    }
}
