use anyhow::{anyhow, Context, Result};
use log::{debug, warn};
use serde::Deserialize;
use std::{
    collections::BTreeMap as Map,
    fs::File,
    io::{self, Read, Seek, SeekFrom},
    path::Path,
    process::{Command, Stdio},
    time::Duration,
};
use tar::{Archive, Builder as TarBuilder, EntryType};
use varlink::Connection;

use podman_varlink::{
    AuthConfig, Create as CreateContainer, Error, ErrorKind, VarlinkClient,
    VarlinkClientInterface,
};

use crate::{
    models::{
        CommitSpec, ContainerId, ContainerSpec, ContainerStatus, ExecId, ExecOutput, ImageConfig,
        ImageId,
    },
    services::ContainerBackend,
};

/// Polling interval podman uses while waiting for a container, in milliseconds.
const WAIT_INTERVAL: i64 = 250;

struct ExecSession {
    container: ContainerId,
    command: Vec<String>,
    exit_code: Option<i64>,
}

pub struct PodmanBackend {
    client: VarlinkClient,
    execs: Map<ExecId, ExecSession>,
    next_exec: usize,
}

impl PodmanBackend {
    pub fn connect() -> Result<PodmanBackend> {
        let connection = Connection::with_activate(r#"podman varlink "$VARLINK_ADDRESS""#)?;
        let client = VarlinkClient::new(connection.clone());

        Ok(PodmanBackend {
            client,
            execs: Map::new(),
            next_exec: 0,
        })
    }
}

/// The parts of `podman image inspect` output that make up an image config.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct InspectedConfig {
    cmd: Option<Vec<String>>,
    entrypoint: Option<Vec<String>>,
    env: Option<Vec<String>>,
    exposed_ports: Option<Map<String, serde_json::Value>>,
    labels: Option<Map<String, String>>,
    user: Option<String>,
    volumes: Option<Map<String, serde_json::Value>>,
    working_dir: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct InspectedImage {
    config: InspectedConfig,
}

impl From<InspectedConfig> for ImageConfig {
    fn from(config: InspectedConfig) -> ImageConfig {
        ImageConfig {
            cmd: config.cmd,
            entrypoint: config.entrypoint,
            env: config.env.unwrap_or_default(),
            exposed_ports: config
                .exposed_ports
                .map(|ports| ports.into_iter().map(|(port, _)| port).collect())
                .unwrap_or_default(),
            labels: config.labels.unwrap_or_default(),
            user: config.user.filter(|user| !user.is_empty()),
            volumes: config
                .volumes
                .map(|volumes| volumes.into_iter().map(|(volume, _)| volume).collect())
                .unwrap_or_default(),
            working_dir: config.working_dir.filter(|dir| !dir.is_empty()),
        }
    }
}

/// Dockerfile style instructions that make a committed image carry `config`.
fn commit_changes(config: &ImageConfig) -> Result<Vec<String>> {
    let mut changes = Vec::new();

    // Working containers run under `/bin/sh -c`, both must always be reset.
    let cmd = config.cmd.clone().unwrap_or_default();
    let entrypoint = config.entrypoint.clone().unwrap_or_default();
    changes.push(format!("CMD {}", serde_json::to_string(&cmd)?));
    changes.push(format!("ENTRYPOINT {}", serde_json::to_string(&entrypoint)?));

    for env in config.env.iter() {
        let mut split = env.splitn(2, '=');
        let key = split.next().unwrap_or_default();
        let value = split.next().unwrap_or_default();
        changes.push(format!("ENV {}={}", key, serde_json::to_string(value)?));
    }
    for port in config.exposed_ports.iter() {
        changes.push(format!("EXPOSE {}", port));
    }
    for (key, value) in config.labels.iter() {
        changes.push(format!("LABEL {}={}", key, serde_json::to_string(value)?));
    }
    if let Some(user) = &config.user {
        changes.push(format!("USER {}", user));
    }
    for volume in config.volumes.iter() {
        changes.push(format!("VOLUME {}", volume));
    }
    if let Some(working_dir) = &config.working_dir {
        changes.push(format!("WORKDIR {}", working_dir));
    }

    Ok(changes)
}

fn podman(args: &[&str]) -> Command {
    let mut command = Command::new("podman");
    command.args(args);
    command
}

impl ContainerBackend for PodmanBackend {
    fn get_image(&mut self, name: &str) -> Result<Option<ImageId>> {
        let reply = self.client.get_image(name.to_owned()).call();

        let reply = match reply {
            Ok(reply) => reply,
            Err(Error(ErrorKind::ImageNotFound(_), _, _)) => return Ok(None),
            Err(err) => Err(err)?,
        };

        Ok(Some(ImageId(reply.image.id)))
    }

    fn pull_image(&mut self, name: &str) -> Result<ImageId> {
        let auth_config = AuthConfig {
            username: None,
            password: None,
        };

        let mut image_id = None;

        for reply in self.client.pull_image(name.to_owned(), auth_config).more()? {
            let reply = reply?.reply;

            if let Some(logs) = reply.logs {
                for line in logs {
                    debug!("{}", line.trim_end());
                }
            }

            if !reply.id.is_empty() {
                image_id = Some(reply.id);
            }
        }

        image_id
            .map(ImageId)
            .ok_or_else(|| anyhow!("podman did not report an image id for {}", name))
    }

    fn inspect_image(&mut self, image: &ImageId) -> Result<ImageConfig> {
        let reply = self.client.inspect_image(image.0.clone()).call()?;
        let inspected: InspectedImage = serde_json::from_str(&reply.image)
            .with_context(|| format!("unable to parse the configuration of {}", image))?;

        Ok(inspected.config.into())
    }

    fn tag_image(&mut self, image: &ImageId, repository: &str, tag: &str) -> Result<()> {
        self.client
            .tag_image(image.0.clone(), format!("{}:{}", repository, tag))
            .call()?;

        Ok(())
    }

    fn create_container(&mut self, spec: ContainerSpec) -> Result<ContainerId> {
        let mut args = vec![spec.image.0];
        args.extend(spec.command.unwrap_or_default());

        let entrypoint = match spec.entrypoint {
            Some(entrypoint) => Some(serde_json::to_string(&entrypoint)?),
            None => None,
        };

        let env = spec
            .config
            .env
            .iter()
            .map(|entry| {
                let mut split = entry.splitn(2, '=');
                let key = split.next().unwrap_or_default().to_owned();
                let value = split.next().unwrap_or_default().to_owned();
                (key, value)
            })
            .collect();

        let labels = spec
            .config
            .labels
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect();

        let create_container = CreateContainer {
            args,
            command: None,
            entrypoint,
            env: Some(env),
            expose: Some(spec.config.exposed_ports.into_iter().collect()),
            label: Some(labels),
            name: None,
            user: spec.config.user,
            volume: None,
            workDir: spec.config.working_dir,
        };

        let reply = self.client.create_container(create_container).call()?;
        let container = ContainerId(reply.container);

        Ok(container)
    }

    fn start_container(&mut self, container: &ContainerId) -> Result<()> {
        self.client.start_container(container.0.clone()).call()?;

        Ok(())
    }

    fn inspect_container(&mut self, container: &ContainerId) -> Result<ContainerStatus> {
        let reply = self.client.get_container(container.0.clone()).call()?;

        let status = match reply.container.status.as_str() {
            "configured" | "created" => ContainerStatus::Configured,
            "running" => ContainerStatus::Running,
            "exited" | "stopped" => ContainerStatus::Exited,
            status => {
                warn!("unknown container status: {:?}", status);
                ContainerStatus::Unknown
            }
        };

        Ok(status)
    }

    fn wait_container(&mut self, container: &ContainerId) -> Result<i64> {
        let reply = self
            .client
            .wait_container(container.0.clone(), WAIT_INTERVAL)
            .call()?;

        Ok(reply.exitcode)
    }

    fn stop_container(&mut self, container: &ContainerId, timeout: Duration) -> Result<()> {
        self.client
            .stop_container(container.0.clone(), timeout.as_secs() as i64)
            .call()?;

        Ok(())
    }

    fn remove_container(
        &mut self,
        container: &ContainerId,
        force: bool,
        remove_volumes: bool,
    ) -> Result<()> {
        self.client
            .remove_container(container.0.clone(), force, remove_volumes)
            .call()?;

        Ok(())
    }

    fn copy_into_container(
        &mut self,
        container: &ContainerId,
        destination: &str,
        archive: &mut dyn Read,
    ) -> Result<()> {
        // `podman cp` won't create missing directories, so the entries are
        // rebased onto `/` with their full destination path instead.
        let mut rebased = rebase_archive(archive, destination)?;

        let target = format!("{}:/", container);
        let mut child = podman(&["cp", "-", &target])
            .stdin(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context("unable to run podman cp")?;

        {
            let mut stdin = child
                .stdin
                .take()
                .ok_or_else(|| anyhow!("unable to open stdin of podman cp"))?;
            io::copy(&mut rebased, &mut stdin)?;
        }

        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(anyhow!(
                "podman cp into {} failed: {}",
                target,
                String::from_utf8_lossy(&output.stderr).trim_end()
            ));
        }

        Ok(())
    }

    fn commit_container(&mut self, container: &ContainerId, spec: CommitSpec) -> Result<ImageId> {
        let changes = commit_changes(&spec.config)?;
        debug!("committing {} with changes {:?}", container, changes);

        let mut image_id = None;

        let mut call = self
            .client
            .commit(
                container.0.clone(),
                String::new(),
                changes,
                spec.author.unwrap_or_default(),
                spec.message,
                false,
                "oci".to_owned(),
            );
        let replies = call.more()?;

        for reply in replies {
            let reply = reply?.reply;

            if let Some(logs) = reply.logs {
                for line in logs {
                    debug!("{}", line.trim_end());
                }
            }

            if !reply.id.is_empty() {
                image_id = Some(reply.id);
            }
        }

        image_id
            .map(ImageId)
            .ok_or_else(|| anyhow!("podman did not report an image id for the commit of {}", container))
    }

    fn create_exec(&mut self, container: &ContainerId, command: Vec<String>) -> Result<ExecId> {
        self.next_exec += 1;
        let exec = ExecId(format!("{}-exec-{}", container, self.next_exec));

        self.execs.insert(
            exec.clone(),
            ExecSession {
                container: container.clone(),
                command,
                exit_code: None,
            },
        );

        Ok(exec)
    }

    fn start_exec(&mut self, exec: &ExecId) -> Result<ExecOutput> {
        let session = self
            .execs
            .get_mut(exec)
            .ok_or_else(|| anyhow!("unknown exec session {}", exec.0))?;

        let mut args = vec!["exec", session.container.0.as_str()];
        args.extend(session.command.iter().map(String::as_str));

        let output = podman(&args).output().context("unable to run podman exec")?;
        session.exit_code = Some(output.status.code().map(i64::from).unwrap_or(-1));

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn inspect_exec(&mut self, exec: &ExecId) -> Result<i64> {
        self.execs
            .get(exec)
            .and_then(|session| session.exit_code)
            .ok_or_else(|| anyhow!("exec session {} has not finished", exec.0))
    }
}

/// Rewrites a tar stream so that every entry is prefixed by `destination`.
fn rebase_archive(archive: &mut dyn Read, destination: &str) -> Result<File> {
    let prefix = Path::new(destination.trim_start_matches('/'));
    let mut builder = TarBuilder::new(tempfile::tempfile()?);

    for entry in Archive::new(archive).entries()? {
        let mut entry = entry?;
        let path = prefix.join(entry.path()?);
        let mut header = entry.header().clone();

        match entry.header().entry_type() {
            EntryType::Symlink | EntryType::Link => {
                let target = entry
                    .link_name()?
                    .ok_or_else(|| anyhow!("link {:?} has no target", path))?
                    .into_owned();
                builder.append_link(&mut header, &path, target)?;
            }
            _ => builder.append_data(&mut header, &path, &mut entry)?,
        }
    }

    let mut file = builder.into_inner()?;
    file.seek(SeekFrom::Start(0))?;
    Ok(file)
}
