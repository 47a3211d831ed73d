use log::{debug, info, warn};
use std::path::Path;

use crate::{
    controller::Controller,
    directives::{Directive, DirectiveKind},
    errors::{BuildError, ScriptError},
};

fn invalid(kind: DirectiveKind, requirement: &'static str) -> BuildError {
    ScriptError::InvalidArguments {
        directive: kind.to_string(),
        requirement,
    }
    .into()
}

fn shell_form(args: &[String]) -> Vec<String> {
    vec!["/bin/sh".to_owned(), "-c".to_owned(), args.join(" ")]
}

impl Controller {
    pub(crate) fn handle_from(&mut self, args: &[String]) -> Result<(), BuildError> {
        let name = match args {
            [name] => name,
            [name, alias, _] if alias.eq_ignore_ascii_case("AS") => name,
            _ => return Err(invalid(DirectiveKind::From, "exactly one image name")),
        };

        let image = self
            .backend
            .get_image(name)
            .map_err(self.engine_error("look up base image"))?;

        let image = match image {
            Some(image) => image,
            None => {
                info!("pulling base image {}", name);
                self.backend
                    .pull_image(name)
                    .map_err(self.engine_error("pull base image"))?
            }
        };

        self.config = self
            .backend
            .inspect_image(&image)
            .map_err(self.engine_error("inspect base image"))?;
        debug!("base image {} with config {:?}", image, self.config);
        self.image_id = Some(image);

        Ok(())
    }

    pub(crate) fn handle_run(&mut self, directive: &Directive) -> Result<(), BuildError> {
        let (entrypoint, command) = if directive.is_exec_form() {
            match directive.args().split_first() {
                Some((program, rest)) => (vec![program.clone()], rest.to_vec()),
                None => return Err(invalid(DirectiveKind::Run, "a command")),
            }
        } else {
            let command = directive.shell_command();
            if command.trim().is_empty() {
                return Err(invalid(DirectiveKind::Run, "a command"));
            }
            (vec!["/bin/sh".to_owned(), "-c".to_owned()], vec![command])
        };

        let printable = command.join(" ");
        let container = self.create_working_container(entrypoint, command)?;
        let code = self.run_working_container(&container)?;

        if code != 0 {
            return Err(BuildError::RunFailed {
                command: printable,
                code,
            });
        }

        Ok(())
    }

    /// Runs a probe against the current image. The verdict is recorded before
    /// a failure is propagated.
    pub(crate) fn handle_probe(&mut self, directive: &Directive) -> Result<(), BuildError> {
        let probe = directive.shell_command();
        if probe.trim().is_empty() {
            return Err(invalid(DirectiveKind::Ephemeral, "a command"));
        }

        let container = self.create_working_container(
            vec!["/bin/sh".to_owned(), "-c".to_owned()],
            vec![probe.clone()],
        )?;
        let code = self.run_working_container(&container)?;

        self.stats.record(code == 0);

        if code == 0 {
            info!("PASS {}", probe);
            Ok(())
        } else {
            warn!("FAIL {} (exit code {})", probe, code);
            Err(BuildError::AssertionFailed { probe, code })
        }
    }

    /// Digest of the build context files a COPY or EXTRACT reads, so the
    /// layer cache misses when they change.
    pub(crate) fn context_digest(
        &self,
        kind: DirectiveKind,
        args: &[String],
    ) -> Result<Option<String>, BuildError> {
        let sources = match (kind, args.split_last()) {
            (DirectiveKind::Copy, Some((_, sources))) if !sources.is_empty() => sources,
            (DirectiveKind::Extract, Some((_, sources))) if sources.len() == 1 => sources,
            _ => return Ok(None),
        };

        self.context.digest(sources).map(Some)
    }

    pub(crate) fn handle_copy(&mut self, args: &[String]) -> Result<(), BuildError> {
        let (destination, sources) = match args.split_last() {
            Some((destination, sources)) if !sources.is_empty() => (destination, sources),
            _ => {
                return Err(invalid(
                    DirectiveKind::Copy,
                    "at least one source and a destination",
                ))
            }
        };

        let destination = self.container_path(destination);
        let mut archive = self.context.archive(sources, &destination)?;

        let container = self.create_working_container(
            vec!["/bin/sh".to_owned(), "-c".to_owned()],
            vec![format!("#(nop) {}", self.current)],
        )?;

        self.backend
            .copy_into_container(&container, &archive.destination, &mut archive.file)
            .map_err(self.engine_error("copy build context into container"))
    }

    pub(crate) fn handle_extract(&mut self, args: &[String]) -> Result<(), BuildError> {
        let (source, destination) = match args {
            [source, destination] => (source, destination),
            _ => {
                return Err(invalid(
                    DirectiveKind::Extract,
                    "a source archive and a destination",
                ))
            }
        };

        let destination = self.container_path(destination);
        let mut archive = self.context.open_archive(source)?;

        let container = self.create_working_container(
            vec!["/bin/sh".to_owned(), "-c".to_owned()],
            vec![format!("#(nop) {}", self.current)],
        )?;

        self.backend
            .copy_into_container(&container, &destination, &mut archive)
            .map_err(self.engine_error("extract archive into container"))
    }

    pub(crate) fn handle_cmd(&mut self, args: &[String], exec_form: bool) -> Result<(), BuildError> {
        if args.is_empty() {
            return Err(invalid(DirectiveKind::Cmd, "a command"));
        }

        self.config.cmd = Some(if exec_form {
            args.to_vec()
        } else {
            shell_form(args)
        });

        Ok(())
    }

    pub(crate) fn handle_entrypoint(
        &mut self,
        args: &[String],
        exec_form: bool,
    ) -> Result<(), BuildError> {
        if args.is_empty() {
            return Err(invalid(DirectiveKind::Entrypoint, "a command"));
        }

        self.config.entrypoint = Some(if exec_form {
            args.to_vec()
        } else {
            shell_form(args)
        });

        Ok(())
    }

    /// `ENV KEY VALUE` or `ENV KEY=VALUE ...`.
    pub(crate) fn handle_env(&mut self, args: &[String]) -> Result<(), BuildError> {
        let requirement = "KEY VALUE or KEY=VALUE pairs";

        match args {
            [] => Err(invalid(DirectiveKind::Env, requirement)),
            [first, ..] if first.contains('=') => {
                for pair in args {
                    let (key, value) = split_pair(pair)
                        .ok_or_else(|| invalid(DirectiveKind::Env, requirement))?;
                    self.config.set_env(key, value);
                }
                Ok(())
            }
            [key, value @ ..] if !value.is_empty() => {
                self.config.set_env(key, &value.join(" "));
                Ok(())
            }
            _ => Err(invalid(DirectiveKind::Env, requirement)),
        }
    }

    pub(crate) fn handle_expose(&mut self, args: &[String]) -> Result<(), BuildError> {
        if args.is_empty() {
            return Err(invalid(DirectiveKind::Expose, "at least one port"));
        }

        for port in args {
            let port = if port.contains('/') {
                port.clone()
            } else {
                format!("{}/tcp", port)
            };
            self.config.exposed_ports.insert(port);
        }

        Ok(())
    }

    pub(crate) fn handle_label(&mut self, args: &[String]) -> Result<(), BuildError> {
        let requirement = "KEY=VALUE pairs";
        if args.is_empty() {
            return Err(invalid(DirectiveKind::Label, requirement));
        }

        for pair in args {
            let (key, value) =
                split_pair(pair).ok_or_else(|| invalid(DirectiveKind::Label, requirement))?;
            self.config.labels.insert(key.to_owned(), value.to_owned());
        }

        Ok(())
    }

    pub(crate) fn handle_maintainer(&mut self, args: &[String]) -> Result<(), BuildError> {
        if args.is_empty() {
            return Err(invalid(DirectiveKind::Maintainer, "a name"));
        }

        self.maintainer = Some(args.join(" "));
        Ok(())
    }

    pub(crate) fn handle_user(&mut self, args: &[String]) -> Result<(), BuildError> {
        match args {
            [user] => {
                self.config.user = Some(user.clone());
                Ok(())
            }
            _ => Err(invalid(DirectiveKind::User, "exactly one user")),
        }
    }

    pub(crate) fn handle_volume(&mut self, args: &[String]) -> Result<(), BuildError> {
        if args.is_empty() {
            return Err(invalid(DirectiveKind::Volume, "at least one path"));
        }

        self.config.volumes.extend(args.iter().cloned());
        Ok(())
    }

    pub(crate) fn handle_workdir(&mut self, args: &[String]) -> Result<(), BuildError> {
        match args {
            [path] => {
                self.config.working_dir = Some(self.container_path(path));
                Ok(())
            }
            _ => Err(invalid(DirectiveKind::Workdir, "exactly one path")),
        }
    }

    /// Resolves a path inside the image against the working directory.
    fn container_path(&self, path: &str) -> String {
        if path.starts_with('/') {
            return path.to_owned();
        }

        let base = self.config.working_dir.as_deref().unwrap_or("/");
        let joined = Path::new(base).join(path).to_string_lossy().into_owned();

        if path.ends_with('/') && !joined.ends_with('/') {
            format!("{}/", joined)
        } else {
            joined
        }
    }
}

fn split_pair(pair: &str) -> Option<(&str, &str)> {
    let mut split = pair.splitn(2, '=');
    match (split.next(), split.next()) {
        (Some(key), Some(value)) if !key.is_empty() => Some((key, value)),
        _ => None,
    }
}
