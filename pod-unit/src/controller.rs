use anyhow::anyhow;
use log::{debug, info};
use std::{mem, time::Duration};

use crate::{
    cache::BuildCache,
    context::BuildContext,
    directives::{command_string, Directive, DirectiveKind},
    errors::BuildError,
    hasher::sequence_digest,
    models::{CommitSpec, ContainerId, ContainerSpec, ImageConfig, ImageId, TestStats},
    reference::Reference,
    runner::PostBuildRunner,
    services::ContainerBackend,
    shell_word,
    testspec::TestSpec,
};

#[derive(Clone, Debug)]
pub struct BuildOptions {
    pub reference: Option<Reference>,
    pub use_cache: bool,
    pub ready_timeout: Duration,
    pub poll_interval: Duration,
    pub stop_timeout: Duration,
}

impl Default for BuildOptions {
    fn default() -> Self {
        BuildOptions {
            reference: None,
            use_cache: true,
            ready_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(250),
            stop_timeout: Duration::from_secs(1),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildOutcome {
    pub image: ImageId,
    /// The tagged name if one was requested, otherwise the image id.
    pub name: String,
}

/// Walks a woven directive stream, driving the container engine one step at
/// a time and committing layers as the directives require.
pub struct Controller {
    pub(crate) backend: Box<dyn ContainerBackend>,
    pub(crate) cache: BuildCache,
    pub(crate) context: BuildContext,
    pub(crate) options: BuildOptions,

    pub(crate) config: ImageConfig,
    pub(crate) maintainer: Option<String>,
    pub(crate) image_id: Option<ImageId>,
    pub(crate) container_id: Option<ContainerId>,
    /// The working container may differ from the last committed layer.
    pub(crate) dirty: bool,
    /// Canonical form of every durable directive so far; the cache key.
    pub(crate) history: Vec<String>,
    pub(crate) uncommitted: Vec<String>,
    /// Canonical form of the directive being dispatched, for error context.
    pub(crate) current: String,

    pub(crate) stats: TestStats,
}

impl Controller {
    pub fn init<B>(
        backend: B,
        cache: BuildCache,
        context: BuildContext,
        options: BuildOptions,
    ) -> Controller
    where
        B: 'static + ContainerBackend,
    {
        Controller {
            backend: Box::new(backend),
            cache,
            context,
            options,
            config: Default::default(),
            maintainer: None,
            image_id: None,
            container_id: None,
            dirty: false,
            history: Vec::new(),
            uncommitted: Vec::new(),
            current: String::new(),
            stats: Default::default(),
        }
    }

    pub fn stats(&self) -> TestStats {
        self.stats
    }

    pub fn into_cache(self) -> BuildCache {
        self.cache
    }

    /// Builds the image, tags it and runs the post-build tests.
    pub fn run(
        &mut self,
        directives: &[Directive],
        tests: Option<&TestSpec>,
    ) -> Result<BuildOutcome, BuildError> {
        let post_build = tests
            .map(|tests| tests.post_build_blocks().collect::<Vec<_>>())
            .unwrap_or_default();

        let scheduled = directives.iter().filter(|d| d.is_ephemeral()).count()
            + post_build.iter().map(|block| block.probes.len()).sum::<usize>();
        self.stats = TestStats::declare(scheduled);

        for (step, directive) in directives.iter().enumerate() {
            if let Err(err) = self.dispatch(step, directive) {
                return Err(self.abort(err));
            }
        }

        // Trailing metadata directives still owe a commit.
        if self.dirty {
            self.current = "trailing commit".to_owned();
            let committed = match self.probe_cache() {
                Ok(true) => Ok(()),
                Ok(false) => self.commit().and_then(|_| self.remove_working_container()),
                Err(err) => Err(err),
            };
            if let Err(err) = committed {
                return Err(self.abort(err));
            }
        }

        let image = self.current_image()?;
        let mut name = image.0.clone();

        if let Some(reference) = self.options.reference.clone() {
            let tag = reference.tag.as_deref().unwrap_or("latest");
            self.backend
                .tag_image(&image, &reference.repository, tag)
                .map_err(|err| BuildError::engine("tag built image", reference.tagged(), err))?;
            name = reference.to_string();
        }

        info!("successfully built {}", name);

        if !post_build.is_empty() {
            let config = self.config.clone();
            let mut runner = PostBuildRunner::new(
                self.backend.as_mut(),
                self.options.ready_timeout,
                self.options.poll_interval,
                self.options.stop_timeout,
            );
            runner.run(&image, &config, &post_build, &mut self.stats)?;
        }

        Ok(BuildOutcome { image, name })
    }

    fn dispatch(&mut self, step: usize, directive: &Directive) -> Result<(), BuildError> {
        let name = directive.name();

        if (step == 0) != (name == DirectiveKind::From.as_str()) {
            return Err(BuildError::Ordering { step, found: name });
        }

        let kind = DirectiveKind::from_name(&name).ok_or(BuildError::UnknownDirective(name))?;

        let mut args = directive.args().to_vec();
        if kind.allows_env_replacement() {
            for arg in args.iter_mut() {
                *arg = shell_word::expand(arg, &self.config.env)?;
            }
        }

        self.current = command_string(kind.as_str(), &args, directive.payload());
        info!("Step {}: {}", step, self.current);

        if kind == DirectiveKind::Ephemeral {
            // Probes observe the working state; they never owe a commit.
            let carried = mem::replace(&mut self.dirty, false);
            self.handle(kind, &args, directive)?;
            self.dirty = carried;
        } else {
            self.dirty = true;
            let entry = match self.context_digest(kind, &args)? {
                Some(digest) => format!("{} {}", self.current, digest),
                None => self.current.clone(),
            };
            self.history.push(entry);
            self.uncommitted.push(self.current.clone());

            if kind.modifies_filesystem() {
                self.check_supported(kind)?;
                if !self.probe_cache()? {
                    self.handle(kind, &args, directive)?;
                    self.commit()?;
                }
            } else {
                self.handle(kind, &args, directive)?;
            }
        }

        self.remove_working_container()
    }

    fn handle(
        &mut self,
        kind: DirectiveKind,
        args: &[String],
        directive: &Directive,
    ) -> Result<(), BuildError> {
        match kind {
            DirectiveKind::Add | DirectiveKind::Onbuild => self.check_supported(kind),
            DirectiveKind::Cmd => self.handle_cmd(args, directive.is_exec_form()),
            DirectiveKind::Copy => self.handle_copy(args),
            DirectiveKind::Entrypoint => self.handle_entrypoint(args, directive.is_exec_form()),
            DirectiveKind::Env => self.handle_env(args),
            DirectiveKind::Ephemeral => self.handle_probe(directive),
            DirectiveKind::Expose => self.handle_expose(args),
            DirectiveKind::Extract => self.handle_extract(args),
            DirectiveKind::From => self.handle_from(args),
            DirectiveKind::Label => self.handle_label(args),
            DirectiveKind::Maintainer => self.handle_maintainer(args),
            DirectiveKind::Run => self.handle_run(directive),
            DirectiveKind::User => self.handle_user(args),
            DirectiveKind::Volume => self.handle_volume(args),
            DirectiveKind::Workdir => self.handle_workdir(args),
        }
    }

    fn check_supported(&self, kind: DirectiveKind) -> Result<(), BuildError> {
        match kind {
            DirectiveKind::Add | DirectiveKind::Onbuild => {
                Err(BuildError::UnsupportedDirective(kind.to_string()))
            }
            _ => Ok(()),
        }
    }

    /// Reuses a layer built earlier from the same directive sequence. Returns
    /// whether the current step was satisfied from the cache.
    fn probe_cache(&mut self) -> Result<bool, BuildError> {
        if !self.options.use_cache {
            return Ok(false);
        }

        let key = sequence_digest(&self.history);
        let cached = match self.cache.get(&key) {
            Some(image) => image.clone(),
            None => return Ok(false),
        };

        let exists = self
            .backend
            .get_image(&cached.0)
            .map_err(self.engine_error("look up cached image"))?;

        if exists.is_none() {
            debug!("cached image {} is gone, dropping cache entry", cached);
            self.cache.remove(&key);
            return Ok(false);
        }

        info!(" ---> using cache {}", cached);
        self.image_id = Some(cached);
        self.dirty = false;
        self.uncommitted.clear();

        Ok(true)
    }

    /// Commits the working container, creating an empty one first when the
    /// pending changes are metadata only.
    pub(crate) fn commit(&mut self) -> Result<(), BuildError> {
        let container = match self.container_id.clone() {
            Some(container) => container,
            None => self.create_working_container(
                vec!["/bin/sh".to_owned(), "-c".to_owned()],
                vec!["#(nop)".to_owned()],
            )?,
        };

        let spec = CommitSpec {
            author: self.maintainer.clone(),
            message: self.uncommitted.join("; "),
            config: self.config.clone(),
        };

        let image = self
            .backend
            .commit_container(&container, spec)
            .map_err(self.engine_error("commit container image"))?;
        info!(" ---> {}", image);

        self.cache.insert(sequence_digest(&self.history), image.clone());
        self.image_id = Some(image);
        self.dirty = false;
        self.uncommitted.clear();

        Ok(())
    }

    pub(crate) fn create_working_container(
        &mut self,
        entrypoint: Vec<String>,
        command: Vec<String>,
    ) -> Result<ContainerId, BuildError> {
        let spec = ContainerSpec {
            image: self.current_image()?,
            entrypoint: Some(entrypoint),
            command: Some(command),
            config: self.config.clone(),
        };

        let container = self
            .backend
            .create_container(spec)
            .map_err(self.engine_error("create container"))?;
        debug!("created temporary container {}", container);

        self.container_id = Some(container.clone());
        Ok(container)
    }

    /// Starts the working container and waits for its command to exit.
    pub(crate) fn run_working_container(&mut self, container: &ContainerId) -> Result<i64, BuildError> {
        self.backend
            .start_container(container)
            .map_err(self.engine_error("start container"))?;

        self.backend
            .wait_container(container)
            .map_err(self.engine_error("wait for container"))
    }

    fn remove_working_container(&mut self) -> Result<(), BuildError> {
        if let Some(container) = self.container_id.take() {
            self.backend
                .remove_container(&container, true, true)
                .map_err(self.engine_error("remove container"))?;
            debug!("removed temporary container {}", container);
        }

        Ok(())
    }

    /// Best effort removal of the working container after a fatal error.
    fn abort(&mut self, err: BuildError) -> BuildError {
        let container = match self.container_id.take() {
            Some(container) => container,
            None => return err,
        };

        match self.backend.remove_container(&container, true, true) {
            Ok(()) => err,
            Err(cleanup) => BuildError::Cleanup {
                primary: Box::new(err),
                container: container.0,
                cleanup,
            },
        }
    }

    pub(crate) fn current_image(&self) -> Result<ImageId, BuildError> {
        self.image_id.clone().ok_or_else(|| {
            BuildError::engine(
                "resolve the current image",
                self.current.clone(),
                anyhow!("no base image has been set"),
            )
        })
    }

    pub(crate) fn engine_error(
        &self,
        operation: &'static str,
    ) -> impl FnOnce(anyhow::Error) -> BuildError {
        let directive = self.current.clone();
        move |source| BuildError::engine(operation, directive, source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backends::fake::{Call, FakeBackend},
        pipeline,
    };
    use std::{fs, path::Path};
    use tempfile::TempDir;

    const SCRIPT: &str = "FROM alpine\nRUN apk add --no-cache curl\n";
    const TESTS: &str = "AFTER RUN_APK_ADD\nASSERT_TRUE IS_INSTALLED curl\n";

    struct Build {
        result: Result<BuildOutcome, BuildError>,
        stats: TestStats,
        cache: BuildCache,
    }

    fn context_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("index.html"), "<h1>hi</h1>").unwrap();
        dir
    }

    fn build_with(
        backend: &FakeBackend,
        cache: BuildCache,
        options: BuildOptions,
        script: &str,
        tests: Option<&str>,
    ) -> Build {
        let dir = context_dir();
        build_in(backend, cache, options, dir.path(), script, tests)
    }

    fn build_in(
        backend: &FakeBackend,
        cache: BuildCache,
        options: BuildOptions,
        dir: &Path,
        script: &str,
        tests: Option<&str>,
    ) -> Build {
        let context = BuildContext::open(dir).unwrap();

        let (directives, tests) = pipeline::prepare(script, tests).unwrap();
        let mut controller = Controller::init(backend.clone(), cache, context, options);
        let result = controller.run(&directives, tests.as_ref());

        Build {
            result,
            stats: controller.stats(),
            cache: controller.into_cache(),
        }
    }

    fn build(backend: &FakeBackend, script: &str, tests: Option<&str>) -> Build {
        build_with(
            backend,
            BuildCache::in_memory(),
            BuildOptions::default(),
            script,
            tests,
        )
    }

    #[test]
    fn builds_and_counts_injected_probe() {
        let backend = FakeBackend::with_images(&["alpine"]);
        let build = build(&backend, SCRIPT, Some(TESTS));

        build.result.unwrap();
        assert_eq!(
            build.stats,
            TestStats {
                declared: 1,
                ran: 1,
                passed: 1,
                failed: 0
            }
        );

        let probes = backend.commands_containing("command -v");
        assert_eq!(probes, vec![r#"command -v "curl" 1>/dev/null 2>&1"#.to_owned()]);
        assert_eq!(backend.count(|call| matches!(call, Call::Commit { .. })), 1);
    }

    #[test]
    fn probes_never_commit() {
        let backend = FakeBackend::with_images(&["alpine"]);
        let script = "FROM alpine\nRUN true\nEPHEMERAL test -d /tmp\nEPHEMERAL test -d /var\n";
        let build = build(&backend, script, None);

        build.result.unwrap();
        assert_eq!(build.stats.ran, 2);
        assert_eq!(build.stats.declared, 2);
        assert_eq!(backend.count(|call| matches!(call, Call::Commit { .. })), 1);
        assert_eq!(backend.live_containers(), 0);
    }

    #[test]
    fn failing_assertion_aborts_the_build() {
        let backend = FakeBackend::with_images(&["alpine"]).failing("nosuchuser");
        let build = build(
            &backend,
            "FROM alpine\nRUN adduser -D app\nUSER app\n",
            Some("AFTER RUN_ADDUSER\nASSERT_TRUE USER_EXISTS nosuchuser\n"),
        );

        match build.result {
            Err(BuildError::AssertionFailed { code, .. }) => assert_eq!(code, 1),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(build.stats.failed, 1);
        assert_eq!(build.stats.passed + build.stats.failed, build.stats.ran);
        assert_eq!(backend.live_containers(), 0);
        assert_eq!(backend.commits().len(), 1);
    }

    #[test]
    fn from_must_come_first_and_only_once() {
        let backend = FakeBackend::with_images(&["alpine"]);
        let late = build(&backend, "RUN true\nFROM alpine\n", None);
        assert!(matches!(late.result, Err(BuildError::Ordering { step: 0, .. })));
        assert!(backend.calls().is_empty());

        let backend = FakeBackend::with_images(&["alpine"]);
        let twice = build(&backend, "FROM alpine\nFROM alpine\n", None);
        assert!(matches!(twice.result, Err(BuildError::Ordering { step: 1, .. })));
    }

    #[test]
    fn probe_before_from_is_an_ordering_error() {
        let backend = FakeBackend::with_images(&["alpine"]);
        let build = build(
            &backend,
            SCRIPT,
            Some("BEFORE FROM\nASSERT_TRUE FILE_EXISTS /etc/passwd\n"),
        );
        assert!(matches!(build.result, Err(BuildError::Ordering { step: 0, .. })));
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn unknown_and_unsupported_directives() {
        let backend = FakeBackend::with_images(&["alpine"]);
        let unknown = build(&backend, "FROM alpine\nHEALTHCHECK NONE\n", None);
        assert!(matches!(unknown.result, Err(BuildError::UnknownDirective(ref name)) if name == "HEALTHCHECK"));

        let backend = FakeBackend::with_images(&["alpine"]);
        let unsupported = build(&backend, "FROM alpine\nADD app.tar.gz /app\n", None);
        assert!(matches!(unsupported.result, Err(BuildError::UnsupportedDirective(_))));
    }

    #[test]
    fn trailing_metadata_gets_an_empty_commit() {
        let backend = FakeBackend::with_images(&["alpine"]);
        let build = build(
            &backend,
            "FROM alpine\nRUN true\nENV APP_HOME /srv/app\nWORKDIR $APP_HOME\nEXPOSE 8080\nCMD [\"./serve\"]\n",
            None,
        );

        let outcome = build.result.unwrap();
        let commits = backend.commits();
        assert_eq!(commits.len(), 2);

        let last = commits.last().unwrap();
        assert_eq!(last.config.working_dir.as_deref(), Some("/srv/app"));
        assert!(last.config.env.contains(&"APP_HOME=/srv/app".to_owned()));
        assert!(last.config.exposed_ports.contains("8080/tcp"));
        assert_eq!(last.config.cmd, Some(vec!["./serve".to_owned()]));
        assert_eq!(outcome.image, backend.last_image().unwrap());
    }

    #[test]
    fn maintainer_and_user_reach_the_engine() {
        let backend = FakeBackend::with_images(&["alpine"]);
        let build = build(
            &backend,
            "FROM alpine\nMAINTAINER ops@example.com\nUSER nobody\nRUN id\n",
            Some("AFTER_RUN\nASSERT_TRUE CURRENT_USER_IS nobody\n"),
        );

        let outcome = build.result.unwrap();
        let commits = backend.commits();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].author.as_deref(), Some("ops@example.com"));

        let users = backend
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Create { image, user, .. } => Some((image, user)),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(
            users,
            vec![
                ("alpine".to_owned(), Some("nobody".to_owned())),
                (outcome.image.0, Some("nobody".to_owned())),
            ]
        );
    }

    #[test]
    fn probes_keep_the_metadata_carry() {
        let backend = FakeBackend::with_images(&["alpine"]);
        let build = build(
            &backend,
            "FROM alpine\nENV MODE production\nEPHEMERAL test \"$MODE\" = production\n",
            None,
        );

        build.result.unwrap();
        let commits = backend.commits();
        assert_eq!(commits.len(), 1);
        assert!(commits[0].config.env.contains(&"MODE=production".to_owned()));
    }

    #[test]
    fn second_build_is_served_from_cache() {
        let script = "FROM alpine\nRUN apk add --no-cache curl\nCOPY index.html /srv/\nUSER nobody\n";
        let backend = FakeBackend::with_images(&["alpine"]);

        let first = build(&backend, script, None);
        let first_image = first.result.unwrap().image;
        let modifying = backend.count(Call::modifies_filesystem);
        assert!(modifying > 0);

        let second = build_with(
            &backend,
            first.cache,
            BuildOptions::default(),
            script,
            None,
        );
        assert_eq!(second.result.unwrap().image, first_image);
        assert_eq!(backend.count(Call::modifies_filesystem), modifying);
    }

    #[test]
    fn edited_context_files_miss_the_cache() {
        let script = "FROM alpine\nCOPY index.html /srv/\n";
        let backend = FakeBackend::with_images(&["alpine"]);
        let dir = context_dir();
        let copies = |backend: &FakeBackend| backend.count(|call| matches!(call, Call::Copy { .. }));

        let first = build_in(&backend, BuildCache::in_memory(), BuildOptions::default(), dir.path(), script, None);
        let first_image = first.result.unwrap().image;
        assert_eq!(copies(&backend), 1);

        fs::write(dir.path().join("index.html"), "<h1>changed</h1>").unwrap();
        let second = build_in(&backend, first.cache, BuildOptions::default(), dir.path(), script, None);
        let second_image = second.result.unwrap().image;
        assert_ne!(second_image, first_image);
        assert_eq!(copies(&backend), 2);

        let third = build_in(&backend, second.cache, BuildOptions::default(), dir.path(), script, None);
        assert_eq!(third.result.unwrap().image, second_image);
        assert_eq!(copies(&backend), 2);
    }

    /// Writes `site.tar` into the context, every entry holding index.html.
    fn write_archive(dir: &Path, names: &[&str]) -> usize {
        let path = dir.join("site.tar");
        let mut tar = tar::Builder::new(fs::File::create(&path).unwrap());
        for name in names {
            tar.append_path_with_name(dir.join("index.html"), name).unwrap();
        }
        tar.into_inner().unwrap();
        fs::metadata(&path).unwrap().len() as usize
    }

    #[test]
    fn extract_unpacks_context_archives() {
        let script = "FROM alpine\nWORKDIR /srv\nEXTRACT site.tar www\n";
        let backend = FakeBackend::with_images(&["alpine"]);
        let dir = context_dir();

        let copies = |backend: &FakeBackend| {
            backend
                .calls()
                .into_iter()
                .filter_map(|call| match call {
                    Call::Copy { destination, bytes, .. } => Some((destination, bytes)),
                    _ => None,
                })
                .collect::<Vec<_>>()
        };

        let size = write_archive(dir.path(), &["index.html"]);
        let first = build_in(&backend, BuildCache::in_memory(), BuildOptions::default(), dir.path(), script, None);
        let first_image = first.result.unwrap().image;
        assert_eq!(copies(&backend), vec![("/srv/www".to_owned(), size)]);

        let commits = backend.commits();
        assert_eq!(commits.len(), 1);
        assert!(commits[0].message.ends_with("WORKDIR /srv; EXTRACT site.tar www"));
        assert_eq!(commits[0].config.working_dir.as_deref(), Some("/srv"));
        assert_eq!(backend.live_containers(), 0);

        let second = build_in(&backend, first.cache, BuildOptions::default(), dir.path(), script, None);
        assert_eq!(second.result.unwrap().image, first_image);
        assert_eq!(copies(&backend).len(), 1);

        write_archive(dir.path(), &["index.html", "404.html"]);
        let third = build_in(&backend, second.cache, BuildOptions::default(), dir.path(), script, None);
        assert_ne!(third.result.unwrap().image, first_image);
        assert_eq!(copies(&backend).len(), 2);
        assert_eq!(backend.commits().len(), 2);
    }

    #[test]
    fn no_cache_rebuilds_every_layer() {
        let script = "FROM alpine\nRUN true\n";
        let backend = FakeBackend::with_images(&["alpine"]);

        let first = build(&backend, script, None);
        first.result.unwrap();

        let options = BuildOptions {
            use_cache: false,
            ..Default::default()
        };
        let second = build_with(&backend, first.cache, options, script, None);
        second.result.unwrap();
        assert_eq!(backend.count(|call| matches!(call, Call::Commit { .. })), 2);
    }

    #[test]
    fn failing_run_cleans_up_its_container() {
        let backend = FakeBackend::with_images(&["alpine"]).failing("exit 3");
        let build = build(&backend, "FROM alpine\nRUN exit 3\n", None);

        assert!(matches!(build.result, Err(BuildError::RunFailed { code: 1, .. })));
        assert_eq!(backend.live_containers(), 0);
    }

    #[test]
    fn cleanup_failure_is_reported_alongside() {
        let backend = FakeBackend::with_images(&["alpine"])
            .failing("nosuchuser")
            .failing_removal();
        let build = build(
            &backend,
            SCRIPT,
            Some("AFTER RUN_APK\nASSERT_TRUE USER_EXISTS nosuchuser\n"),
        );

        match build.result {
            Err(BuildError::Cleanup { primary, .. }) => {
                assert!(matches!(*primary, BuildError::AssertionFailed { .. }))
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn tags_the_final_image() {
        let backend = FakeBackend::with_images(&["alpine"]);
        let options = BuildOptions {
            reference: Some(Reference::parse("demo/web:1.0").unwrap()),
            ..Default::default()
        };
        let build = build_with(&backend, BuildCache::in_memory(), options, SCRIPT, None);

        assert_eq!(build.result.unwrap().name, "demo/web:1.0");
        assert_eq!(
            backend.count(|call| matches!(call, Call::Tag { repository, tag, .. } if repository == "demo/web" && tag == "1.0")),
            1
        );
    }

    #[test]
    fn pulls_missing_base_images() {
        let backend = FakeBackend::with_images(&[]);
        let build = build(&backend, "FROM alpine:3.12\n", None);

        build.result.unwrap();
        assert_eq!(
            backend.count(|call| matches!(call, Call::PullImage(name) if name == "alpine:3.12")),
            1
        );
    }

    #[test]
    fn post_build_tests_run_in_the_final_image() {
        let backend = FakeBackend::with_images(&["alpine"]);
        let build = build(
            &backend,
            "FROM alpine\nCMD [\"nginx\", \"-g\", \"daemon off;\"]\n",
            Some("AFTER_RUN\nASSERT_TRUE PROCESS_EXISTS nginx\nASSERT_FALSE PROCESS_EXISTS apache2\n"),
        );

        let outcome = build.result.unwrap();
        assert_eq!(build.stats.ran, 2);
        assert_eq!(build.stats.passed, 2);
        assert_eq!(build.stats.declared, 2);
        assert_eq!(backend.count(|call| matches!(call, Call::CreateExec { .. })), 2);
        assert_eq!(
            backend.count(|call| matches!(call, Call::Create { image, .. } if *image == outcome.image.0)),
            1
        );
        assert_eq!(backend.live_containers(), 0);
    }
}
