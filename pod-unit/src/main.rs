use anyhow::{anyhow, Context, Result};
use crossterm::{
    style::{self, Colorize, Styler},
    QueueableCommand,
};
use log::{info, warn};
use std::{
    env, fs,
    io::{stdout, Write},
    path::{Path, PathBuf},
    time::Duration,
};
use structopt::StructOpt;

use backends::PodmanBackend;
use cache::BuildCache;
use context::BuildContext;
use controller::{BuildOptions, Controller};
use models::TestStats;
use reference::Reference;

mod assertions;
mod backends;
mod cache;
mod context;
mod controller;
mod directives;
mod errors;
mod frontends;
mod handlers;
mod hasher;
mod models;
mod pipeline;
mod reference;
mod runner;
mod services;
mod shell_word;
mod testspec;
mod weaver;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "pod-unit",
    about = "Builds container images with podman and runs unit tests against every step."
)]
struct Opt {
    /// Build context directory.
    #[structopt(short = "C", long, default_value = ".", parse(from_os_str))]
    context: PathBuf,

    /// Build script, defaults to Dockerfile inside the build context. Tests
    /// are read from the same path with a `_test` suffix when it exists.
    #[structopt(short, long, parse(from_os_str))]
    file: Option<PathBuf>,

    /// Name of the resulting image, as `repository[:tag]`.
    #[structopt(short, long)]
    tag: Option<String>,

    /// Where to keep the layer cache, defaults to ~/.cache/pod-unit/cache.json.
    #[structopt(long, env = "POD_UNIT_CACHE", parse(from_os_str))]
    cache_file: Option<PathBuf>,

    /// Don't reuse layers from previous builds.
    #[structopt(long)]
    no_cache: bool,

    /// Seconds to wait for the post-build container to be running.
    #[structopt(long, default_value = "30")]
    ready_timeout: u64,

    /// Milliseconds between readiness checks of the post-build container.
    #[structopt(long, default_value = "250")]
    poll_interval: u64,

    /// Seconds to wait for the post-build container to stop.
    #[structopt(long, default_value = "1")]
    stop_timeout: u64,
}

fn test_script_path(script: &Path) -> PathBuf {
    let mut path = script.as_os_str().to_owned();
    path.push("_test");
    PathBuf::from(path)
}

fn default_cache_path() -> Result<PathBuf> {
    let home = env::var_os("HOME")
        .ok_or_else(|| anyhow!("HOME is not set, use --cache-file to choose a cache location"))?;

    Ok(PathBuf::from(home)
        .join(".cache")
        .join("pod-unit")
        .join("cache.json"))
}

fn main() -> Result<()> {
    pretty_env_logger::init_custom_env("LOG");

    let opt = Opt::from_args();

    let mut stdout = stdout();

    let reference = opt.tag.as_deref().map(Reference::parse).transpose()?;

    let context = BuildContext::open(&opt.context)?;
    info!("using build context {:?}", context.root());

    let script_path = opt
        .file
        .clone()
        .unwrap_or_else(|| context.root().join("Dockerfile"));
    let script = fs::read_to_string(&script_path)
        .with_context(|| format!("unable to read build script {:?}", script_path))?;

    let test_path = test_script_path(&script_path);
    let tests = if test_path.is_file() {
        info!("found test script {:?}", test_path);
        let tests = fs::read_to_string(&test_path)
            .with_context(|| format!("unable to read test script {:?}", test_path))?;
        Some(tests)
    } else {
        None
    };

    let (directives, tests) = pipeline::prepare(&script, tests.as_deref())?;
    info!("prepared {} steps", directives.len());

    let cache_path = match opt.cache_file {
        Some(path) => path,
        None => default_cache_path()?,
    };
    let cache = BuildCache::load(&cache_path)?;

    let backend = PodmanBackend::connect()?;
    info!("connected to podman");

    let options = BuildOptions {
        reference,
        use_cache: !opt.no_cache,
        ready_timeout: Duration::from_secs(opt.ready_timeout),
        poll_interval: Duration::from_millis(opt.poll_interval),
        stop_timeout: Duration::from_secs(opt.stop_timeout),
    };

    let mut controller = Controller::init(backend, cache, context, options);
    let result = controller.run(&directives, tests.as_ref());
    let stats = controller.stats();

    // Layers committed before a failure are still worth reusing.
    let mut cache = controller.into_cache();
    if let Err(err) = cache.save() {
        warn!("unable to save build cache {:?}: {}", cache_path, err);
    }

    match &result {
        Ok(outcome) => {
            stdout
                .queue(style::PrintStyledContent("Successfully built ".green().bold()))?
                .queue(style::Print(format!("{}\n", outcome.name)))?;
        }
        Err(_) => {
            stdout.queue(style::PrintStyledContent("Build failed\n".red().bold()))?;
        }
    }

    if stats.declared > 0 {
        print_summary(&mut stdout, stats)?;
    }

    stdout.flush()?;

    result?;
    Ok(())
}

fn print_summary(stdout: &mut impl Write, stats: TestStats) -> Result<()> {
    let verdict = if stats.failed == 0 && stats.ran == stats.declared {
        "PASS: ".green().bold()
    } else {
        "FAIL: ".red().bold()
    };

    stdout
        .queue(style::PrintStyledContent(verdict))?
        .queue(style::Print(format!("{}\n", stats)))?;

    Ok(())
}
