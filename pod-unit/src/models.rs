use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap as Map, BTreeSet as Set},
    fmt,
};

#[derive(Clone, Debug, Hash, PartialOrd, Ord, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageId(pub String);

#[derive(Clone, Debug, Hash, PartialOrd, Ord, PartialEq, Eq)]
pub struct ContainerId(pub String);

#[derive(Clone, Debug, Hash, PartialOrd, Ord, PartialEq, Eq)]
pub struct ExecId(pub String);

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub enum ContainerStatus {
    Configured,
    Running,
    Exited,
    Unknown,
}

/// Configuration accumulated by the directives of a build and written into
/// every committed layer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImageConfig {
    pub cmd: Option<Vec<String>>,
    pub entrypoint: Option<Vec<String>>,
    /// `KEY=VALUE` entries, one per key.
    pub env: Vec<String>,
    pub exposed_ports: Set<String>,
    pub labels: Map<String, String>,
    pub user: Option<String>,
    pub volumes: Set<String>,
    pub working_dir: Option<String>,
}

impl ImageConfig {
    pub fn set_env(&mut self, key: &str, value: &str) {
        let entry = format!("{}={}", key, value);
        let prefix = format!("{}=", key);

        match self.env.iter_mut().find(|existing| existing.starts_with(&prefix)) {
            Some(existing) => *existing = entry,
            None => self.env.push(entry),
        }
    }
}

/// Everything the engine needs to create a container.
#[derive(Clone, Debug)]
pub struct ContainerSpec {
    pub image: ImageId,
    pub entrypoint: Option<Vec<String>>,
    pub command: Option<Vec<String>>,
    pub config: ImageConfig,
}

#[derive(Clone, Debug)]
pub struct CommitSpec {
    pub author: Option<String>,
    pub message: String,
    pub config: ImageConfig,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Test accounting of a build. `passed + failed == ran <= declared` holds at
/// every point.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct TestStats {
    pub declared: usize,
    pub ran: usize,
    pub passed: usize,
    pub failed: usize,
}

impl TestStats {
    pub fn declare(declared: usize) -> TestStats {
        TestStats {
            declared,
            ..Default::default()
        }
    }

    pub fn record(&mut self, passed: bool) {
        self.ran += 1;
        if passed {
            self.passed += 1;
        } else {
            self.failed += 1;
        }
    }
}

impl fmt::Display for TestStats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Run {} tests: {} PASS and {} FAIL",
            self.ran, self.passed, self.failed
        )
    }
}
