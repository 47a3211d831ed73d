use thiserror::Error;

/// Problems found in a build or test script before anything is sent to the
/// container engine.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("no directives found in {0}")]
    Empty(&'static str),

    #[error("test blocks must start with BEFORE, AFTER or AFTER_RUN (found {found})")]
    MisplacedAssertion { found: String },

    #[error("{marker} requires a target directive signature")]
    MissingTarget { marker: String },

    #[error("asserts must start with ASSERT_TRUE or ASSERT_FALSE (found {found})")]
    MalformedAssertion { found: String },

    #[error("condition {condition} accepts exactly {expected} argument(s) (found {found})")]
    ArgumentCount {
        condition: String,
        expected: usize,
        found: usize,
    },

    #[error("condition {0} is not supported, use one of USER_EXISTS, FILE_EXISTS, CURRENT_USER_IS, IS_INSTALLED, FILE_CONTAINS or PROCESS_EXISTS")]
    UnsupportedCondition(String),

    #[error("{directive} requires {requirement}")]
    InvalidArguments {
        directive: String,
        requirement: &'static str,
    },

    #[error("unable to expand {word:?}: {message}")]
    Substitution { word: String, message: String },
}

#[derive(Debug, Error)]
pub enum WeavingError {
    #[error("more than one {position} test block matches {signature}")]
    AmbiguousTarget {
        position: &'static str,
        signature: String,
    },

    #[error("test blocks could not be matched with any directive: {}", .0.join(", "))]
    UnmatchedTarget(Vec<String>),
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error(transparent)]
    Weaving(#[from] WeavingError),

    #[error("FROM must be the first directive and may only appear once (found {found} at step {step})")]
    Ordering { step: usize, found: String },

    #[error("unknown directive: {0:?}")]
    UnknownDirective(String),

    #[error("{0} is not supported")]
    UnsupportedDirective(String),

    #[error("invalid image reference {reference:?}: {reason}")]
    InvalidReference { reference: String, reason: String },

    #[error("build context: {0}")]
    Context(String),

    #[error("unable to {operation} ({directive})")]
    Engine {
        operation: &'static str,
        directive: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("command {command:?} returned a non-zero code: {code}")]
    RunFailed { command: String, code: i64 },

    #[error("assert {probe:?} failed, return code: {code}")]
    AssertionFailed { probe: String, code: i64 },

    #[error("container {container} was not running after {seconds}s")]
    ReadinessTimeout { container: String, seconds: u64 },

    #[error("{primary} (cleanup of container {container} also failed: {cleanup})")]
    Cleanup {
        primary: Box<BuildError>,
        container: String,
        cleanup: anyhow::Error,
    },
}

impl BuildError {
    pub fn engine<D: Into<String>>(
        operation: &'static str,
        directive: D,
        source: anyhow::Error,
    ) -> BuildError {
        BuildError::Engine {
            operation,
            directive: directive.into(),
            source,
        }
    }
}
