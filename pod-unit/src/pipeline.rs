use log::{debug, info};

use crate::{
    directives::Directive,
    errors::{BuildError, ScriptError},
    frontends::BuildScriptFrontend,
    services::ScriptFrontend,
    testspec::TestSpec,
    weaver,
};

/// Parses a build script and its optional test script and weaves the
/// compiled probes into the directive stream.
pub fn prepare(
    script: &str,
    tests: Option<&str>,
) -> Result<(Vec<Directive>, Option<TestSpec>), BuildError> {
    let mut frontend = BuildScriptFrontend::new();

    let directives = frontend.parse(script)?;
    if directives.is_empty() {
        return Err(ScriptError::Empty("build script").into());
    }
    debug!("parsed {} directives", directives.len());

    let tests = match tests {
        Some(source) => {
            let records = frontend.parse(source)?;
            let tests = TestSpec::build(&records)?;
            info!(
                "found {} assertions in {} test blocks",
                tests.total_assertions(),
                tests.blocks.len()
            );
            Some(tests)
        }
        None => None,
    };

    let woven = weaver::weave(directives, tests.as_ref())?;

    Ok((woven, tests))
}
