use log::{debug, warn};
use std::fmt;

use crate::{assertions, directives::Directive, errors::ScriptError};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Position {
    Before,
    After,
    AfterRun,
}

impl Position {
    /// Recognizes a block marker, with or without the leading `@`.
    fn from_marker(name: &str) -> Option<Position> {
        match name.trim_start_matches('@') {
            "BEFORE" => Some(Position::Before),
            "AFTER" => Some(Position::After),
            "AFTER_RUN" => Some(Position::AfterRun),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Position::Before => "BEFORE",
            Position::After => "AFTER",
            Position::AfterRun => "AFTER_RUN",
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A group of assertions anchored before or after the directives matching
/// `target`, or to the running final image.
#[derive(Clone, Debug)]
pub struct TestBlock {
    pub position: Position,
    pub target: Option<String>,
    pub assertions: Vec<Directive>,
    pub probes: Vec<Directive>,
}

impl TestBlock {
    fn open(position: Position, target: Option<String>) -> TestBlock {
        TestBlock {
            position,
            target,
            assertions: Vec::new(),
            probes: Vec::new(),
        }
    }

    pub fn describe(&self) -> String {
        match &self.target {
            Some(target) => format!("{} {}", self.position, target),
            None => self.position.to_string(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct TestSpec {
    pub blocks: Vec<TestBlock>,
}

impl TestSpec {
    /// Builds the test blocks out of a parsed test script, compiling every
    /// assertion into its probe on the way.
    pub fn build(records: &[Directive]) -> Result<TestSpec, ScriptError> {
        let first = records.first().ok_or(ScriptError::Empty("test script"))?;
        if Position::from_marker(&first.name()).is_none() {
            return Err(ScriptError::MisplacedAssertion {
                found: first.name(),
            });
        }

        let mut blocks = Vec::new();
        let mut current: Option<TestBlock> = None;

        for record in records {
            let name = record.name();

            match Position::from_marker(&name) {
                Some(position) => {
                    if let Some(block) = current.take().filter(|block| !block.assertions.is_empty()) {
                        blocks.push(block);
                    }

                    let target = match (position, record.args().first()) {
                        (Position::AfterRun, Some(target)) => {
                            warn!("ignoring target {:?} of {} block", target, name);
                            None
                        }
                        (Position::AfterRun, None) => None,
                        (_, Some(target)) => Some(target.to_uppercase()),
                        (_, None) => return Err(ScriptError::MissingTarget { marker: name }),
                    };

                    current = Some(TestBlock::open(position, target));
                }
                None => {
                    let probe = assertions::compile(record)?;
                    debug!("compiled {} into {}", record, probe);

                    if let Some(block) = current.as_mut() {
                        block.assertions.push(record.clone());
                        block.probes.push(probe);
                    }
                }
            }
        }

        blocks.extend(current);

        Ok(TestSpec { blocks })
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn total_assertions(&self) -> usize {
        self.blocks.iter().map(|block| block.assertions.len()).sum()
    }

    pub fn post_build_blocks(&self) -> impl Iterator<Item = &TestBlock> {
        self.blocks
            .iter()
            .filter(|block| block.position == Position::AfterRun)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{frontends::BuildScriptFrontend, services::ScriptFrontend};

    fn build(source: &str) -> Result<TestSpec, ScriptError> {
        let records = BuildScriptFrontend::new().parse(source).unwrap();
        TestSpec::build(&records)
    }

    #[test]
    fn groups_assertions_into_blocks() {
        let spec = build(
            "@BEFORE RUN_APK\nASSERT_FALSE IS_INSTALLED curl\n\
             AFTER run_apk\nASSERT_TRUE IS_INSTALLED curl\nASSERT_TRUE FILE_EXISTS /usr/bin/curl\n\
             AFTER_RUN\nASSERT_TRUE PROCESS_EXISTS nginx\n",
        )
        .unwrap();

        assert_eq!(spec.blocks.len(), 3);
        assert_eq!(spec.blocks[0].position, Position::Before);
        assert_eq!(spec.blocks[1].target.as_deref(), Some("RUN_APK"));
        assert_eq!(spec.blocks[1].assertions.len(), 2);
        assert_eq!(spec.blocks[1].probes.len(), 2);
        assert_eq!(
            spec.blocks[1].probes[1].payload(),
            Some("test -f /usr/bin/curl")
        );
        assert_eq!(spec.blocks[2].position, Position::AfterRun);
        assert_eq!(spec.blocks[2].target, None);
        assert_eq!(spec.total_assertions(), 4);
        assert_eq!(spec.post_build_blocks().count(), 1);
    }

    #[test]
    fn quoted_arguments_lose_their_quotes() {
        let spec = build(
            "AFTER_RUN\n\
             ASSERT_TRUE FILE_CONTAINS /etc/nginx.conf \"worker_processes auto\"\n\
             ASSERT_TRUE FILE_EXISTS '/srv/my site/index.html'\n",
        )
        .unwrap();

        let probes = &spec.blocks[0].probes;
        assert_eq!(
            probes[0].payload(),
            Some(r#"grep -q -e "worker_processes auto" /etc/nginx.conf"#)
        );
        assert_eq!(
            probes[1].payload(),
            Some("test -f '/srv/my site/index.html'")
        );
    }

    #[test]
    fn drops_empty_blocks_but_keeps_the_last_one() {
        let spec = build("BEFORE RUN\nAFTER RUN\nASSERT_TRUE FILE_EXISTS /etc/passwd\n").unwrap();
        assert_eq!(spec.blocks.len(), 1);
        assert_eq!(spec.blocks[0].position, Position::After);
    }

    #[test]
    fn first_record_must_open_a_block() {
        assert!(matches!(
            build("ASSERT_TRUE FILE_EXISTS /etc/passwd\n"),
            Err(ScriptError::MisplacedAssertion { .. })
        ));
        assert!(matches!(build("# nothing\n"), Err(ScriptError::Empty(_))));
    }

    #[test]
    fn compilation_failures_abort() {
        assert!(matches!(
            build("AFTER RUN\nASSERT_TRUE FILE_EXISTS\n"),
            Err(ScriptError::ArgumentCount { .. })
        ));
        assert!(matches!(
            build("AFTER RUN\nRUN echo hi\n"),
            Err(ScriptError::MalformedAssertion { .. })
        ));
        assert!(matches!(
            build("AFTER\nASSERT_TRUE FILE_EXISTS /etc/passwd\n"),
            Err(ScriptError::MissingTarget { .. })
        ));
    }
}
