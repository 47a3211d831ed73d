use log::debug;

use crate::{
    directives::Directive,
    errors::WeavingError,
    testspec::{Position, TestBlock, TestSpec},
};

/// Merges the probes of `BEFORE`/`AFTER` blocks into the main directive
/// stream around every directive whose signature starts with the block's
/// target. The original directives keep their relative order.
pub fn weave(
    directives: Vec<Directive>,
    tests: Option<&TestSpec>,
) -> Result<Vec<Directive>, WeavingError> {
    let tests = match tests {
        Some(tests) if !tests.is_empty() => tests,
        _ => return Ok(directives),
    };

    let mut matched = vec![false; tests.blocks.len()];
    let mut woven = Vec::with_capacity(directives.len() + tests.total_assertions());

    for directive in directives {
        let signature = directive.signature();

        let before = matching_block(tests, &mut matched, Position::Before, &signature)?;
        let after = matching_block(tests, &mut matched, Position::After, &signature)?;

        if let Some(block) = before {
            debug!("splicing {} before {}", block.describe(), signature);
            woven.extend(block.probes.iter().cloned());
        }

        woven.push(directive);

        if let Some(block) = after {
            debug!("splicing {} after {}", block.describe(), signature);
            woven.extend(block.probes.iter().cloned());
        }
    }

    let unmatched: Vec<String> = tests
        .blocks
        .iter()
        .zip(matched)
        .filter(|(block, matched)| block.position != Position::AfterRun && !matched)
        .map(|(block, _)| block.describe())
        .collect();

    if !unmatched.is_empty() {
        return Err(WeavingError::UnmatchedTarget(unmatched));
    }

    Ok(woven)
}

fn matching_block<'a>(
    tests: &'a TestSpec,
    matched: &mut [bool],
    position: Position,
    signature: &str,
) -> Result<Option<&'a TestBlock>, WeavingError> {
    let mut found = None;

    for (index, block) in tests.blocks.iter().enumerate() {
        if block.position != position {
            continue;
        }

        let target = match &block.target {
            Some(target) => target,
            None => continue,
        };

        if signature.starts_with(target.as_str()) {
            if found.is_some() {
                return Err(WeavingError::AmbiguousTarget {
                    position: position.as_str(),
                    signature: signature.to_owned(),
                });
            }
            matched[index] = true;
            found = Some(block);
        }
    }

    Ok(found)
}
