use std::fmt;

use crate::errors::BuildError;

const MAX_TAG_LENGTH: usize = 128;

/// A validated `repository[:tag]` target name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reference {
    pub repository: String,
    pub tag: Option<String>,
}

impl Reference {
    pub fn parse(reference: &str) -> Result<Reference, BuildError> {
        let invalid = |reason: &str| BuildError::InvalidReference {
            reference: reference.to_owned(),
            reason: reason.to_owned(),
        };

        // A colon followed by a slash belongs to a registry port, not a tag.
        let (repository, tag) = match reference.rfind(':') {
            Some(index) if !reference[index + 1..].contains('/') => {
                (&reference[..index], Some(&reference[index + 1..]))
            }
            _ => (reference, None),
        };

        validate_repository(repository).map_err(invalid)?;
        if let Some(tag) = tag {
            validate_tag(tag).map_err(invalid)?;
        }

        Ok(Reference {
            repository: repository.to_owned(),
            tag: tag.map(str::to_owned),
        })
    }

    /// The string handed to the engine when tagging.
    pub fn tagged(&self) -> String {
        format!("{}:{}", self.repository, self.tag.as_deref().unwrap_or("latest"))
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.tag {
            Some(tag) => write!(f, "{}:{}", self.repository, tag),
            None => f.write_str(&self.repository),
        }
    }
}

fn validate_repository(repository: &str) -> Result<(), &'static str> {
    if repository.is_empty() {
        return Err("repository name must not be empty");
    }

    let mut components: Vec<&str> = repository.split('/').collect();
    if components.len() > 1 {
        let host = components[0];
        if host.contains('.') || host.contains(':') || host == "localhost" {
            validate_registry_host(host)?;
            components.remove(0);
        }
    }

    for component in components {
        validate_path_component(component)?;
    }

    Ok(())
}

fn validate_registry_host(host: &str) -> Result<(), &'static str> {
    let mut split = host.splitn(2, ':');
    let name = split.next().unwrap_or_default();
    if let Some(port) = split.next() {
        if port.is_empty() || !port.chars().all(|c| c.is_ascii_digit()) {
            return Err("registry port must be numeric");
        }
    }

    let valid = !name.is_empty()
        && name
            .split('.')
            .all(|label| !label.is_empty() && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'));

    if valid {
        Ok(())
    } else {
        Err("invalid registry host")
    }
}

/// `[a-z0-9]+` runs joined by a single `.`, `_`, `__` or one or more `-`.
fn validate_path_component(component: &str) -> Result<(), &'static str> {
    const INVALID: &str =
        "repository components must be lowercase alphanumerics separated by '.', '_', '__' or '-'";

    let bytes = component.as_bytes();
    if bytes.is_empty() {
        return Err(INVALID);
    }

    let is_alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    if !is_alnum(bytes[0]) || !is_alnum(bytes[bytes.len() - 1]) {
        return Err(INVALID);
    }

    let mut index = 0;
    while index < bytes.len() {
        if is_alnum(bytes[index]) {
            index += 1;
            continue;
        }

        let start = index;
        while index < bytes.len() && !is_alnum(bytes[index]) {
            index += 1;
        }

        let separator = &component[start..index];
        let valid = separator == "."
            || separator == "_"
            || separator == "__"
            || separator.bytes().all(|b| b == b'-');
        if !valid {
            return Err(INVALID);
        }
    }

    Ok(())
}

fn validate_tag(tag: &str) -> Result<(), &'static str> {
    let mut chars = tag.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphanumeric() || first == '_' => chars
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-'),
        _ => false,
    };

    if !valid {
        Err("tag must match [A-Za-z0-9_][A-Za-z0-9_.-]*")
    } else if tag.len() > MAX_TAG_LENGTH {
        Err("tag must be at most 128 characters")
    } else {
        Ok(())
    }
}
