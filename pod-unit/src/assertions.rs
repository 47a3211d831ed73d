use crate::{directives::Directive, errors::ScriptError, shell_word};

pub const ASSERT_TRUE: &str = "ASSERT_TRUE";
pub const ASSERT_FALSE: &str = "ASSERT_FALSE";

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Condition {
    UserExists,
    FileExists,
    CurrentUserIs,
    IsInstalled,
    FileContains,
    ProcessExists,
}

impl Condition {
    fn from_keyword(keyword: &str) -> Option<Condition> {
        match keyword.to_uppercase().as_str() {
            "USER_EXISTS" => Some(Condition::UserExists),
            "FILE_EXISTS" => Some(Condition::FileExists),
            "CURRENT_USER_IS" => Some(Condition::CurrentUserIs),
            "IS_INSTALLED" => Some(Condition::IsInstalled),
            "FILE_CONTAINS" => Some(Condition::FileContains),
            "PROCESS_EXISTS" => Some(Condition::ProcessExists),
            _ => None,
        }
    }

    fn keyword(self) -> &'static str {
        match self {
            Condition::UserExists => "USER_EXISTS",
            Condition::FileExists => "FILE_EXISTS",
            Condition::CurrentUserIs => "CURRENT_USER_IS",
            Condition::IsInstalled => "IS_INSTALLED",
            Condition::FileContains => "FILE_CONTAINS",
            Condition::ProcessExists => "PROCESS_EXISTS",
        }
    }

    fn arity(self) -> usize {
        match self {
            Condition::FileContains => 2,
            _ => 1,
        }
    }
}

/// Compiles an `ASSERT_TRUE`/`ASSERT_FALSE` record into a probe whose shell
/// command exits with 0 iff the assertion holds.
pub fn compile(assertion: &Directive) -> Result<Directive, ScriptError> {
    let negated = match assertion.name().as_str() {
        ASSERT_TRUE => false,
        ASSERT_FALSE => true,
        other => {
            return Err(ScriptError::MalformedAssertion {
                found: other.to_owned(),
            })
        }
    };

    let (keyword, args) = match assertion.args().split_first() {
        Some((keyword, args)) => (keyword, args),
        None => {
            return Err(ScriptError::MalformedAssertion {
                found: assertion.to_string(),
            })
        }
    };

    let condition = Condition::from_keyword(keyword)
        .ok_or_else(|| ScriptError::UnsupportedCondition(keyword.clone()))?;

    if args.len() != condition.arity() {
        return Err(ScriptError::ArgumentCount {
            condition: condition.keyword().to_owned(),
            expected: condition.arity(),
            found: args.len(),
        });
    }

    let args = args
        .iter()
        .map(|arg| shell_word::unquote(arg))
        .collect::<Result<Vec<_>, _>>()?;

    let not = if negated { "! " } else { "" };
    let command = match condition {
        Condition::FileExists => format!("test {}-f {}", not, shell_path(&args[0])),
        Condition::CurrentUserIs => {
            format!("test {}\"$(whoami)\" = {}", not, double_quote(&args[0]))
        }
        Condition::UserExists => wrap_negation(
            negated,
            format!("getent passwd {} 1>/dev/null 2>&1", double_quote(&args[0])),
        ),
        Condition::FileContains => wrap_negation(
            negated,
            format!("grep -q -e {} {}", double_quote(&args[1]), shell_path(&args[0])),
        ),
        Condition::IsInstalled => format!(
            "{}command -v {} 1>/dev/null 2>&1",
            not,
            double_quote(&args[0])
        ),
        Condition::ProcessExists => format!(
            "{}ps -o comm | grep -q {}",
            not,
            double_quote(&args[0])
        ),
    };

    Ok(Directive::probe(command))
}

fn wrap_negation(negated: bool, command: String) -> String {
    if negated {
        format!("! ({})", command)
    } else {
        command
    }
}

fn shell_path(path: &str) -> String {
    let safe = !path.is_empty()
        && path
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-+:@%=,".contains(c));

    if safe {
        path.to_owned()
    } else {
        format!("'{}'", path.replace('\'', r"'\''"))
    }
}

fn double_quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if matches!(c, '"' | '\\' | '$' | '`') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}
