use std::{iter::Peekable, str::Chars};

use crate::errors::ScriptError;

/// Expands one shell word against a `KEY=VALUE` environment list and strips
/// its quoting.
///
/// Supports `$VAR`, `${VAR}`, `${VAR:-default}` and `${VAR:+alternative}`.
/// Single quotes are literal, double quotes still expand variables. Unset
/// variables expand to the empty string.
pub fn expand(word: &str, env: &[String]) -> Result<String, ScriptError> {
    let mut expander = Expander {
        chars: word.chars().peekable(),
        env,
        word,
        substitute: true,
    };

    expander.expand_word()
}

/// Strips the quoting of one shell word and leaves `$` references as they are.
pub fn unquote(word: &str) -> Result<String, ScriptError> {
    let mut expander = Expander {
        chars: word.chars().peekable(),
        env: &[],
        word,
        substitute: false,
    };

    expander.expand_word()
}

/// Looks a variable up in a `KEY=VALUE` list.
pub fn lookup<'a>(env: &'a [String], key: &str) -> Option<&'a str> {
    env.iter().rev().find_map(|entry| {
        let mut split = entry.splitn(2, '=');
        match (split.next(), split.next()) {
            (Some(name), Some(value)) if name == key => Some(value),
            _ => None,
        }
    })
}

struct Expander<'a> {
    chars: Peekable<Chars<'a>>,
    env: &'a [String],
    word: &'a str,
    substitute: bool,
}

impl<'a> Expander<'a> {
    fn expand_word(&mut self) -> Result<String, ScriptError> {
        let mut result = String::new();

        while let Some(c) = self.chars.next() {
            match c {
                '\'' => result.push_str(&self.single_quoted()?),
                '"' => result.push_str(&self.double_quoted()?),
                '\\' => result.push(self.chars.next().unwrap_or('\\')),
                '$' => result.push_str(&self.variable()?),
                c => result.push(c),
            }
        }

        Ok(result)
    }

    fn single_quoted(&mut self) -> Result<String, ScriptError> {
        let mut result = String::new();

        loop {
            match self.chars.next() {
                Some('\'') => return Ok(result),
                Some(c) => result.push(c),
                None => return Err(self.error("unterminated single quote")),
            }
        }
    }

    fn double_quoted(&mut self) -> Result<String, ScriptError> {
        let mut result = String::new();

        loop {
            match self.chars.next() {
                Some('"') => return Ok(result),
                Some('\\') => match self.chars.next() {
                    Some(c @ '$') | Some(c @ '"') | Some(c @ '\\') | Some(c @ '`') => {
                        result.push(c)
                    }
                    Some(c) => {
                        result.push('\\');
                        result.push(c);
                    }
                    None => return Err(self.error("unterminated double quote")),
                },
                Some('$') => result.push_str(&self.variable()?),
                Some(c) => result.push(c),
                None => return Err(self.error("unterminated double quote")),
            }
        }
    }

    fn variable(&mut self) -> Result<String, ScriptError> {
        if !self.substitute {
            return Ok("$".to_owned());
        }

        match self.chars.peek() {
            Some('{') => {
                self.chars.next();
                self.braced_variable()
            }
            Some(c) if c.is_ascii_alphabetic() || *c == '_' => {
                let name = self.name();
                Ok(self.value(&name).unwrap_or_default().to_owned())
            }
            _ => Ok("$".to_owned()),
        }
    }

    fn braced_variable(&mut self) -> Result<String, ScriptError> {
        let name = self.name();
        if name.is_empty() {
            return Err(self.error("bad substitution"));
        }

        match self.chars.next() {
            Some('}') => Ok(self.value(&name).unwrap_or_default().to_owned()),
            Some(':') => {
                let modifier = self
                    .chars
                    .next()
                    .ok_or_else(|| self.error("missing '}'"))?;

                let mut nested = String::new();
                let mut depth = 0;
                loop {
                    match self.chars.next() {
                        Some('}') if depth == 0 => break,
                        Some(c) => {
                            match c {
                                '{' => depth += 1,
                                '}' => depth -= 1,
                                _ => (),
                            }
                            nested.push(c);
                        }
                        None => return Err(self.error("missing '}'")),
                    }
                }

                let value = self.value(&name).filter(|value| !value.is_empty());
                match modifier {
                    '-' => match value {
                        Some(value) => Ok(value.to_owned()),
                        None => expand(&nested, self.env),
                    },
                    '+' => match value {
                        Some(_) => expand(&nested, self.env),
                        None => Ok(String::new()),
                    },
                    other => Err(self.error(&format!("unsupported modifier ':{}'", other))),
                }
            }
            Some(_) => Err(self.error("bad substitution")),
            None => Err(self.error("missing '}'")),
        }
    }

    fn name(&mut self) -> String {
        let mut name = String::new();
        while let Some(c) = self.chars.peek() {
            if c.is_ascii_alphanumeric() || *c == '_' {
                name.push(*c);
                self.chars.next();
            } else {
                break;
            }
        }
        name
    }

    fn value(&self, name: &str) -> Option<&'a str> {
        lookup(self.env, name)
    }

    fn error(&self, message: &str) -> ScriptError {
        ScriptError::Substitution {
            word: self.word.to_owned(),
            message: message.to_owned(),
        }
    }
}
