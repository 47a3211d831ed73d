use std::mem;

use crate::{directives::Directive, errors::ScriptError, services::ScriptFrontend};

/// Line oriented parser shared by build scripts and test scripts.
pub struct BuildScriptFrontend;

impl BuildScriptFrontend {
    pub fn new() -> BuildScriptFrontend {
        BuildScriptFrontend
    }
}

impl ScriptFrontend for BuildScriptFrontend {
    fn parse(&mut self, source: &str) -> Result<Vec<Directive>, ScriptError> {
        let mut directives = Vec::new();
        let mut lines = source.lines().enumerate();

        while let Some((index, line)) = lines.next() {
            let line_num = index + 1;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let mut logical = String::new();
            let mut current = trimmed;
            loop {
                match current.strip_suffix('\\') {
                    Some(joined) => {
                        logical.push_str(joined.trim_end());
                        logical.push(' ');
                        match lines.next() {
                            Some((_, next)) => current = next.trim(),
                            None => break,
                        }
                    }
                    None => {
                        logical.push_str(current);
                        break;
                    }
                }
            }

            let (name, rest) = split_first_word(logical.trim());

            if rest.starts_with('[') {
                let args: Vec<String> =
                    serde_json::from_str(rest).map_err(|err| ScriptError::Syntax {
                        line: line_num,
                        message: format!("invalid JSON array {:?}: {}", rest, err),
                    })?;

                let tokens = Some(name.to_owned()).into_iter().chain(args);
                directives.push(Directive::new(tokens).in_exec_form());
                continue;
            }

            let mut tokens = vec![name.to_owned()];
            tokens.extend(split_words(rest, line_num)?);

            let heredoc_marker = tokens
                .last()
                .filter(|_| tokens.len() > 1)
                .and_then(|word| word.strip_prefix("<<"))
                .map(|marker| marker.trim_start_matches('-').trim_matches(|c| c == '\'' || c == '"'))
                .map(str::to_owned);

            let directive = match heredoc_marker {
                Some(marker) if !marker.is_empty() => {
                    tokens.pop();

                    let mut body = Vec::new();
                    let mut terminated = false;
                    for (_, line) in lines.by_ref() {
                        if line.trim() == marker {
                            terminated = true;
                            break;
                        }
                        body.push(line);
                    }

                    if !terminated {
                        return Err(ScriptError::Syntax {
                            line: line_num,
                            message: format!("heredoc is missing its closing {:?}", marker),
                        });
                    }

                    Directive::new(tokens).with_payload(body.join("\n"))
                }
                _ => Directive::new(tokens),
            };

            directives.push(directive);
        }

        Ok(directives)
    }
}

fn split_first_word(s: &str) -> (&str, &str) {
    match s.find(char::is_whitespace) {
        Some(pos) => (&s[..pos], s[pos..].trim_start()),
        None => (s, ""),
    }
}

/// Splits on unquoted whitespace. Quotes and escapes are kept in the words so
/// shell-word expansion can still see them.
fn split_words(s: &str, line_num: usize) -> Result<Vec<String>, ScriptError> {
    let mut words = Vec::new();
    let mut word = String::new();
    let mut quote = None;
    let mut chars = s.chars();

    while let Some(c) = chars.next() {
        match (quote, c) {
            (_, '\\') => {
                word.push(c);
                if let Some(escaped) = chars.next() {
                    word.push(escaped);
                }
            }
            (None, '\'') | (None, '"') => {
                quote = Some(c);
                word.push(c);
            }
            (Some(open), c) if c == open => {
                quote = None;
                word.push(c);
            }
            (None, c) if c.is_whitespace() => {
                if !word.is_empty() {
                    words.push(mem::take(&mut word));
                }
            }
            (_, c) => word.push(c),
        }
    }

    if let Some(open) = quote {
        return Err(ScriptError::Syntax {
            line: line_num,
            message: format!("unterminated {} quote", open),
        });
    }

    if !word.is_empty() {
        words.push(word);
    }

    Ok(words)
}
