//! Command line splitting.

use crate::error::{ShellError, ShellResult};

/// Split a line into words on whitespace.
///
/// Double quotes group words and may contain `\"` and `\\` escapes.
///
/// # Errors
///
/// Returns [`ShellError::Tokenize`] for an unterminated quote or a trailing
/// escape.
pub fn tokenize(line: &str) -> ShellResult<Vec<String>> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quoted = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                quoted = !quoted;
                in_word = true;
            }
            '\\' if quoted => match chars.next() {
                Some(escaped @ ('"' | '\\')) => current.push(escaped),
                Some(other) => {
                    current.push('\\');
                    current.push(other);
                }
                None => return Err(ShellError::Tokenize("trailing escape".into())),
            },
            c if c.is_whitespace() && !quoted => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                current.push(c);
                in_word = true;
            }
        }
    }

    if quoted {
        return Err(ShellError::Tokenize("unterminated quote".into()));
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}
