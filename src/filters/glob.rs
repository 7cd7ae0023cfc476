//! Shell-style glob matching on a single path component.
//!
//! Supported syntax: `*` (any run of characters), `?` (one character),
//! `[seq]`, `[^seq]` with `a-z` ranges, and `\` to escape the next character.
//! Patterns are translated to an anchored regular expression once, at parse time.

use fancy_regex::Regex;

use crate::types::error::S3bulkError;

#[derive(Debug, Clone)]
pub struct GlobPattern {
    pattern: String,
    regex: Regex,
}

impl GlobPattern {
    pub fn new(pattern: &str) -> Result<Self, S3bulkError> {
        let translated = translate(pattern)?;
        let regex = Regex::new(&translated)
            .map_err(|e| S3bulkError::InvalidPattern(format!("{pattern}: {e}")))?;

        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    pub fn is_match(&self, name: &str) -> bool {
        // Only backtracking limits can fail here; the translated regex never backtracks.
        self.regex.is_match(name).unwrap_or(false)
    }
}

fn hex_escape(c: char) -> String {
    format!("\\x{{{:x}}}", c as u32)
}

fn translate(pattern: &str) -> Result<String, S3bulkError> {
    let invalid = |reason: &str| S3bulkError::InvalidPattern(format!("{pattern}: {reason}"));

    let mut regex = String::from("(?s)^");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => regex.push_str("[^/]*"),
            '?' => regex.push_str("[^/]"),
            '\\' => {
                let escaped = chars.next().ok_or_else(|| invalid("trailing backslash"))?;
                regex.push_str(&hex_escape(escaped));
            }
            '[' => {
                regex.push('[');
                if chars.peek() == Some(&'^') {
                    chars.next();
                    regex.push('^');
                }

                let mut members = 0;
                loop {
                    let member = match chars.next() {
                        None => return Err(invalid("unterminated character class")),
                        // `]` right after `[` or `[^` is a literal.
                        Some(']') if members > 0 => break,
                        Some('\\') => chars.next().ok_or_else(|| invalid("trailing backslash"))?,
                        Some(member) => member,
                    };
                    regex.push_str(&hex_escape(member));
                    members += 1;

                    if chars.peek() == Some(&'-') {
                        chars.next();
                        let upper = match chars.next() {
                            None => return Err(invalid("unterminated character class")),
                            Some(']') => {
                                regex.push_str(&hex_escape('-'));
                                break;
                            }
                            Some('\\') => {
                                chars.next().ok_or_else(|| invalid("trailing backslash"))?
                            }
                            Some(upper) => upper,
                        };
                        if upper < member {
                            return Err(invalid("invalid character range"));
                        }
                        regex.push('-');
                        regex.push_str(&hex_escape(upper));
                    }
                }
                regex.push(']');
            }
            _ => regex.push_str(&fancy_regex::escape(&c.to_string())),
        }
    }
    regex.push('$');

    Ok(regex)
}
