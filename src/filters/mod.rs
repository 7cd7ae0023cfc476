//! Include/exclude pattern filtering.
//!
//! Filter rules come straight from the raw command line so that their
//! relative order is preserved across `--include` and `--exclude`:
//! clap would collect each flag into its own vector and lose the interleaving.
//!
//! The chain is evaluated strictly left to right. The first rule seeds the
//! result (`true` for a matching include, `false` for a matching exclude)
//! and each following rule either ORs in an include match or ANDs out an
//! exclude match. Patterns apply to the base name of a key only.

use tracing::trace;

use crate::types::base_name;
use crate::types::error::S3bulkError;

pub mod glob;
mod filter_properties;
pub mod selector;

pub use glob::GlobPattern;
pub use selector::{ObjectSelector, Selection};

pub const INCLUDE_FLAG: &str = "--include";
pub const EXCLUDE_FLAG: &str = "--exclude";

pub const ERROR_MESSAGE_FILTER_DIR_INFO: &str =
    "--include or --exclude does not support format containing dir info";
pub const ERROR_MESSAGE_FILTER_NOT_RECURSIVE: &str =
    "--include or --exclude only work with --recursive";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    Include,
    Exclude,
}

impl FilterKind {
    fn flag(&self) -> &'static str {
        match self {
            FilterKind::Include => INCLUDE_FLAG,
            FilterKind::Exclude => EXCLUDE_FLAG,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FilterRule {
    pub kind: FilterKind,
    pattern: GlobPattern,
}

impl FilterRule {
    pub fn new(kind: FilterKind, pattern: &str) -> Result<Self, S3bulkError> {
        if pattern.contains('/') || pattern.contains(std::path::MAIN_SEPARATOR) {
            return Err(S3bulkError::InvalidPattern(
                ERROR_MESSAGE_FILTER_DIR_INFO.to_string(),
            ));
        }

        let normalized = pattern.replace("[!", "[^");
        Ok(Self {
            kind,
            pattern: GlobPattern::new(&normalized)?,
        })
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    fn is_match(&self, name: &str) -> bool {
        self.pattern.is_match(name)
    }
}

/// Ordered include/exclude rules. An empty chain matches everything.
#[derive(Debug, Clone, Default)]
pub struct FilterChain {
    rules: Vec<FilterRule>,
}

impl FilterChain {
    pub fn new(rules: Vec<FilterRule>) -> Self {
        Self { rules }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rules(&self) -> &[FilterRule] {
        &self.rules
    }

    /// Matches the base name of `key` (the part after the last `/`).
    pub fn matches(&self, key: &str) -> bool {
        let Some((first, rest)) = self.rules.split_first() else {
            return true;
        };

        let name = base_name(key);
        let mut selected = match first.kind {
            FilterKind::Include => first.is_match(name),
            FilterKind::Exclude => !first.is_match(name),
        };
        for rule in rest {
            selected = match rule.kind {
                FilterKind::Include => selected || rule.is_match(name),
                FilterKind::Exclude => selected && !rule.is_match(name),
            };
        }

        if !selected {
            trace!(key = key, "key filtered out by include/exclude rules.");
        }
        selected
    }
}

/// Scans raw command-line tokens for `--include`/`--exclude` in order of appearance.
///
/// Both `--include PATTERN` and `--include=PATTERN` are accepted. Tokens that
/// only start with a flag name (`--includes`) and empty patterns are ignored.
pub fn parse_filter_args<I, S>(args: I) -> Result<FilterChain, S3bulkError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let tokens: Vec<S> = args.into_iter().collect();
    let mut rules = Vec::new();

    let mut index = 0;
    while index < tokens.len() {
        let token = tokens[index].as_ref();
        index += 1;

        let kind = if token.starts_with(INCLUDE_FLAG) {
            FilterKind::Include
        } else if token.starts_with(EXCLUDE_FLAG) {
            FilterKind::Exclude
        } else {
            continue;
        };

        let pattern = if token == kind.flag() {
            let Some(next) = tokens.get(index) else {
                break;
            };
            index += 1;
            next.as_ref()
        } else if let Some(pattern) = token[kind.flag().len()..].strip_prefix('=') {
            pattern
        } else {
            continue;
        };

        if pattern.is_empty() {
            continue;
        }
        rules.push(FilterRule::new(kind, pattern)?);
    }

    Ok(FilterChain::new(rules))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(args: &[&str]) -> FilterChain {
        parse_filter_args(args).unwrap()
    }

    #[test]
    fn parse_both_forms_in_order() {
        let chain = chain(&[
            "s3bulk",
            "cp",
            "--include",
            "*.jpg",
            "--exclude=*2024*",
            "-r",
            "--include=a*",
        ]);
        let rules: Vec<_> = chain.rules().iter().map(|r| (r.kind, r.pattern())).collect();
        assert_eq!(
            rules,
            vec![
                (FilterKind::Include, "*.jpg"),
                (FilterKind::Exclude, "*2024*"),
                (FilterKind::Include, "a*"),
            ]
        );
    }

    #[test]
    fn parse_ignores_lookalike_tokens_and_empty_patterns() {
        assert!(chain(&["--includes", "*.jpg"]).is_empty());
        assert!(chain(&["--include="]).is_empty());
        assert!(chain(&["--exclude"]).is_empty());
        assert!(chain(&["--include", ""]).is_empty());
        assert!(chain(&[]).is_empty());
    }

    #[test]
    fn parse_normalizes_negated_class() {
        let chain = chain(&["--include", "[!a]*"]);
        assert_eq!(chain.rules()[0].pattern(), "[^a]*");
        assert!(chain.matches("b.txt"));
        assert!(!chain.matches("a.txt"));
    }

    #[test]
    fn parse_rejects_dir_info() {
        let err = parse_filter_args(["--include", "dir/*.jpg"]).unwrap_err();
        assert_eq!(err.to_string(), ERROR_MESSAGE_FILTER_DIR_INFO);
        assert!(parse_filter_args(["--exclude=a/b"]).is_err());
    }

    #[test]
    fn parse_rejects_broken_glob() {
        assert!(matches!(
            parse_filter_args(["--include", "[abc"]),
            Err(S3bulkError::InvalidPattern(_))
        ));
    }

    #[test]
    fn empty_chain_matches_everything() {
        assert!(FilterChain::default().matches("anything/at/all"));
    }

    #[test]
    fn first_rule_seeds_result() {
        let include_first = chain(&["--include", "*.jpg"]);
        assert!(include_first.matches("a.jpg"));
        assert!(!include_first.matches("a.png"));

        let exclude_first = chain(&["--exclude", "*.jpg"]);
        assert!(!exclude_first.matches("a.jpg"));
        assert!(exclude_first.matches("a.png"));
    }

    #[test]
    fn order_sensitive_evaluation() {
        let include_then_exclude = chain(&["--include", "*.jpg", "--exclude", "*2024*"]);
        assert!(include_then_exclude.matches("a.jpg"));
        assert!(!include_then_exclude.matches("a2024.jpg"));
        assert!(!include_then_exclude.matches("b.png"));

        let exclude_then_include = chain(&["--exclude", "*2024*", "--include", "*.jpg"]);
        assert!(exclude_then_include.matches("a2024.jpg"));
        assert!(exclude_then_include.matches("b.png"));
        assert!(!exclude_then_include.matches("x2024.png"));
    }

    #[test]
    fn matches_base_name_only() {
        let chain = chain(&["--include", "a*"]);
        assert!(chain.matches("dir/abc.txt"));
        assert!(!chain.matches("abc/def.txt"));
        assert!(!chain.matches("abc/"));
    }
}
