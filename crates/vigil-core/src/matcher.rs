//! Glob-style pattern matching for process command lines.
//!
//! Watch patterns use a simplified wildcard syntax: `*` matches zero or
//! more characters, `?` matches exactly one, and everything else is
//! literal. Matching is case-insensitive and anchored: the whole command
//! line must match, not a substring.

use std::collections::HashMap;

use regex::{Regex, RegexBuilder};
use tracing::debug;

use crate::error::PatternError;
use crate::process::WatchPattern;

/// Compiles and caches glob watch patterns.
///
/// The cache is keyed by the literal pattern text and is purely an
/// optimization; a pattern that fails to compile is treated as
/// never-matching rather than surfaced to the caller.
#[derive(Debug, Default)]
pub struct GlobMatcher {
    compiled: HashMap<String, Option<Regex>>,
}

impl GlobMatcher {
    /// Creates a matcher with an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Compiles a glob pattern into an anchored, case-insensitive regex.
    ///
    /// # Errors
    ///
    /// Returns [`PatternError::InvalidPattern`] if the translated
    /// expression fails to compile.
    pub fn compile(pattern: &str) -> Result<Regex, PatternError> {
        RegexBuilder::new(&glob_to_regex(pattern))
            .case_insensitive(true)
            .build()
            .map_err(|source| PatternError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })
    }

    /// Returns true if `text` matches the glob `pattern`.
    pub fn matches(&mut self, text: &str, pattern: &str) -> bool {
        match self.get_or_compile(pattern) {
            Some(regex) => regex.is_match(text),
            None => false,
        }
    }

    /// Returns true if `text` matches any enabled pattern.
    pub fn matches_any(&mut self, text: &str, patterns: &[WatchPattern]) -> bool {
        patterns
            .iter()
            .filter(|p| p.enabled)
            .any(|p| self.matches(text, &p.pattern))
    }

    /// Drops all cached matchers. Subsequent calls recompile on demand.
    pub fn clear_cache(&mut self) {
        self.compiled.clear();
    }

    fn get_or_compile(&mut self, pattern: &str) -> Option<&Regex> {
        if !self.compiled.contains_key(pattern) {
            let compiled = match Self::compile(pattern) {
                Ok(regex) => Some(regex),
                Err(error) => {
                    debug!(pattern, %error, "Watch pattern failed to compile, treating as never-matching");
                    None
                }
            };
            self.compiled.insert(pattern.to_string(), compiled);
        }
        self.compiled.get(pattern).and_then(|c| c.as_ref())
    }
}

/// Translates a glob into an anchored regular expression.
fn glob_to_regex(glob: &str) -> String {
    let mut result = String::with_capacity(glob.len() + 8);
    result.push('^');
    for ch in glob.chars() {
        match ch {
            '*' => result.push_str(".*"),
            '?' => result.push('.'),
            '.' | '+' | '^' | '$' | '(' | ')' | '[' | ']' | '{' | '}' | '|' | '\\' => {
                result.push('\\');
                result.push(ch);
            }
            _ => result.push(ch),
        }
    }
    result.push('$');
    result
}
