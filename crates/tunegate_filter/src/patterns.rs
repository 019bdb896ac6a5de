//! Glob rules for force include/exclude.
//!
//! A rule string holds any number of glob patterns separated by newlines or
//! commas. An empty rule matches nothing.

use crate::error::{FilterError, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

/// Normalize a glob pattern for matching against relative paths.
///
/// Rules:
/// - Leading slashes are stripped (relative matching)
/// - Patterns without a path separator get "**/" prefix
pub fn normalize_glob_pattern(raw: &str) -> String {
    let pattern = raw.trim().trim_start_matches('/');

    if !pattern.contains('/') && !pattern.starts_with("**") {
        format!("**/{}", pattern)
    } else {
        pattern.to_string()
    }
}

/// Split a rule string into its individual, non-empty patterns.
pub fn split_rule(rule: &str) -> impl Iterator<Item = &str> {
    rule.split(|c| c == '\n' || c == ',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
}

/// Compiled path predicate.
#[derive(Debug, Clone)]
pub struct PathMatcher {
    set: GlobSet,
    patterns: Vec<String>,
}

impl PathMatcher {
    /// Compile a rule string. Invalid globs are configuration errors.
    pub fn compile(rule: &str) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        let mut patterns = Vec::new();
        for raw in split_rule(rule) {
            let normalized = normalize_glob_pattern(raw);
            let glob = GlobBuilder::new(&normalized)
                .literal_separator(true)
                .build()
                .map_err(|e| FilterError::Pattern(format!("{}: {}", raw, e)))?;
            builder.add(glob);
            patterns.push(normalized);
        }
        let set = builder
            .build()
            .map_err(|e| FilterError::Pattern(e.to_string()))?;
        Ok(Self { set, patterns })
    }

    /// Matcher that never matches.
    pub fn none() -> Self {
        Self {
            set: GlobSet::empty(),
            patterns: Vec::new(),
        }
    }

    pub fn is_match(&self, path: &str) -> bool {
        if self.patterns.is_empty() {
            return false;
        }
        self.set.is_match(path.trim_start_matches('/'))
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_basics() {
        assert_eq!(normalize_glob_pattern("data.txt"), "**/data.txt");
        assert_eq!(normalize_glob_pattern("*.min.js"), "**/*.min.js");
        assert_eq!(normalize_glob_pattern("vendor/*.py"), "vendor/*.py");
        assert_eq!(normalize_glob_pattern("/vendor/*.py"), "vendor/*.py");
        assert_eq!(normalize_glob_pattern("**/tests/**"), "**/tests/**");
    }

    #[test]
    fn split_on_newlines_and_commas() {
        let parts: Vec<_> = split_rule("*.py, *.rs\n\n  docs/**  ,").collect();
        assert_eq!(parts, vec!["*.py", "*.rs", "docs/**"]);
    }

    #[test]
    fn empty_rule_matches_nothing() {
        let matcher = PathMatcher::compile("").unwrap();
        assert!(matcher.is_empty());
        assert!(!matcher.is_match("a.txt"));
        assert!(!PathMatcher::none().is_match("anything/at/all.rs"));
    }

    #[test]
    fn matches_relative_paths() {
        let matcher = PathMatcher::compile("*.json\nvendor/**").unwrap();
        assert!(matcher.is_match("config.json"));
        assert!(matcher.is_match("deep/nested/config.json"));
        assert!(matcher.is_match("vendor/lib/x.c"));
        assert!(matcher.is_match("/vendor/lib/x.c"));
        assert!(!matcher.is_match("src/vendor.c"));
        assert!(!matcher.is_match("src/main.rs"));
    }

    #[test]
    fn star_does_not_cross_directories() {
        let matcher = PathMatcher::compile("src/*.rs").unwrap();
        assert!(matcher.is_match("src/lib.rs"));
        assert!(!matcher.is_match("src/nested/lib.rs"));
    }

    #[test]
    fn invalid_pattern_is_error() {
        let err = PathMatcher::compile("src/[abc").unwrap_err();
        assert!(matches!(err, FilterError::Pattern(_)));
    }
}
