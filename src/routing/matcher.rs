//! String and path matching.
//!
//! # Responsibilities
//! - Compile a match pattern of any supported type once, at build time
//! - Match request paths, trimming and prepending prefixes around the match
//! - Rewrite paths from regex captures (`$1`, `${name}`)
//!
//! # Design Decisions
//! - Unknown match types fall back to prefix matching
//! - `Path` and `FilePath` are globs where `*` never crosses a separator
//! - POSIX regexes report leftmost-longest matches; the regex crate is
//!   leftmost-first, so the longest end is searched with an anchored copy
//! - A failed compile is a build error, never a runtime one

use std::path::Path;

use glob::MatchOptions;
use regex::{Captures, Regex};

use crate::config::schema::{MatchType, PathMatcherSpec};
use crate::error::BuildError;

const GLOB_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone)]
enum Pattern {
    Exact(String),
    Prefix(String),
    Suffix(String),
    Contains(String),
    Path(glob::Pattern),
    FilePath(glob::Pattern),
    Regex(Regex),
    RegexPosix {
        search: Regex,
        anchored: Regex,
    },
}

/// Compiled single-pattern string matcher.
#[derive(Debug, Clone)]
pub struct StringMatcher {
    pattern: Pattern,
}

impl StringMatcher {
    pub fn new(pattern: &str, match_type: MatchType) -> Result<Self, BuildError> {
        let bad = |source: crate::error::BoxError| BuildError::BadPathPattern {
            pattern: pattern.to_string(),
            source,
        };

        let pattern = match match_type {
            MatchType::Exact => Pattern::Exact(pattern.to_string()),
            MatchType::Prefix | MatchType::Unknown => Pattern::Prefix(pattern.to_string()),
            MatchType::Suffix => Pattern::Suffix(pattern.to_string()),
            MatchType::Contains => Pattern::Contains(pattern.to_string()),
            MatchType::Path => {
                Pattern::Path(glob::Pattern::new(pattern).map_err(|e| bad(Box::new(e)))?)
            }
            MatchType::FilePath => {
                Pattern::FilePath(glob::Pattern::new(pattern).map_err(|e| bad(Box::new(e)))?)
            }
            MatchType::Regex => Pattern::Regex(Regex::new(pattern).map_err(|e| bad(Box::new(e)))?),
            MatchType::RegexPosix => Pattern::RegexPosix {
                search: Regex::new(pattern).map_err(|e| bad(Box::new(e)))?,
                anchored: Regex::new(&format!("^(?:{pattern})$"))
                    .map_err(|e| bad(Box::new(e)))?,
            },
        };

        Ok(Self { pattern })
    }

    pub fn is_match(&self, target: &str) -> bool {
        match &self.pattern {
            Pattern::Exact(p) => target == p,
            Pattern::Prefix(p) => target.starts_with(p.as_str()),
            Pattern::Suffix(p) => target.ends_with(p.as_str()),
            Pattern::Contains(p) => target.contains(p.as_str()),
            Pattern::Path(p) => p.matches_with(target, GLOB_OPTIONS),
            Pattern::FilePath(p) => p.matches_path_with(Path::new(target), GLOB_OPTIONS),
            Pattern::Regex(re) => re.is_match(target),
            Pattern::RegexPosix { search, .. } => search.is_match(target),
        }
    }

    /// Expand `template` once per non-overlapping match and concatenate the
    /// results. Returns `None` for non-regex patterns.
    fn expand_all(&self, target: &str, template: &str) -> Option<String> {
        let mut out = String::new();
        match &self.pattern {
            Pattern::Regex(re) => {
                for caps in re.captures_iter(target) {
                    caps.expand(template, &mut out);
                }
            }
            Pattern::RegexPosix { search, anchored } => {
                for caps in longest_matches(search, anchored, target) {
                    caps.expand(template, &mut out);
                }
            }
            _ => return None,
        }
        Some(out)
    }
}

/// Leftmost-longest, non-overlapping matches of `search` in `target`.
///
/// A longest match never ends before the leftmost-first one, so candidate
/// ends are tried from the end of `target` down to `first.end()`. Each match
/// costs one anchored attempt per candidate end past that point.
fn longest_matches<'t>(search: &Regex, anchored: &Regex, target: &'t str) -> Vec<Captures<'t>> {
    let mut found = Vec::new();
    let mut pos = 0;

    while pos <= target.len() {
        let Some(first) = search.find_at(target, pos) else {
            break;
        };
        let start = first.start();

        let longest = (first.end()..=target.len())
            .rev()
            .filter(|end| target.is_char_boundary(*end))
            .find(|end| anchored.is_match(&target[start..*end]))
            .and_then(|end| anchored.captures(&target[start..end]).map(|c| (end, c)));

        let end = match longest {
            Some((end, caps)) => {
                found.push(caps);
                end
            }
            // The anchored form can disagree on look-around; keep the
            // leftmost-first match in that case.
            None => {
                if let Some(caps) = search.captures_at(target, start) {
                    found.push(caps);
                }
                first.end()
            }
        };

        pos = if end > start {
            end
        } else {
            match target[start..].chars().next() {
                Some(c) => start + c.len_utf8(),
                None => break,
            }
        };
    }

    found
}

/// Path matcher with prefix trimming, prefix appending and regex rewrite.
#[derive(Debug, Clone)]
pub struct PathMatcher {
    matcher: StringMatcher,
    rewrite: Option<String>,
    trim_prefix: String,
    append_prefix: String,
}

impl PathMatcher {
    pub fn new(spec: &PathMatcherSpec) -> Result<Self, BuildError> {
        Ok(Self {
            matcher: StringMatcher::new(&spec.pattern, spec.match_type)?,
            rewrite: (!spec.rewrite.is_empty()).then(|| spec.rewrite.clone()),
            trim_prefix: spec.trim_prefix.clone(),
            append_prefix: spec.append_prefix.clone(),
        })
    }

    /// Match `target`, returning the proxy path and whether it matched.
    pub fn match_path(&self, target: &str) -> (String, bool) {
        let trimmed = if self.trim_prefix.is_empty() {
            target
        } else {
            target.strip_prefix(self.trim_prefix.as_str()).unwrap_or(target)
        };

        let matched = self.matcher.is_match(trimmed);

        let path = match (&self.rewrite, matched) {
            (Some(template), true) => self
                .matcher
                .expand_all(trimmed, template)
                .unwrap_or_else(|| trimmed.to_string()),
            _ => trimmed.to_string(),
        };

        (format!("{}{}", self.append_prefix, path), matched)
    }
}

/// Build path matchers, putting the legacy single matcher first.
pub fn build_path_matchers(
    legacy: Option<&PathMatcherSpec>,
    specs: &[PathMatcherSpec],
) -> Result<Vec<PathMatcher>, BuildError> {
    legacy
        .into_iter()
        .chain(specs.iter())
        .map(PathMatcher::new)
        .collect()
}
