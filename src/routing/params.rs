//! Parameter matchers over headers, query values and path parameters.
//!
//! # Responsibilities
//! - Read a named request parameter from its source
//! - Join multi-valued parameters with `,` before matching
//! - Evaluate the value with a compiled `StringMatcher`
//!
//! # Design Decisions
//! - A missing parameter never matches
//! - Specs with an empty key are skipped at build time

use axum::http::request::Parts;
use axum::http::HeaderName;

use crate::config::schema::{ParamKind, ParamMatcherSpec};
use crate::error::BuildError;
use crate::http::context::PathParams;
use crate::routing::matcher::StringMatcher;

/// All values of a header joined with `,`, or `None` when absent.
pub fn header_value(parts: &Parts, name: &HeaderName) -> Option<String> {
    let values: Vec<_> = parts
        .headers
        .get_all(name)
        .iter()
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
        .collect();
    join_values(values)
}

/// All values of a query key joined with `,`, or `None` when absent.
pub fn query_value(parts: &Parts, key: &str) -> Option<String> {
    let query = parts.uri.query()?;
    let values: Vec<_> = url::form_urlencoded::parse(query.as_bytes())
        .filter(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
        .collect();
    join_values(values)
}

/// A path parameter bound by the server, or `None` when absent.
pub fn path_param<'a>(parts: &'a Parts, key: &str) -> Option<&'a str> {
    parts.extensions.get::<PathParams>()?.get(key)
}

fn join_values(mut values: Vec<String>) -> Option<String> {
    match values.len() {
        0 => None,
        1 => values.pop(),
        _ => Some(values.join(",")),
    }
}

#[derive(Debug, Clone)]
enum Source {
    Header(HeaderName),
    Query(String),
    PathParam(String),
}

/// Predicate over one named request parameter.
#[derive(Debug, Clone)]
pub struct ParamMatcher {
    source: Source,
    matcher: StringMatcher,
}

impl ParamMatcher {
    pub fn new(spec: &ParamMatcherSpec) -> Result<Self, BuildError> {
        let source = match spec.kind {
            ParamKind::Header => Source::Header(
                HeaderName::from_bytes(spec.key.as_bytes())
                    .map_err(|_| BuildError::BadHeaderName(spec.key.clone()))?,
            ),
            ParamKind::Query => Source::Query(spec.key.clone()),
            ParamKind::PathParam => Source::PathParam(spec.key.clone()),
        };

        Ok(Self {
            source,
            matcher: StringMatcher::new(&spec.pattern, spec.match_type)?,
        })
    }

    pub fn matches(&self, parts: &Parts) -> bool {
        match &self.source {
            Source::Header(name) => header_value(parts, name)
                .map(|v| self.matcher.is_match(&v))
                .unwrap_or(false),
            Source::Query(key) => query_value(parts, key)
                .map(|v| self.matcher.is_match(&v))
                .unwrap_or(false),
            Source::PathParam(key) => match path_param(parts, key) {
                Some(v) if !v.is_empty() => self.matcher.is_match(v),
                _ => false,
            },
        }
    }
}

/// Build parameter matchers, skipping specs without a key.
pub fn build_param_matchers(specs: &[ParamMatcherSpec]) -> Result<Vec<ParamMatcher>, BuildError> {
    specs
        .iter()
        .filter(|spec| !spec.key.is_empty())
        .map(ParamMatcher::new)
        .collect()
}
