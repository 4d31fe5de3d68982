//! Request filter deciding whether a load balancer claims a request.
//!
//! # Responsibilities
//! - Method and host allow-lists
//! - Parameter matchers (all must match)
//! - Path matchers (first match yields the proxy path)

use axum::http::header::HOST;
use axum::http::request::Parts;
use axum::http::Method;

use crate::config::schema::LoadBalancerSpec;
use crate::error::BuildError;
use crate::routing::matcher::{build_path_matchers, PathMatcher};
use crate::routing::params::{build_param_matchers, ParamMatcher};

#[derive(Debug, Clone)]
pub struct RequestFilter {
    methods: Vec<Method>,
    hosts: Vec<String>,
    params: Vec<ParamMatcher>,
    paths: Vec<PathMatcher>,
}

impl RequestFilter {
    pub fn from_spec(spec: &LoadBalancerSpec) -> Result<Self, BuildError> {
        let methods = spec
            .methods
            .iter()
            .map(|m| {
                Method::from_bytes(m.as_bytes()).map_err(|_| BuildError::BadMethod(m.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            methods,
            hosts: spec.hosts.clone(),
            params: build_param_matchers(&spec.param_matchers)?,
            paths: build_path_matchers(spec.path_matcher.as_ref(), &spec.path_matchers)?,
        })
    }

    /// The proxy path for a claimed request, or `None` to decline it.
    pub fn proxy_path(&self, parts: &Parts) -> Option<String> {
        if !self.methods.is_empty() && !self.methods.contains(&parts.method) {
            return None;
        }

        if !self.hosts.is_empty() {
            let host = request_host(parts)?;
            if !self.hosts.iter().any(|h| h == host) {
                return None;
            }
        }

        if !self.params.iter().all(|m| m.matches(parts)) {
            return None;
        }

        let path = parts.uri.path();
        self.paths.iter().find_map(|m| match m.match_path(path) {
            (proxy_path, true) => Some(proxy_path),
            _ => None,
        })
    }
}

/// Host of the inbound request: the `Host` header, else the URI authority.
pub fn request_host(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(HOST)
        .and_then(|h| h.to_str().ok())
        .or_else(|| parts.uri.authority().map(|a| a.as_str()))
}
