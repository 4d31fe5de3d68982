//! Request hashers for the hash-based selectors.
//!
//! # Responsibilities
//! - Extract one request attribute (client address, header, cookie,
//!   query value, path parameter)
//! - Hash it with xxh3 into a 64-bit key
//!
//! # Design Decisions
//! - A missing attribute hashes the empty string
//! - `None` means "this hasher cannot key the request, try the next one";
//!   only the client-address hasher returns it, when no address is known

use axum::http::header::COOKIE;
use axum::http::request::Parts;
use axum::http::HeaderName;
use xxhash_rust::xxh3::xxh3_64;

use crate::config::schema::{HasherKind, HasherSpec};
use crate::error::BuildError;
use crate::http::context::remote_addr;
use crate::routing::params::{header_value, path_param, query_value};

/// Maps a request to a 64-bit key.
#[derive(Debug, Clone)]
pub enum Hasher {
    ClientAddr,
    Header(HeaderName),
    Cookie(String),
    Query(String),
    PathParam(String),
}

impl Hasher {
    pub fn new(spec: &HasherSpec) -> Result<Self, BuildError> {
        Ok(match spec.kind {
            HasherKind::ClientAddr => Hasher::ClientAddr,
            HasherKind::Header => Hasher::Header(
                HeaderName::from_bytes(spec.key.as_bytes())
                    .map_err(|_| BuildError::BadHeaderName(spec.key.clone()))?,
            ),
            HasherKind::Cookie => Hasher::Cookie(spec.key.clone()),
            HasherKind::Query => Hasher::Query(spec.key.clone()),
            HasherKind::PathParam => Hasher::PathParam(spec.key.clone()),
        })
    }

    /// Hash key for the request, or `None` if this hasher cannot key it.
    pub fn hash(&self, parts: &Parts) -> Option<u64> {
        let value = match self {
            Hasher::ClientAddr => remote_addr(parts)?.ip().to_string(),
            Hasher::Header(name) => header_value(parts, name).unwrap_or_default(),
            Hasher::Cookie(name) => cookie_value(parts, name).unwrap_or_default(),
            Hasher::Query(key) => query_value(parts, key).unwrap_or_default(),
            Hasher::PathParam(key) => path_param(parts, key).unwrap_or_default().to_string(),
        };
        Some(xxh3_64(value.as_bytes()))
    }
}

pub fn build_hashers(specs: &[HasherSpec]) -> Result<Vec<Hasher>, BuildError> {
    specs.iter().map(Hasher::new).collect()
}

fn cookie_value(parts: &Parts, name: &str) -> Option<String> {
    parts
        .headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|line| line.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.trim_matches('"').to_string())
}
