//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Compile every matcher and hasher the handler would build
//! - Validate value ranges (percentage thresholds, addresses, methods)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use axum::http::Method;
use thiserror::Error;
use url::Url;

use crate::config::schema::{
    CircuitBreakerSpec, CounterSpec, HealthCheckKind, LbAlgorithm, LoadBalancerSpec, ProxyConfig,
    UpstreamSpec,
};
use crate::load_balancer::hasher::Hasher;
use crate::load_balancer::upstream::{MAX_WEIGHT, SUPPORTED_SCHEMES};
use crate::routing::matcher::PathMatcher;
use crate::routing::params::ParamMatcher;

/// One semantic problem, located by its dotted field path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

#[derive(Default)]
struct Errors(Vec<ValidationError>);

impl Errors {
    fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.push(ValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    fn method(&mut self, field: &str, value: &str) {
        if Method::from_bytes(value.as_bytes()).is_err() {
            self.push(field, format!("invalid HTTP method {value:?}"));
        }
    }

    fn address(&mut self, field: &str, value: &str) {
        if value.parse::<SocketAddr>().is_err() {
            self.push(field, format!("invalid socket address {value:?}"));
        }
    }
}

/// Validate the whole configuration.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Errors::default();

    errors.address("listener.bind_address", &config.listener.bind_address);
    if config.observability.metrics_enabled {
        errors.address(
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    let handler = &config.handler;
    for (i, method) in handler.methods.iter().enumerate() {
        errors.method(&format!("handler.methods[{i}]"), method);
    }
    for (i, pattern) in handler.patterns.iter().enumerate() {
        if !pattern.starts_with('/') {
            errors.push(
                format!("handler.patterns[{i}]"),
                format!("route pattern {pattern:?} must start with '/'"),
            );
        }
    }
    for (i, lb) in handler.load_balancers.iter().enumerate() {
        validate_load_balancer(&mut errors, &format!("handler.load_balancers[{i}]"), lb);
    }

    if errors.0.is_empty() {
        Ok(())
    } else {
        Err(errors.0)
    }
}

fn validate_load_balancer(errors: &mut Errors, field: &str, lb: &LoadBalancerSpec) {
    if lb.path_matcher.is_none() && lb.path_matchers.is_empty() {
        errors.push(field, "at least one path matcher is required");
    }
    if let Some(spec) = &lb.path_matcher {
        if let Err(e) = PathMatcher::new(spec) {
            errors.push(format!("{field}.path_matcher"), e.to_string());
        }
    }
    for (i, spec) in lb.path_matchers.iter().enumerate() {
        if let Err(e) = PathMatcher::new(spec) {
            errors.push(format!("{field}.path_matchers[{i}]"), e.to_string());
        }
    }
    for (i, spec) in lb.param_matchers.iter().enumerate() {
        if spec.key.is_empty() {
            continue;
        }
        if let Err(e) = ParamMatcher::new(spec) {
            errors.push(format!("{field}.param_matchers[{i}]"), e.to_string());
        }
    }
    for (i, method) in lb.methods.iter().enumerate() {
        errors.method(&format!("{field}.methods[{i}]"), method);
    }

    let hashed = matches!(
        lb.algorithm,
        LbAlgorithm::DirectHash | LbAlgorithm::RingHash | LbAlgorithm::Maglev
    );
    if hashed && lb.hashers.is_empty() {
        errors.push(
            field,
            format!("{:?} requires at least one hasher", lb.algorithm),
        );
    }
    for (i, spec) in lb.hashers.iter().enumerate() {
        if let Err(e) = Hasher::new(spec) {
            errors.push(format!("{field}.hashers[{i}]"), e.to_string());
        }
    }

    for (i, upstream) in lb.upstreams.iter().enumerate() {
        validate_upstream(errors, &format!("{field}.upstreams[{i}]"), upstream);
    }
}

fn validate_upstream(errors: &mut Errors, field: &str, upstream: &UpstreamSpec) {
    match Url::parse(&upstream.url) {
        Ok(url) if url.host_str().is_none() => {
            errors.push(format!("{field}.url"), format!("{:?} has no host", upstream.url));
        }
        Ok(url) if !SUPPORTED_SCHEMES.contains(&url.scheme()) => {
            errors.push(
                format!("{field}.url"),
                format!("{:?}: scheme {:?} is not supported", upstream.url, url.scheme()),
            );
        }
        Ok(_) => {}
        Err(e) => errors.push(format!("{field}.url"), format!("{:?}: {e}", upstream.url)),
    }

    if upstream.weight > MAX_WEIGHT {
        errors.push(
            format!("{field}.weight"),
            format!("{} exceeds the maximum of {MAX_WEIGHT}", upstream.weight),
        );
    }

    if let Some(breaker) = &upstream.circuit_breaker {
        validate_breaker(errors, &format!("{field}.circuit_breaker"), breaker);
    }

    if upstream.enable_active {
        let check = &upstream.health_check;
        if check.kind == HealthCheckKind::Http {
            errors.method(&format!("{field}.health_check.method"), &check.method);
            if !check.path.starts_with('/') {
                errors.push(
                    format!("{field}.health_check.path"),
                    format!("probe path {:?} must start with '/'", check.path),
                );
            }
        }
    }
}

fn validate_breaker(errors: &mut Errors, field: &str, breaker: &CircuitBreakerSpec) {
    let windowed = breaker.counter != CounterSpec::Consecutive;
    if windowed {
        for (name, value) in [
            ("failure_threshold", breaker.failure_threshold),
            ("success_threshold", breaker.success_threshold),
        ] {
            if value > 100 {
                errors.push(
                    format!("{field}.{name}"),
                    format!("{value} is not a percentage"),
                );
            }
        }
    }

    match breaker.counter {
        CounterSpec::CountFixedWindow { samples } | CounterSpec::CountSlidingWindow { samples, .. }
            if samples == 0 =>
        {
            errors.push(format!("{field}.counter.samples"), "must be positive");
        }
        CounterSpec::TimeFixedWindow { window_width }
        | CounterSpec::TimeSlidingWindow { window_width, .. }
            if window_width == 0 =>
        {
            errors.push(format!("{field}.counter.window_width"), "must be positive");
        }
        _ => {}
    }
}
