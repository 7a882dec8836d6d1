//! Configuration validation.
//!
//! Serde handles syntax; this module checks values and returns every problem
//! found, not just the first.

use std::fmt;
use std::net::SocketAddr;

use url::Url;

use crate::config::schema::FleetConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn check(errors: &mut Vec<ValidationError>, ok: bool, field: &'static str, message: impl Into<String>) {
    if !ok {
        errors.push(ValidationError {
            field,
            message: message.into(),
        });
    }
}

fn is_http_url(value: &str) -> bool {
    Url::parse(value)
        .map(|url| matches!(url.scheme(), "http" | "https"))
        .unwrap_or(false)
}

/// Validate a parsed configuration.
pub fn validate_config(config: &FleetConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check(
        &mut errors,
        config.listener.bind_address.parse::<SocketAddr>().is_ok(),
        "listener.bind_address",
        format!("'{}' is not a socket address", config.listener.bind_address),
    );
    check(&mut errors, config.listener.request_timeout_secs > 0, "listener.request_timeout_secs", "must be positive");
    check(&mut errors, config.http.request_timeout_ms > 0, "http.request_timeout_ms", "must be positive");
    check(
        &mut errors,
        config.retries.base_delay_ms <= config.retries.max_delay_ms,
        "retries.base_delay_ms",
        "must not exceed retries.max_delay_ms",
    );

    let coordinator = &config.coordinator;
    check(&mut errors, coordinator.poll_interval_ms > 0, "coordinator.poll_interval_ms", "must be positive");
    check(&mut errors, coordinator.max_batch_size > 0, "coordinator.max_batch_size", "must be positive");
    check(
        &mut errors,
        coordinator.max_concurrent_dispatch > 0,
        "coordinator.max_concurrent_dispatch",
        "must be positive",
    );
    check(&mut errors, coordinator.apply_attempts > 0, "coordinator.apply_attempts", "must be positive");
    for agent in &coordinator.agents {
        check(
            &mut errors,
            is_http_url(&agent.base_agent_uri),
            "coordinator.agents.base_agent_uri",
            format!("'{}' is not an http(s) URL", agent.base_agent_uri),
        );
    }

    let agent = &config.agent;
    check(&mut errors, !agent.group.is_empty(), "agent.group", "must not be empty");
    check(&mut errors, !agent.agent_id.is_empty(), "agent.agent_id", "must not be empty");
    check(
        &mut errors,
        is_http_url(&agent.base_agent_uri),
        "agent.base_agent_uri",
        format!("'{}' is not an http(s) URL", agent.base_agent_uri),
    );
    for uri in &agent.base_uris {
        check(
            &mut errors,
            is_http_url(uri),
            "agent.base_uris",
            format!("'{}' is not an http(s) URL", uri),
        );
    }
    check(&mut errors, agent.lock_timeout_ms > 0, "agent.lock_timeout_ms", "must be positive");
    check(&mut errors, agent.lost_after_failures > 0, "agent.lost_after_failures", "must be positive");
    check(
        &mut errors,
        agent.connection_poll_interval_ms > 0,
        "agent.connection_poll_interval_ms",
        "must be positive",
    );

    let testing = &config.testing;
    check(
        &mut errors,
        (0.0..=1.0).contains(&testing.apply_fail_rate),
        "testing.apply_fail_rate",
        "must be within [0, 1]",
    );
    check(
        &mut errors,
        (0.0..=1.0).contains(&testing.revert_fail_rate),
        "testing.revert_fail_rate",
        "must be within [0, 1]",
    );

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
