//! Configuration schema definitions.
//!
//! One file configures either process role. Sections the role does not use are
//! ignored. All types derive Serde traits for deserialization from TOML.

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct FleetConfig {
    /// HTTP listener (bind address, TLS).
    pub listener: ListenerConfig,

    /// Outbound HTTP client settings.
    pub http: HttpClientConfig,

    /// Optional shared key attached to requests.
    pub auth: AuthConfig,

    /// Backoff shared by every retrying call.
    pub retries: RetryConfig,

    /// Logging and metrics.
    pub observability: ObservabilityConfig,

    /// Coordinator role settings.
    pub coordinator: CoordinatorConfig,

    /// Agent role settings.
    pub agent: AgentConfig,

    /// Fault injection for the agent apply path.
    pub testing: TestingConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,

    /// Per-request timeout for inbound requests in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            tls: None,
            request_timeout_secs: 120,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpClientConfig {
    /// Total timeout of one outbound call in milliseconds.
    pub request_timeout_ms: u64,

    /// Connection establishment timeout in milliseconds.
    pub connect_timeout_ms: u64,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 10_000,
            connect_timeout_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AuthConfig {
    /// Shared key. When set, inbound calls must carry `?authkey=<key>` and
    /// outbound calls attach it.
    pub key: Option<String>,
}

/// Backoff configuration. Attempt counts are set per call site.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Delay after the first failed attempt in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay between attempts in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins when set.
    pub log_level: String,

    /// Emit logs as JSON lines.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Coordinator role configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Whether this replica holds leadership. Leader election itself is external.
    pub leader: bool,

    /// Worker poll interval in milliseconds.
    pub poll_interval_ms: u64,

    /// Maximum requests dispatched per worker tick.
    pub max_batch_size: usize,

    /// Maximum concurrent agent calls per request.
    pub max_concurrent_dispatch: usize,

    /// Attempts per agent for an apply call.
    pub apply_attempts: u32,

    /// Attempts per agent for a revert call.
    pub revert_attempts: u32,

    /// How long terminal responses are kept, in seconds.
    pub response_retention_secs: u64,

    /// How long a shutting-down agent is kept waiting, in milliseconds.
    pub drain_wait_ms: u64,

    /// Upper bound of the wait time handed to draining agents, in milliseconds.
    pub drain_poll_ms: u64,

    /// Optional JSON snapshot of the authoritative state.
    pub state_file: Option<String>,

    /// Agents known before any check-in.
    pub agents: Vec<StaticAgentConfig>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            leader: true,
            poll_interval_ms: 1_000,
            max_batch_size: 10,
            max_concurrent_dispatch: 8,
            apply_attempts: 3,
            revert_attempts: 3,
            response_retention_secs: 24 * 60 * 60,
            drain_wait_ms: 30_000,
            drain_poll_ms: 5_000,
            state_file: None,
            agents: Vec::new(),
        }
    }
}

/// An agent registered from configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StaticAgentConfig {
    pub group: String,
    pub agent_id: String,
    pub base_agent_uri: String,
}

/// Agent role configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Load balancer group this agent serves.
    pub group: String,

    /// Unique agent id.
    pub agent_id: String,

    /// URI the coordinator uses to reach this agent.
    pub base_agent_uri: String,

    pub domain: Option<String>,

    /// Coordinator base URIs. The first one is used.
    pub base_uris: Vec<String>,

    /// Whether this agent holds leadership within its group.
    pub leader: bool,

    /// Bounded wait for the apply lock in milliseconds.
    pub lock_timeout_ms: u64,

    pub max_notify_attempts: u32,

    pub max_global_state_attempts: u32,

    /// Overall deadline of a check-in loop in milliseconds.
    pub check_in_timeout_ms: u64,

    /// Abort the process if the startup bootstrap fails.
    pub exit_on_startup_error: bool,

    pub register_on_startup: bool,

    pub deregister_on_graceful_shutdown: bool,

    /// File containing `RUNNING` while the agent is up.
    pub state_file: Option<String>,

    /// File removed on graceful shutdown.
    pub remove_file_on_shutdown: Option<String>,

    /// Interval of the coordinator connection probe in milliseconds.
    pub connection_poll_interval_ms: u64,

    /// Consecutive failed probes before the connection is considered lost.
    pub lost_after_failures: u32,

    /// Directory holding one rendered config file per service.
    pub config_dir: String,

    /// Command validating the whole config set (run with `sh -c`).
    pub check_command: Option<String>,

    /// Command reloading the load balancer (run with `sh -c`).
    pub reload_command: Option<String>,

    /// Watch `config_dir` for edits made outside of an apply.
    pub watch_config_dir: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            group: "default".to_string(),
            agent_id: "agent-1".to_string(),
            base_agent_uri: "http://127.0.0.1:8882".to_string(),
            domain: None,
            base_uris: vec!["http://127.0.0.1:8080".to_string()],
            leader: false,
            lock_timeout_ms: 5_000,
            max_notify_attempts: 3,
            max_global_state_attempts: 5,
            check_in_timeout_ms: 60_000,
            exit_on_startup_error: true,
            register_on_startup: true,
            deregister_on_graceful_shutdown: true,
            state_file: None,
            remove_file_on_shutdown: None,
            connection_poll_interval_ms: 5_000,
            lost_after_failures: 3,
            config_dir: "/etc/lbfleet/conf.d".to_string(),
            check_command: None,
            reload_command: None,
            watch_config_dir: false,
        }
    }
}

/// Fault injection for the apply gate. Disabled means no overhead.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TestingConfig {
    pub enabled: bool,
    pub apply_delay_ms: u64,
    pub revert_delay_ms: u64,
    /// Probability in [0, 1] that an apply fails with a server error.
    pub apply_fail_rate: f32,
    /// Probability in [0, 1] that a revert fails with a server error.
    pub revert_fail_rate: f32,
}
