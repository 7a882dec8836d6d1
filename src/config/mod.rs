//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → FleetConfig (validated, immutable)
//!     → sections cloned into the coordinator or agent components
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AgentConfig, AuthConfig, CoordinatorConfig, FleetConfig, HttpClientConfig, ListenerConfig,
    ObservabilityConfig, RetryConfig, StaticAgentConfig, TestingConfig, TlsConfig,
};
