//! Load balancer fleet manager.
//!
//! A coordinator accepts upstream change requests and drives them onto a fleet
//! of agents; each agent renders the desired state into local load balancer
//! config files.

pub mod agent;
pub mod applier;
pub mod config;
pub mod coordination;
pub mod coordinator;
pub mod datastore;
pub mod http;
pub mod lifecycle;
pub mod models;
pub mod net;
pub mod observability;
pub mod resilience;

pub use agent::AgentService;
pub use config::FleetConfig;
pub use coordinator::Coordinator;
pub use lifecycle::Shutdown;
