//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Outbound call (check-in, global state, agent dispatch):
//!     → retries.rs (bounded attempts, retryable check)
//!     → backoff.rs (exponential delay with jitter between attempts)
//! ```
//!
//! # Design Decisions
//! - Every outbound call has a bounded attempt count; exhaustion propagates
//! - Per-call timeouts live on the HTTP clients, not here

pub mod backoff;
pub mod retries;

pub use retries::{RetryError, RetryPolicy};
