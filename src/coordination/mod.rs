//! Capabilities injected from the coordination substrate.
//!
//! Leader election and session tracking live outside this crate. Components
//! only consume a [`LeaderLatch`] and a [`ConnectionStateTracker`].

pub mod connection;
pub mod leader;

pub use connection::{ConnectionState, ConnectionStateTracker};
pub use leader::{LeaderLatch, StaticLeaderLatch};
