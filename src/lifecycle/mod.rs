//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Fatal errors (supervisor.rs):
//!     component → AbortHandle → Supervisor → log, flush grace, Shutdown::trigger → exit 1
//!
//! Shutdown (shutdown.rs):
//!     broadcast → HTTP server drains, worker and monitor loops stop
//!     → agent releases leadership, removes state files, deregisters
//! ```

pub mod shutdown;
pub mod signals;
pub mod supervisor;

pub use shutdown::Shutdown;
pub use signals::spawn_signal_handler;
pub use supervisor::{channel, AbortHandle, FatalError, Supervisor};
