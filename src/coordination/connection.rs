//! Connection health toward the coordination substrate.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Connected,
    Suspended,
    Reconnected,
    Lost,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Suspended => "SUSPENDED",
            ConnectionState::Reconnected => "RECONNECTED",
            ConnectionState::Lost => "LOST",
        }
    }

    pub fn is_connected(self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Reconnected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current connection state, absent until the first probe completes.
#[derive(Default)]
pub struct ConnectionStateTracker {
    current: ArcSwapOption<ConnectionState>,
}

impl ConnectionStateTracker {
    pub fn current(&self) -> Option<ConnectionState> {
        self.current.load().as_deref().copied()
    }

    pub fn set(&self, state: ConnectionState) {
        self.current.store(Some(Arc::new(state)));
    }

    /// Wire form for status reports.
    pub fn describe(&self) -> String {
        self.current()
            .map(|s| s.as_str().to_string())
            .unwrap_or_else(|| "UNKNOWN".to_string())
    }
}
