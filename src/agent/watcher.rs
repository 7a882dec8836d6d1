//! Watcher for edits to the config directory made outside of an apply.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};

use crate::agent::state::AgentShared;

/// Events this long after our own write are attributed to it.
const LOCAL_WRITE_GRACE: Duration = Duration::from_secs(2);

pub struct DirectoryWatcher {
    path: PathBuf,
    shared: Arc<AgentShared>,
}

impl DirectoryWatcher {
    pub fn new(path: &Path, shared: Arc<AgentShared>) -> Self {
        Self {
            path: path.to_path_buf(),
            shared,
        }
    }

    /// Start watching. Events stop when the returned watcher is dropped.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let shared = self.shared.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if !(event.kind.is_modify() || event.kind.is_create() || event.kind.is_remove()) {
                        return;
                    }
                    if shared.apply_lock.is_held() || shared.wrote_within(LOCAL_WRITE_GRACE) {
                        return;
                    }
                    let message = format!("Config directory modified outside of an apply: {:?}", event.paths);
                    tracing::warn!(paths = ?event.paths, "External config modification detected");
                    shared.set_directory_watch_error(Some(message));
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Watch error");
                    shared.set_directory_watch_error(Some(format!("Watch error: {}", e)));
                }
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;
        tracing::info!(path = ?self.path, "Config directory watcher started");
        Ok(watcher)
    }
}
