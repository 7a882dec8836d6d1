//! Diff Applier: turns a desired service state into local load balancer config.
//!
//! # Data Flow
//! ```text
//! ServiceContext ──render──▶ PlannedApply { files }
//!      needs_apply?  (compare with disk)
//!      write         (backup previous content)
//!      check         (validate the whole config set)
//!      restore       (on failed check)
//!      reload        (tell the load balancer)
//! ```
//!
//! The primitives are separate so bootstrap can write many services and run one
//! batch check; the apply gate uses the composed [`ConfigApplier::apply`].

pub mod filesystem;

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::ServiceContext;

pub use filesystem::FilesystemApplier;

#[derive(Debug, Error)]
pub enum ApplierError {
    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("reload failed: {0}")]
    Reload(String),

    #[error("failed to restore {path}: {source}")]
    Revert {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// One rendered file. `content == None` means the file must not exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFile {
    pub path: PathBuf,
    pub content: Option<String>,
}

/// A desired state together with the files it renders to.
#[derive(Debug, Clone)]
pub struct PlannedApply {
    pub context: ServiceContext,
    pub files: Vec<ConfigFile>,
}

impl PlannedApply {
    pub fn service_id(&self) -> &str {
        self.context.service_id()
    }
}

#[async_trait]
pub trait ConfigApplier: Send + Sync {
    /// Files the given state renders to.
    fn render(&self, context: &ServiceContext) -> Vec<ConfigFile>;

    /// True if the files on disk differ from the plan.
    async fn needs_apply(&self, planned: &PlannedApply) -> Result<bool, ApplierError>;

    /// Write the plan, keeping a backup of whatever was there before.
    async fn write(&self, planned: &PlannedApply) -> Result<(), ApplierError>;

    /// Put back the content saved by the last `write` of this plan.
    async fn restore(&self, planned: &PlannedApply) -> Result<(), ApplierError>;

    /// Forget backups once a write has been accepted.
    fn discard_backups(&self, planned: &PlannedApply);

    /// Validate the complete config set currently on disk.
    async fn check(&self) -> Result<(), ApplierError>;

    async fn reload(&self) -> Result<(), ApplierError>;

    fn plan(&self, context: ServiceContext) -> PlannedApply {
        let files = self.render(&context);
        PlannedApply { context, files }
    }

    /// Config validity as reported by `GET /status?skipCache=true`.
    async fn check_configs(&self) -> Result<(), ApplierError> {
        let result = self.check().await;
        if let Err(e) = &result {
            tracing::warn!(error = %e, "Config check failed");
        }
        result
    }

    /// Write then check; on any failure restore the previous files.
    async fn apply_sync(&self, planned: &PlannedApply) -> Result<(), ApplierError> {
        let written = match self.write(planned).await {
            Ok(()) => self.check().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            if let Err(restore) = self.restore(planned).await {
                tracing::error!(service_id = planned.service_id(), error = %restore, "Failed to restore config");
            }
            return Err(e);
        }
        self.discard_backups(planned);
        Ok(())
    }

    /// Bring one service to the given state and reload.
    ///
    /// Returns `false` if the files already matched and nothing was done.
    async fn apply(&self, context: ServiceContext, revert_on_failure: bool) -> Result<bool, ApplierError> {
        let planned = self.plan(context);
        if !self.needs_apply(&planned).await? {
            tracing::debug!(service_id = planned.service_id(), "Config already up to date");
            return Ok(false);
        }
        if revert_on_failure {
            self.apply_sync(&planned).await?;
        } else {
            self.write(&planned).await?;
            self.discard_backups(&planned);
            self.check().await?;
        }
        self.reload().await?;
        Ok(true)
    }
}
