//! Applier that renders one upstream file per service into a directory.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::process::Command;
use url::form_urlencoded;

use crate::applier::{ApplierError, ConfigApplier, ConfigFile, PlannedApply};
use crate::config::AgentConfig;
use crate::models::ServiceContext;

const HEADER: &str = "# Managed by lbfleet. Manual edits are overwritten.";

pub struct FilesystemApplier {
    config_dir: PathBuf,
    check_command: Option<String>,
    reload_command: Option<String>,
    /// Previous content by path; `None` means the file did not exist.
    backups: DashMap<PathBuf, Option<String>>,
}

impl FilesystemApplier {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            config_dir: PathBuf::from(&config.config_dir),
            check_command: config.check_command.clone(),
            reload_command: config.reload_command.clone(),
            backups: DashMap::new(),
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// File for a service. The id is form-urlencoded, so distinct ids never
    /// share a file.
    pub fn path_for(&self, service_id: &str) -> PathBuf {
        let name: String = form_urlencoded::byte_serialize(service_id.as_bytes()).collect();
        self.config_dir.join(format!("{}.conf", name))
    }

    async fn run(&self, command: &str) -> Result<(), String> {
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .env("LBFLEET_CONFIG_DIR", &self.config_dir)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| format!("failed to run '{}': {}", command, e))?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(if stderr.is_empty() {
            format!("'{}' exited with {}", command, output.status)
        } else {
            stderr
        })
    }
}

fn render_upstreams(context: &ServiceContext) -> Option<String> {
    if !context.present || context.upstreams.is_empty() {
        return None;
    }
    let service = &context.service;
    let mut out = format!(
        "{}\n# service: {} base path: {}\nupstream {} {{\n",
        HEADER, service.service_id, service.service_base_path, service.service_id
    );
    for upstream in &context.upstreams {
        match &upstream.request_id {
            Some(request_id) => out.push_str(&format!("    server {}; # {}\n", upstream.upstream, request_id)),
            None => out.push_str(&format!("    server {};\n", upstream.upstream)),
        }
    }
    out.push_str("}\n");
    Some(out)
}

async fn read_existing(path: &Path) -> Result<Option<String>, ApplierError> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(ApplierError::Read {
            path: path.display().to_string(),
            source,
        }),
    }
}

async fn put(path: &Path, content: Option<&str>) -> std::io::Result<()> {
    match content {
        Some(content) => {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let tmp = path.with_extension("conf.tmp");
            tokio::fs::write(&tmp, content).await?;
            tokio::fs::rename(&tmp, path).await
        }
        None => match tokio::fs::remove_file(path).await {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            other => other,
        },
    }
}

#[async_trait]
impl ConfigApplier for FilesystemApplier {
    fn render(&self, context: &ServiceContext) -> Vec<ConfigFile> {
        vec![ConfigFile {
            path: self.path_for(context.service_id()),
            content: render_upstreams(context),
        }]
    }

    async fn needs_apply(&self, planned: &PlannedApply) -> Result<bool, ApplierError> {
        for file in &planned.files {
            if read_existing(&file.path).await? != file.content {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn write(&self, planned: &PlannedApply) -> Result<(), ApplierError> {
        for file in &planned.files {
            let previous = read_existing(&file.path).await?;
            self.backups.entry(file.path.clone()).or_insert(previous);
            put(&file.path, file.content.as_deref())
                .await
                .map_err(|source| ApplierError::Write {
                    path: file.path.display().to_string(),
                    source,
                })?;
        }
        tracing::debug!(service_id = planned.service_id(), files = planned.files.len(), "Wrote config");
        Ok(())
    }

    async fn restore(&self, planned: &PlannedApply) -> Result<(), ApplierError> {
        for file in &planned.files {
            let Some((path, previous)) = self.backups.remove(&file.path) else {
                continue;
            };
            put(&path, previous.as_deref())
                .await
                .map_err(|source| ApplierError::Revert {
                    path: path.display().to_string(),
                    source,
                })?;
        }
        tracing::info!(service_id = planned.service_id(), "Restored previous config");
        Ok(())
    }

    fn discard_backups(&self, planned: &PlannedApply) {
        for file in &planned.files {
            self.backups.remove(&file.path);
        }
    }

    async fn check(&self) -> Result<(), ApplierError> {
        match &self.check_command {
            Some(command) => self.run(command).await.map_err(ApplierError::InvalidConfig),
            None => Ok(()),
        }
    }

    async fn reload(&self) -> Result<(), ApplierError> {
        match &self.reload_command {
            Some(command) => self.run(command).await.map_err(ApplierError::Reload),
            None => Ok(()),
        }
    }
}
