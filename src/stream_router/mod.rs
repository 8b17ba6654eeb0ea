//! Client for the external stream router: its file-backed path table, its
//! administrative reload endpoint, and the service-restart fallback.

pub mod table;

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

pub use table::{PathEntry, PathTable, StreamTarget};

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("router table {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("router table is not valid yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("router table is malformed: {0}")]
    InvalidTable(String),
}

#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Declarative path table the router reads on reload.
    pub config_path: PathBuf,
    /// Base URL of the router's administrative API.
    pub api_url: String,
    pub reload_timeout: Duration,
    pub probe_timeout: Duration,
    /// Program and arguments that restart the router service.
    pub restart_command: Vec<String>,
    pub restart_timeout: Duration,
    /// Pause after a restart before the router is assumed usable.
    pub restart_settle: Duration,
    /// Public host viewers connect to.
    pub public_host: String,
    pub webrtc_port: u16,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("mediamtx.yml"),
            api_url: "http://localhost:9997".to_string(),
            reload_timeout: Duration::from_secs(3),
            probe_timeout: Duration::from_secs(2),
            restart_command: ["sudo", "systemctl", "restart", "mediamtx"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            restart_timeout: Duration::from_secs(30),
            restart_settle: Duration::from_secs(2),
            public_host: "localhost".to_string(),
            webrtc_port: 8889,
        }
    }
}

impl RouterConfig {
    /// Viewer-facing URL of a stream path such as `/cam_12`.
    pub fn viewer_url(&self, path: &str) -> String {
        format!(
            "wss://{}:{}/{}",
            self.public_host,
            self.webrtc_port,
            path.trim_start_matches('/')
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReloadMethod {
    /// Live reload through the admin API.
    Api,
    /// Service restart through the OS service manager.
    Service,
    /// Nothing worked; an operator has to restart the router.
    Manual,
}

/// How the router was told about a table change. Never an error: the
/// registry is already authoritative when this is produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReloadOutcome {
    pub method: ReloadMethod,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ReloadOutcome {
    fn ok(method: ReloadMethod) -> Self {
        Self {
            method,
            success: true,
            message: None,
        }
    }

    pub fn manual(message: impl Into<String>) -> Self {
        Self {
            method: ReloadMethod::Manual,
            success: false,
            message: Some(message.into()),
        }
    }

    pub fn requires_manual_intervention(&self) -> bool {
        self.method == ReloadMethod::Manual
    }
}

pub struct RouterClient {
    config: RouterConfig,
    http: reqwest::Client,
    /// Serializes every read-modify-write of the table file.
    table_lock: Mutex<()>,
}

impl RouterClient {
    pub fn new(config: RouterConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            table_lock: Mutex::new(()),
        }
    }

    pub fn with_http_client(config: RouterConfig, http: reqwest::Client) -> Self {
        Self {
            config,
            http,
            table_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    fn api(&self, path: &str) -> String {
        format!("{}{}", self.config.api_url.trim_end_matches('/'), path)
    }

    /// Deletes the listed path ids. Zero removed is a normal outcome and
    /// leaves the file untouched.
    pub async fn remove_paths<S: AsRef<str>>(&self, stream_ids: &[S]) -> Result<usize, RouterError> {
        if stream_ids.is_empty() {
            return Ok(0);
        }
        let _guard = self.table_lock.lock().await;
        let path = &self.config.config_path;
        let mut table = PathTable::load(path).await?;
        let removed = table.remove_all(stream_ids);
        if removed == 0 {
            debug!("no router paths matched removal");
            return Ok(0);
        }
        table.save(path).await?;
        info!(removed, "router paths removed");
        Ok(removed)
    }

    /// Inserts one pull entry per target with a single table write. Returns
    /// the number of distinct ids written; a repeated id keeps its last entry.
    pub async fn add_paths(&self, targets: &[StreamTarget]) -> Result<usize, RouterError> {
        if targets.is_empty() {
            return Ok(0);
        }
        let _guard = self.table_lock.lock().await;
        let path = &self.config.config_path;
        let mut table = PathTable::load(path).await?;
        let mut written = HashSet::with_capacity(targets.len());
        for target in targets {
            table.insert(&target.stream_id, &target.entry())?;
            written.insert(target.stream_id.as_str());
        }
        table.save(path).await?;
        info!(added = written.len(), "router paths added");
        Ok(written.len())
    }

    /// Path ids currently in the table; empty when the table cannot be read.
    pub async fn list_paths(&self) -> Vec<String> {
        match PathTable::load(&self.config.config_path).await {
            Ok(table) => table.path_ids(),
            Err(e) => {
                error!(error = %e, "failed to read router table");
                Vec::new()
            }
        }
    }

    /// Live reload first, service restart second, manual intervention last.
    pub async fn reload(&self) -> ReloadOutcome {
        match self.reload_via_api().await {
            Ok(()) => {
                info!("router reloaded via api");
                return ReloadOutcome::ok(ReloadMethod::Api);
            }
            Err(e) => warn!(error = %e, "router api reload failed, restarting service"),
        }

        match self.restart_service().await {
            Ok(()) => {
                tokio::time::sleep(self.config.restart_settle).await;
                info!("router service restarted");
                ReloadOutcome::ok(ReloadMethod::Service)
            }
            Err(reason) => {
                error!(%reason, "router restart failed");
                ReloadOutcome::manual(format!(
                    "Please restart the router manually: {}",
                    self.config.restart_command.join(" ")
                ))
            }
        }
    }

    async fn reload_via_api(&self) -> Result<(), reqwest::Error> {
        self.http
            .post(self.api("/v3/config/paths/reload"))
            .timeout(self.config.reload_timeout)
            .json(&serde_json::json!({}))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn restart_service(&self) -> Result<(), String> {
        let (program, args) = self
            .config
            .restart_command
            .split_first()
            .ok_or_else(|| "no restart command configured".to_string())?;

        let run = Command::new(program).args(args).kill_on_drop(true).output();
        let output = tokio::time::timeout(self.config.restart_timeout, run)
            .await
            .map_err(|_| format!("timed out after {:?}", self.config.restart_timeout))?
            .map_err(|e| e.to_string())?;

        if output.status.success() {
            Ok(())
        } else {
            Err(format!(
                "{}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ))
        }
    }

    /// Cheap liveness probe against the admin API.
    pub async fn is_running(&self) -> bool {
        match self
            .http
            .get(self.api("/v3/config/get"))
            .timeout(self.config.probe_timeout)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}
