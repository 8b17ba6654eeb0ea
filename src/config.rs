//! Process configuration assembled from defaults and environment variables.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::database::DatabaseConfig;
use crate::logging::LogFormat;
use crate::models::NewNode;
use crate::realtime::{HeartbeatConfig, RedisConfig, DEFAULT_SESSION_TTL};
use crate::stream_router::RouterConfig;
use crate::sync::{EmptyReportPolicy, SyncConfig};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: '{value}' ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct ViewerConfig {
    pub session_ttl: Duration,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            session_ttl: DEFAULT_SESSION_TTL,
        }
    }
}

pub type LivenessConfig = HeartbeatConfig;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub log_format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            log_format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub router: RouterConfig,
    pub sync: SyncConfig,
    pub viewer: ViewerConfig,
    pub liveness: LivenessConfig,
    pub server: ServerConfig,
    /// Nodes registered at startup when missing.
    pub seed_nodes: Vec<NewNode>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Defaults overlaid with whatever `lookup` returns for each variable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        let mut config = AppConfig::default();

        if let Some(url) = env.string("DATABASE_URL") {
            config.database.url = url;
        }
        env.parse("DB_MAX_CONNECTIONS", &mut config.database.max_connections)?;

        if let Some(url) = env.string("REDIS_URL") {
            config.redis.url = url;
        }

        if let Some(path) = env.string("ROUTER_CONFIG_PATH") {
            config.router.config_path = PathBuf::from(path);
        }
        if let Some(url) = env.string("ROUTER_API_URL") {
            config.router.api_url = url;
        }
        if let Some(cmd) = env.string("ROUTER_RESTART_CMD") {
            config.router.restart_command = cmd.split_whitespace().map(str::to_string).collect();
        }
        if let Some(host) = env.string("ROUTER_PUBLIC_HOST") {
            config.router.public_host = host;
        }
        env.parse("ROUTER_WEBRTC_PORT", &mut config.router.webrtc_port)?;

        env.parse("NODE_AGENT_PORT", &mut config.sync.agent_port)?;
        env.parse("NODE_RTSP_PORT", &mut config.sync.rtsp_port)?;
        if let Some(ms) = env.number::<u64>("NODE_TIMEOUT_MS")? {
            config.sync.node_timeout = Duration::from_millis(ms);
        }
        env.parse::<EmptyReportPolicy>("SYNC_EMPTY_REPORT", &mut config.sync.empty_report)?;

        if let Some(secs) = env.number::<u64>("VIEWER_TTL_SECS")? {
            config.viewer.session_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = env.number::<u64>("LIVENESS_TIMEOUT_SECS")? {
            config.liveness.timeout = Duration::from_secs(secs);
        }

        if let Some(raw) = env.string("SEED_NODES") {
            config.seed_nodes = parse_seed_nodes(&raw).map_err(|reason| ConfigError::Invalid {
                var: "SEED_NODES",
                value: raw.clone(),
                reason,
            })?;
        }

        env.parse("LISTEN_ADDR", &mut config.server.listen_addr)?;
        if let Some(format) = env.string("LOG_FORMAT") {
            config.server.log_format = LogFormat::from_str(&format);
        }

        Ok(config)
    }
}

/// Comma-separated `name=external_id@address` entries. An IP literal becomes
/// the direct IP, anything else the hostname.
fn parse_seed_nodes(raw: &str) -> Result<Vec<NewNode>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (name, rest) = entry
                .split_once('=')
                .ok_or_else(|| format!("'{}' is not name=external_id@address", entry))?;
            let (external_id, address) = rest
                .split_once('@')
                .ok_or_else(|| format!("'{}' is not name=external_id@address", entry))?;
            let (name, external_id, address) = (name.trim(), external_id.trim(), address.trim());
            if name.is_empty() || external_id.is_empty() || address.is_empty() {
                return Err(format!("'{}' has an empty field", entry));
            }
            let is_ip = address.parse::<IpAddr>().is_ok();
            Ok(NewNode {
                name: name.to_string(),
                external_id: external_id.to_string(),
                direct_ip: is_ip.then(|| address.to_string()),
                hostname: (!is_ip).then(|| address.to_string()),
            })
        })
        .collect()
}

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn string(&self, var: &str) -> Option<String> {
        (self.0)(var)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn number<T>(&self, var: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let Some(value) = self.string(var) else {
            return Ok(None);
        };
        value
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Invalid {
                var,
                reason: e.to_string(),
                value,
            })
    }

    fn parse<T>(&self, var: &'static str, slot: &mut T) -> Result<(), ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        if let Some(value) = self.number::<T>(var)? {
            *slot = value;
        }
        Ok(())
    }
}
