//! Viewer-facing session operations: watch, heartbeat, stop and listing.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::{CoreError, CoreResult};
use crate::models::{Camera, NodeStatus, NodeSummary};
use crate::realtime::{ViewerSession, ViewerSessions};
use crate::registry::NodeRegistry;
use crate::stream_router::RouterConfig;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewerInfo {
    pub id: String,
    pub session_started: DateTime<Utc>,
    /// Session window in seconds.
    pub ttl: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamLink {
    pub path: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CameraStreams {
    pub id: Uuid,
    pub name: String,
    pub main: StreamLink,
    pub sub: Option<StreamLink>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchStatistics {
    pub active_viewers: usize,
    pub total_cameras: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct WatchTicket {
    pub node: NodeSummary,
    pub viewer: ViewerInfo,
    pub cameras: Vec<CameraStreams>,
    pub statistics: WatchStatistics,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StopOutcome {
    pub node: NodeSummary,
    pub viewer_id: String,
    pub removed: bool,
    pub remaining_viewers: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewerList {
    pub node: NodeSummary,
    pub total_viewers: usize,
    pub viewers: Vec<ViewerSession>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatAck {
    pub node: NodeSummary,
    #[serde(flatten)]
    pub session: ViewerSession,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone)]
pub struct ViewerService {
    registry: NodeRegistry,
    sessions: ViewerSessions,
    router: RouterConfig,
}

impl ViewerService {
    pub fn new(registry: NodeRegistry, sessions: ViewerSessions, router: RouterConfig) -> Self {
        Self {
            registry,
            sessions,
            router,
        }
    }

    pub fn sessions(&self) -> &ViewerSessions {
        &self.sessions
    }

    /// Opens (or renews) a viewing session on an online node that has
    /// cameras, and hands back the stream URLs.
    pub async fn watch(&self, external_id: &str, viewer_id: &str) -> CoreResult<WatchTicket> {
        let (node, cameras) = self.registry.node_with_cameras(external_id).await?;

        if node.status != NodeStatus::Online {
            return Err(CoreError::NodeUnavailable {
                node: node.name,
                reason: "is offline".to_string(),
            });
        }
        if cameras.is_empty() {
            return Err(CoreError::NodeUnavailable {
                node: node.name,
                reason: "has no cameras".to_string(),
            });
        }

        self.sessions.start_or_refresh(node.id, viewer_id).await?;
        let active_viewers = self.sessions.count(node.id).await?;
        info!(node = %node.name, viewer = viewer_id, active_viewers, "viewer watching");

        let now = Utc::now();
        Ok(WatchTicket {
            viewer: ViewerInfo {
                id: viewer_id.to_string(),
                session_started: now,
                ttl: self.sessions.ttl().as_secs(),
            },
            statistics: WatchStatistics {
                active_viewers,
                total_cameras: cameras.len(),
            },
            cameras: cameras.iter().map(|c| self.streams(c)).collect(),
            node: node.summary(),
            timestamp: now,
        })
    }

    /// Resets a live session to the full window. An expired or unknown
    /// session is `NotFound` so the viewer knows to watch again.
    pub async fn heartbeat(&self, external_id: &str, viewer_id: &str) -> CoreResult<HeartbeatAck> {
        let node = self.registry.node_by_external_id(external_id).await?;
        let session = self
            .sessions
            .refresh(node.id, viewer_id)
            .await?
            .ok_or_else(|| {
                CoreError::not_found(format!(
                    "viewer '{}' is not watching node '{}' or the session expired",
                    viewer_id, node.name
                ))
            })?;
        debug!(node = %node.name, viewer = viewer_id, ttl = session.ttl, "viewer heartbeat");
        Ok(HeartbeatAck {
            node: node.summary(),
            session,
            timestamp: Utc::now(),
        })
    }

    pub async fn stop(&self, external_id: &str, viewer_id: &str) -> CoreResult<StopOutcome> {
        let node = self.registry.node_by_external_id(external_id).await?;
        let removed = self.sessions.end(node.id, viewer_id).await?;
        let remaining_viewers = self.sessions.count(node.id).await?;
        info!(node = %node.name, viewer = viewer_id, removed, remaining_viewers, "viewer stopped");
        Ok(StopOutcome {
            node: node.summary(),
            viewer_id: viewer_id.to_string(),
            removed,
            remaining_viewers,
            timestamp: Utc::now(),
        })
    }

    pub async fn list_viewers(&self, external_id: &str) -> CoreResult<ViewerList> {
        let node = self.registry.node_by_external_id(external_id).await?;
        let viewers = self.sessions.list(node.id).await?;
        Ok(ViewerList {
            node: node.summary(),
            total_viewers: viewers.len(),
            viewers,
            timestamp: Utc::now(),
        })
    }

    fn streams(&self, camera: &Camera) -> CameraStreams {
        let link = |path: &str| StreamLink {
            path: path.to_string(),
            url: self.router.viewer_url(path),
        };
        CameraStreams {
            id: camera.id,
            name: camera.name.clone(),
            main: link(&camera.primary_path),
            sub: camera.secondary_path.as_deref().map(link),
        }
    }
}
