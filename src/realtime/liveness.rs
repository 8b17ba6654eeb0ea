use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::heartbeat::HeartbeatMonitor;
use crate::errors::{CoreError, CoreResult};
use crate::models::{Node, NodeStatus, NodeSummary};
use crate::registry::NodeRegistry;

/// Result of an applied liveness transition.
#[derive(Debug, Clone, Serialize)]
pub struct LivenessUpdate {
    pub node: NodeSummary,
    pub status: NodeStatus,
}

/// Owns the online/offline state machine of every node.
///
/// Every status write in the crate goes through here. Heartbeats for unknown
/// external ids are dropped; they never create node records.
pub struct LivenessTracker {
    registry: NodeRegistry,
    monitor: Arc<HeartbeatMonitor>,
}

impl LivenessTracker {
    pub fn new(registry: NodeRegistry, monitor: Arc<HeartbeatMonitor>) -> Self {
        Self { registry, monitor }
    }

    pub fn monitor(&self) -> &Arc<HeartbeatMonitor> {
        &self.monitor
    }

    /// Marks the node online and stamps `last_seen`. `None` for unknown ids.
    pub async fn record_heartbeat(&self, external_id: &str) -> CoreResult<Option<LivenessUpdate>> {
        let Some(node) = self.registry.find_by_external_id(external_id).await? else {
            debug!(external_id, "heartbeat for unknown node dropped");
            return Ok(None);
        };
        // Beat first so a concurrent sweep re-checking silence sees it.
        self.monitor.beat(external_id);
        self.mark_online(&node).await
    }

    /// Marks the node offline, leaving `last_seen` untouched. `None` for
    /// unknown ids.
    pub async fn mark_offline(&self, external_id: &str) -> CoreResult<Option<LivenessUpdate>> {
        self.monitor.unregister(external_id);
        let Some(node) = self.registry.find_by_external_id(external_id).await? else {
            debug!(external_id, "offline signal for unknown node dropped");
            return Ok(None);
        };
        self.mark_node_offline(&node).await
    }

    /// Administrative override. Unlike the heartbeat path, an unknown id is
    /// an error here because an operator asked for it explicitly.
    pub async fn set_status(&self, external_id: &str, status: NodeStatus) -> CoreResult<LivenessUpdate> {
        let node = self.registry.node_by_external_id(external_id).await?;
        let update = match status {
            NodeStatus::Online => self.mark_online(&node).await?,
            NodeStatus::Offline => self.mark_node_offline(&node).await?,
        };
        info!(node = %node.name, external_id, %status, "status overridden");
        update.ok_or_else(|| {
            CoreError::not_found(format!("node with external id '{}' does not exist", external_id))
        })
    }

    /// Online transition for a node already loaded by the caller.
    pub async fn mark_online(&self, node: &Node) -> CoreResult<Option<LivenessUpdate>> {
        let now = Utc::now();
        if !self
            .registry
            .set_liveness(node.id, NodeStatus::Online, Some(now))
            .await?
        {
            return Ok(None);
        }
        if !node.is_online() {
            info!(node = %node.name, external_id = %node.external_id, "node online");
        }
        let mut summary = node.summary();
        summary.status = NodeStatus::Online;
        summary.last_seen = Some(now);
        Ok(Some(LivenessUpdate {
            node: summary,
            status: NodeStatus::Online,
        }))
    }

    /// Offline transition for a node already loaded by the caller.
    pub async fn mark_node_offline(&self, node: &Node) -> CoreResult<Option<LivenessUpdate>> {
        if !self
            .registry
            .set_liveness(node.id, NodeStatus::Offline, None)
            .await?
        {
            return Ok(None);
        }
        if node.is_online() {
            info!(node = %node.name, external_id = %node.external_id, "node offline");
        }
        let mut summary = node.summary();
        summary.status = NodeStatus::Offline;
        Ok(Some(LivenessUpdate {
            node: summary,
            status: NodeStatus::Offline,
        }))
    }

    /// Marks every node that went silent past the timeout offline.
    pub async fn sweep(&self) -> Vec<String> {
        let silent = self.monitor.check_timeouts();
        self.expire(silent).await
    }

    /// Writes the offline transition for candidates that are still silent.
    /// A heartbeat landing after the timeout check keeps its node online.
    async fn expire(&self, candidates: Vec<String>) -> Vec<String> {
        let timeout = self.monitor.config().timeout;
        let mut flipped = Vec::with_capacity(candidates.len());
        for external_id in candidates {
            let still_silent = self
                .monitor
                .silence(&external_id)
                .is_some_and(|silence| silence >= timeout);
            if !still_silent {
                debug!(external_id = %external_id, "node beat again before timeout write");
                continue;
            }
            match self.mark_offline(&external_id).await {
                Ok(Some(_)) => flipped.push(external_id),
                Ok(None) => {}
                Err(e) => warn!(external_id = %external_id, error = %e, "liveness timeout write failed"),
            }
        }
        if !flipped.is_empty() {
            info!(count = flipped.len(), "nodes timed out");
        }
        flipped
    }

    /// Runs [`sweep`](Self::sweep) on the configured interval until aborted.
    pub fn spawn_sweeper(self: Arc<Self>) -> JoinHandle<()> {
        let period = self.monitor.config().sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.sweep().await;
            }
        })
    }
}
