//! Topology reconciliation: refresh a node's camera set from the node itself
//! and mirror it into the stream router.

mod locks;
pub mod node_client;

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use locks::KeyedLocks;
pub use node_client::{HttpNodeClient, NodeClient, NodeClientError};

use crate::errors::{CoreError, CoreResult};
use crate::models::{Camera, CameraReport, NewCamera, Node, NodeSummary};
use crate::realtime::LivenessTracker;
use crate::registry::NodeRegistry;
use crate::stream_router::{ReloadOutcome, RouterClient, StreamTarget};

/// What to do when a node answers with an empty camera list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EmptyReportPolicy {
    /// Treat it as authoritative: every camera and router path goes.
    #[default]
    Deprovision,
    /// Treat it as transient: registry and router stay as they are.
    Ignore,
}

impl FromStr for EmptyReportPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "deprovision" => Ok(Self::Deprovision),
            "ignore" => Ok(Self::Ignore),
            other => Err(format!("unknown empty report policy '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub agent_port: u16,
    pub camera_endpoint: String,
    pub node_timeout: Duration,
    /// Port of the node's RTSP server the router pulls from.
    pub rtsp_port: u16,
    pub empty_report: EmptyReportPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            agent_port: 8000,
            camera_endpoint: "/get-list-cameras".to_string(),
            node_timeout: Duration::from_secs(5),
            rtsp_port: 8554,
            empty_report: EmptyReportPolicy::default(),
        }
    }
}

impl SyncConfig {
    pub fn node_client(&self) -> HttpNodeClient {
        HttpNodeClient::new(self.agent_port, self.camera_endpoint.clone(), self.node_timeout)
    }
}

/// Router side of a pass. Failures land in `error` instead of failing the pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RouterOutcome {
    pub paths_removed: usize,
    pub paths_added: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reload: Option<ReloadOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RouterOutcome {
    /// True when the router is known to serve the new table.
    pub fn is_consistent(&self) -> bool {
        self.error.is_none() && self.reload.as_ref().map_or(true, |r| r.success)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub node: NodeSummary,
    pub address: String,
    pub cameras_added: usize,
    pub cameras_removed: usize,
    pub router: RouterOutcome,
    /// Camera set after the pass.
    pub cameras: Vec<Camera>,
    pub synced_at: DateTime<Utc>,
}

pub struct TopologySynchronizer {
    registry: NodeRegistry,
    liveness: Arc<LivenessTracker>,
    nodes: Arc<dyn NodeClient>,
    router: Arc<RouterClient>,
    config: SyncConfig,
    in_flight: KeyedLocks<Uuid>,
}

impl TopologySynchronizer {
    pub fn new(
        registry: NodeRegistry,
        liveness: Arc<LivenessTracker>,
        nodes: Arc<dyn NodeClient>,
        router: Arc<RouterClient>,
        config: SyncConfig,
    ) -> Self {
        Self {
            registry,
            liveness,
            nodes,
            router,
            config,
            in_flight: KeyedLocks::new(),
        }
    }

    pub fn router(&self) -> &Arc<RouterClient> {
        &self.router
    }

    /// Runs the pass on its own task so a slow node never stalls the caller.
    pub fn spawn_synchronize(self: Arc<Self>, node_id: Uuid) -> JoinHandle<CoreResult<SyncReport>> {
        tokio::spawn(async move { self.synchronize(node_id).await })
    }

    /// Full reconciliation pass for one node. Passes for the same node run
    /// one at a time.
    pub async fn synchronize(&self, node_id: Uuid) -> CoreResult<SyncReport> {
        let result = {
            let _guard = self.in_flight.lock(&node_id).await;
            self.run_pass(node_id).await
        };
        self.in_flight.prune();
        result
    }

    async fn run_pass(&self, node_id: Uuid) -> CoreResult<SyncReport> {
        let node = self.registry.node(node_id).await?;
        let old_cameras = self.registry.cameras_for_node(node.id).await?;

        let address = node
            .reachable_address()
            .ok_or_else(|| {
                CoreError::Configuration(format!(
                    "node '{}' has neither a direct ip nor a hostname configured",
                    node.name
                ))
            })?
            .to_string();

        let report = match self.nodes.list_cameras(&address).await {
            Ok(report) => report,
            Err(e) => {
                warn!(node = %node.name, address = %address, error = %e, "node unreachable during sync");
                if let Err(write) = self.liveness.mark_node_offline(&node).await {
                    warn!(node = %node.name, error = %write, "failed to mark unreachable node offline");
                }
                return Err(CoreError::Connectivity {
                    node: node.name.clone(),
                    address,
                    reason: e.to_string(),
                });
            }
        };

        let summary = self
            .liveness
            .mark_online(&node)
            .await?
            .map(|update| update.node)
            .unwrap_or_else(|| node.summary());

        if report.cameras.is_empty() && self.config.empty_report == EmptyReportPolicy::Ignore {
            info!(node = %node.name, "empty camera report ignored");
            return Ok(SyncReport {
                node: summary,
                address,
                cameras_added: 0,
                cameras_removed: 0,
                router: RouterOutcome::default(),
                cameras: old_cameras,
                synced_at: Utc::now(),
            });
        }

        let new_cameras = self
            .registry
            .replace_cameras(&node, reported_cameras(&node, &report))
            .await?;

        let router = self.mirror(&node, &address, &old_cameras, &new_cameras).await;

        info!(
            node = %node.name,
            external_id = %node.external_id,
            removed = old_cameras.len(),
            added = new_cameras.len(),
            router_consistent = router.is_consistent(),
            "node synchronized"
        );

        Ok(SyncReport {
            node: summary,
            address,
            cameras_added: new_cameras.len(),
            cameras_removed: old_cameras.len(),
            router,
            cameras: new_cameras,
            synced_at: Utc::now(),
        })
    }

    async fn mirror(
        &self,
        node: &Node,
        address: &str,
        old: &[Camera],
        new: &[Camera],
    ) -> RouterOutcome {
        let stale: Vec<String> = old.iter().flat_map(Camera::stream_ids).collect();
        let targets: Vec<StreamTarget> = new
            .iter()
            .flat_map(Camera::stream_ids)
            .map(|stream_id| StreamTarget {
                stream_id,
                address: address.to_string(),
                port: self.config.rtsp_port,
            })
            .collect();

        let mut outcome = RouterOutcome::default();
        match self.router.remove_paths(&stale).await {
            Ok(removed) => outcome.paths_removed = removed,
            Err(e) => {
                warn!(node = %node.name, error = %e, "router path removal failed");
                outcome.error = Some(e.to_string());
                return outcome;
            }
        }
        match self.router.add_paths(&targets).await {
            Ok(added) => outcome.paths_added = added,
            Err(e) => {
                warn!(node = %node.name, error = %e, "router path insert failed");
                outcome.error = Some(e.to_string());
                return outcome;
            }
        }

        let reload = self.router.reload().await;
        if reload.requires_manual_intervention() {
            warn!(node = %node.name, "router needs a manual restart");
        } else {
            debug!(node = %node.name, method = ?reload.method, "router reloaded");
        }
        outcome.reload = Some(reload);
        outcome
    }
}

/// Camera rows for a report. Repeated ids collapse to their first entry.
fn reported_cameras(node: &Node, report: &CameraReport) -> Vec<NewCamera> {
    let mut seen = HashSet::new();
    report
        .cameras
        .iter()
        .filter(|camera| seen.insert(camera.id.as_str()))
        .map(|camera| NewCamera::from_report(node.id, camera))
        .collect()
}
