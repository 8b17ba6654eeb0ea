use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Liveness state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Online,
    #[default]
    Offline,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "online" => Ok(Self::Online),
            "offline" => Ok(Self::Offline),
            other => Err(format!("unknown node status '{}'", other)),
        }
    }
}

/// A remote edge device hosting camera streams.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: Uuid,
    pub name: String,
    /// Hardware identifier reported by the device, unique across the fleet.
    pub external_id: String,
    pub direct_ip: Option<String>,
    pub hostname: Option<String>,
    pub status: NodeStatus,
    pub last_seen: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Node {
    /// Direct IP first, resolvable name second. Blank values count as unset.
    pub fn reachable_address(&self) -> Option<&str> {
        [self.direct_ip.as_deref(), self.hostname.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|addr| !addr.is_empty())
    }

    pub fn is_online(&self) -> bool {
        self.status == NodeStatus::Online
    }

    pub fn summary(&self) -> NodeSummary {
        NodeSummary {
            id: self.id,
            external_id: self.external_id.clone(),
            name: self.name.clone(),
            status: self.status,
            last_seen: self.last_seen,
        }
    }
}

/// Identifying context echoed back in every structured result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSummary {
    pub id: Uuid,
    pub external_id: String,
    pub name: String,
    pub status: NodeStatus,
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewNode {
    pub name: String,
    pub external_id: String,
    pub direct_ip: Option<String>,
    pub hostname: Option<String>,
}

/// A camera stream owned by exactly one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Camera {
    pub id: Uuid,
    pub node_id: Uuid,
    pub name: String,
    /// Unique across all cameras, e.g. `/cam_12`.
    pub primary_path: String,
    pub secondary_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Camera {
    /// Router path identifiers this camera occupies (leading slash stripped).
    pub fn stream_ids(&self) -> Vec<String> {
        let mut ids = vec![stream_id(&self.primary_path)];
        if let Some(secondary) = &self.secondary_path {
            ids.push(stream_id(secondary));
        }
        ids
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCamera {
    pub node_id: Uuid,
    pub name: String,
    pub primary_path: String,
    pub secondary_path: Option<String>,
}

impl NewCamera {
    pub fn stream_ids(&self) -> Vec<String> {
        let mut ids = vec![stream_id(&self.primary_path)];
        if let Some(secondary) = &self.secondary_path {
            ids.push(stream_id(secondary));
        }
        ids
    }

    /// Camera record derived from an id reported by the node itself.
    pub fn from_report(node_id: Uuid, reported: &ReportedCamera) -> Self {
        let name = reported
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("Camera {}", reported.id));
        Self {
            node_id,
            name,
            primary_path: format!("/{}", reported.id),
            secondary_path: Some(format!("/{}_sub", reported.id)),
        }
    }
}

/// One entry of the node's `{ cameras: [...] }` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportedCamera {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraReport {
    #[serde(default)]
    pub cameras: Vec<ReportedCamera>,
}

/// Stream path to router path identifier: `/cam_12` becomes `cam_12`.
pub fn stream_id(path: &str) -> String {
    path.trim_start_matches('/').to_string()
}
