//! Node liveness channel: the messages a node sends over its persistent
//! connection and the per-connection state that turns them into liveness
//! transitions.

use std::sync::Arc;

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::liveness::LivenessTracker;

/// Inbound frame from a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeMessage {
    /// Binds the connection to a node.
    Register { id: String },
    /// Keep-alive; may carry the node id when the node never registered.
    Ping { node_id: Option<String> },
    Unknown,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum Wire {
    #[serde(rename = "register")]
    Register {
        #[serde(default, deserialize_with = "flexible_id")]
        id: Option<String>,
    },
    #[serde(rename = "PING")]
    Ping {
        #[serde(default, alias = "pi_id", deserialize_with = "flexible_id")]
        node_id: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

/// Hardware ids arrive as JSON strings or numbers.
fn flexible_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

impl NodeMessage {
    /// Decodes a text frame. `None` for frames that are not JSON objects with
    /// a `type` tag; a register frame without an id decodes as `Unknown`.
    pub fn parse(raw: &str) -> Option<Self> {
        let wire: Wire = serde_json::from_str(raw).ok()?;
        Some(match wire {
            Wire::Register { id: Some(id) } => NodeMessage::Register { id },
            Wire::Register { id: None } => NodeMessage::Unknown,
            Wire::Ping { node_id } => NodeMessage::Ping { node_id },
            Wire::Unknown => NodeMessage::Unknown,
        })
    }
}

pub const PONG: &str = r#"{"type":"PONG"}"#;

/// State of one node connection.
pub struct ConnectionSession {
    tracker: Arc<LivenessTracker>,
    node_id: Option<String>,
}

impl ConnectionSession {
    pub fn new(tracker: Arc<LivenessTracker>) -> Self {
        Self {
            tracker,
            node_id: None,
        }
    }

    pub fn node_id(&self) -> Option<&str> {
        self.node_id.as_deref()
    }

    /// Handles one text frame and returns the reply to send, if any.
    pub async fn handle_text(&mut self, raw: &str) -> Option<String> {
        let Some(message) = NodeMessage::parse(raw) else {
            debug!("malformed liveness frame ignored");
            return None;
        };
        self.handle(message).await
    }

    pub async fn handle(&mut self, message: NodeMessage) -> Option<String> {
        match message {
            NodeMessage::Register { id } => {
                info!(external_id = %id, "node registered on liveness channel");
                self.node_id = Some(id.clone());
                self.heartbeat(&id).await;
                None
            }
            NodeMessage::Ping { node_id } => {
                if self.node_id.is_none() {
                    self.node_id = node_id;
                }
                let id = self.node_id.clone()?;
                self.heartbeat(&id).await.then(|| PONG.to_string())
            }
            NodeMessage::Unknown => None,
        }
    }

    /// Connection closed: the bound node goes offline.
    pub async fn close(&mut self) {
        let Some(id) = self.node_id.take() else {
            return;
        };
        if let Err(e) = self.tracker.mark_offline(&id).await {
            warn!(external_id = %id, error = %e, "failed to mark node offline on close");
        }
    }

    async fn heartbeat(&self, id: &str) -> bool {
        match self.tracker.record_heartbeat(id).await {
            Ok(_) => true,
            Err(e) => {
                warn!(external_id = %id, error = %e, "heartbeat write failed");
                false
            }
        }
    }
}
