//! Business rules on top of [`NodeStore`]: uniqueness checks before writes and
//! not-found reporting with enough context to diagnose the caller's mistake.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::database::NodeStore;
use crate::errors::{CoreError, CoreResult};
use crate::models::{Camera, NewCamera, NewNode, Node, NodeStatus};

#[derive(Clone)]
pub struct NodeRegistry {
    store: Arc<dyn NodeStore>,
}

impl NodeRegistry {
    pub fn new(store: Arc<dyn NodeStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn NodeStore> {
        &self.store
    }

    pub async fn create_node(&self, node: NewNode) -> CoreResult<Node> {
        if self.store.node_by_external_id(&node.external_id).await?.is_some() {
            return Err(CoreError::conflict(format!(
                "node with external id '{}' already exists",
                node.external_id
            )));
        }
        let created = self.store.insert_node(&node).await?;
        info!(node = %created.name, external_id = %created.external_id, "node created");
        Ok(created)
    }

    pub async fn update_node(&self, node: &Node) -> CoreResult<()> {
        if !self.store.update_node(node).await? {
            return Err(CoreError::not_found(format!("node '{}' does not exist", node.id)));
        }
        Ok(())
    }

    pub async fn node(&self, id: Uuid) -> CoreResult<Node> {
        self.store
            .node_by_id(id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("node '{}' does not exist", id)))
    }

    pub async fn node_by_external_id(&self, external_id: &str) -> CoreResult<Node> {
        self.find_by_external_id(external_id).await?.ok_or_else(|| {
            CoreError::not_found(format!("node with external id '{}' does not exist", external_id))
        })
    }

    /// Lookup that treats an unknown id as `None` rather than an error.
    pub async fn find_by_external_id(&self, external_id: &str) -> CoreResult<Option<Node>> {
        Ok(self.store.node_by_external_id(external_id).await?)
    }

    /// Node together with its cameras.
    pub async fn node_with_cameras(&self, external_id: &str) -> CoreResult<(Node, Vec<Camera>)> {
        let node = self.node_by_external_id(external_id).await?;
        let cameras = self.store.cameras_for_node(node.id).await?;
        Ok((node, cameras))
    }

    pub async fn node_cameras(&self, external_id: &str) -> CoreResult<Vec<Camera>> {
        Ok(self.node_with_cameras(external_id).await?.1)
    }

    pub async fn cameras_for_node(&self, node_id: Uuid) -> CoreResult<Vec<Camera>> {
        Ok(self.store.cameras_for_node(node_id).await?)
    }

    pub async fn add_camera(&self, camera: NewCamera) -> CoreResult<Camera> {
        let node = self.node(camera.node_id).await?;
        if self
            .store
            .camera_by_primary_path(&camera.primary_path)
            .await?
            .is_some()
        {
            return Err(CoreError::conflict(format!(
                "camera with primary path '{}' already exists",
                camera.primary_path
            )));
        }
        self.check_stream_ownership(node.id, &camera).await?;
        let created = self.store.insert_camera(&camera).await?;
        info!(node = %node.name, path = %created.primary_path, "camera added");
        Ok(created)
    }

    pub async fn delete_camera(&self, id: Uuid) -> CoreResult<()> {
        if !self.store.delete_camera(id).await? {
            return Err(CoreError::not_found(format!("camera '{}' does not exist", id)));
        }
        Ok(())
    }

    pub async fn delete_node(&self, id: Uuid) -> CoreResult<()> {
        if !self.store.delete_node(id).await? {
            return Err(CoreError::not_found(format!("node '{}' does not exist", id)));
        }
        info!(node_id = %id, "node deleted");
        Ok(())
    }

    /// Replaces the node's cameras in one step, rejecting router paths that
    /// another node already owns.
    pub async fn replace_cameras(
        &self,
        node: &Node,
        cameras: Vec<NewCamera>,
    ) -> CoreResult<Vec<Camera>> {
        for camera in &cameras {
            self.check_stream_ownership(node.id, camera).await?;
        }
        let replaced = self.store.replace_cameras(node.id, &cameras).await?;
        debug!(node = %node.name, count = replaced.len(), "cameras replaced");
        Ok(replaced)
    }

    /// Every router path of `camera` must be free or already held by `node_id`.
    /// `/x_sub` as a primary path collides with the secondary path of `/x`.
    async fn check_stream_ownership(&self, node_id: Uuid, camera: &NewCamera) -> CoreResult<()> {
        for stream_id in camera.stream_ids() {
            let owners = self.store.cameras_by_stream_id(&stream_id).await?;
            if owners.iter().any(|owner| owner.node_id != node_id) {
                return Err(CoreError::conflict(format!(
                    "router path '{}' is already used by another node",
                    stream_id
                )));
            }
        }
        Ok(())
    }

    /// Writes the liveness fields. Returns false when the node vanished.
    pub async fn set_liveness(
        &self,
        id: Uuid,
        status: NodeStatus,
        last_seen: Option<DateTime<Utc>>,
    ) -> CoreResult<bool> {
        Ok(self.store.set_liveness(id, status, last_seen).await?)
    }
}
