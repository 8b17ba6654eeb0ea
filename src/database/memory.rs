use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use super::{NodeStore, StoreError};
use crate::models::{Camera, NewCamera, NewNode, Node, NodeStatus};

#[derive(Default)]
struct Tables {
    nodes: HashMap<Uuid, Node>,
    cameras: HashMap<Uuid, Camera>,
}

impl Tables {
    fn primary_path_taken(&self, path: &str) -> bool {
        self.cameras.values().any(|c| c.primary_path == path)
    }

    /// True when another node's camera already occupies one of `ids`.
    fn stream_ids_owned_elsewhere(&self, node_id: Uuid, ids: &[String]) -> bool {
        self.cameras
            .values()
            .filter(|c| c.node_id != node_id)
            .flat_map(Camera::stream_ids)
            .any(|owned| ids.contains(&owned))
    }

    fn build_camera(camera: &NewCamera) -> Camera {
        Camera {
            id: Uuid::now_v7(),
            node_id: camera.node_id,
            name: camera.name.clone(),
            primary_path: camera.primary_path.clone(),
            secondary_path: camera.secondary_path.clone(),
            created_at: Utc::now(),
        }
    }
}

/// In-process [`NodeStore`] with the same constraints as the SQL schema:
/// unique external ids, unique primary paths, cascading node deletes.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.tables.read().nodes.len()
    }

    pub fn camera_count(&self) -> usize {
        self.tables.read().cameras.len()
    }
}

#[async_trait]
impl NodeStore for MemoryStore {
    async fn insert_node(&self, node: &NewNode) -> Result<Node, StoreError> {
        let mut tables = self.tables.write();
        if tables.nodes.values().any(|n| n.external_id == node.external_id) {
            return Err(StoreError::UniqueViolation("node_external_id_key".into()));
        }
        let record = Node {
            id: Uuid::now_v7(),
            name: node.name.clone(),
            external_id: node.external_id.clone(),
            direct_ip: node.direct_ip.clone(),
            hostname: node.hostname.clone(),
            status: NodeStatus::Offline,
            last_seen: None,
            created_at: Utc::now(),
        };
        tables.nodes.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update_node(&self, node: &Node) -> Result<bool, StoreError> {
        let mut tables = self.tables.write();
        match tables.nodes.get_mut(&node.id) {
            Some(existing) => {
                existing.name = node.name.clone();
                existing.direct_ip = node.direct_ip.clone();
                existing.hostname = node.hostname.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn node_by_id(&self, id: Uuid) -> Result<Option<Node>, StoreError> {
        Ok(self.tables.read().nodes.get(&id).cloned())
    }

    async fn node_by_external_id(&self, external_id: &str) -> Result<Option<Node>, StoreError> {
        Ok(self
            .tables
            .read()
            .nodes
            .values()
            .find(|n| n.external_id == external_id)
            .cloned())
    }

    async fn set_liveness(
        &self,
        id: Uuid,
        status: NodeStatus,
        last_seen: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.write();
        match tables.nodes.get_mut(&id) {
            Some(node) => {
                node.status = status;
                if last_seen.is_some() {
                    node.last_seen = last_seen;
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_node(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tables = self.tables.write();
        if tables.nodes.remove(&id).is_none() {
            return Ok(false);
        }
        tables.cameras.retain(|_, c| c.node_id != id);
        Ok(true)
    }

    async fn cameras_for_node(&self, node_id: Uuid) -> Result<Vec<Camera>, StoreError> {
        let tables = self.tables.read();
        let mut cameras: Vec<Camera> = tables
            .cameras
            .values()
            .filter(|c| c.node_id == node_id)
            .cloned()
            .collect();
        cameras.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.primary_path.cmp(&b.primary_path))
        });
        Ok(cameras)
    }

    async fn camera_by_primary_path(&self, path: &str) -> Result<Option<Camera>, StoreError> {
        Ok(self
            .tables
            .read()
            .cameras
            .values()
            .find(|c| c.primary_path == path)
            .cloned())
    }

    async fn cameras_by_stream_id(&self, stream_id: &str) -> Result<Vec<Camera>, StoreError> {
        let tables = self.tables.read();
        Ok(tables
            .cameras
            .values()
            .filter(|c| c.stream_ids().iter().any(|id| id == stream_id))
            .cloned()
            .collect())
    }

    async fn insert_camera(&self, camera: &NewCamera) -> Result<Camera, StoreError> {
        let mut tables = self.tables.write();
        if !tables.nodes.contains_key(&camera.node_id) {
            return Err(StoreError::Corrupt(format!(
                "camera references missing node {}",
                camera.node_id
            )));
        }
        if tables.primary_path_taken(&camera.primary_path)
            || tables.stream_ids_owned_elsewhere(camera.node_id, &camera.stream_ids())
        {
            return Err(StoreError::UniqueViolation("camera_primary_path_key".into()));
        }
        let record = Tables::build_camera(camera);
        tables.cameras.insert(record.id, record.clone());
        Ok(record)
    }

    async fn delete_camera(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.tables.write().cameras.remove(&id).is_some())
    }

    async fn replace_cameras(
        &self,
        node_id: Uuid,
        cameras: &[NewCamera],
    ) -> Result<Vec<Camera>, StoreError> {
        let mut tables = self.tables.write();

        // Validate against the post-delete state before touching anything.
        let mut seen = std::collections::HashSet::new();
        for camera in cameras {
            let clash = tables.stream_ids_owned_elsewhere(node_id, &camera.stream_ids());
            if clash || !seen.insert(camera.primary_path.as_str()) {
                return Err(StoreError::UniqueViolation("camera_primary_path_key".into()));
            }
        }

        tables.cameras.retain(|_, c| c.node_id != node_id);
        let inserted: Vec<Camera> = cameras.iter().map(Tables::build_camera).collect();
        for camera in &inserted {
            tables.cameras.insert(camera.id, camera.clone());
        }
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_node(external_id: &str) -> NewNode {
        NewNode {
            name: format!("node-{}", external_id),
            external_id: external_id.to_string(),
            direct_ip: Some("100.64.0.9".into()),
            hostname: None,
        }
    }

    fn new_camera(node_id: Uuid, path: &str) -> NewCamera {
        NewCamera {
            node_id,
            name: path.trim_start_matches('/').to_string(),
            primary_path: path.to_string(),
            secondary_path: Some(format!("{}_sub", path)),
        }
    }

    #[tokio::test]
    async fn external_id_is_unique() {
        let store = MemoryStore::new();
        store.insert_node(&new_node("7")).await.unwrap();
        let err = store.insert_node(&new_node("7")).await.unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(_)));
    }

    #[tokio::test]
    async fn set_liveness_keeps_last_seen_when_absent() {
        let store = MemoryStore::new();
        let node = store.insert_node(&new_node("7")).await.unwrap();
        let seen = Utc::now();
        store.set_liveness(node.id, NodeStatus::Online, Some(seen)).await.unwrap();
        store.set_liveness(node.id, NodeStatus::Offline, None).await.unwrap();

        let stored = store.node_by_id(node.id).await.unwrap().unwrap();
        assert_eq!(stored.status, NodeStatus::Offline);
        assert_eq!(stored.last_seen, Some(seen));
    }

    #[tokio::test]
    async fn deleting_node_cascades_to_cameras() {
        let store = MemoryStore::new();
        let a = store.insert_node(&new_node("1")).await.unwrap();
        let b = store.insert_node(&new_node("2")).await.unwrap();
        store.insert_camera(&new_camera(a.id, "/a1")).await.unwrap();
        store.insert_camera(&new_camera(b.id, "/b1")).await.unwrap();

        assert!(store.delete_node(a.id).await.unwrap());
        assert_eq!(store.camera_count(), 1);
        assert!(store.cameras_for_node(a.id).await.unwrap().is_empty());
        assert!(!store.delete_node(a.id).await.unwrap());
    }

    #[tokio::test]
    async fn replace_is_all_or_nothing() {
        let store = MemoryStore::new();
        let a = store.insert_node(&new_node("1")).await.unwrap();
        let b = store.insert_node(&new_node("2")).await.unwrap();
        store.insert_camera(&new_camera(a.id, "/a1")).await.unwrap();
        store.insert_camera(&new_camera(b.id, "/shared")).await.unwrap();

        let err = store
            .replace_cameras(a.id, &[new_camera(a.id, "/a2"), new_camera(a.id, "/shared")])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(_)));

        let kept = store.cameras_for_node(a.id).await.unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].primary_path, "/a1");
    }

    #[tokio::test]
    async fn replace_may_reuse_own_paths() {
        let store = MemoryStore::new();
        let a = store.insert_node(&new_node("1")).await.unwrap();
        store.insert_camera(&new_camera(a.id, "/a1")).await.unwrap();

        let replaced = store
            .replace_cameras(a.id, &[new_camera(a.id, "/a1"), new_camera(a.id, "/a2")])
            .await
            .unwrap();
        assert_eq!(replaced.len(), 2);
        assert_eq!(store.camera_count(), 2);
    }

    #[tokio::test]
    async fn primary_path_may_not_shadow_another_nodes_secondary() {
        let store = MemoryStore::new();
        let a = store.insert_node(&new_node("1")).await.unwrap();
        let b = store.insert_node(&new_node("2")).await.unwrap();
        store.replace_cameras(a.id, &[new_camera(a.id, "/x")]).await.unwrap();

        let err = store
            .replace_cameras(b.id, &[new_camera(b.id, "/x_sub")])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(_)));
        let err = store.insert_camera(&new_camera(b.id, "/x_sub")).await.unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(_)));
        assert!(store.cameras_for_node(b.id).await.unwrap().is_empty());

        let owners = store.cameras_by_stream_id("x_sub").await.unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].node_id, a.id);
    }
}
