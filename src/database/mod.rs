//! Durable storage for node and camera records.
//!
//! The coordination core only talks to [`NodeStore`]; the Postgres and
//! in-memory backends are interchangeable behind it.

pub mod config;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Camera, NewCamera, NewNode, Node, NodeStatus};

pub use config::DatabaseConfig;
pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique constraint rejected the write (external id or primary path).
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Record storage the registry is built on.
#[async_trait]
pub trait NodeStore: Send + Sync {
    async fn insert_node(&self, node: &NewNode) -> Result<Node, StoreError>;

    /// Overwrites name and addresses. Returns false when the node is gone.
    async fn update_node(&self, node: &Node) -> Result<bool, StoreError>;

    async fn node_by_id(&self, id: Uuid) -> Result<Option<Node>, StoreError>;

    async fn node_by_external_id(&self, external_id: &str) -> Result<Option<Node>, StoreError>;

    /// Sets the liveness state; `last_seen` is only written when provided.
    async fn set_liveness(
        &self,
        id: Uuid,
        status: NodeStatus,
        last_seen: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError>;

    /// Deletes the node and, by cascade, its cameras.
    async fn delete_node(&self, id: Uuid) -> Result<bool, StoreError>;

    async fn cameras_for_node(&self, node_id: Uuid) -> Result<Vec<Camera>, StoreError>;

    async fn camera_by_primary_path(&self, path: &str) -> Result<Option<Camera>, StoreError>;

    /// Cameras whose primary or secondary path maps to router path `stream_id`.
    async fn cameras_by_stream_id(&self, stream_id: &str) -> Result<Vec<Camera>, StoreError>;

    async fn insert_camera(&self, camera: &NewCamera) -> Result<Camera, StoreError>;

    async fn delete_camera(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Atomically drops every camera of the node and inserts `cameras`.
    async fn replace_cameras(
        &self,
        node_id: Uuid,
        cameras: &[NewCamera],
    ) -> Result<Vec<Camera>, StoreError>;
}
