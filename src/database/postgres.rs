use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, Pool, Postgres};
use uuid::Uuid;

use super::{config::DatabaseConfig, NodeStore, StoreError};
use crate::models::{Camera, NewCamera, NewNode, Node, NodeStatus};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS node (
        id UUID PRIMARY KEY,
        name VARCHAR(255) NOT NULL,
        external_id VARCHAR(255) NOT NULL UNIQUE,
        direct_ip VARCHAR(64),
        hostname VARCHAR(255),
        status VARCHAR(16) NOT NULL DEFAULT 'offline',
        last_seen TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )",
    "CREATE TABLE IF NOT EXISTS camera (
        id UUID PRIMARY KEY,
        node_id UUID NOT NULL REFERENCES node(id) ON DELETE CASCADE,
        name VARCHAR(255) NOT NULL,
        primary_path VARCHAR(255) NOT NULL UNIQUE,
        secondary_path VARCHAR(255),
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )",
    "CREATE INDEX IF NOT EXISTS camera_node_id_idx ON camera (node_id)",
];

#[derive(sqlx::FromRow)]
struct NodeRow {
    id: Uuid,
    name: String,
    external_id: String,
    direct_ip: Option<String>,
    hostname: Option<String>,
    status: String,
    last_seen: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<NodeRow> for Node {
    type Error = StoreError;

    fn try_from(row: NodeRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<NodeStatus>()
            .map_err(|e| StoreError::Corrupt(format!("node {}: {}", row.id, e)))?;
        Ok(Node {
            id: row.id,
            name: row.name,
            external_id: row.external_id,
            direct_ip: row.direct_ip,
            hostname: row.hostname,
            status,
            last_seen: row.last_seen,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CameraRow {
    id: Uuid,
    node_id: Uuid,
    name: String,
    primary_path: String,
    secondary_path: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<CameraRow> for Camera {
    fn from(row: CameraRow) -> Self {
        Camera {
            id: row.id,
            node_id: row.node_id,
            name: row.name,
            primary_path: row.primary_path,
            secondary_path: row.secondary_path,
            created_at: row.created_at,
        }
    }
}

/// Maps unique-constraint failures to [`StoreError::UniqueViolation`].
fn map_write_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            let constraint = db.constraint().unwrap_or("unique").to_string();
            return StoreError::UniqueViolation(constraint);
        }
    }
    StoreError::Database(err)
}

/// Postgres-backed [`NodeStore`].
#[derive(Clone)]
pub struct PgStore {
    pool: Pool<Postgres>,
}

impl PgStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let pool = config.create_postgres_pool().await?;
        Ok(Self::new(pool))
    }

    /// Creates tables and indexes when missing.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn insert_camera_with(
        conn: &mut PgConnection,
        camera: &NewCamera,
    ) -> Result<Camera, StoreError> {
        let row = sqlx::query_as::<_, CameraRow>(
            "INSERT INTO camera (id, node_id, name, primary_path, secondary_path)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING id, node_id, name, primary_path, secondary_path, created_at",
        )
        .bind(Uuid::now_v7())
        .bind(camera.node_id)
        .bind(&camera.name)
        .bind(&camera.primary_path)
        .bind(&camera.secondary_path)
        .fetch_one(conn)
        .await
        .map_err(map_write_error)?;
        Ok(row.into())
    }
}

#[async_trait]
impl NodeStore for PgStore {
    async fn insert_node(&self, node: &NewNode) -> Result<Node, StoreError> {
        let row = sqlx::query_as::<_, NodeRow>(
            "INSERT INTO node (id, name, external_id, direct_ip, hostname, status)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING id, name, external_id, direct_ip, hostname, status, last_seen, created_at",
        )
        .bind(Uuid::now_v7())
        .bind(&node.name)
        .bind(&node.external_id)
        .bind(&node.direct_ip)
        .bind(&node.hostname)
        .bind(NodeStatus::Offline.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(map_write_error)?;
        row.try_into()
    }

    async fn update_node(&self, node: &Node) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE node SET name = $2, direct_ip = $3, hostname = $4 WHERE id = $1",
        )
        .bind(node.id)
        .bind(&node.name)
        .bind(&node.direct_ip)
        .bind(&node.hostname)
        .execute(&self.pool)
        .await
        .map_err(map_write_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn node_by_id(&self, id: Uuid) -> Result<Option<Node>, StoreError> {
        sqlx::query_as::<_, NodeRow>(
            "SELECT id, name, external_id, direct_ip, hostname, status, last_seen, created_at
             FROM node WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(Node::try_from)
        .transpose()
    }

    async fn node_by_external_id(&self, external_id: &str) -> Result<Option<Node>, StoreError> {
        sqlx::query_as::<_, NodeRow>(
            "SELECT id, name, external_id, direct_ip, hostname, status, last_seen, created_at
             FROM node WHERE external_id = $1",
        )
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?
        .map(Node::try_from)
        .transpose()
    }

    async fn set_liveness(
        &self,
        id: Uuid,
        status: NodeStatus,
        last_seen: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE node SET status = $2, last_seen = COALESCE($3, last_seen) WHERE id = $1",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(last_seen)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_node(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM node WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn cameras_for_node(&self, node_id: Uuid) -> Result<Vec<Camera>, StoreError> {
        let rows = sqlx::query_as::<_, CameraRow>(
            "SELECT id, node_id, name, primary_path, secondary_path, created_at
             FROM camera WHERE node_id = $1 ORDER BY created_at, primary_path",
        )
        .bind(node_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Camera::from).collect())
    }

    async fn camera_by_primary_path(&self, path: &str) -> Result<Option<Camera>, StoreError> {
        let row = sqlx::query_as::<_, CameraRow>(
            "SELECT id, node_id, name, primary_path, secondary_path, created_at
             FROM camera WHERE primary_path = $1",
        )
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Camera::from))
    }

    async fn cameras_by_stream_id(&self, stream_id: &str) -> Result<Vec<Camera>, StoreError> {
        let rows = sqlx::query_as::<_, CameraRow>(
            "SELECT id, node_id, name, primary_path, secondary_path, created_at
             FROM camera
             WHERE ltrim(primary_path, '/') = $1 OR ltrim(secondary_path, '/') = $1",
        )
        .bind(stream_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Camera::from).collect())
    }

    async fn insert_camera(&self, camera: &NewCamera) -> Result<Camera, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Self::insert_camera_with(&mut conn, camera).await
    }

    async fn delete_camera(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM camera WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn replace_cameras(
        &self,
        node_id: Uuid,
        cameras: &[NewCamera],
    ) -> Result<Vec<Camera>, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM camera WHERE node_id = $1")
            .bind(node_id)
            .execute(&mut *tx)
            .await?;

        let mut inserted = Vec::with_capacity(cameras.len());
        for camera in cameras {
            inserted.push(Self::insert_camera_with(&mut tx, camera).await?);
        }

        // Dropping the transaction on an early return above rolls it back.
        tx.commit().await?;
        Ok(inserted)
    }
}
