//! Persistence of node records is treated as an external collaborator
//! (spec §1): the registry's read path is always served from an in-memory
//! view, and durable storage is injected via `NodeStore`. `PgNodeStore` is
//! the ambient `sqlx`/Postgres implementation the backend always carries;
//! `InMemoryNodeStore` is used by tests and hosts that don't need
//! durability across restarts.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::FabricError;
use super::node::Node;

#[async_trait]
pub trait NodeStore: Send + Sync {
    async fn load_all(&self) -> Result<Vec<Node>, FabricError>;
    async fn upsert(&self, node: &Node) -> Result<(), FabricError>;
    async fn delete(&self, id: Uuid) -> Result<(), FabricError>;
}

#[derive(Default)]
pub struct InMemoryNodeStore {
    nodes: RwLock<HashMap<Uuid, Node>>,
}

impl InMemoryNodeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NodeStore for InMemoryNodeStore {
    async fn load_all(&self) -> Result<Vec<Node>, FabricError> {
        Ok(self.nodes.read().unwrap().values().cloned().collect())
    }

    async fn upsert(&self, node: &Node) -> Result<(), FabricError> {
        self.nodes.write().unwrap().insert(node.id, node.clone());
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), FabricError> {
        self.nodes.write().unwrap().remove(&id);
        Ok(())
    }
}

/// `sqlx`/Postgres-backed node store. Schema: `fed_nodes` (see
/// `migrations/0001_fed_nodes.sql`), one row per node, capability sets and
/// collections stored as JSON columns.
pub struct PgNodeStore {
    pool: PgPool,
}

impl PgNodeStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct NodeRow {
    payload: serde_json::Value,
}

#[async_trait]
impl NodeStore for PgNodeStore {
    async fn load_all(&self) -> Result<Vec<Node>, FabricError> {
        let rows = sqlx::query_as::<_, NodeRow>("SELECT payload FROM fed_nodes")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|r| serde_json::from_value(r.payload).ok())
            .collect())
    }

    async fn upsert(&self, node: &Node) -> Result<(), FabricError> {
        let payload = serde_json::to_value(node)
            .map_err(|e| FabricError::CacheBackendUnavailable(e.to_string()))?;
        sqlx::query(
            "INSERT INTO fed_nodes (id, slug, payload) VALUES ($1, $2, $3) \
             ON CONFLICT (id) DO UPDATE SET slug = $2, payload = $3, updated_at = NOW()",
        )
        .bind(node.id)
        .bind(&node.slug)
        .bind(&payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), FabricError> {
        sqlx::query("DELETE FROM fed_nodes WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
