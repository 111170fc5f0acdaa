//! The `Neighbor` table (§3, §5): peer servers whose profiles this server
//! mirrors in. Keyed by `ServerId`.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use profile_protocol::model::{Neighbor, ServerId};

use crate::error::StoreError;

#[async_trait]
pub trait NeighborStore: Send + Sync {
    async fn get(&self, server_id: &ServerId) -> Option<Neighbor>;
    async fn upsert(&self, neighbor: Neighbor);
    async fn remove(&self, server_id: &ServerId) -> Result<Neighbor, StoreError>;
    async fn list_all(&self) -> Vec<Neighbor>;
    async fn count(&self) -> usize;
}

#[derive(Default)]
pub struct InMemoryNeighborStore {
    rows: RwLock<HashMap<ServerId, Neighbor>>,
}

impl InMemoryNeighborStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NeighborStore for InMemoryNeighborStore {
    async fn get(&self, server_id: &ServerId) -> Option<Neighbor> {
        self.rows.read().get(server_id).cloned()
    }

    async fn upsert(&self, neighbor: Neighbor) {
        self.rows.write().insert(neighbor.server_id.clone(), neighbor);
    }

    async fn remove(&self, server_id: &ServerId) -> Result<Neighbor, StoreError> {
        self.rows.write().remove(server_id).ok_or(StoreError::NotFound)
    }

    async fn list_all(&self) -> Vec<Neighbor> {
        self.rows.read().values().cloned().collect()
    }

    async fn count(&self) -> usize {
        self.rows.read().len()
    }
}
