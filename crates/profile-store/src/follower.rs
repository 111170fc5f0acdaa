//! The `Follower` table (§3, §5): peer servers that mirror our profiles.
//! Enqueuing a neighborhood action for a follower takes the
//! `{HostedIdentity, Follower, NeighborhoodAction}` lock group (§5).

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use profile_protocol::model::{Follower, ServerId};

use crate::error::StoreError;

#[async_trait]
pub trait FollowerStore: Send + Sync {
    async fn get(&self, server_id: &ServerId) -> Option<Follower>;
    async fn upsert(&self, follower: Follower);
    async fn remove(&self, server_id: &ServerId) -> Result<Follower, StoreError>;
    async fn list_all(&self) -> Vec<Follower>;
    async fn count(&self) -> usize;
}

#[derive(Default)]
pub struct InMemoryFollowerStore {
    rows: RwLock<HashMap<ServerId, Follower>>,
}

impl InMemoryFollowerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FollowerStore for InMemoryFollowerStore {
    async fn get(&self, server_id: &ServerId) -> Option<Follower> {
        self.rows.read().get(server_id).cloned()
    }

    async fn upsert(&self, follower: Follower) {
        self.rows.write().insert(follower.server_id.clone(), follower);
    }

    async fn remove(&self, server_id: &ServerId) -> Result<Follower, StoreError> {
        self.rows.write().remove(server_id).ok_or(StoreError::NotFound)
    }

    async fn list_all(&self) -> Vec<Follower> {
        self.rows.read().values().cloned().collect()
    }

    async fn count(&self) -> usize {
        self.rows.read().len()
    }
}
