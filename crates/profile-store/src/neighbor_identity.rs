//! The `NeighborIdentity` table (§3, §5): profiles mirrored in from
//! neighbors, keyed by `(identity_id, hosting_server_id)` since the same
//! identity can in principle be claimed by more than one neighbor
//! simultaneously during a migration window.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use profile_protocol::model::{NeighborIdentity, ServerId};
use profile_protocol::IdentityId;

use crate::error::StoreError;

pub type NeighborIdentityKey = (IdentityId, ServerId);

#[async_trait]
pub trait NeighborIdentityStore: Send + Sync {
    async fn get(&self, key: &NeighborIdentityKey) -> Option<NeighborIdentity>;
    async fn upsert(&self, identity: NeighborIdentity);
    async fn remove(&self, key: &NeighborIdentityKey) -> Option<NeighborIdentity>;
    /// All NeighborIdentity rows sourced from one neighbor, for tear-down
    /// (§4.F.4) and for `RefreshNeighborStatus` bookkeeping.
    async fn list_by_server(&self, server_id: &ServerId) -> Vec<NeighborIdentity>;
    async fn count(&self) -> usize;
    async fn search(
        &self,
        predicate: &(dyn Fn(&NeighborIdentity) -> bool + Sync),
        limit: usize,
    ) -> Vec<NeighborIdentity>;
}

#[derive(Default)]
pub struct InMemoryNeighborIdentityStore {
    rows: RwLock<HashMap<NeighborIdentityKey, NeighborIdentity>>,
}

impl InMemoryNeighborIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NeighborIdentityStore for InMemoryNeighborIdentityStore {
    async fn get(&self, key: &NeighborIdentityKey) -> Option<NeighborIdentity> {
        self.rows.read().get(key).cloned()
    }

    async fn upsert(&self, identity: NeighborIdentity) {
        let key = (identity.identity_id.clone(), identity.hosting_server_id.clone());
        self.rows.write().insert(key, identity);
    }

    async fn remove(&self, key: &NeighborIdentityKey) -> Option<NeighborIdentity> {
        self.rows.write().remove(key)
    }

    async fn list_by_server(&self, server_id: &ServerId) -> Vec<NeighborIdentity> {
        self.rows.read().values().filter(|row| &row.hosting_server_id == server_id).cloned().collect()
    }

    async fn count(&self) -> usize {
        self.rows.read().len()
    }

    async fn search(
        &self,
        predicate: &(dyn Fn(&NeighborIdentity) -> bool + Sync),
        limit: usize,
    ) -> Vec<NeighborIdentity> {
        self.rows.read().values().filter(|row| predicate(row)).take(limit).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use profile_protocol::{GpsLocation, PublicKey, SemVer};

    fn sample(seed: u8, server_seed: u8) -> NeighborIdentity {
        let pk = PublicKey(vec![seed; 32]);
        let server_pk = PublicKey(vec![server_seed; 32]);
        NeighborIdentity {
            identity_id: IdentityId::of_public_key(&pk),
            hosting_server_id: IdentityId::of_public_key(&server_pk),
            public_key: pk,
            version: SemVer::new(1, 0, 0),
            name: "alice".into(),
            identity_type: "person".into(),
            location: GpsLocation::from_degrees(0.0, 0.0),
            extra_data: Vec::new(),
            profile_image_hash: None,
            thumbnail_image_hash: None,
        }
    }

    #[tokio::test]
    async fn upsert_then_get_by_composite_key() {
        let store = InMemoryNeighborIdentityStore::new();
        let row = sample(1, 2);
        let key = (row.identity_id.clone(), row.hosting_server_id.clone());
        store.upsert(row).await;
        assert!(store.get(&key).await.is_some());
    }

    #[tokio::test]
    async fn list_by_server_filters_correctly() {
        let store = InMemoryNeighborIdentityStore::new();
        store.upsert(sample(1, 9)).await;
        store.upsert(sample(2, 9)).await;
        store.upsert(sample(3, 10)).await;
        let server_pk = PublicKey(vec![9; 32]);
        let server_id = IdentityId::of_public_key(&server_pk);
        assert_eq!(store.list_by_server(&server_id).await.len(), 2);
    }
}
