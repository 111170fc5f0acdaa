//! The `HostedIdentity` table and its named lock (§5). First in the
//! canonical acquisition order, so every handler that also needs
//! `Follower`/`NeighborhoodAction` locks takes this one first.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use profile_protocol::model::HostedIdentity;
use profile_protocol::IdentityId;

use crate::error::StoreError;

#[async_trait]
pub trait HostedIdentityStore: Send + Sync {
    async fn get(&self, id: &IdentityId) -> Result<HostedIdentity, StoreError>;
    async fn try_get(&self, id: &IdentityId) -> Option<HostedIdentity>;
    async fn insert(&self, identity: HostedIdentity) -> Result<(), StoreError>;
    async fn update(&self, identity: HostedIdentity) -> Result<(), StoreError>;
    async fn remove(&self, id: &IdentityId) -> Result<HostedIdentity, StoreError>;
    async fn count(&self) -> usize;
    async fn list_all(&self) -> Vec<HostedIdentity>;
}

#[derive(Default)]
pub struct InMemoryHostedIdentityStore {
    rows: RwLock<HashMap<IdentityId, HostedIdentity>>,
}

impl InMemoryHostedIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HostedIdentityStore for InMemoryHostedIdentityStore {
    async fn get(&self, id: &IdentityId) -> Result<HostedIdentity, StoreError> {
        self.rows.read().get(id).cloned().ok_or(StoreError::NotFound)
    }

    async fn try_get(&self, id: &IdentityId) -> Option<HostedIdentity> {
        self.rows.read().get(id).cloned()
    }

    async fn insert(&self, identity: HostedIdentity) -> Result<(), StoreError> {
        let mut rows = self.rows.write();
        if rows.contains_key(&identity.identity_id) {
            return Err(StoreError::AlreadyExists);
        }
        rows.insert(identity.identity_id.clone(), identity);
        Ok(())
    }

    async fn update(&self, identity: HostedIdentity) -> Result<(), StoreError> {
        let mut rows = self.rows.write();
        if !rows.contains_key(&identity.identity_id) {
            return Err(StoreError::NotFound);
        }
        rows.insert(identity.identity_id.clone(), identity);
        Ok(())
    }

    async fn remove(&self, id: &IdentityId) -> Result<HostedIdentity, StoreError> {
        self.rows.write().remove(id).ok_or(StoreError::NotFound)
    }

    async fn count(&self) -> usize {
        self.rows.read().len()
    }

    async fn list_all(&self) -> Vec<HostedIdentity> {
        self.rows.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use profile_protocol::PublicKey;

    fn sample(seed: u8) -> HostedIdentity {
        let pk = PublicKey(vec![seed; 32]);
        HostedIdentity::new_uninitialized(IdentityId::of_public_key(&pk), pk)
    }

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let store = InMemoryHostedIdentityStore::new();
        let identity = sample(1);
        let id = identity.identity_id.clone();
        store.insert(identity).await.unwrap();
        assert!(store.get(&id).await.is_ok());
        assert_eq!(store.count().await, 1);
    }

    #[tokio::test]
    async fn double_insert_is_rejected() {
        let store = InMemoryHostedIdentityStore::new();
        store.insert(sample(2)).await.unwrap();
        assert_eq!(store.insert(sample(2)).await, Err(StoreError::AlreadyExists));
    }

    #[tokio::test]
    async fn remove_missing_is_not_found() {
        let store = InMemoryHostedIdentityStore::new();
        let pk = PublicKey(vec![9; 32]);
        let id = IdentityId::of_public_key(&pk);
        assert_eq!(store.remove(&id).await, Err(StoreError::NotFound));
    }
}
