//! The `RelatedIdentity` table (§3, §5): relationship cards attesting a
//! signed claim about a hosted identity. Keyed by `card_id`; looked up by
//! owning identity via the card's recipient public key.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use profile_protocol::model::RelatedIdentity;
use profile_protocol::IdentityId;

use crate::error::StoreError;

#[async_trait]
pub trait RelatedIdentityStore: Send + Sync {
    async fn get(&self, card_id: &[u8; 32]) -> Option<RelatedIdentity>;
    async fn insert(&self, card: RelatedIdentity) -> Result<(), StoreError>;
    async fn remove(&self, card_id: &[u8; 32]) -> Result<RelatedIdentity, StoreError>;
    /// Cards recipient-signed to the given identity, optionally filtered by
    /// relation type (§4.C `GetIdentityRelationships`).
    async fn list_for_identity(
        &self,
        identity_id: &IdentityId,
        relation_type: Option<&str>,
    ) -> Vec<RelatedIdentity>;
    async fn count_for_identity(&self, identity_id: &IdentityId) -> usize;
}

#[derive(Default)]
pub struct InMemoryRelatedIdentityStore {
    rows: RwLock<HashMap<[u8; 32], RelatedIdentity>>,
}

impl InMemoryRelatedIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RelatedIdentityStore for InMemoryRelatedIdentityStore {
    async fn get(&self, card_id: &[u8; 32]) -> Option<RelatedIdentity> {
        self.rows.read().get(card_id).cloned()
    }

    async fn insert(&self, card: RelatedIdentity) -> Result<(), StoreError> {
        let mut rows = self.rows.write();
        if rows.contains_key(&card.card_id) {
            return Err(StoreError::AlreadyExists);
        }
        rows.insert(card.card_id, card);
        Ok(())
    }

    async fn remove(&self, card_id: &[u8; 32]) -> Result<RelatedIdentity, StoreError> {
        self.rows.write().remove(card_id).ok_or(StoreError::NotFound)
    }

    async fn list_for_identity(
        &self,
        identity_id: &IdentityId,
        relation_type: Option<&str>,
    ) -> Vec<RelatedIdentity> {
        self.rows
            .read()
            .values()
            .filter(|card| &IdentityId::of_public_key(&card.recipient_public_key) == identity_id)
            .filter(|card| relation_type.map_or(true, |rt| card.relation_type == rt))
            .cloned()
            .collect()
    }

    async fn count_for_identity(&self, identity_id: &IdentityId) -> usize {
        self.list_for_identity(identity_id, None).await.len()
    }
}
