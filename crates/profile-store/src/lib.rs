//! In-memory reference implementation of the six named-lock tables and the
//! image blob store (§3, §5, §6). A real deployment swaps these traits for
//! a transactional backend; the core only ever depends on the traits in
//! this crate, never on the in-memory structs directly.

pub mod error;
pub mod follower;
pub mod hosted_identity;
pub mod image;
pub mod neighbor;
pub mod neighbor_identity;
pub mod neighborhood_action;
pub mod related_identity;

pub use error::StoreError;
pub use follower::{FollowerStore, InMemoryFollowerStore};
pub use hosted_identity::{HostedIdentityStore, InMemoryHostedIdentityStore};
pub use image::{ImageStore, InMemoryImageStore};
pub use neighbor::{InMemoryNeighborStore, NeighborStore};
pub use neighbor_identity::{InMemoryNeighborIdentityStore, NeighborIdentityKey, NeighborIdentityStore};
pub use neighborhood_action::{InMemoryNeighborhoodActionStore, NeighborhoodActionStore};
pub use related_identity::{InMemoryRelatedIdentityStore, RelatedIdentityStore};

use std::sync::Arc;

/// Bundles one instance of every table behind `Arc` so the composition root
/// can hand out a single clone-able handle. Lock acquisition across more
/// than one of these fields must follow §5's canonical order: HostedIdentity
/// → NeighborIdentity → Neighbor → Follower → RelatedIdentity →
/// NeighborhoodAction.
#[derive(Clone)]
pub struct Stores {
    pub hosted_identities: Arc<dyn HostedIdentityStore>,
    pub neighbor_identities: Arc<dyn NeighborIdentityStore>,
    pub neighbors: Arc<dyn NeighborStore>,
    pub followers: Arc<dyn FollowerStore>,
    pub related_identities: Arc<dyn RelatedIdentityStore>,
    pub neighborhood_actions: Arc<dyn NeighborhoodActionStore>,
    pub images: Arc<dyn ImageStore>,
}

impl Stores {
    /// Wires up the in-memory reference backend for every table.
    pub fn new_in_memory() -> Self {
        Self {
            hosted_identities: Arc::new(InMemoryHostedIdentityStore::new()),
            neighbor_identities: Arc::new(InMemoryNeighborIdentityStore::new()),
            neighbors: Arc::new(InMemoryNeighborStore::new()),
            followers: Arc::new(InMemoryFollowerStore::new()),
            related_identities: Arc::new(InMemoryRelatedIdentityStore::new()),
            neighborhood_actions: Arc::new(InMemoryNeighborhoodActionStore::new()),
            images: Arc::new(InMemoryImageStore::new()),
        }
    }
}
