//! The `NeighborhoodAction` table (§3, §4.F, §5): the work queue the
//! neighborhood engine drains. Last in the canonical lock-acquisition
//! order, so it is always taken after any `HostedIdentity`/`Follower` lock
//! a caller also needs for the same enqueue transaction.
//!
//! Ordering guarantee (§5): "for one (target, profile-class) pair, update
//! actions are delivered in enqueue order". We realize that by grouping
//! pending actions under `(target_server_id, is_profile_class)` and only
//! ever handing out the lowest-id action of a group that is not already
//! claimed by an in-flight worker — so at most one worker touches a given
//! group at a time, while different groups (and the non-profile-class
//! actions for the same target) proceed independently.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::SystemTime;

use async_trait::async_trait;
use parking_lot::Mutex;
use profile_protocol::model::{NeighborhoodAction, ServerId};

type GroupKey = (ServerId, bool);

#[async_trait]
pub trait NeighborhoodActionStore: Send + Sync {
    /// Assigns a monotonic id and enqueues the action, returning that id.
    async fn enqueue(&self, action: NeighborhoodAction) -> u64;

    /// Pops the lowest-id ready (unblocked, ungrouped-in-flight) action
    /// across all targets, marking its group in-flight until
    /// [`NeighborhoodActionStore::release`] is called. `None` if every
    /// pending action is either lease-blocked or its group is already
    /// claimed.
    async fn claim_next_ready(&self, now: SystemTime) -> Option<NeighborhoodAction>;

    /// Frees a group for further claims once a worker finishes the action
    /// it popped (successfully or not).
    async fn release(&self, target_server_id: &ServerId, is_profile_class: bool);

    /// Puts a claimed action back in the pending set under its original id
    /// (preserving enqueue-order position) and frees its group, for a
    /// transient failure that should retry once `execute_after` allows
    /// (§4.F "the lease lets it retry").
    async fn requeue(&self, action: NeighborhoodAction);

    async fn remove_all_for_target(&self, target_server_id: &ServerId) -> Vec<NeighborhoodAction>;

    async fn list_pending_for_target(&self, target_server_id: &ServerId) -> Vec<NeighborhoodAction>;

    async fn count_pending(&self) -> usize;
}

pub struct InMemoryNeighborhoodActionStore {
    next_id: Mutex<u64>,
    pending: Mutex<BTreeMap<u64, NeighborhoodAction>>,
    in_flight_groups: Mutex<HashSet<GroupKey>>,
}

impl Default for InMemoryNeighborhoodActionStore {
    fn default() -> Self {
        Self {
            next_id: Mutex::new(1),
            pending: Mutex::new(BTreeMap::new()),
            in_flight_groups: Mutex::new(HashSet::new()),
        }
    }
}

impl InMemoryNeighborhoodActionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn group_of(action: &NeighborhoodAction) -> GroupKey {
        (action.target_server_id.clone(), action.action_type.is_profile_class())
    }
}

#[async_trait]
impl NeighborhoodActionStore for InMemoryNeighborhoodActionStore {
    async fn enqueue(&self, mut action: NeighborhoodAction) -> u64 {
        let id = {
            let mut next_id = self.next_id.lock();
            let id = *next_id;
            *next_id += 1;
            id
        };
        action.id = id;
        self.pending.lock().insert(id, action);
        id
    }

    async fn claim_next_ready(&self, now: SystemTime) -> Option<NeighborhoodAction> {
        let mut pending = self.pending.lock();
        let mut in_flight = self.in_flight_groups.lock();

        let ready_id = pending
            .iter()
            .find(|(_, action)| !action.is_blocked(now) && !in_flight.contains(&Self::group_of(action)))
            .map(|(id, _)| *id)?;

        let action = pending.remove(&ready_id)?;
        in_flight.insert(Self::group_of(&action));
        Some(action)
    }

    async fn release(&self, target_server_id: &ServerId, is_profile_class: bool) {
        self.in_flight_groups.lock().remove(&(target_server_id.clone(), is_profile_class));
    }

    async fn requeue(&self, action: NeighborhoodAction) {
        let group = Self::group_of(&action);
        self.pending.lock().insert(action.id, action);
        self.in_flight_groups.lock().remove(&group);
    }

    async fn remove_all_for_target(&self, target_server_id: &ServerId) -> Vec<NeighborhoodAction> {
        let mut pending = self.pending.lock();
        let (removed, kept): (BTreeMap<_, _>, BTreeMap<_, _>) =
            std::mem::take(&mut *pending).into_iter().partition(|(_, a)| &a.target_server_id == target_server_id);
        *pending = kept;
        removed.into_values().collect()
    }

    async fn list_pending_for_target(&self, target_server_id: &ServerId) -> Vec<NeighborhoodAction> {
        self.pending.lock().values().filter(|a| &a.target_server_id == target_server_id).cloned().collect()
    }

    async fn count_pending(&self) -> usize {
        self.pending.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use profile_protocol::model::NeighborhoodActionType;
    use profile_protocol::{IdentityId, PublicKey};

    fn target() -> ServerId {
        IdentityId::of_public_key(&PublicKey(vec![1; 32]))
    }

    fn action(kind: NeighborhoodActionType) -> NeighborhoodAction {
        NeighborhoodAction {
            id: 0,
            target_server_id: target(),
            action_type: kind,
            target_identity_id: None,
            created_at: SystemTime::now(),
            execute_after: None,
            additional_data: None,
        }
    }

    #[tokio::test]
    async fn enqueue_order_is_preserved_within_a_group() {
        let store = InMemoryNeighborhoodActionStore::new();
        let first = store.enqueue(action(NeighborhoodActionType::AddProfile)).await;
        let second = store.enqueue(action(NeighborhoodActionType::ChangeProfile)).await;
        assert!(first < second);

        let claimed = store.claim_next_ready(SystemTime::now()).await.unwrap();
        assert_eq!(claimed.id, first);

        // Same group (profile-class, same target) is now in-flight: the
        // next claim must not also hand out `second` concurrently.
        assert!(store.claim_next_ready(SystemTime::now()).await.is_none());

        store.release(&target(), true).await;
        let claimed2 = store.claim_next_ready(SystemTime::now()).await.unwrap();
        assert_eq!(claimed2.id, second);
    }

    #[tokio::test]
    async fn profile_class_and_server_class_actions_proceed_independently() {
        let store = InMemoryNeighborhoodActionStore::new();
        store.enqueue(action(NeighborhoodActionType::AddProfile)).await;
        store.enqueue(action(NeighborhoodActionType::RefreshNeighborStatus)).await;
        // AddNeighbor is a server-class action for the same target.
        store.enqueue(action(NeighborhoodActionType::AddNeighbor)).await;

        let a = store.claim_next_ready(SystemTime::now()).await.unwrap();
        let b = store.claim_next_ready(SystemTime::now()).await.unwrap();
        assert_ne!(a.action_type.is_profile_class(), b.action_type.is_profile_class());
    }

    #[tokio::test]
    async fn leased_actions_are_not_claimable_until_due() {
        let store = InMemoryNeighborhoodActionStore::new();
        let mut leased = action(NeighborhoodActionType::AddNeighbor);
        leased.execute_after = Some(SystemTime::now() + std::time::Duration::from_secs(600));
        store.enqueue(leased).await;
        assert!(store.claim_next_ready(SystemTime::now()).await.is_none());
    }
}
