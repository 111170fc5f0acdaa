//! The replication engine (§4.F): the action queue scheduler, outbound
//! propagation workers, and the two ends of the initialization handshake.
//!
//! The engine never dials a peer directly — `PeerConnector`/`PeerConnection`
//! are the seam (§9 "process-wide component registry... replace with an
//! explicit composition root passing interface-typed handles"). The
//! concrete TLS implementation lives in `profile-server`, which is the only
//! crate that needs to know about certificates and socket addresses.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use log::{debug, info, warn};
use parking_lot::RwLock;
use profile_protocol::messages::{ChangeItemKind, NeighborhoodChangeItemMsg};
use profile_protocol::model::{
    Follower, Neighbor, NeighborhoodAction, NeighborhoodActionType, PeerAddress, ServerId,
};
use profile_protocol::roles::role;
use profile_protocol::{IdentityId, ProtocolError, PublicKey};
use profile_store::Stores;
use tokio::sync::{watch, Notify, Semaphore};

use crate::config::{CoreConfig, RolePorts};

/// Action lease: how long a claimed action is hidden from re-claim while a
/// worker retries it (§4.F, §5).
pub const ACTION_LEASE: Duration = Duration::from_secs(600);
/// Lease held by the blocking `InitializationProcessInProgress` action
/// while we stream a snapshot to a brand new follower (§4.F.2).
pub const INITIALIZATION_LEASE: Duration = Duration::from_secs(20 * 60);
/// The pushing side must finish streaming this long before its own lease
/// expires, or it aborts and lets the follower retry later (§4.F.2).
pub const INITIALIZATION_SAFETY_MARGIN: Duration = Duration::from_secs(90);
/// Hard worker throttle, independent of per-target locks (§5).
const MAX_CONCURRENT_WORKERS: usize = 5;
/// Scheduling tick (§4.F "every ~20 s, also signaled by handlers").
const SCAN_INTERVAL: Duration = Duration::from_secs(20);
/// Batches of at most this many items are applied under lock at a time
/// (§4.F.3).
pub const INGEST_BATCH_SIZE: usize = 100;

/// One item of an outbound `NeighborhoodSharedProfileUpdate` batch, already
/// shaped the way the wire message wants it, plus whether it still needs a
/// thumbnail blob attached by the caller (kept separate so the engine need
/// not depend on the image store to build the message itself).
#[derive(Clone, Debug)]
pub struct OutboundAddOrChange {
    pub identity_id: IdentityId,
    pub public_key: PublicKey,
    pub version: profile_protocol::SemVer,
    pub name: String,
    pub identity_type: String,
    pub location: profile_protocol::GpsLocation,
    pub extra_data: Vec<u8>,
    pub profile_image_hash: Option<Vec<u8>>,
    pub thumbnail_image: Option<Vec<u8>>,
    pub signature: Vec<u8>,
}

pub(crate) fn add_item(item: &OutboundAddOrChange) -> NeighborhoodChangeItemMsg {
    NeighborhoodChangeItemMsg {
        kind: ChangeItemKind::Add as i32,
        identity_id: item.identity_id.as_bytes().to_vec(),
        public_key: item.public_key.0.clone(),
        version: Some(profile_protocol::messages::SemVerMsg {
            major: item.version.major,
            minor: item.version.minor,
            patch: item.version.patch,
        }),
        name: item.name.clone(),
        identity_type: item.identity_type.clone(),
        location: Some(profile_protocol::messages::GpsLocationMsg {
            latitude_fixed: item.location.latitude_fixed,
            longitude_fixed: item.location.longitude_fixed,
        }),
        extra_data: item.extra_data.clone(),
        profile_image_hash: item.profile_image_hash.clone(),
        thumbnail_image: item.thumbnail_image.clone(),
        signature: item.signature.clone(),
        set_flags: 0,
    }
}

pub(crate) fn remove_item(identity_id: &IdentityId) -> NeighborhoodChangeItemMsg {
    NeighborhoodChangeItemMsg {
        kind: ChangeItemKind::Remove as i32,
        identity_id: identity_id.as_bytes().to_vec(),
        ..Default::default()
    }
}

pub(crate) fn refresh_item() -> NeighborhoodChangeItemMsg {
    NeighborhoodChangeItemMsg { kind: ChangeItemKind::Refresh as i32, ..Default::default() }
}

/// What we received on an initialization connection we opened (§4.F.2
/// "initiating side... accepts and stores incoming Add items").
pub enum PeerInboundMessage {
    ProfileUpdate(Vec<NeighborhoodChangeItemMsg>),
    Finish,
}

/// One authenticated outbound connection to a peer profile server. Every
/// call is a full request/response round trip over the same TLS
/// connection; `recv_inbound`/`ack_inbound` let the engine also answer
/// server-originated requests the peer pushes back on the same socket
/// during initialization (§4.F.2 — the wire is bidirectional per §4.B).
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// `StartConversation` + `VerifyIdentity` against our own server key;
    /// returns the peer's identity id, which the caller compares against
    /// what it expected (§4.F.1 step 2 "mismatch ⇒ delete this follower").
    async fn authenticate(&mut self) -> Result<ServerId, ProtocolError>;

    async fn list_roles(&mut self) -> Result<Vec<(u32, u16)>, ProtocolError>;

    async fn start_neighborhood_initialization(
        &mut self,
        primary_port: u16,
        sr_neighbor_port: u16,
        ip_address: IpAddr,
    ) -> Result<(), ProtocolError>;

    /// Blocks until the peer pushes the next item batch or the Finish
    /// marker on this connection.
    async fn recv_inbound(&mut self) -> Result<PeerInboundMessage, ProtocolError>;
    async fn ack_inbound(&mut self) -> Result<(), ProtocolError>;

    async fn send_profile_update(
        &mut self,
        items: Vec<NeighborhoodChangeItemMsg>,
    ) -> Result<(), ProtocolError>;

    async fn stop_neighborhood_updates(&mut self) -> Result<(), ProtocolError>;
}

#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn connect(&self, address: &PeerAddress) -> Result<Box<dyn PeerConnection>, ProtocolError>;
}

/// Caches a resolved `sr_neighbor_port` per peer so later actions skip the
/// `ListRoles` discovery round trip (§4.F.1 step 1).
#[derive(Default)]
struct PortCache {
    ports: RwLock<HashMap<ServerId, u16>>,
}

impl PortCache {
    fn get(&self, server_id: &ServerId) -> Option<u16> {
        self.ports.read().get(server_id).copied()
    }
    fn set(&self, server_id: ServerId, port: u16) {
        self.ports.write().insert(server_id, port);
    }
    fn clear(&self, server_id: &ServerId) {
        self.ports.write().remove(server_id);
    }
}

pub struct NeighborhoodEngine {
    stores: Stores,
    connector: Arc<dyn PeerConnector>,
    config: CoreConfig,
    #[allow(dead_code)]
    server_id: ServerId,
    role_ports: RolePorts,
    advertised_ip: IpAddr,
    semaphore: Arc<Semaphore>,
    port_cache: PortCache,
    shutdown: watch::Receiver<bool>,
    wake: Notify,
}

impl NeighborhoodEngine {
    pub fn new(
        stores: Stores,
        connector: Arc<dyn PeerConnector>,
        config: CoreConfig,
        server_id: ServerId,
        role_ports: RolePorts,
        advertised_ip: IpAddr,
        shutdown: watch::Receiver<bool>,
    ) -> Arc<Self> {
        Arc::new(Self {
            stores,
            connector,
            config,
            server_id,
            role_ports,
            advertised_ip,
            semaphore: Arc::new(Semaphore::new(MAX_CONCURRENT_WORKERS)),
            port_cache: PortCache::default(),
            shutdown,
            wake: Notify::new(),
        })
    }

    /// Enqueues a profile-class action for every follower, in the same
    /// transaction the caller is already running over
    /// `{HostedIdentity, Follower, NeighborhoodAction}` (§4.F.1, §5).
    pub async fn enqueue_for_all_followers(&self, action_type: NeighborhoodActionType, identity_id: IdentityId) {
        for follower in self.stores.followers.list_all().await {
            self.stores
                .neighborhood_actions
                .enqueue(NeighborhoodAction {
                    id: 0,
                    target_server_id: follower.server_id,
                    action_type,
                    target_identity_id: Some(identity_id.clone()),
                    created_at: now(),
                    execute_after: None,
                    additional_data: None,
                })
                .await;
        }
        self.signal();
    }

    pub async fn enqueue_add_neighbor(&self, address: PeerAddress, public_key: PublicKey) {
        let server_id = IdentityId::of_public_key(&public_key);
        self.stores
            .neighborhood_actions
            .enqueue(NeighborhoodAction {
                id: 0,
                target_server_id: server_id,
                action_type: NeighborhoodActionType::AddNeighbor,
                target_identity_id: None,
                created_at: now(),
                execute_after: None,
                additional_data: Some(encode_peer_address(&address, &public_key)),
            })
            .await;
        self.signal();
    }

    /// `RemoveNeighbor` (§4.F.4): deletes the `Neighbor` row and cascades
    /// its `NeighborIdentity` rows, enqueuing a best-effort
    /// `StopNeighborhoodUpdates` carrying a snapshot since the row will be
    /// gone by the time that action runs (§9 "JSON-snapshot in a queued
    /// action").
    pub async fn remove_neighbor(&self, server_id: &ServerId) -> Result<(), ProtocolError> {
        let neighbor = self.stores.neighbors.remove(server_id).await?;
        for row in self.stores.neighbor_identities.list_by_server(server_id).await {
            let key = (row.identity_id.clone(), row.hosting_server_id.clone());
            self.stores.neighbor_identities.remove(&key).await;
        }
        let snapshot = serde_json::to_string(&NeighborSnapshot::from(&neighbor))
            .unwrap_or_default();
        self.stores
            .neighborhood_actions
            .enqueue(NeighborhoodAction {
                id: 0,
                target_server_id: server_id.clone(),
                action_type: NeighborhoodActionType::StopNeighborUpdates,
                target_identity_id: None,
                created_at: now(),
                execute_after: None,
                additional_data: Some(snapshot),
            })
            .await;
        self.signal();
        Ok(())
    }

    /// Nudges the scheduler; cheap to call from any handler right after an
    /// enqueue so propagation does not wait a full 20 s tick.
    pub fn signal(&self) {
        self.wake.notify_one();
    }

    /// The periodic scheduling loop (§4.F). Runs until the shutdown watch
    /// flips; spawned once by the composition root. Wakes on the 20 s tick,
    /// on `signal()`, or on shutdown, whichever comes first.
    pub async fn run(self: Arc<Self>) {
        let mut shutdown = self.shutdown.clone();
        let mut ticker = tokio::time::interval(SCAN_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => {},
                _ = self.wake.notified() => {},
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("neighborhood engine shutting down");
                        return;
                    }
                }
            }
            self.scan_and_dispatch().await;
        }
    }

    async fn scan_and_dispatch(self: &Arc<Self>) {
        loop {
            let permit = match self.semaphore.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let action = match self.stores.neighborhood_actions.claim_next_ready(now()).await {
                Some(action) => action,
                None => break,
            };
            let engine = self.clone();
            tokio::spawn(async move {
                let _permit = permit;
                engine.execute_action(action).await;
            });
        }
    }

    async fn execute_action(&self, mut action: NeighborhoodAction) {
        let target = action.target_server_id.clone();
        let profile_class = action.action_type.is_profile_class();
        debug!("executing neighborhood action {:?} for {}", action.action_type, target);

        let result = match action.action_type {
            NeighborhoodActionType::AddProfile
            | NeighborhoodActionType::ChangeProfile
            | NeighborhoodActionType::RemoveProfile => self.propagate_profile_action(&action).await,
            NeighborhoodActionType::RefreshNeighborStatus => self.propagate_refresh(&action).await,
            NeighborhoodActionType::AddNeighbor => self.run_initialization(&action).await,
            NeighborhoodActionType::RemoveNeighbor => {
                self.remove_neighbor(&action.target_server_id).await
            }
            NeighborhoodActionType::StopNeighborUpdates => self.propagate_stop(&action).await,
            NeighborhoodActionType::InitializationInProgress => self.abandon_stale_initialization(&action).await,
        };

        match result {
            Ok(()) => {
                self.stores.neighborhood_actions.release(&target, profile_class).await;
            }
            Err(ActionOutcome::DeleteFollower) => {
                warn!("follower {} diverged, deleting", target);
                let removed = self.stores.followers.remove(&target).await;
                if removed.is_ok() {
                    self.stores.neighborhood_actions.remove_all_for_target(&target).await;
                }
                self.stores.neighborhood_actions.release(&target, profile_class).await;
            }
            Err(ActionOutcome::ClearCachedPort) => {
                self.port_cache.clear(&target);
                action.execute_after = Some(now() + ACTION_LEASE);
                self.stores.neighborhood_actions.requeue(action).await;
            }
            Err(ActionOutcome::Retry) => {
                action.execute_after = Some(now() + ACTION_LEASE);
                self.stores.neighborhood_actions.requeue(action).await;
            }
        }
    }

    /// §4.F.1: builds and sends one `NeighborhoodSharedProfileUpdate` item
    /// to the action's target follower.
    async fn propagate_profile_action(&self, action: &NeighborhoodAction) -> Result<(), ActionOutcome> {
        let identity_id = action.target_identity_id.clone().ok_or(ActionOutcome::Retry)?;
        let follower = self.resolve_follower(&action.target_server_id).await?;
        let mut conn = self.dial_follower(&follower).await?;

        let item = match action.action_type {
            NeighborhoodActionType::RemoveProfile => remove_item(&identity_id),
            _ => match self.stores.hosted_identities.try_get(&identity_id).await {
                Some(identity) if identity.initialized && !identity.cancelled => {
                    add_item(&self.to_outbound(&identity).await)
                }
                // §4.F.1 "Add-for-deleted-profile hack": keep downstream
                // ordering consistent even though the row is already gone.
                _ if action.action_type == NeighborhoodActionType::AddProfile => {
                    NeighborhoodChangeItemMsg {
                        kind: ChangeItemKind::Add as i32,
                        identity_id: identity_id.as_bytes().to_vec(),
                        identity_type: "internal-invalid".into(),
                        ..Default::default()
                    }
                }
                None => return Ok(()),
                Some(_) => return Ok(()),
            },
        };

        conn.send_profile_update(vec![item]).await.map_err(classify_propagation_error)?;
        Ok(())
    }

    async fn propagate_refresh(&self, action: &NeighborhoodAction) -> Result<(), ActionOutcome> {
        let follower = self.resolve_follower(&action.target_server_id).await?;
        let mut conn = self.dial_follower(&follower).await?;
        conn.send_profile_update(vec![refresh_item()]).await.map_err(classify_propagation_error)?;
        if let Some(mut updated) = self.stores.followers.get(&action.target_server_id).await {
            updated.last_refresh_time = now();
            self.stores.followers.upsert(updated).await;
        }
        Ok(())
    }

    async fn propagate_stop(&self, action: &NeighborhoodAction) -> Result<(), ActionOutcome> {
        let snapshot: NeighborSnapshot = action
            .additional_data
            .as_deref()
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or_default();
        let address: PeerAddress = snapshot.address.into();
        // Best-effort: removed regardless of outcome (§4.F.4).
        if let Ok(mut conn) = self.connector.connect(&address).await {
            let _ = conn.stop_neighborhood_updates().await;
        }
        Ok(())
    }

    async fn abandon_stale_initialization(&self, action: &NeighborhoodAction) -> Result<(), ActionOutcome> {
        if let Some(follower) = self.stores.followers.get(&action.target_server_id).await {
            if !follower.initialized {
                warn!("initialization of follower {} never completed, abandoning", follower.server_id);
                let _ = self.stores.followers.remove(&follower.server_id).await;
            }
        }
        Ok(())
    }

    /// §4.F.2, initiating side: dials the peer, runs `StartNeighborhood
    /// Initialization`, then drains pushed batches into an in-memory
    /// dictionary and only commits at `Finish` (§4.F.2 "commits the whole
    /// set... under the NeighborIdentity/Neighbor locks").
    async fn run_initialization(&self, action: &NeighborhoodAction) -> Result<(), ActionOutcome> {
        let (address, public_key) = decode_peer_address(action.additional_data.as_deref().unwrap_or(""))
            .ok_or(ActionOutcome::Retry)?;
        if !self.config.test_mode && is_reserved_or_local(&address.ip) {
            warn!("refusing to add neighbor at reserved/local address {:?}", address.ip);
            return Ok(());
        }

        let mut conn = self.connector.connect(&address).await.map_err(classify_propagation_error)?;
        let peer_server_id = conn.authenticate().await.map_err(classify_propagation_error)?;
        let expected = IdentityId::of_public_key(&public_key);
        if peer_server_id != expected {
            return Err(ActionOutcome::DeleteFollower);
        }

        conn.start_neighborhood_initialization(
            self.role_ports.primary,
            self.role_ports.sr_neighbor,
            self.advertised_ip,
        )
        .await
        .map_err(classify_propagation_error)?;

        let mut staged: HashMap<IdentityId, NeighborhoodChangeItemMsg> = HashMap::new();
        loop {
            match conn.recv_inbound().await.map_err(classify_propagation_error)? {
                PeerInboundMessage::ProfileUpdate(items) => {
                    for item in items {
                        if let Ok(id) = IdentityId::from_slice(&item.identity_id) {
                            staged.insert(id, item);
                        }
                    }
                    conn.ack_inbound().await.map_err(classify_propagation_error)?;
                }
                PeerInboundMessage::Finish => {
                    conn.ack_inbound().await.map_err(classify_propagation_error)?;
                    break;
                }
            }
        }

        let count = staged.len() as u32;
        for (identity_id, item) in staged {
            let thumbnail_hash = match &item.thumbnail_image {
                Some(bytes) => Some(self.stores.images.save(bytes.clone()).await),
                None => None,
            };
            if let Some(row) = from_add_item(&item, identity_id, peer_server_id.clone(), thumbnail_hash) {
                self.stores.neighbor_identities.upsert(row).await;
            }
        }
        self.stores.neighbors.upsert(Neighbor {
            server_id: peer_server_id,
            public_key,
            address,
            last_refresh_time: now(),
            initialized: true,
            shared_profiles_count: count,
        }).await;
        Ok(())
    }

    async fn resolve_follower(&self, server_id: &ServerId) -> Result<Follower, ActionOutcome> {
        self.stores.followers.get(server_id).await.ok_or(ActionOutcome::DeleteFollower)
    }

    async fn dial_follower(&self, follower: &Follower) -> Result<Box<dyn PeerConnection>, ActionOutcome> {
        let mut address = follower.address.clone();
        if address.sr_neighbor_port.is_none() {
            let cached = self.port_cache.get(&follower.server_id);
            address.sr_neighbor_port = cached.or(address.sr_neighbor_port);
        }
        if address.sr_neighbor_port.is_none() {
            let mut conn = self.connector.connect(&address).await.map_err(classify_propagation_error)?;
            let roles = conn.list_roles().await.map_err(|_| ActionOutcome::ClearCachedPort)?;
            let port = roles
                .iter()
                .find(|(bit, _)| *bit == role::SR_NEIGHBOR)
                .map(|(_, port)| *port)
                .ok_or(ActionOutcome::ClearCachedPort)?;
            self.port_cache.set(follower.server_id.clone(), port);
            address.sr_neighbor_port = Some(port);
        }
        let mut conn = self.connector.connect(&address).await.map_err(classify_propagation_error)?;
        let peer_id = conn.authenticate().await.map_err(classify_propagation_error)?;
        if peer_id != follower.server_id {
            return Err(ActionOutcome::DeleteFollower);
        }
        Ok(conn)
    }

    /// Builds the outbound wire shape for one hosted identity, resolving its
    /// thumbnail bytes from the image store by hash (§4.F.1 step 3). Shared
    /// with the serving side of the initialization handshake (§4.F.2), which
    /// streams this same shape to a brand new follower.
    pub(crate) async fn to_outbound(&self, identity: &profile_protocol::model::HostedIdentity) -> OutboundAddOrChange {
        OutboundAddOrChange {
            identity_id: identity.identity_id.clone(),
            public_key: identity.public_key.clone(),
            version: identity.version.unwrap_or(profile_protocol::SemVer::new(1, 0, 0)),
            name: identity.name.clone().unwrap_or_default(),
            identity_type: identity.identity_type.clone().unwrap_or_default(),
            location: identity.location.unwrap_or(profile_protocol::GpsLocation {
                latitude_fixed: 0,
                longitude_fixed: 0,
            }),
            extra_data: identity.extra_data.clone(),
            profile_image_hash: identity.profile_image_hash.clone(),
            thumbnail_image: match &identity.thumbnail_image_hash {
                Some(hash) => self.stores.images.get(hash).await,
                None => None,
            },
            signature: identity.signature.clone().map(|s| s.0).unwrap_or_default(),
        }
    }

}

/// Outcome of one propagation attempt, classifying how the engine should
/// react (§4.F.1 step 4, §7 "NeighborhoodEngine surfaces nothing to
/// clients").
enum ActionOutcome {
    DeleteFollower,
    ClearCachedPort,
    Retry,
}

fn classify_propagation_error(err: ProtocolError) -> ActionOutcome {
    match err {
        ProtocolError::Rejected | ProtocolError::InvalidValue { .. } => ActionOutcome::DeleteFollower,
        ProtocolError::BadRole => ActionOutcome::ClearCachedPort,
        _ => ActionOutcome::Retry,
    }
}

fn now() -> SystemTime {
    SystemTime::now()
}

#[derive(serde::Serialize, serde::Deserialize, Default)]
struct NeighborSnapshot {
    address: PeerAddress_,
}

// `PeerAddress` has no Serialize impl (it lives in profile-protocol without
// a serde dependency), so we mirror its shape here for the opaque action
// payload (§9 "JSON-snapshot in a queued action").
#[derive(serde::Serialize, serde::Deserialize, Clone)]
struct PeerAddress_ {
    ip: String,
    primary_port: u16,
    sr_neighbor_port: Option<u16>,
}

impl Default for PeerAddress_ {
    fn default() -> Self {
        Self { ip: "0.0.0.0".into(), primary_port: 0, sr_neighbor_port: None }
    }
}

impl From<PeerAddress_> for PeerAddress {
    fn from(a: PeerAddress_) -> Self {
        PeerAddress {
            ip: a.ip.parse().unwrap_or(IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED)),
            primary_port: a.primary_port,
            sr_neighbor_port: a.sr_neighbor_port,
        }
    }
}

impl From<&Neighbor> for NeighborSnapshot {
    fn from(n: &Neighbor) -> Self {
        Self {
            address: PeerAddress_ {
                ip: n.address.ip.to_string(),
                primary_port: n.address.primary_port,
                sr_neighbor_port: n.address.sr_neighbor_port,
            },
        }
    }
}

fn encode_peer_address(address: &PeerAddress, public_key: &PublicKey) -> String {
    #[derive(serde::Serialize)]
    struct Wire<'a> {
        ip: String,
        primary_port: u16,
        sr_neighbor_port: Option<u16>,
        public_key: &'a [u8],
    }
    serde_json::to_string(&Wire {
        ip: address.ip.to_string(),
        primary_port: address.primary_port,
        sr_neighbor_port: address.sr_neighbor_port,
        public_key: &public_key.0,
    })
    .unwrap_or_default()
}

fn decode_peer_address(raw: &str) -> Option<(PeerAddress, PublicKey)> {
    #[derive(serde::Deserialize)]
    struct Wire {
        ip: String,
        primary_port: u16,
        sr_neighbor_port: Option<u16>,
        public_key: Vec<u8>,
    }
    let wire: Wire = serde_json::from_str(raw).ok()?;
    Some((
        PeerAddress {
            ip: wire.ip.parse().ok()?,
            primary_port: wire.primary_port,
            sr_neighbor_port: wire.sr_neighbor_port,
        },
        PublicKey(wire.public_key),
    ))
}

fn from_add_item(
    item: &NeighborhoodChangeItemMsg,
    identity_id: IdentityId,
    hosting_server_id: ServerId,
    thumbnail_image_hash: Option<Vec<u8>>,
) -> Option<profile_protocol::model::NeighborIdentity> {
    let version = item.version.as_ref().map(|v| profile_protocol::SemVer::new(v.major, v.minor, v.patch))?;
    let location = item
        .location
        .as_ref()
        .map(|l| profile_protocol::GpsLocation { latitude_fixed: l.latitude_fixed, longitude_fixed: l.longitude_fixed })?;
    Some(profile_protocol::model::NeighborIdentity {
        identity_id,
        hosting_server_id,
        public_key: PublicKey(item.public_key.clone()),
        version,
        name: item.name.clone(),
        identity_type: item.identity_type.clone(),
        location,
        extra_data: item.extra_data.clone(),
        profile_image_hash: item.profile_image_hash.clone(),
        thumbnail_image_hash,
    })
}

/// `ip_address` in `StartNeighborhoodInitialization` must not be a
/// reserved/local address unless `test_mode` is set (§6).
pub(crate) fn is_reserved_or_local(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback() || v4.is_private() || v4.is_link_local() || v4.is_unspecified() || v4.is_broadcast()
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}
