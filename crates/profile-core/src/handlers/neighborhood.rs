//! Replication wire handlers (§4.F): the serving side of the initialization
//! handshake, ongoing `NeighborhoodSharedProfileUpdate` ingestion, and
//! `StopNeighborhoodUpdates`. The initiating side of initialization lives in
//! [`crate::neighborhood_engine::run_initialization`] instead — it drives an
//! outbound [`crate::neighborhood_engine::PeerConnection`], never this
//! session-bound dispatch path.

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::SystemTime;

use log::warn;

use profile_protocol::envelope::{decode_body, encode_body, Envelope, RequestFrame, RequestType};
use profile_protocol::messages::{
    ChangeItemKind, FinishNeighborhoodInitRequest, FinishNeighborhoodInitResponse, NeighborhoodChangeItemMsg,
    NeighborhoodSharedProfileUpdateRequest, NeighborhoodSharedProfileUpdateResponse, StartNeighborhoodInitRequest,
    StartNeighborhoodInitResponse, StopNeighborhoodUpdatesRequest, StopNeighborhoodUpdatesResponse,
};
use profile_protocol::messages::change_flags;
use profile_protocol::model::{
    validate_extra_data, validate_location, validate_name, validate_public_key, validate_type, Follower,
    Neighbor, NeighborIdentity, NeighborhoodAction, NeighborhoodActionType, PeerAddress,
};
use profile_protocol::primitives::{MAX_FRAME_HEADROOM, MAX_FRAME_SIZE, SUPPORTED_VERSION};
use profile_protocol::{GpsLocation, IdentityId, ProtocolError, PublicKey, SemVer};

use crate::dispatcher::Dispatched;
use crate::neighborhood_engine::{add_item, is_reserved_or_local, INGEST_BATCH_SIZE, INITIALIZATION_LEASE};
use crate::session::{PendingResponseContext, Session};
use crate::Core;

fn session_identity(session: &Session) -> Result<(IdentityId, PublicKey), ProtocolError> {
    session.with_state(|s| s.identity_id.clone().zip(s.public_key.clone())).ok_or(ProtocolError::Unauthorized)
}

fn now() -> SystemTime {
    SystemTime::now()
}

pub async fn start_neighborhood_init(
    core: &Core,
    session: &Arc<Session>,
    request_id: u32,
    body: &[u8],
) -> Result<Dispatched, ProtocolError> {
    let req: StartNeighborhoodInitRequest = decode_body(body)?;
    let ip: IpAddr = req
        .ip_address
        .parse()
        .map_err(|_| ProtocolError::invalid_value("ip_address", "not a valid IP address"))?;
    if !core.config.test_mode && is_reserved_or_local(&ip) {
        return Err(ProtocolError::invalid_value("ip_address", "reserved or local addresses are not allowed"));
    }
    if req.primary_port > u16::MAX as u32 || req.sr_neighbor_port > u16::MAX as u32 {
        return Err(ProtocolError::invalid_value("primary_port/sr_neighbor_port", "must fit in 16 bits"));
    }

    let (follower_id, public_key) = session_identity(session)?;

    if core.stores.followers.get(&follower_id).await.is_none()
        && core.stores.followers.count().await as u32 >= core.config.max_follower_servers
    {
        return Err(ProtocolError::QuotaExceeded);
    }

    let address = PeerAddress { ip, primary_port: req.primary_port as u16, sr_neighbor_port: Some(req.sr_neighbor_port as u16) };
    core.stores
        .followers
        .upsert(Follower {
            server_id: follower_id.clone(),
            public_key,
            address,
            last_refresh_time: now(),
            initialized: false,
            shared_profiles_count: 0,
        })
        .await;

    core.stores
        .neighborhood_actions
        .enqueue(NeighborhoodAction {
            id: 0,
            target_server_id: follower_id.clone(),
            action_type: NeighborhoodActionType::InitializationInProgress,
            target_identity_id: None,
            created_at: now(),
            execute_after: Some(now() + INITIALIZATION_LEASE),
            additional_data: None,
        })
        .await;

    session.with_state_mut(|s| s.neighborhood_init_in_progress = true);

    let snapshot: Vec<_> = core
        .stores
        .hosted_identities
        .list_all()
        .await
        .into_iter()
        .filter(|identity| identity.initialized && !identity.cancelled)
        .collect();

    // Respond immediately, then keep pushing server-originated requests on
    // this same connection — the dispatcher must not send a second response
    // for `request_id` once we've taken over (§4.F.2).
    let ack = profile_protocol::envelope::ResponseFrame::ok(
        request_id,
        RequestType::StartNeighborhoodInit,
        encode_body(&StartNeighborhoodInitResponse {}),
    );
    if session.send(Envelope::response(ack)).is_err() {
        return Ok(Dispatched::AlreadyResponded);
    }

    let core = core.clone();
    let session = session.clone();
    tokio::spawn(async move {
        stream_initialization_snapshot(core, session, follower_id, snapshot).await;
    });

    Ok(Dispatched::AlreadyResponded)
}

async fn stream_initialization_snapshot(
    core: Core,
    session: Arc<Session>,
    follower_id: IdentityId,
    snapshot: Vec<profile_protocol::model::HostedIdentity>,
) {
    let total = snapshot.len();
    let mut items = Vec::with_capacity(total);
    for identity in &snapshot {
        items.push(add_item(&core.neighborhood.to_outbound(identity).await));
    }

    let budget = (MAX_FRAME_SIZE - MAX_FRAME_HEADROOM) as usize;
    let mut batches: Vec<Vec<NeighborhoodChangeItemMsg>> = Vec::new();
    let mut current = Vec::new();
    let mut current_size = 0usize;
    for item in items {
        let item_size = encode_body(&item).len();
        if !current.is_empty() && (current.len() >= INGEST_BATCH_SIZE || current_size + item_size > budget) {
            batches.push(std::mem::take(&mut current));
            current_size = 0;
        }
        current_size += item_size;
        current.push(item);
    }
    if !current.is_empty() {
        batches.push(current);
    }

    let mut sent = 0usize;
    for batch in batches {
        sent += batch.len();
        let remaining_after = total - sent;
        if send_update_batch(&session, batch, remaining_after).await.is_err() {
            warn!("initialization push to {} failed mid-stream, abandoning", follower_id);
            session.with_state_mut(|s| s.neighborhood_init_in_progress = false);
            return;
        }
    }

    if send_finish(&session).await.is_err() {
        warn!("initialization finish push to {} was not acked", follower_id);
        session.with_state_mut(|s| s.neighborhood_init_in_progress = false);
        return;
    }

    if let Some(mut follower) = core.stores.followers.get(&follower_id).await {
        follower.initialized = true;
        follower.shared_profiles_count = total as u32;
        follower.last_refresh_time = now();
        core.stores.followers.upsert(follower).await;
    }
    session.with_state_mut(|s| s.neighborhood_init_in_progress = false);
}

async fn send_update_batch(
    session: &Arc<Session>,
    items: Vec<NeighborhoodChangeItemMsg>,
    remaining_after: usize,
) -> Result<(), ProtocolError> {
    let (request_id, rx) = session.register_response_waiter(PendingResponseContext::NeighborhoodInitBatchAck { remaining_after });
    let frame = RequestFrame {
        request_id,
        type_code: RequestType::NeighborhoodSharedProfileUpdate as i32,
        signature: None,
        body: encode_body(&NeighborhoodSharedProfileUpdateRequest { items }),
    };
    session.send(Envelope::request(frame)).map_err(|_| ProtocolError::NotFound)?;
    rx.await.map_err(|_| ProtocolError::NotFound)?;
    Ok(())
}

async fn send_finish(session: &Arc<Session>) -> Result<(), ProtocolError> {
    let (request_id, rx) = session.register_response_waiter(PendingResponseContext::NeighborhoodInitFinishAck);
    let frame = RequestFrame {
        request_id,
        type_code: RequestType::FinishNeighborhoodInit as i32,
        signature: None,
        body: encode_body(&FinishNeighborhoodInitRequest {}),
    };
    session.send(Envelope::request(frame)).map_err(|_| ProtocolError::NotFound)?;
    rx.await.map_err(|_| ProtocolError::NotFound)?;
    Ok(())
}

/// `<itemIndex>.<add|change|delete>.<field>` (§4.F.3 step 4); the code's
/// `ChangeItemKind::Remove` is the wire name for what the protocol calls a
/// delete, and `Refresh` is a liveness-only extension with no field path.
fn item_kind_label(kind: ChangeItemKind) -> &'static str {
    match kind {
        ChangeItemKind::Add => "add",
        ChangeItemKind::Change => "change",
        ChangeItemKind::Remove => "delete",
        ChangeItemKind::Refresh => "refresh",
    }
}

fn indexed_path(index: usize, kind: ChangeItemKind, field: &str) -> String {
    format!("{}.{}.{}", index, item_kind_label(kind), field)
}

/// Rewrites a bare validator's error path (e.g. `"name"`) to the batch's
/// indexed path, leaving any other error variant untouched.
fn reindex(err: ProtocolError, index: usize, kind: ChangeItemKind, field: &str) -> ProtocolError {
    match err {
        ProtocolError::InvalidValue { reason, .. } => {
            ProtocolError::InvalidValue { path: indexed_path(index, kind, field), reason }
        }
        other => other,
    }
}

fn parse_change_item_identity_id(
    item: &NeighborhoodChangeItemMsg,
    index: usize,
    kind: ChangeItemKind,
) -> Result<IdentityId, ProtocolError> {
    if item.identity_id.len() != 32 {
        return Err(ProtocolError::invalid_value(
            indexed_path(index, kind, "identity_id"),
            "identity id must be exactly 32 bytes",
        ));
    }
    IdentityId::from_slice(&item.identity_id).map_err(|e| reindex(e, index, kind, "identity_id"))
}

/// §4.F.3 step 2: rejects the whole batch before any item is applied if the
/// quota, protocol version, or public-key shape/uniqueness requirements
/// aren't met. Returns the net `(added, deleted)` item counts on success so
/// the caller can reuse them once application actually succeeds.
fn validate_batch(
    items: &[NeighborhoodChangeItemMsg],
    neighbor: &Neighbor,
    max_hosted_identities: u32,
) -> Result<(u32, u32), ProtocolError> {
    let mut added = 0u32;
    let mut deleted = 0u32;
    let mut seen_public_keys: HashSet<&[u8]> = HashSet::new();

    for (index, item) in items.iter().enumerate() {
        let kind = ChangeItemKind::from_i32(item.kind)
            .ok_or_else(|| ProtocolError::invalid_value(format!("{}.kind", index), "unrecognized change item kind"))?;

        match kind {
            ChangeItemKind::Add => {
                added += 1;
                validate_public_key(&PublicKey(item.public_key.clone())).map_err(|e| reindex(e, index, kind, "public_key"))?;
                if !seen_public_keys.insert(item.public_key.as_slice()) {
                    return Err(ProtocolError::invalid_value(
                        indexed_path(index, kind, "public_key"),
                        "duplicate public key within this batch",
                    ));
                }
                let version = item
                    .version
                    .as_ref()
                    .map(|v| SemVer::new(v.major, v.minor, v.patch))
                    .ok_or_else(|| ProtocolError::invalid_value(indexed_path(index, kind, "version"), "required for an add"))?;
                if version != SUPPORTED_VERSION {
                    return Err(ProtocolError::invalid_value(
                        indexed_path(index, kind, "version"),
                        "unsupported protocol version",
                    ));
                }
            }
            ChangeItemKind::Remove => deleted += 1,
            ChangeItemKind::Change | ChangeItemKind::Refresh => {}
        }
    }

    let projected = neighbor.shared_profiles_count as i64 + added as i64 - deleted as i64;
    if projected < 0 || projected >= max_hosted_identities as i64 {
        return Err(ProtocolError::QuotaExceeded);
    }
    Ok((added, deleted))
}

/// Applies one item of an ongoing (post-initialization) update batch pushed
/// by the server that hosts these identities (§4.F.3). Unlike the
/// initialization snapshot, this always targets an already-known `Neighbor`.
/// Returns the net change to `shared_profiles_count`: `1` for an applied
/// add, `-1` for an applied delete, `0` otherwise.
async fn apply_change(
    core: &Core,
    host_server_id: &IdentityId,
    index: usize,
    item: &NeighborhoodChangeItemMsg,
) -> Result<i32, ProtocolError> {
    let kind = ChangeItemKind::from_i32(item.kind)
        .ok_or_else(|| ProtocolError::invalid_value(format!("{}.kind", index), "unrecognized change item kind"))?;

    match kind {
        ChangeItemKind::Refresh => Ok(0),
        ChangeItemKind::Remove => {
            let identity_id = parse_change_item_identity_id(item, index, kind)?;
            core.stores.neighbor_identities.remove(&(identity_id, host_server_id.clone())).await;
            Ok(-1)
        }
        ChangeItemKind::Add => {
            let identity_id = parse_change_item_identity_id(item, index, kind)?;
            let key = (identity_id.clone(), host_server_id.clone());
            if core.stores.neighbor_identities.get(&key).await.is_some() {
                return Err(ProtocolError::invalid_value(
                    indexed_path(index, kind, "identity_id"),
                    "already shared by this neighbor",
                ));
            }
            validate_name(&item.name).map_err(|e| reindex(e, index, kind, "name"))?;
            validate_type(&item.identity_type).map_err(|e| reindex(e, index, kind, "type"))?;
            validate_extra_data(&item.extra_data).map_err(|e| reindex(e, index, kind, "extra_data"))?;
            let version = item
                .version
                .as_ref()
                .map(|v| SemVer::new(v.major, v.minor, v.patch))
                .ok_or_else(|| ProtocolError::invalid_value(indexed_path(index, kind, "version"), "required for an add"))?;
            let location = item
                .location
                .as_ref()
                .map(|l| GpsLocation { latitude_fixed: l.latitude_fixed, longitude_fixed: l.longitude_fixed })
                .ok_or_else(|| ProtocolError::invalid_value(indexed_path(index, kind, "location"), "required for an add"))?;
            validate_location(&location).map_err(|e| reindex(e, index, kind, "location"))?;
            let thumbnail_image_hash = match &item.thumbnail_image {
                Some(bytes) => Some(core.stores.images.save(bytes.clone()).await),
                None => None,
            };
            core.stores
                .neighbor_identities
                .upsert(NeighborIdentity {
                    identity_id,
                    hosting_server_id: host_server_id.clone(),
                    public_key: PublicKey(item.public_key.clone()),
                    version,
                    name: item.name.clone(),
                    identity_type: item.identity_type.clone(),
                    location,
                    extra_data: item.extra_data.clone(),
                    profile_image_hash: item.profile_image_hash.clone(),
                    thumbnail_image_hash,
                })
                .await;
            Ok(1)
        }
        ChangeItemKind::Change => {
            let identity_id = parse_change_item_identity_id(item, index, kind)?;
            let key = (identity_id, host_server_id.clone());
            let mut row = core.stores.neighbor_identities.get(&key).await.ok_or(ProtocolError::NotFound)?;

            if item.set_flags & change_flags::NAME != 0 {
                validate_name(&item.name).map_err(|e| reindex(e, index, kind, "name"))?;
                row.name = item.name.clone();
            }
            if item.set_flags & change_flags::TYPE != 0 {
                validate_type(&item.identity_type).map_err(|e| reindex(e, index, kind, "type"))?;
                row.identity_type = item.identity_type.clone();
            }
            if item.set_flags & change_flags::LOCATION != 0 {
                if let Some(l) = &item.location {
                    let location = GpsLocation { latitude_fixed: l.latitude_fixed, longitude_fixed: l.longitude_fixed };
                    validate_location(&location).map_err(|e| reindex(e, index, kind, "location"))?;
                    row.location = location;
                }
            }
            if item.set_flags & change_flags::EXTRA_DATA != 0 {
                validate_extra_data(&item.extra_data).map_err(|e| reindex(e, index, kind, "extra_data"))?;
                row.extra_data = item.extra_data.clone();
            }
            if item.set_flags & change_flags::VERSION != 0 {
                if let Some(v) = &item.version {
                    row.version = SemVer::new(v.major, v.minor, v.patch);
                }
            }
            if item.set_flags & change_flags::PROFILE_IMAGE != 0 {
                row.profile_image_hash = item.profile_image_hash.clone();
            }
            if item.set_flags & change_flags::THUMBNAIL_IMAGE != 0 {
                if let Some(old) = row.thumbnail_image_hash.take() {
                    core.stores.images.remove_reference(&old).await;
                }
                row.thumbnail_image_hash = match &item.thumbnail_image {
                    Some(bytes) => Some(core.stores.images.save(bytes.clone()).await),
                    None => None,
                };
            }

            core.stores.neighbor_identities.upsert(row).await;
            Ok(0)
        }
    }
}

pub async fn ingest_shared_profile_update(core: &Core, session: &Arc<Session>, body: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let req: NeighborhoodSharedProfileUpdateRequest = decode_body(body)?;
    let (host_server_id, _) = session_identity(session)?;

    let neighbor = core.stores.neighbors.get(&host_server_id).await.ok_or(ProtocolError::Rejected)?;
    if !neighbor.initialized {
        return Err(ProtocolError::Rejected);
    }

    validate_batch(&req.items, &neighbor, core.config.max_hosted_identities)?;

    let mut applied_count = 0u32;
    let mut net_count_change = 0i32;
    for (index, item) in req.items.iter().enumerate() {
        net_count_change += apply_change(core, &host_server_id, index, item).await?;
        applied_count += 1;
    }

    if let Some(mut neighbor) = core.stores.neighbors.get(&host_server_id).await {
        neighbor.last_refresh_time = now();
        neighbor.shared_profiles_count = (neighbor.shared_profiles_count as i64 + net_count_change as i64).max(0) as u32;
        core.stores.neighbors.upsert(neighbor).await;
    }

    Ok(encode_body(&NeighborhoodSharedProfileUpdateResponse { applied_count }))
}

/// Sent by the server we're currently a `Follower` of, dialing out to tell
/// us to stop pushing them updates (§4.F.4 `remove_neighbor`). Reaching us
/// as an inbound *request* instead means the roles are reversed: the caller
/// is a follower of ours, asking us to drop them.
pub async fn stop_neighborhood_updates(core: &Core, session: &Arc<Session>, body: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let _req: StopNeighborhoodUpdatesRequest = decode_body(body)?;
    let (caller_id, _) = session_identity(session)?;

    let _ = core.stores.followers.remove(&caller_id).await;
    core.stores.neighborhood_actions.remove_all_for_target(&caller_id).await;

    Ok(encode_body(&StopNeighborhoodUpdatesResponse {}))
}

/// `FinishNeighborhoodInit` only ever flows as a server-originated request
/// the initializer answers on its outbound connection
/// (`PeerConnection::recv_inbound`); arriving here as an inbound request
/// means a peer sent it outside that flow.
pub fn finish_neighborhood_init() -> Result<Dispatched, ProtocolError> {
    let _ = FinishNeighborhoodInitResponse {};
    Err(ProtocolError::ProtocolViolation("FinishNeighborhoodInit is not valid as a client request".into()))
}
