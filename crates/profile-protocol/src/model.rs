//! Persisted entity shapes of §3. These are plain data; the named locks and
//! transactional access live in `profile-store`, and the invariants below
//! are checked wherever an entity is constructed or mutated rather than
//! baked into the type (a `HostedIdentity` mid-update legitimately has
//! `initialized=false` for a moment).

use std::net::IpAddr;
use std::time::SystemTime;

use crate::error::ProtocolError;
use crate::primitives::{
    GpsLocation, IdentityId, PublicKey, SemVer, Signature, MAX_EXTRA_DATA_LEN, MAX_NAME_LEN,
    MAX_PUBLIC_KEY_LEN, MAX_TYPE_LEN,
};

/// A neighbor/follower server is addressed by the same kind of identity id
/// as a customer profile (GLOSSARY: "the network-level name of a person,
/// service, or server").
pub type ServerId = IdentityId;

#[derive(Clone, Debug)]
pub struct HostedIdentity {
    pub identity_id: IdentityId,
    pub public_key: PublicKey,
    pub version: Option<SemVer>,
    pub name: Option<String>,
    pub identity_type: Option<String>,
    pub location: Option<GpsLocation>,
    pub extra_data: Vec<u8>,
    pub profile_image_hash: Option<Vec<u8>>,
    pub thumbnail_image_hash: Option<Vec<u8>>,
    /// Set when cancelled with a redirect target instead of immediate
    /// deletion (§3 HostedIdentity lifecycle).
    pub hosting_server_id: Option<ServerId>,
    pub expiration: Option<SystemTime>,
    pub cancelled: bool,
    pub initialized: bool,
    pub signature: Option<Signature>,
}

impl HostedIdentity {
    pub fn new_uninitialized(identity_id: IdentityId, public_key: PublicKey) -> Self {
        Self {
            identity_id,
            public_key,
            version: None,
            name: None,
            identity_type: None,
            location: None,
            extra_data: Vec::new(),
            profile_image_hash: None,
            thumbnail_image_hash: None,
            hosting_server_id: None,
            expiration: None,
            cancelled: false,
            initialized: false,
            signature: None,
        }
    }

    /// `initialized ⇒ version, name, type, location all set` (§3).
    pub fn is_fully_set(&self) -> bool {
        self.version.is_some()
            && self.name.is_some()
            && self.identity_type.is_some()
            && self.location.is_some()
    }

    /// `cancelled ⇒ expiration_date ≠ ⊥` (§3).
    pub fn check_cancellation_invariant(&self) -> Result<(), ProtocolError> {
        if self.cancelled && self.expiration.is_none() {
            return Err(ProtocolError::Internal(
                "cancelled hosted identity without expiration".into(),
            ));
        }
        Ok(())
    }
}

pub fn validate_name(name: &str) -> Result<(), ProtocolError> {
    if name.as_bytes().len() > MAX_NAME_LEN {
        return Err(ProtocolError::invalid_value("name", "exceeds maximum length"));
    }
    Ok(())
}

/// `type` must be ≤ [`MAX_TYPE_LEN`] bytes and must not contain `*`, which is
/// reserved as the search wildcard character (§3 HostedIdentity invariants).
pub fn validate_type(identity_type: &str) -> Result<(), ProtocolError> {
    if identity_type.as_bytes().len() > MAX_TYPE_LEN {
        return Err(ProtocolError::invalid_value("type", "exceeds maximum length"));
    }
    if identity_type.contains('*') {
        return Err(ProtocolError::invalid_value("type", "must not contain '*'"));
    }
    Ok(())
}

pub fn validate_extra_data(extra_data: &[u8]) -> Result<(), ProtocolError> {
    if extra_data.len() > MAX_EXTRA_DATA_LEN {
        return Err(ProtocolError::invalid_value("extra_data", "exceeds maximum length"));
    }
    Ok(())
}

pub fn validate_public_key(public_key: &PublicKey) -> Result<(), ProtocolError> {
    if public_key.0.is_empty() || public_key.0.len() > MAX_PUBLIC_KEY_LEN {
        return Err(ProtocolError::invalid_value("public_key", "invalid length"));
    }
    Ok(())
}

/// Latitude is in `[-90, 90]` degrees, longitude in `[-180, 180]`, both
/// stored as whole-microdegree fixed-point (`GpsLocation::new`'s scale).
pub fn validate_location(location: &GpsLocation) -> Result<(), ProtocolError> {
    const LATITUDE_FIXED_BOUND: i64 = 90_000_000;
    const LONGITUDE_FIXED_BOUND: i64 = 180_000_000;
    if location.latitude_fixed < -LATITUDE_FIXED_BOUND || location.latitude_fixed > LATITUDE_FIXED_BOUND {
        return Err(ProtocolError::invalid_value("location.latitude", "out of range"));
    }
    if location.longitude_fixed < -LONGITUDE_FIXED_BOUND || location.longitude_fixed > LONGITUDE_FIXED_BOUND {
        return Err(ProtocolError::invalid_value("location.longitude", "out of range"));
    }
    Ok(())
}

/// Snapshot of a profile received from a neighbor (§3 NeighborIdentity).
/// Primary key is the pair `(identity_id, hosting_server_id)`.
#[derive(Clone, Debug)]
pub struct NeighborIdentity {
    pub identity_id: IdentityId,
    pub hosting_server_id: ServerId,
    pub public_key: PublicKey,
    pub version: SemVer,
    pub name: String,
    pub identity_type: String,
    pub location: GpsLocation,
    pub extra_data: Vec<u8>,
    pub profile_image_hash: Option<Vec<u8>>,
    pub thumbnail_image_hash: Option<Vec<u8>>,
}

#[derive(Clone, Debug)]
pub struct PeerAddress {
    pub ip: IpAddr,
    pub primary_port: u16,
    pub sr_neighbor_port: Option<u16>,
}

/// A peer server whose profiles this server mirrors (§3 Neighbor).
///
/// `public_key` isn't in the spec's attribute list verbatim; it's carried so
/// an outbound reconnect can verify the peer's `StartConversationResponse`
/// signature against the identity this record was created for (§4.F.1 step 2
/// "mismatch ⇒ delete this follower") without a second discovery round trip.
#[derive(Clone, Debug)]
pub struct Neighbor {
    pub server_id: ServerId,
    pub public_key: PublicKey,
    pub address: PeerAddress,
    pub last_refresh_time: SystemTime,
    pub initialized: bool,
    pub shared_profiles_count: u32,
}

/// A peer server that mirrors this server's profiles (§3 Follower).
#[derive(Clone, Debug)]
pub struct Follower {
    pub server_id: ServerId,
    pub public_key: PublicKey,
    pub address: PeerAddress,
    pub last_refresh_time: SystemTime,
    pub initialized: bool,
    pub shared_profiles_count: u32,
}

/// Profile-class vs. server-class actions serialize independently per
/// target (§4.F, §5): a blocked profile-class action never blocks a
/// pending server-class action for the same peer, and vice versa.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum NeighborhoodActionType {
    AddNeighbor,
    RemoveNeighbor,
    StopNeighborUpdates,
    AddProfile,
    ChangeProfile,
    RemoveProfile,
    RefreshNeighborStatus,
    InitializationInProgress,
}

impl NeighborhoodActionType {
    pub fn is_profile_class(self) -> bool {
        matches!(
            self,
            NeighborhoodActionType::AddProfile
                | NeighborhoodActionType::ChangeProfile
                | NeighborhoodActionType::RemoveProfile
                | NeighborhoodActionType::RefreshNeighborStatus
        )
    }
}

#[derive(Clone, Debug)]
pub struct NeighborhoodAction {
    pub id: u64,
    pub target_server_id: ServerId,
    pub action_type: NeighborhoodActionType,
    pub target_identity_id: Option<IdentityId>,
    pub created_at: SystemTime,
    pub execute_after: Option<SystemTime>,
    /// Opaque payload, e.g. the JSON-serialized former-neighbor snapshot a
    /// `StopNeighborUpdates` action needs once the `Neighbor` row is gone
    /// (§4.F.4, §9 "JSON-snapshot in a queued action").
    pub additional_data: Option<String>,
}

impl NeighborhoodAction {
    pub fn is_blocked(&self, now: SystemTime) -> bool {
        matches!(self.execute_after, Some(t) if t > now)
    }
}

/// A relationship card attesting a signed claim about a hosted identity
/// (§3 RelatedIdentity).
#[derive(Clone, Debug)]
pub struct RelatedIdentity {
    pub application_id: String,
    pub card_id: [u8; 32],
    pub issuer_public_key: PublicKey,
    pub issuer_signature: Signature,
    pub recipient_public_key: PublicKey,
    pub recipient_signature: Signature,
    pub relation_type: String,
    pub valid_from: SystemTime,
    pub valid_to: SystemTime,
}

impl RelatedIdentity {
    pub fn check_validity_range(&self) -> Result<(), ProtocolError> {
        if self.valid_from > self.valid_to {
            return Err(ProtocolError::invalid_value("valid_from", "must not be after valid_to"));
        }
        Ok(())
    }
}
