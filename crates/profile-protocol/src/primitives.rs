//! Scalar wire types shared by every request/response body: identity ids,
//! keys, signatures, locations and the semantic version triple.

use sha2::{Digest, Sha256};
use std::fmt;

/// Maximum accepted frame size, §4.B. Batched neighborhood updates must stop
/// appending items before the frame would exceed `MAX_FRAME_SIZE - 32`.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;
pub const MAX_FRAME_HEADROOM: usize = 32;

pub const MAX_NAME_LEN: usize = 64;
pub const MAX_TYPE_LEN: usize = 64;
pub const MAX_EXTRA_DATA_LEN: usize = 200;
pub const MAX_PUBLIC_KEY_LEN: usize = 128;

/// Reserved message id used for unsolicited protocol-violation responses,
/// sent when no request id is available to correlate against (§4.B, §6).
pub const UNSOLICITED_ERROR_MESSAGE_ID: u32 = 0x0BAD_C0DE;

/// The only protocol version presently accepted (§4.A, §6).
pub const SUPPORTED_VERSION: SemVer = SemVer { major: 1, minor: 0, patch: 0 };

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
pub struct SemVer {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl SemVer {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }

    /// Highest version common to both a client's offered list and the
    /// versions this server accepts (currently just 1.0.0), per §4.A.
    pub fn negotiate(offered: &[SemVer], accepted: &[SemVer]) -> Option<SemVer> {
        offered.iter().filter(|v| accepted.contains(v)).max().copied()
    }
}

impl fmt::Display for SemVer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// 32-byte SHA-256 digest of a public key; the network-level name of a
/// person, application service, or server (GLOSSARY).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IdentityId(pub [u8; 32]);

impl IdentityId {
    pub fn of_public_key(pk: &PublicKey) -> Self {
        let digest = Sha256::digest(&pk.0);
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, crate::error::ProtocolError> {
        if bytes.len() != 32 {
            return Err(crate::error::ProtocolError::InvalidValue {
                path: "identity_id".into(),
                reason: "identity id must be exactly 32 bytes".into(),
            });
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentityId({})", hex::encode(self.0))
    }
}

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Ed25519 public key bytes, ≤ [`MAX_PUBLIC_KEY_LEN`] per §3.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PublicKey(pub Vec<u8>);

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(&self.0))
    }
}

/// Ed25519 signature bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct Signature(pub Vec<u8>);

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", hex::encode(&self.0))
    }
}

/// A 32-byte random value, used both as the server's authentication
/// challenge and as the client's challenge in `StartConversation` (§4.A).
#[derive(Clone, PartialEq, Eq)]
pub struct Challenge(pub [u8; 32]);

impl fmt::Debug for Challenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Challenge({})", hex::encode(self.0))
    }
}

/// 64-bit fixed-point GPS coordinate pair, §3. Stored as micro-degrees
/// (1e-6 degree resolution) in a single `i64` per axis, matching the
/// protocol's "64-bit fixed-point" wire representation while keeping a
/// convenient `f64` degrees API for the search engine's geo math.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct GpsLocation {
    pub latitude_fixed: i64,
    pub longitude_fixed: i64,
}

const FIXED_POINT_SCALE: f64 = 1_000_000.0;

impl GpsLocation {
    pub fn from_degrees(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude_fixed: (latitude * FIXED_POINT_SCALE).round() as i64,
            longitude_fixed: (longitude * FIXED_POINT_SCALE).round() as i64,
        }
    }

    pub fn latitude_degrees(&self) -> f64 {
        self.latitude_fixed as f64 / FIXED_POINT_SCALE
    }

    pub fn longitude_degrees(&self) -> f64 {
        self.longitude_fixed as f64 / FIXED_POINT_SCALE
    }

    /// Great-circle distance in meters (haversine), used by the search
    /// engine's exact radius filter (§4.E item 1).
    pub fn distance_meters(&self, other: &GpsLocation) -> f64 {
        const EARTH_RADIUS_M: f64 = 6_371_000.0;
        let (lat1, lon1) = (self.latitude_degrees().to_radians(), self.longitude_degrees().to_radians());
        let (lat2, lon2) = (other.latitude_degrees().to_radians(), other.longitude_degrees().to_radians());
        let dlat = lat2 - lat1;
        let dlon = lon2 - lon1;
        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().asin();
        EARTH_RADIUS_M * c
    }
}

/// Minimal hex encoding, kept local so this crate does not need to pull in
/// a dedicated `hex` dependency just for `Debug`/`Display` impls.
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{:02x}", b)).collect()
    }
}
