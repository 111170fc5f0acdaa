//! Concrete request/response body messages. Each body is its own flat
//! `prost::Message`; the outer [`crate::envelope::RequestFrame`] /
//! [`crate::envelope::ResponseFrame`] carry it as an opaque `body: Vec<u8>`
//! keyed by a [`crate::envelope::RequestType`]/[`crate::envelope::ResponseType`]
//! tag, the same "envelope wraps an opaque typed payload" shape the wire
//! format uses for the outer frame itself.

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SemVerMsg {
    #[prost(uint32, tag = "1")]
    pub major: u32,
    #[prost(uint32, tag = "2")]
    pub minor: u32,
    #[prost(uint32, tag = "3")]
    pub patch: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GpsLocationMsg {
    #[prost(sfixed64, tag = "1")]
    pub latitude_fixed: i64,
    #[prost(sfixed64, tag = "2")]
    pub longitude_fixed: i64,
}

// --- Ping -------------------------------------------------------------

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PingRequest {
    #[prost(message, optional, tag = "1")]
    pub version: Option<SemVerMsg>,
    #[prost(bytes = "vec", tag = "2")]
    pub payload: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PingResponse {
    #[prost(bytes = "vec", tag = "1")]
    pub payload: Vec<u8>,
    #[prost(uint64, tag = "2")]
    pub server_clock_ms: u64,
}

// --- ListRoles ----------------------------------------------------------

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListRolesRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RoleInfoMsg {
    #[prost(uint32, tag = "1")]
    pub role_bit: u32,
    #[prost(uint32, tag = "2")]
    pub port: u32,
    #[prost(bool, tag = "3")]
    pub tcp: bool,
    #[prost(bool, tag = "4")]
    pub tls: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListRolesResponse {
    #[prost(message, repeated, tag = "1")]
    pub roles: Vec<RoleInfoMsg>,
}

// --- Profile query / search ---------------------------------------------

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProfileQueryInformationMsg {
    #[prost(bytes = "vec", tag = "1")]
    pub identity_id: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub public_key: Vec<u8>,
    #[prost(message, optional, tag = "3")]
    pub version: Option<SemVerMsg>,
    #[prost(string, tag = "4")]
    pub name: String,
    #[prost(string, tag = "5")]
    pub identity_type: String,
    #[prost(message, optional, tag = "6")]
    pub location: Option<GpsLocationMsg>,
    #[prost(bytes = "vec", tag = "7")]
    pub extra_data: Vec<u8>,
    #[prost(bytes = "vec", optional, tag = "8")]
    pub profile_image_hash: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "9")]
    pub thumbnail_image_hash: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "10")]
    pub thumbnail_image: Option<Vec<u8>>,
    #[prost(bytes = "vec", tag = "11")]
    pub hosting_server_id: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetProfileInformationRequest {
    #[prost(bytes = "vec", tag = "1")]
    pub identity_id: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetProfileInformationResponse {
    #[prost(message, optional, tag = "1")]
    pub profile: Option<ProfileQueryInformationMsg>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProfileFilterMsg {
    #[prost(string, tag = "1")]
    pub type_pattern: String,
    #[prost(string, tag = "2")]
    pub name_pattern: String,
    #[prost(message, optional, tag = "3")]
    pub location: Option<GpsLocationMsg>,
    #[prost(double, tag = "4")]
    pub radius_meters: f64,
    #[prost(string, tag = "5")]
    pub extra_data_regex: String,
    #[prost(bool, tag = "6")]
    pub include_thumbnails: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProfileSearchRequest {
    #[prost(message, optional, tag = "1")]
    pub filter: Option<ProfileFilterMsg>,
    #[prost(uint32, tag = "2")]
    pub max_total_records: u32,
    #[prost(uint32, tag = "3")]
    pub max_response_records: u32,
    #[prost(bool, tag = "4")]
    pub include_hosted_only: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProfileSearchResponse {
    #[prost(message, repeated, tag = "1")]
    pub profiles: Vec<ProfileQueryInformationMsg>,
    #[prost(uint32, tag = "2")]
    pub total_record_count: u32,
    #[prost(bytes = "vec", repeated, tag = "3")]
    pub covered_server_ids: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProfileSearchPartRequest {
    #[prost(uint32, tag = "1")]
    pub record_index: u32,
    #[prost(uint32, tag = "2")]
    pub record_count: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProfileSearchPartResponse {
    #[prost(message, repeated, tag = "1")]
    pub profiles: Vec<ProfileQueryInformationMsg>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProfileStatsRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProfileStatsResponse {
    #[prost(uint32, tag = "1")]
    pub hosted_identity_count: u32,
    #[prost(uint32, tag = "2")]
    pub neighborhood_identity_count: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RelatedIdentityCardMsg {
    #[prost(bytes = "vec", tag = "1")]
    pub card_id: Vec<u8>,
    #[prost(string, tag = "2")]
    pub application_id: String,
    #[prost(bytes = "vec", tag = "3")]
    pub issuer_public_key: Vec<u8>,
    #[prost(bytes = "vec", tag = "4")]
    pub issuer_signature: Vec<u8>,
    #[prost(bytes = "vec", tag = "5")]
    pub recipient_public_key: Vec<u8>,
    #[prost(bytes = "vec", tag = "6")]
    pub recipient_signature: Vec<u8>,
    #[prost(string, tag = "7")]
    pub relation_type: String,
    #[prost(int64, tag = "8")]
    pub valid_from: i64,
    #[prost(int64, tag = "9")]
    pub valid_to: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetIdentityRelationshipsRequest {
    #[prost(bytes = "vec", tag = "1")]
    pub identity_id: Vec<u8>,
    #[prost(string, optional, tag = "2")]
    pub relation_type: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetIdentityRelationshipsResponse {
    #[prost(message, repeated, tag = "1")]
    pub relationships: Vec<RelatedIdentityCardMsg>,
}

// --- Conversation bootstrap ----------------------------------------------

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StartConversationRequest {
    #[prost(bytes = "vec", tag = "1")]
    pub public_key: Vec<u8>,
    #[prost(message, repeated, tag = "2")]
    pub supported_versions: Vec<SemVerMsg>,
    #[prost(bytes = "vec", tag = "3")]
    pub client_challenge: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StartConversationResponse {
    #[prost(message, optional, tag = "1")]
    pub negotiated_version: Option<SemVerMsg>,
    #[prost(bytes = "vec", tag = "2")]
    pub server_challenge: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub client_challenge_signature: Vec<u8>,
    /// The server's own public key, so a peer dialing in for neighborhood
    /// replication (§4.F.1) can derive our server id and confirm
    /// `client_challenge_signature` without already knowing it out of band.
    #[prost(bytes = "vec", tag = "4")]
    pub server_public_key: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CheckInRequest {
    #[prost(bytes = "vec", tag = "1")]
    pub echoed_challenge: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CheckInResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct VerifyIdentityRequest {
    #[prost(bytes = "vec", tag = "1")]
    pub echoed_challenge: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct VerifyIdentityResponse {}

// --- Hosting lifecycle ----------------------------------------------------

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RegisterHostingRequest {
    #[prost(string, tag = "1")]
    pub identity_type: String,
    #[prost(string, optional, tag = "2")]
    pub plan_id: Option<String>,
    #[prost(int64, optional, tag = "3")]
    pub start_time: Option<i64>,
    #[prost(bytes = "vec", optional, tag = "4")]
    pub identity_public_key: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "5")]
    pub contract_signature: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RegisterHostingResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdateProfileRequest {
    #[prost(message, optional, tag = "1")]
    pub set_version: Option<SemVerMsg>,
    #[prost(string, optional, tag = "2")]
    pub set_name: Option<String>,
    #[prost(string, optional, tag = "3")]
    pub set_type: Option<String>,
    #[prost(message, optional, tag = "4")]
    pub set_location: Option<GpsLocationMsg>,
    #[prost(bytes = "vec", optional, tag = "5")]
    pub set_extra_data: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "6")]
    pub set_profile_image: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "7")]
    pub set_thumbnail_image: Option<Vec<u8>>,
    #[prost(bool, tag = "8")]
    pub clear_profile_image: bool,
    #[prost(bool, tag = "9")]
    pub clear_thumbnail_image: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdateProfileResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CancelHostingAgreementRequest {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub redirect_to_server_id: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CancelHostingAgreementResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AppServiceAddRequest {
    #[prost(string, tag = "1")]
    pub service_name: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AppServiceAddResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AppServiceRemoveRequest {
    #[prost(string, tag = "1")]
    pub service_name: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AppServiceRemoveResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AddRelatedIdentityRequest {
    #[prost(message, optional, tag = "1")]
    pub card: Option<RelatedIdentityCardMsg>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AddRelatedIdentityResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RemoveRelatedIdentityRequest {
    #[prost(bytes = "vec", tag = "1")]
    pub card_id: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RemoveRelatedIdentityResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CanStoreDataRequest {
    #[prost(uint64, tag = "1")]
    pub byte_count: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CanStoreDataResponse {
    #[prost(bool, tag = "1")]
    pub allowed: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CanPublishIpnsRequest {
    #[prost(uint64, tag = "1")]
    pub record_validity_secs: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CanPublishIpnsResponse {
    #[prost(bool, tag = "1")]
    pub allowed: bool,
}

// --- Calls / relay --------------------------------------------------------

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CallIdentityApplicationServiceRequest {
    #[prost(bytes = "vec", tag = "1")]
    pub callee_id: Vec<u8>,
    #[prost(string, tag = "2")]
    pub service_name: String,
    #[prost(bytes = "vec", tag = "3")]
    pub init_payload: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CallIdentityApplicationServiceResponse {
    #[prost(bytes = "vec", tag = "1")]
    pub caller_token: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct IncomingCallNotificationRequest {
    #[prost(bytes = "vec", tag = "1")]
    pub caller_public_key: Vec<u8>,
    #[prost(string, tag = "2")]
    pub service_name: String,
    #[prost(bytes = "vec", tag = "3")]
    pub callee_token: Vec<u8>,
    #[prost(bytes = "vec", tag = "4")]
    pub init_payload: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct IncomingCallNotificationResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AppServiceSendMessageRequest {
    #[prost(bytes = "vec", tag = "1")]
    pub relay_token: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub payload: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AppServiceSendMessageResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AppServiceReceiveMessageNotificationRequest {
    #[prost(bytes = "vec", tag = "1")]
    pub relay_token: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub payload: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AppServiceReceiveMessageNotificationResponse {}

// --- Neighborhood ----------------------------------------------------------

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StartNeighborhoodInitRequest {
    #[prost(uint32, tag = "1")]
    pub primary_port: u32,
    #[prost(uint32, tag = "2")]
    pub sr_neighbor_port: u32,
    #[prost(string, tag = "3")]
    pub ip_address: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StartNeighborhoodInitResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FinishNeighborhoodInitRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FinishNeighborhoodInitResponse {}

/// `kind` discriminant for [`NeighborhoodChangeItemMsg`]: 0=Add, 1=Change,
/// 2=Remove, 3=Refresh marker (§4.F.3). Kept as a plain tagged struct
/// (rather than a `prost::Oneof`) so every item shares one flat shape,
/// matching the "envelope wraps opaque typed payload" convention used
/// elsewhere in this crate.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(i32)]
pub enum ChangeItemKind {
    Add = 0,
    Change = 1,
    Remove = 2,
    Refresh = 3,
}

impl ChangeItemKind {
    pub fn from_i32(v: i32) -> Option<Self> {
        match v {
            0 => Some(Self::Add),
            1 => Some(Self::Change),
            2 => Some(Self::Remove),
            3 => Some(Self::Refresh),
            _ => None,
        }
    }
}

/// Bitmask of which optional fields are actually set on a `Change` item,
/// since protobuf3 has no first-class "field was set" bit for message-typed
/// optionals used this way across an heterogeneous item. Bit order matches
/// declaration order of the `set_*` fields below.
pub mod change_flags {
    pub const NAME: u32 = 1 << 0;
    pub const TYPE: u32 = 1 << 1;
    pub const LOCATION: u32 = 1 << 2;
    pub const EXTRA_DATA: u32 = 1 << 3;
    pub const PROFILE_IMAGE: u32 = 1 << 4;
    pub const THUMBNAIL_IMAGE: u32 = 1 << 5;
    pub const VERSION: u32 = 1 << 6;
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NeighborhoodChangeItemMsg {
    #[prost(int32, tag = "1")]
    pub kind: i32,
    #[prost(bytes = "vec", tag = "2")]
    pub identity_id: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub public_key: Vec<u8>,
    #[prost(message, optional, tag = "4")]
    pub version: Option<SemVerMsg>,
    #[prost(string, tag = "5")]
    pub name: String,
    #[prost(string, tag = "6")]
    pub identity_type: String,
    #[prost(message, optional, tag = "7")]
    pub location: Option<GpsLocationMsg>,
    #[prost(bytes = "vec", tag = "8")]
    pub extra_data: Vec<u8>,
    #[prost(bytes = "vec", optional, tag = "9")]
    pub profile_image_hash: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "10")]
    pub thumbnail_image: Option<Vec<u8>>,
    #[prost(bytes = "vec", tag = "11")]
    pub signature: Vec<u8>,
    #[prost(uint32, tag = "12")]
    pub set_flags: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NeighborhoodSharedProfileUpdateRequest {
    #[prost(message, repeated, tag = "1")]
    pub items: Vec<NeighborhoodChangeItemMsg>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NeighborhoodSharedProfileUpdateResponse {
    #[prost(uint32, tag = "1")]
    pub applied_count: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StopNeighborhoodUpdatesRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StopNeighborhoodUpdatesResponse {}
