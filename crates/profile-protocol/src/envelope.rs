//! The outer frame: `MessageWithHeader` in spec terms. An [`Envelope`] wraps
//! exactly one of [`RequestFrame`] / [`ResponseFrame`] (§6); each frame in
//! turn carries an opaque, [`RequestType`]/[`ResponseType`]-tagged body
//! encoded with [`crate::messages`].

use prost::Message;

use crate::error::{ProtocolError, StatusCode};

/// Every request/response type this protocol defines. `SingleRequest`s
/// (§4.B, §4.C) carry no conversation state and need no signature; all
/// others are `ConversationRequest`s.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
#[repr(i32)]
pub enum RequestType {
    Ping = 0,
    ListRoles = 1,
    GetProfileInformation = 2,
    ProfileSearch = 3,
    ProfileSearchPart = 4,
    ProfileStats = 5,
    GetIdentityRelationships = 6,
    StartConversation = 7,
    CheckIn = 8,
    VerifyIdentity = 9,
    RegisterHosting = 10,
    UpdateProfile = 11,
    CancelHostingAgreement = 12,
    AppServiceAdd = 13,
    AppServiceRemove = 14,
    AddRelatedIdentity = 15,
    RemoveRelatedIdentity = 16,
    CanStoreData = 17,
    CanPublishIpns = 18,
    CallIdentityApplicationService = 19,
    AppServiceSendMessage = 20,
    IncomingCallNotification = 21,
    AppServiceReceiveMessageNotification = 22,
    StartNeighborhoodInit = 23,
    FinishNeighborhoodInit = 24,
    NeighborhoodSharedProfileUpdate = 25,
    StopNeighborhoodUpdates = 26,
}

impl RequestType {
    pub fn from_i32(v: i32) -> Option<Self> {
        use RequestType::*;
        Some(match v {
            0 => Ping,
            1 => ListRoles,
            2 => GetProfileInformation,
            3 => ProfileSearch,
            4 => ProfileSearchPart,
            5 => ProfileStats,
            6 => GetIdentityRelationships,
            7 => StartConversation,
            8 => CheckIn,
            9 => VerifyIdentity,
            10 => RegisterHosting,
            11 => UpdateProfile,
            12 => CancelHostingAgreement,
            13 => AppServiceAdd,
            14 => AppServiceRemove,
            15 => AddRelatedIdentity,
            16 => RemoveRelatedIdentity,
            17 => CanStoreData,
            18 => CanPublishIpns,
            19 => CallIdentityApplicationService,
            20 => AppServiceSendMessage,
            21 => IncomingCallNotification,
            22 => AppServiceReceiveMessageNotification,
            23 => StartNeighborhoodInit,
            24 => FinishNeighborhoodInit,
            25 => NeighborhoodSharedProfileUpdate,
            26 => StopNeighborhoodUpdates,
            _ => return None,
        })
    }

    /// `SingleRequest`s are idempotent and carry no conversation state (§4.C).
    pub fn is_single(self) -> bool {
        matches!(
            self,
            RequestType::Ping
                | RequestType::ListRoles
                | RequestType::GetProfileInformation
                | RequestType::ProfileSearch
                | RequestType::ProfileSearchPart
                | RequestType::ProfileStats
                | RequestType::GetIdentityRelationships
        )
    }

    /// Requests whose body must be signed over its canonical bytes because
    /// they mutate or assert identity-bearing state (§4.B).
    pub fn requires_signature(self) -> bool {
        matches!(
            self,
            RequestType::CheckIn
                | RequestType::VerifyIdentity
                | RequestType::UpdateProfile
                | RequestType::CancelHostingAgreement
                | RequestType::AppServiceAdd
                | RequestType::AppServiceRemove
                | RequestType::AddRelatedIdentity
                | RequestType::RemoveRelatedIdentity
                | RequestType::CanStoreData
                | RequestType::CanPublishIpns
        )
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RequestFrame {
    /// Correlates a response to the request that produced it, and a
    /// server-originated request to the pending-response slot that will
    /// resume when the peer answers (§4.C).
    #[prost(uint32, tag = "1")]
    pub request_id: u32,
    #[prost(int32, tag = "2")]
    pub type_code: i32,
    /// Present iff [`RequestType::requires_signature`] for `type_code`.
    /// Signs the canonical (unsigned) encoding of `body` under the
    /// session's stored client public key (§4.B).
    #[prost(bytes = "vec", optional, tag = "3")]
    pub signature: Option<Vec<u8>>,
    #[prost(bytes = "vec", tag = "4")]
    pub body: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ResponseFrame {
    #[prost(uint32, tag = "1")]
    pub request_id: u32,
    #[prost(int32, tag = "2")]
    pub type_code: i32,
    #[prost(int32, tag = "3")]
    pub status: i32,
    #[prost(string, optional, tag = "4")]
    pub error_message: Option<String>,
    #[prost(bytes = "vec", tag = "5")]
    pub body: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Oneof)]
pub enum EnvelopeKind {
    #[prost(message, tag = "1")]
    Request(RequestFrame),
    #[prost(message, tag = "2")]
    Response(ResponseFrame),
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Envelope {
    #[prost(oneof = "EnvelopeKind", tags = "1, 2")]
    pub kind: Option<EnvelopeKind>,
}

impl Envelope {
    pub fn request(frame: RequestFrame) -> Self {
        Self { kind: Some(EnvelopeKind::Request(frame)) }
    }

    pub fn response(frame: ResponseFrame) -> Self {
        Self { kind: Some(EnvelopeKind::Response(frame)) }
    }
}

impl ResponseFrame {
    pub fn ok(request_id: u32, type_code: RequestType, body: Vec<u8>) -> Self {
        Self {
            request_id,
            type_code: type_code as i32,
            status: StatusCode::Ok as i32,
            error_message: None,
            body,
        }
    }

    pub fn error(request_id: u32, type_code: RequestType, err: &ProtocolError) -> Self {
        Self {
            request_id,
            type_code: type_code as i32,
            status: err.status_code() as i32,
            error_message: err.message(),
            body: Vec::new(),
        }
    }

    /// A response to an unsolicited frame the codec could not even parse
    /// enough to recover a request id or type (§4.B, §6).
    pub fn unsolicited_protocol_violation(message: impl Into<String>) -> Self {
        Self {
            request_id: crate::primitives::UNSOLICITED_ERROR_MESSAGE_ID,
            type_code: -1,
            status: StatusCode::ProtocolViolation as i32,
            error_message: Some(message.into()),
            body: Vec::new(),
        }
    }
}

/// Encode a concrete body message to bytes.
pub fn encode_body<M: Message>(msg: &M) -> Vec<u8> {
    let mut buf = Vec::with_capacity(msg.encoded_len());
    // A `Vec<u8>` buffer never runs out of capacity to grow into, so this
    // only fails if the message is malformed, which prost's typestate rules
    // out for types built purely from `#[derive(Message)]` fields.
    msg.encode(&mut buf).expect("encoding a well-formed prost message cannot fail");
    buf
}

/// Decode a concrete body message, mapping failure to a protocol violation.
pub fn decode_body<M: Message + Default>(bytes: &[u8]) -> Result<M, ProtocolError> {
    M::decode(bytes).map_err(|e| ProtocolError::ProtocolViolation(format!("malformed body: {}", e)))
}
