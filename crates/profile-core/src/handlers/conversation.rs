//! Conversation bootstrap (§4.A): the two `SingleRequest`s (`Ping`,
//! `ListRoles`) and the three-step challenge/response handshake that moves a
//! session from `NoConversation` through `ConversationStarted` to
//! `Verified`/`Authenticated`.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use profile_protocol::envelope::{decode_body, encode_body};
use profile_protocol::messages::{
    CheckInRequest, CheckInResponse, ListRolesResponse, PingRequest, PingResponse, RoleInfoMsg,
    StartConversationRequest, StartConversationResponse, VerifyIdentityRequest, VerifyIdentityResponse,
};
use profile_protocol::model::validate_public_key;
use profile_protocol::roles::ConversationStatus;
use profile_protocol::{IdentityId, ProtocolError, PublicKey, SemVer};

use crate::session::Session;
use crate::Core;

pub fn ping(body: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let req: PingRequest = decode_body(body)?;
    let server_clock_ms = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64;
    Ok(encode_body(&PingResponse { payload: req.payload, server_clock_ms }))
}

pub fn list_roles(core: &Core) -> Result<Vec<u8>, ProtocolError> {
    let roles = core
        .role_ports
        .table()
        .into_iter()
        .map(|ep| RoleInfoMsg { role_bit: ep.role_bit, port: ep.port as u32, tcp: ep.tcp, tls: ep.tls })
        .collect();
    Ok(encode_body(&ListRolesResponse { roles }))
}

pub async fn start_conversation(
    core: &Core,
    session: &Arc<Session>,
    body: &[u8],
) -> Result<Vec<u8>, ProtocolError> {
    let req: StartConversationRequest = decode_body(body)?;
    let public_key = PublicKey(req.public_key);
    validate_public_key(&public_key)?;

    let offered: Vec<SemVer> = req.supported_versions.iter().map(|v| SemVer::new(v.major, v.minor, v.patch)).collect();
    let negotiated = SemVer::negotiate(&offered, &[profile_protocol::primitives::SUPPORTED_VERSION])
        .ok_or(ProtocolError::Unsupported)?;

    let server_challenge = profile_crypto::random_challenge();
    let client_challenge_signature = core.signer.sign(&req.client_challenge);
    let identity_id = IdentityId::of_public_key(&public_key);

    session.with_state_mut(|s| {
        s.status = ConversationStatus::ConversationStarted;
        s.public_key = Some(public_key.clone());
        s.identity_id = Some(identity_id.clone());
        s.server_challenge = Some(server_challenge.clone());
    });

    Ok(encode_body(&StartConversationResponse {
        negotiated_version: Some(profile_protocol::messages::SemVerMsg {
            major: negotiated.major,
            minor: negotiated.minor,
            patch: negotiated.patch,
        }),
        server_challenge: server_challenge.0.to_vec(),
        client_challenge_signature: client_challenge_signature.0,
        server_public_key: core.signer.public_key().0.clone(),
    }))
}

/// Compares an echoed challenge against the one this session handed out in
/// `StartConversation` (§4.A steps for both `CheckIn` and `VerifyIdentity`).
fn verify_echoed_challenge(session: &Session, echoed: &[u8]) -> Result<(), ProtocolError> {
    let expected = session.with_state(|s| s.server_challenge.clone()).ok_or(ProtocolError::Unauthorized)?;
    if expected.0.as_slice() == echoed {
        Ok(())
    } else {
        Err(ProtocolError::invalid_value("challenge", "echoed challenge does not match"))
    }
}

pub async fn check_in(core: &Core, session: &Arc<Session>, body: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let req: CheckInRequest = decode_body(body)?;
    verify_echoed_challenge(session, &req.echoed_challenge)?;

    let (identity_id, app_services) = session.with_state_mut(|s| {
        s.status = ConversationStatus::Authenticated;
        (s.identity_id.clone(), s.app_services.clone())
    });
    let identity_id = identity_id.ok_or(ProtocolError::Unauthorized)?;
    core.relay.register_online(identity_id, session.clone(), app_services);

    Ok(encode_body(&CheckInResponse {}))
}

pub async fn verify_identity(session: &Arc<Session>, body: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let req: VerifyIdentityRequest = decode_body(body)?;
    verify_echoed_challenge(session, &req.echoed_challenge)?;
    session.with_state_mut(|s| s.status = ConversationStatus::Verified);
    Ok(encode_body(&VerifyIdentityResponse {}))
}
