//! Routes decoded requests by `(role, conversation status, type)` to
//! handlers (§4.C), and resumes server-originated requests when their
//! response arrives on the same connection.

use std::sync::Arc;

use profile_protocol::envelope::{RequestFrame, RequestType, ResponseFrame};
use profile_protocol::roles::{role, ConversationStatus, StatusRequirement};
use profile_protocol::ProtocolError;

use crate::session::{PendingResponseContext, RelayEndpoint, Session};
use crate::Core;

/// What a handler produced. Most handlers just hand back an encoded
/// response body for the dispatcher to wrap; `AlreadyResponded` is for the
/// rare handler (`StartNeighborhoodInit`, §4.F.2) that must itself send the
/// immediate "ok" and then keep pushing further server-originated requests
/// on the same connection before the dispatcher would otherwise respond.
pub enum Dispatched {
    Respond(Vec<u8>),
    AlreadyResponded,
}

/// `(required_role, required_status)` per request type (§4.C's table).
fn requirements(request_type: RequestType) -> (u32, StatusRequirement) {
    use RequestType::*;
    match request_type {
        Ping => (role::ANY, StatusRequirement::None),
        ListRoles => (role::PRIMARY, StatusRequirement::None),
        GetProfileInformation => (role::CL_ANY, StatusRequirement::None),
        ProfileSearch | ProfileSearchPart | ProfileStats | GetIdentityRelationships => {
            (role::CL_ANY, StatusRequirement::ConversationAny)
        }
        StartConversation => (role::ANY, StatusRequirement::Exactly(ConversationStatus::NoConversation)),
        RegisterHosting => {
            (role::CL_NON_CUSTOMER, StatusRequirement::Exactly(ConversationStatus::ConversationStarted))
        }
        CheckIn => (role::CL_CUSTOMER, StatusRequirement::Exactly(ConversationStatus::ConversationStarted)),
        VerifyIdentity => (
            role::CL_NON_CUSTOMER | role::SR_NEIGHBOR,
            StatusRequirement::Exactly(ConversationStatus::ConversationStarted),
        ),
        UpdateProfile
        | CancelHostingAgreement
        | AppServiceAdd
        | AppServiceRemove
        | AddRelatedIdentity
        | RemoveRelatedIdentity
        | CanStoreData
        | CanPublishIpns => (role::CL_CUSTOMER, StatusRequirement::Exactly(ConversationStatus::Authenticated)),
        CallIdentityApplicationService => (role::CL_ANY, StatusRequirement::Exactly(ConversationStatus::Verified)),
        // Token is the authentication; no conversation precondition (§4.C).
        AppServiceSendMessage => (role::CL_APP_SERVICE, StatusRequirement::None),
        StartNeighborhoodInit | FinishNeighborhoodInit | NeighborhoodSharedProfileUpdate
        | StopNeighborhoodUpdates => (role::SR_NEIGHBOR, StatusRequirement::Exactly(ConversationStatus::Verified)),
        // These only ever flow server -> client; a client sending one as a
        // Request is a protocol violation, enforced in `dispatch` before
        // this table is even consulted for them.
        IncomingCallNotification | AppServiceReceiveMessageNotification => (0, StatusRequirement::None),
    }
}

fn check(session: &Session, required_role: u32, required_status: StatusRequirement) -> Result<(), ProtocolError> {
    if !session.has_role(required_role) {
        return Err(ProtocolError::BadRole);
    }
    if !required_status.satisfied_by(session.status()) {
        return Err(match required_status {
            StatusRequirement::Exactly(ConversationStatus::Verified)
            | StatusRequirement::Exactly(ConversationStatus::Authenticated) => ProtocolError::Unauthorized,
            _ => ProtocolError::BadConversationStatus,
        });
    }
    Ok(())
}

/// Routes one decoded request to its handler, returning the response to
/// send — or `None` if the handler already sent its own response frame(s)
/// on this connection (`Dispatched::AlreadyResponded`).
pub async fn dispatch(core: &Core, session: &Arc<Session>, frame: RequestFrame) -> Option<ResponseFrame> {
    let request_id = frame.request_id;

    let request_type = match RequestType::from_i32(frame.type_code) {
        Some(t) => t,
        None => {
            session.mark_force_disconnect();
            return Some(ResponseFrame::unsolicited_protocol_violation(format!(
                "unknown request type code {}",
                frame.type_code
            )));
        }
    };

    if matches!(
        request_type,
        RequestType::IncomingCallNotification | RequestType::AppServiceReceiveMessageNotification
    ) {
        session.mark_force_disconnect();
        return Some(ResponseFrame::error(
            request_id,
            request_type,
            &ProtocolError::ProtocolViolation("this request type is server-originated only".into()),
        ));
    }

    let (required_role, required_status) = requirements(request_type);
    if let Err(e) = check(session, required_role, required_status) {
        return Some(ResponseFrame::error(request_id, request_type, &e));
    }

    if request_type.requires_signature() {
        if let Err(e) = verify_signature(core, session, &frame) {
            return Some(ResponseFrame::error(request_id, request_type, &e));
        }
    }

    let outcome = crate::handlers::handle(core, session, request_id, request_type, &frame.body).await;
    match outcome {
        Ok(Dispatched::Respond(body)) => Some(ResponseFrame::ok(request_id, request_type, body)),
        Ok(Dispatched::AlreadyResponded) => None,
        Err(e) => {
            let fatal = e.status_code().is_fatal_to_connection();
            let response = ResponseFrame::error(request_id, request_type, &e);
            if fatal {
                session.mark_force_disconnect();
            }
            Some(response)
        }
    }
}

fn verify_signature(core: &Core, session: &Session, frame: &RequestFrame) -> Result<(), ProtocolError> {
    let raw_signature = frame
        .signature
        .as_ref()
        .ok_or_else(|| ProtocolError::ProtocolViolation("missing required signature".into()))?;
    let public_key = session
        .with_state(|s| s.public_key.clone())
        .ok_or(ProtocolError::Unauthorized)?;
    let signature = profile_protocol::Signature(raw_signature.clone());
    if core.validator.verify(&public_key, &frame.body, &signature) {
        Ok(())
    } else {
        Err(ProtocolError::InvalidSignature)
    }
}

/// Resumes a server-originated request once its response arrives on this
/// connection (§4.C "request/response correlation", §4.B "response type
/// must match request type or the connection is force-disconnected").
pub async fn handle_incoming_response(core: &Core, session: &Arc<Session>, frame: ResponseFrame) {
    let request_id = frame.request_id;
    let context = match session.take_pending_request(request_id) {
        Some(ctx) => ctx,
        None => {
            session.mark_force_disconnect();
            return;
        }
    };

    let expected_type = match &context {
        PendingResponseContext::IncomingCallNotification { .. } => RequestType::IncomingCallNotification,
        PendingResponseContext::AppServiceReceiveAck { .. } => {
            RequestType::AppServiceReceiveMessageNotification
        }
        PendingResponseContext::NeighborhoodInitBatchAck { .. } => RequestType::NeighborhoodSharedProfileUpdate,
        PendingResponseContext::NeighborhoodInitFinishAck => RequestType::FinishNeighborhoodInit,
    };
    if RequestType::from_i32(frame.type_code) != Some(expected_type) {
        session.mark_force_disconnect();
        return;
    }

    match context {
        PendingResponseContext::IncomingCallNotification { relay_id } => {
            let accepted = if frame.status == profile_protocol::StatusCode::Ok as i32 {
                Ok(())
            } else {
                Err(ProtocolError::Rejected)
            };
            core.relay.clone().resolve_callee_response(relay_id, accepted);
        }
        PendingResponseContext::AppServiceReceiveAck { relay_id } => {
            let from_endpoint = session.with_state(|s| s.bound_relay.map(|(_, ep)| ep));
            if let Some(endpoint) = from_endpoint {
                core.relay.resolve_message_ack(relay_id, endpoint);
            }
        }
        PendingResponseContext::NeighborhoodInitBatchAck { .. } | PendingResponseContext::NeighborhoodInitFinishAck => {
            session.resolve_response_waiter(request_id, frame);
        }
    }
}
