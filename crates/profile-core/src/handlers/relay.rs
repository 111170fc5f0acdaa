//! Application-service relay (§4.D): placing a call and exchanging messages
//! over an already-accepted relay token.

use std::sync::Arc;

use profile_protocol::envelope::{decode_body, encode_body};
use profile_protocol::messages::{
    AppServiceSendMessageRequest, AppServiceSendMessageResponse, CallIdentityApplicationServiceRequest,
    CallIdentityApplicationServiceResponse,
};
use profile_protocol::{IdentityId, ProtocolError};
use uuid::Uuid;

use crate::relay_engine::CallOutcome;
use crate::session::Session;
use crate::Core;

pub async fn call_identity_application_service(
    core: &Core,
    session: &Arc<Session>,
    body: &[u8],
) -> Result<Vec<u8>, ProtocolError> {
    let req: CallIdentityApplicationServiceRequest = decode_body(body)?;
    let callee_id = IdentityId::from_slice(&req.callee_id)?;
    let caller_public_key =
        session.with_state(|s| s.public_key.clone()).ok_or(ProtocolError::Unauthorized)?;

    match core.relay.call(session, caller_public_key, &callee_id, req.service_name, req.init_payload).await? {
        CallOutcome::Accepted { caller_token } => Ok(encode_body(&CallIdentityApplicationServiceResponse {
            caller_token: caller_token.as_bytes().to_vec(),
        })),
        CallOutcome::Rejected => Err(ProtocolError::Rejected),
        CallOutcome::NotAvailable => Err(ProtocolError::NotAvailable),
    }
}

pub async fn app_service_send_message(
    core: &Core,
    session: &Arc<Session>,
    body: &[u8],
) -> Result<Vec<u8>, ProtocolError> {
    let req: AppServiceSendMessageRequest = decode_body(body)?;
    let token = Uuid::from_slice(&req.relay_token).map_err(|_| ProtocolError::invalid_value("relay_token", "must be a 16-byte UUID"))?;

    match core.relay.send_message(session, token, req.payload).await {
        Ok(()) => Ok(encode_body(&AppServiceSendMessageResponse {})),
        Err(ProtocolError::NotFound) => {
            session.mark_force_disconnect();
            Err(ProtocolError::NotFound)
        }
        Err(e) => Err(e),
    }
}
