//! Two-party call tokenization and payload forwarding (§3 Relay, §4.D).

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use profile_protocol::envelope::{encode_body, Envelope, RequestFrame, RequestType};
use profile_protocol::messages::{
    AppServiceReceiveMessageNotificationRequest, IncomingCallNotificationRequest,
};
use profile_protocol::{IdentityId, ProtocolError, PublicKey};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::session::{RelayEndpoint, Session};

const CALLEE_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);
const APP_SERVICE_BINDING_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RelayState {
    WaitingForCalleeResponse,
    WaitingForFirstAppServiceConnection,
    WaitingForSecondAppServiceConnection,
    Open,
    Destroyed,
}

#[derive(Debug)]
pub enum CallOutcome {
    Accepted { caller_token: Uuid },
    Rejected,
    NotAvailable,
}

struct EndpointBinding {
    session: Weak<Session>,
}

pub struct Relay {
    pub relay_id: Uuid,
    pub caller_token: Uuid,
    pub callee_token: Uuid,
    pub service_name: String,
    caller_session: Weak<Session>,
    callee_session: Weak<Session>,
    state: Mutex<RelayState>,
    caller_app_service: Mutex<Option<EndpointBinding>>,
    callee_app_service: Mutex<Option<EndpointBinding>>,
    caller_waiter: Mutex<Option<oneshot::Sender<CallOutcome>>>,
    caller_to_callee_ack: Mutex<Option<oneshot::Sender<()>>>,
    callee_to_caller_ack: Mutex<Option<oneshot::Sender<()>>>,
}

impl Relay {
    pub fn state(&self) -> RelayState {
        *self.state.lock()
    }
}

#[derive(Default)]
struct RelayTables {
    by_id: HashMap<Uuid, Arc<Relay>>,
    by_caller_token: HashMap<Uuid, Uuid>,
    by_callee_token: HashMap<Uuid, Uuid>,
}

/// Owns every live Relay plus a registry of identities currently reachable
/// for an incoming call (populated on successful CheckIn, cleared on
/// disconnect — see `register_online`/`unregister_online`).
pub struct RelayEngine {
    tables: Mutex<RelayTables>,
    online_customers: RwLock<HashMap<IdentityId, (Arc<Session>, Vec<String>)>>,
}

impl Default for RelayEngine {
    fn default() -> Self {
        Self { tables: Mutex::new(RelayTables::default()), online_customers: RwLock::new(HashMap::new()) }
    }
}

impl RelayEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_online(&self, identity_id: IdentityId, session: Arc<Session>, app_services: Vec<String>) {
        self.online_customers.write().insert(identity_id, (session, app_services));
    }

    pub fn unregister_online(&self, identity_id: &IdentityId) {
        self.online_customers.write().remove(identity_id);
    }

    pub fn get_by_id(&self, relay_id: Uuid) -> Option<Arc<Relay>> {
        self.tables.lock().by_id.get(&relay_id).cloned()
    }

    pub fn get_by_token(&self, token: Uuid) -> Option<(Arc<Relay>, RelayEndpoint)> {
        let tables = self.tables.lock();
        if let Some(id) = tables.by_caller_token.get(&token) {
            return tables.by_id.get(id).cloned().map(|r| (r, RelayEndpoint::Caller));
        }
        if let Some(id) = tables.by_callee_token.get(&token) {
            return tables.by_id.get(id).cloned().map(|r| (r, RelayEndpoint::Callee));
        }
        None
    }

    /// `CallIdentityApplicationService` (§4.D). Resolves the callee,
    /// notifies it, and suspends on a oneshot that the callee's response
    /// (or a 30 s timeout, or the callee's disconnect) resolves.
    pub async fn call(
        &self,
        caller: &Arc<Session>,
        caller_public_key: PublicKey,
        callee_id: &IdentityId,
        service_name: String,
        init_payload: Vec<u8>,
    ) -> Result<CallOutcome, ProtocolError> {
        let (callee_session, app_services) = {
            let online = self.online_customers.read();
            online.get(callee_id).cloned().ok_or(ProtocolError::NotFound)?
        };
        if !app_services.iter().any(|s| s == &service_name) {
            return Err(ProtocolError::NotAvailable);
        }

        let relay_id = Uuid::new_v4();
        let caller_token = Uuid::new_v4();
        let callee_token = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();

        let relay = Arc::new(Relay {
            relay_id,
            caller_token,
            callee_token,
            service_name: service_name.clone(),
            caller_session: Arc::downgrade(caller),
            callee_session: Arc::downgrade(&callee_session),
            state: Mutex::new(RelayState::WaitingForCalleeResponse),
            caller_app_service: Mutex::new(None),
            callee_app_service: Mutex::new(None),
            caller_waiter: Mutex::new(Some(tx)),
            caller_to_callee_ack: Mutex::new(None),
            callee_to_caller_ack: Mutex::new(None),
        });

        {
            let mut tables = self.tables.lock();
            tables.by_id.insert(relay_id, relay.clone());
            tables.by_caller_token.insert(caller_token, relay_id);
            tables.by_callee_token.insert(callee_token, relay_id);
        }

        let request_id = callee_session
            .register_pending_request(crate::session::PendingResponseContext::IncomingCallNotification {
                relay_id,
            });
        let body = IncomingCallNotificationRequest {
            caller_public_key: caller_public_key.0,
            service_name,
            callee_token: callee_token.as_bytes().to_vec(),
            init_payload,
        };
        let frame = RequestFrame {
            request_id,
            type_code: RequestType::IncomingCallNotification as i32,
            signature: None,
            body: encode_body(&body),
        };
        if callee_session.send(Envelope::request(frame)).is_err() {
            self.destroy(relay_id);
            return Ok(CallOutcome::NotAvailable);
        }

        match tokio::time::timeout(CALLEE_RESPONSE_TIMEOUT, rx).await {
            Ok(Ok(outcome)) => Ok(outcome),
            _ => {
                self.destroy(relay_id);
                Ok(CallOutcome::NotAvailable)
            }
        }
    }

    /// The callee's answer to `IncomingCallNotification` arrived. Takes
    /// `Arc<Self>` (not `&self`) because accepting a call starts the
    /// AppService-binding timeout, which needs a handle it can outlive this
    /// call to run on its own task.
    pub fn resolve_callee_response(self: Arc<Self>, relay_id: Uuid, accepted: Result<(), ProtocolError>) {
        let relay = match self.get_by_id(relay_id) {
            Some(relay) => relay,
            None => return,
        };
        let waiter = relay.caller_waiter.lock().take();
        match accepted {
            Ok(()) => {
                *relay.state.lock() = RelayState::WaitingForFirstAppServiceConnection;
                if let Some(tx) = waiter {
                    let _ = tx.send(CallOutcome::Accepted { caller_token: relay.caller_token });
                }
                self.spawn_app_service_binding_timeout(relay_id);
            }
            Err(_) => {
                if let Some(tx) = waiter {
                    let _ = tx.send(CallOutcome::Rejected);
                }
                self.destroy(relay_id);
            }
        }
    }

    /// §4.D state machine / §5 "AppService binding: 60 s": destroys the
    /// relay if it is still waiting on the first or second AppService
    /// connection once the binding window elapses. A no-op if `bind_endpoint`
    /// already advanced the relay to `Open` (or it was destroyed some other
    /// way) before the timer fires.
    fn spawn_app_service_binding_timeout(self: &Arc<Self>, relay_id: Uuid) {
        let engine = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(APP_SERVICE_BINDING_TIMEOUT).await;
            if let Some(relay) = engine.get_by_id(relay_id) {
                if relay.state() != RelayState::Open {
                    engine.destroy(relay_id);
                }
            }
        });
    }

    /// `AppServiceSendMessage` (§4.D). Binds the first/second endpoint,
    /// then forwards payloads once Open. An unknown token is
    /// `ERROR_NOT_FOUND` and the caller force-disconnects (§4.D "Token
    /// discipline").
    pub async fn send_message(
        &self,
        session: &Arc<Session>,
        token: Uuid,
        payload: Vec<u8>,
    ) -> Result<(), ProtocolError> {
        let (relay, endpoint) = self.get_by_token(token).ok_or(ProtocolError::NotFound)?;

        self.bind_endpoint(&relay, endpoint, session);

        if relay.state() != RelayState::Open {
            return Ok(());
        }

        let (other_session, ack_slot) = match endpoint {
            RelayEndpoint::Caller => (relay.callee_session.upgrade(), &relay.caller_to_callee_ack),
            RelayEndpoint::Callee => (relay.caller_session.upgrade(), &relay.callee_to_caller_ack),
        };
        let other_session = other_session.ok_or(ProtocolError::NotAvailable)?;

        let request_id = other_session
            .register_pending_request(crate::session::PendingResponseContext::AppServiceReceiveAck {
                relay_id: relay.relay_id,
            });
        let body = AppServiceReceiveMessageNotificationRequest {
            relay_token: token.as_bytes().to_vec(),
            payload,
        };
        let frame = RequestFrame {
            request_id,
            type_code: RequestType::AppServiceReceiveMessageNotification as i32,
            signature: None,
            body: encode_body(&body),
        };
        let (tx, rx) = oneshot::channel();
        *ack_slot.lock() = Some(tx);
        other_session.send(Envelope::request(frame)).map_err(|_| ProtocolError::NotAvailable)?;
        rx.await.map_err(|_| ProtocolError::NotAvailable)
    }

    /// The other endpoint acked `AppServiceReceiveMessageNotification`.
    pub fn resolve_message_ack(&self, relay_id: Uuid, from_endpoint: RelayEndpoint) {
        let relay = match self.get_by_id(relay_id) {
            Some(relay) => relay,
            None => return,
        };
        let slot = match from_endpoint {
            // An ack FROM the callee completes the caller-to-callee send.
            RelayEndpoint::Callee => &relay.caller_to_callee_ack,
            RelayEndpoint::Caller => &relay.callee_to_caller_ack,
        };
        if let Some(tx) = slot.lock().take() {
            let _ = tx.send(());
        }
    }

    fn bind_endpoint(&self, relay: &Arc<Relay>, endpoint: RelayEndpoint, session: &Arc<Session>) {
        let mut state = relay.state.lock();
        let slot = match endpoint {
            RelayEndpoint::Caller => &relay.caller_app_service,
            RelayEndpoint::Callee => &relay.callee_app_service,
        };
        let mut slot = slot.lock();
        if slot.is_none() {
            *slot = Some(EndpointBinding { session: Arc::downgrade(session) });
            session.with_state_mut(|s| s.bound_relay = Some((relay.relay_id, endpoint)));
            *state = match *state {
                RelayState::WaitingForFirstAppServiceConnection => RelayState::WaitingForSecondAppServiceConnection,
                RelayState::WaitingForSecondAppServiceConnection => RelayState::Open,
                other => other,
            };
        }
    }

    /// Test-and-set idempotent destroy (§4.D, §8 property 7): the first
    /// caller removes all three map keys; later calls are no-ops.
    pub fn destroy(&self, relay_id: Uuid) -> bool {
        let mut tables = self.tables.lock();
        let relay = match tables.by_id.remove(&relay_id) {
            Some(relay) => relay,
            None => return false,
        };
        tables.by_caller_token.remove(&relay.caller_token);
        tables.by_callee_token.remove(&relay.callee_token);
        *relay.state.lock() = RelayState::Destroyed;
        true
    }

    /// Called when a session disconnects: destroys any relay it was a
    /// party to (§3 "destroyed on disconnect").
    pub fn on_session_disconnected(&self, relay_id: Uuid) {
        self.destroy(relay_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn session(role: u32) -> Arc<Session> {
        let (tx, _rx) = mpsc::unbounded_channel();
        Arc::new(Session::new("127.0.0.1:1".parse().unwrap(), role, tx))
    }

    #[test]
    fn destroy_is_idempotent() {
        let engine = RelayEngine::new();
        let relay_id = Uuid::new_v4();
        let relay = Arc::new(Relay {
            relay_id,
            caller_token: Uuid::new_v4(),
            callee_token: Uuid::new_v4(),
            service_name: "chat".into(),
            caller_session: Weak::new(),
            callee_session: Weak::new(),
            state: Mutex::new(RelayState::Open),
            caller_app_service: Mutex::new(None),
            callee_app_service: Mutex::new(None),
            caller_waiter: Mutex::new(None),
            caller_to_callee_ack: Mutex::new(None),
            callee_to_caller_ack: Mutex::new(None),
        });
        engine.tables.lock().by_id.insert(relay_id, relay.clone());
        engine.tables.lock().by_caller_token.insert(relay.caller_token, relay_id);
        engine.tables.lock().by_callee_token.insert(relay.callee_token, relay_id);

        assert!(engine.destroy(relay_id));
        assert!(!engine.destroy(relay_id));
        assert!(engine.get_by_id(relay_id).is_none());
    }

    #[tokio::test]
    async fn call_to_unregistered_identity_is_not_found() {
        let engine = RelayEngine::new();
        let caller = session(profile_protocol::roles::role::CL_NON_CUSTOMER);
        let callee_id = IdentityId::of_public_key(&PublicKey(vec![7; 32]));
        let err = engine
            .call(&caller, PublicKey(vec![1; 32]), &callee_id, "chat".into(), vec![])
            .await
            .unwrap_err();
        assert_eq!(err, ProtocolError::NotFound);
    }
}
