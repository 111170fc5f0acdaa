//! Full-stack scenarios driven straight through the dispatcher, the way
//! `profile-server`'s connection loop would, but without a socket: each
//! test builds its own sessions, feeds them frames, and reads back
//! whatever the session's outbound channel collects.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use profile_core::config::{CoreConfig, RolePorts, ServerIdentity};
use profile_core::dispatcher;
use profile_core::neighborhood_engine::{PeerConnection, PeerConnector, PeerInboundMessage};
use profile_core::session::{RelayEndpoint, Session};
use profile_core::Core;
use profile_crypto::Ed25519Signer;
use profile_protocol::envelope::{
    decode_body, encode_body, Envelope, EnvelopeKind, RequestFrame, RequestType, ResponseFrame,
};
use profile_protocol::messages::{
    AppServiceAddRequest, AppServiceReceiveMessageNotificationRequest, AppServiceSendMessageRequest,
    CallIdentityApplicationServiceRequest, CallIdentityApplicationServiceResponse, CheckInRequest,
    FinishNeighborhoodInitResponse, GetProfileInformationRequest, GetProfileInformationResponse,
    GpsLocationMsg, IncomingCallNotificationRequest, NeighborhoodSharedProfileUpdateResponse, PingRequest,
    PingResponse, ProfileFilterMsg, ProfileSearchRequest, ProfileSearchResponse, RegisterHostingRequest,
    SemVerMsg, StartConversationRequest, StartConversationResponse, StartNeighborhoodInitRequest,
    UpdateProfileRequest, VerifyIdentityRequest,
};
use profile_protocol::model::{Follower, HostedIdentity, PeerAddress};
use profile_protocol::roles::role;
use profile_protocol::signing::Signer;
use profile_protocol::{GpsLocation, IdentityId, ProtocolError, PublicKey, SemVer, StatusCode};
use profile_store::Stores;

/// A connector that never succeeds, for scenarios that never dial out.
struct NullConnector;

#[async_trait]
impl PeerConnector for NullConnector {
    async fn connect(&self, _address: &PeerAddress) -> Result<Box<dyn PeerConnection>, ProtocolError> {
        Err(ProtocolError::NotAvailable)
    }
}

/// Wires a `Core` over an in-memory backend and a freshly generated server
/// key. The `watch::Sender` must stay alive for as long as the test does —
/// dropping it makes `neighborhood.run()`'s shutdown branch fire on every
/// select iteration.
fn test_core(connector: Arc<dyn PeerConnector>) -> (Core, watch::Sender<bool>) {
    let signer: Arc<dyn Signer> = Arc::new(Ed25519Signer::generate());
    let server_id = IdentityId::of_public_key(signer.public_key());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let core = Core::new(
        Stores::new_in_memory(),
        connector,
        CoreConfig::default(),
        ServerIdentity { server_id },
        RolePorts { primary: 7001, cl_customer: 7002, cl_non_customer: 7003, cl_app_service: 7004, sr_neighbor: 7005 },
        IpAddr::from([198, 51, 100, 1]),
        signer,
        shutdown_rx,
    );
    (core, shutdown_tx)
}

fn test_session(role_bits: u32) -> (Arc<Session>, mpsc::UnboundedReceiver<Envelope>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let addr = "127.0.0.1:1".parse().unwrap();
    (Arc::new(Session::new(addr, role_bits, tx)), rx)
}

async fn recv_response(rx: &mut mpsc::UnboundedReceiver<Envelope>) -> ResponseFrame {
    match rx.recv().await.expect("session closed without sending").kind {
        Some(EnvelopeKind::Response(frame)) => frame,
        Some(EnvelopeKind::Request(_)) => panic!("expected a response, got a request"),
        None => panic!("expected a response, got an empty envelope"),
    }
}

async fn recv_request(rx: &mut mpsc::UnboundedReceiver<Envelope>) -> RequestFrame {
    match rx.recv().await.expect("session closed without sending").kind {
        Some(EnvelopeKind::Request(frame)) => frame,
        Some(EnvelopeKind::Response(_)) => panic!("expected a request, got a response"),
        None => panic!("expected a request, got an empty envelope"),
    }
}

fn start_conversation_frame(request_id: u32, public_key: &PublicKey, client_challenge: u8) -> RequestFrame {
    let body = encode_body(&StartConversationRequest {
        public_key: public_key.0.clone(),
        supported_versions: vec![SemVerMsg { major: 1, minor: 0, patch: 0 }],
        client_challenge: vec![client_challenge; 32],
    });
    RequestFrame { request_id, type_code: RequestType::StartConversation as i32, signature: None, body }
}

fn register_hosting_frame(request_id: u32, identity_type: &str) -> RequestFrame {
    let body = encode_body(&RegisterHostingRequest {
        identity_type: identity_type.into(),
        plan_id: None,
        start_time: None,
        identity_public_key: None,
        contract_signature: None,
    });
    RequestFrame { request_id, type_code: RequestType::RegisterHosting as i32, signature: None, body }
}

fn seeded_hosted_identity(seed: u8, identity_type: &str, lat: f64, lon: f64) -> HostedIdentity {
    let public_key = PublicKey(vec![seed; 32]);
    let identity_id = IdentityId::of_public_key(&public_key);
    let mut identity = HostedIdentity::new_uninitialized(identity_id, public_key);
    identity.version = Some(SemVer::new(1, 0, 0));
    identity.name = Some(format!("user-{}", seed));
    identity.identity_type = Some(identity_type.into());
    identity.location = Some(GpsLocation::from_degrees(lat, lon));
    identity.initialized = true;
    identity
}

#[tokio::test]
async fn ping_round_trips_payload() {
    let (core, _shutdown_tx) = test_core(Arc::new(NullConnector));
    let (session, _rx) = test_session(role::PRIMARY);

    let body = encode_body(&PingRequest {
        version: Some(SemVerMsg { major: 1, minor: 0, patch: 0 }),
        payload: vec![0xDE, 0xAD, 0xBE, 0xEF],
    });
    let frame = RequestFrame { request_id: 1, type_code: RequestType::Ping as i32, signature: None, body };

    let response = dispatcher::dispatch(&core, &session, frame).await.expect("ping responds directly");
    assert_eq!(response.status, StatusCode::Ok as i32);
    let decoded: PingResponse = decode_body(&response.body).unwrap();
    assert_eq!(decoded.payload, vec![0xDE, 0xAD, 0xBE, 0xEF]);
}

#[tokio::test]
async fn register_authenticate_and_update_profile_then_query_it() {
    let (core, _shutdown_tx) = test_core(Arc::new(NullConnector));
    let client_signer = Ed25519Signer::generate();
    let client_public_key = client_signer.public_key().clone();

    let (reg_session, _reg_rx) = test_session(role::CL_NON_CUSTOMER);
    dispatcher::dispatch(&core, &reg_session, start_conversation_frame(1, &client_public_key, 1)).await.unwrap();
    let register_response =
        dispatcher::dispatch(&core, &reg_session, register_hosting_frame(2, "person")).await.unwrap();
    assert_eq!(register_response.status, StatusCode::Ok as i32);

    let (session, _rx) = test_session(role::CL_CUSTOMER);
    let start_response =
        dispatcher::dispatch(&core, &session, start_conversation_frame(1, &client_public_key, 2)).await.unwrap();
    let start_decoded: StartConversationResponse = decode_body(&start_response.body).unwrap();

    let check_in_body = encode_body(&CheckInRequest { echoed_challenge: start_decoded.server_challenge.clone() });
    let check_in_frame = RequestFrame {
        request_id: 2,
        type_code: RequestType::CheckIn as i32,
        signature: Some(client_signer.sign(&check_in_body).0),
        body: check_in_body,
    };
    let check_in_response = dispatcher::dispatch(&core, &session, check_in_frame).await.unwrap();
    assert_eq!(check_in_response.status, StatusCode::Ok as i32);

    let update_body = encode_body(&UpdateProfileRequest {
        set_version: Some(SemVerMsg { major: 1, minor: 0, patch: 0 }),
        set_name: Some("Alice".into()),
        set_type: None,
        set_location: Some(GpsLocationMsg { latitude_fixed: 50_087_200, longitude_fixed: 14_421_000 }),
        set_extra_data: None,
        set_profile_image: None,
        set_thumbnail_image: None,
        clear_profile_image: false,
        clear_thumbnail_image: false,
    });
    let update_frame = RequestFrame {
        request_id: 3,
        type_code: RequestType::UpdateProfile as i32,
        signature: Some(client_signer.sign(&update_body).0),
        body: update_body,
    };
    let update_response = dispatcher::dispatch(&core, &session, update_frame).await.unwrap();
    assert_eq!(update_response.status, StatusCode::Ok as i32);

    let identity_id = IdentityId::of_public_key(&client_public_key);
    let (query_session, _query_rx) = test_session(role::CL_NON_CUSTOMER);
    let query_body = encode_body(&GetProfileInformationRequest { identity_id: identity_id.as_bytes().to_vec() });
    let query_frame =
        RequestFrame { request_id: 1, type_code: RequestType::GetProfileInformation as i32, signature: None, body: query_body };
    let query_response = dispatcher::dispatch(&core, &query_session, query_frame).await.unwrap();
    assert_eq!(query_response.status, StatusCode::Ok as i32);
    let decoded: GetProfileInformationResponse = decode_body(&query_response.body).unwrap();
    let profile = decoded.profile.expect("profile should exist once initialized");
    assert_eq!(profile.name, "Alice");
    assert_eq!(profile.identity_type, "person");
    assert_eq!(profile.location.unwrap().latitude_fixed, 50_087_200);
}

#[tokio::test]
async fn search_filters_by_type_and_caps_response_size() {
    let (core, _shutdown_tx) = test_core(Arc::new(NullConnector));

    for seed in 0u8..50 {
        let identity_type = if seed % 2 == 0 { "person" } else { "bot" };
        let identity = seeded_hosted_identity(seed, identity_type, 50.0 + seed as f64 * 0.001, 14.0);
        core.stores.hosted_identities.insert(identity).await.unwrap();
    }

    let (session, _rx) = test_session(role::CL_NON_CUSTOMER);
    let searcher_signer = Ed25519Signer::generate();
    dispatcher::dispatch(&core, &session, start_conversation_frame(1, searcher_signer.public_key(), 3)).await.unwrap();

    let search_center = GpsLocation::from_degrees(50.02, 14.0);
    let filter = ProfileFilterMsg {
        type_pattern: "per*".into(),
        name_pattern: "".into(),
        location: Some(GpsLocationMsg {
            latitude_fixed: search_center.latitude_fixed,
            longitude_fixed: search_center.longitude_fixed,
        }),
        radius_meters: 50_000.0,
        extra_data_regex: "".into(),
        include_thumbnails: false,
    };
    let search_body = encode_body(&ProfileSearchRequest {
        filter: Some(filter),
        max_total_records: 20,
        max_response_records: 10,
        include_hosted_only: true,
    });
    let search_frame =
        RequestFrame { request_id: 2, type_code: RequestType::ProfileSearch as i32, signature: None, body: search_body };
    let search_response = dispatcher::dispatch(&core, &session, search_frame).await.unwrap();
    assert_eq!(search_response.status, StatusCode::Ok as i32);

    let decoded: ProfileSearchResponse = decode_body(&search_response.body).unwrap();
    assert!(decoded.profiles.len() <= 10);
    assert!(decoded.total_record_count <= 20);
    assert!(decoded.profiles.iter().all(|p| p.identity_type == "person"));
    assert_eq!(decoded.covered_server_ids, vec![core.identity.server_id.as_bytes().to_vec()]);
}

#[tokio::test]
async fn application_service_call_relays_messages_then_tears_down_on_disconnect() {
    let (core, _shutdown_tx) = test_core(Arc::new(NullConnector));

    let alice_signer = Ed25519Signer::generate();
    let alice_id = alice_signer.identity_id();
    let (alice_session, mut alice_rx) = test_session(role::CL_CUSTOMER);
    let start_response =
        dispatcher::dispatch(&core, &alice_session, start_conversation_frame(1, alice_signer.public_key(), 11)).await.unwrap();
    let start_decoded: StartConversationResponse = decode_body(&start_response.body).unwrap();
    let check_in_body = encode_body(&CheckInRequest { echoed_challenge: start_decoded.server_challenge.clone() });
    let check_in_frame = RequestFrame {
        request_id: 2,
        type_code: RequestType::CheckIn as i32,
        signature: Some(alice_signer.sign(&check_in_body).0),
        body: check_in_body,
    };
    dispatcher::dispatch(&core, &alice_session, check_in_frame).await.unwrap();
    let add_body = encode_body(&AppServiceAddRequest { service_name: "chat".into() });
    let add_frame = RequestFrame {
        request_id: 3,
        type_code: RequestType::AppServiceAdd as i32,
        signature: Some(alice_signer.sign(&add_body).0),
        body: add_body,
    };
    let add_response = dispatcher::dispatch(&core, &alice_session, add_frame).await.unwrap();
    assert_eq!(add_response.status, StatusCode::Ok as i32);

    let bob_signer = Ed25519Signer::generate();
    let (bob_session, mut bob_rx) = test_session(role::CL_NON_CUSTOMER);
    let bob_start = dispatcher::dispatch(&core, &bob_session, start_conversation_frame(1, bob_signer.public_key(), 12)).await.unwrap();
    let bob_start_decoded: StartConversationResponse = decode_body(&bob_start.body).unwrap();
    let verify_body = encode_body(&VerifyIdentityRequest { echoed_challenge: bob_start_decoded.server_challenge.clone() });
    let verify_frame = RequestFrame {
        request_id: 2,
        type_code: RequestType::VerifyIdentity as i32,
        signature: Some(bob_signer.sign(&verify_body).0),
        body: verify_body,
    };
    dispatcher::dispatch(&core, &bob_session, verify_frame).await.unwrap();

    let (alice_app_session, _alice_app_rx) = test_session(role::CL_APP_SERVICE);
    let (bob_app_session, _bob_app_rx) = test_session(role::CL_APP_SERVICE);

    let call_body = encode_body(&CallIdentityApplicationServiceRequest {
        callee_id: alice_id.as_bytes().to_vec(),
        service_name: "chat".into(),
        init_payload: vec![9, 9, 9],
    });
    let call_frame =
        RequestFrame { request_id: 10, type_code: RequestType::CallIdentityApplicationService as i32, signature: None, body: call_body };
    let core_for_call = core.clone();
    let bob_for_call = bob_session.clone();
    let call_task = tokio::spawn(async move { dispatcher::dispatch(&core_for_call, &bob_for_call, call_frame).await });

    // The call notification is pushed to Alice's original (non-app-service)
    // session, the one `CheckIn` registered online.
    let push = recv_request(&mut alice_rx).await;
    let incoming: IncomingCallNotificationRequest = decode_body(&push.body).unwrap();
    let callee_token = Uuid::from_slice(&incoming.callee_token).unwrap();
    let accept = ResponseFrame {
        request_id: push.request_id,
        type_code: push.type_code,
        status: StatusCode::Ok as i32,
        error_message: None,
        body: Vec::new(),
    };
    dispatcher::handle_incoming_response(&core, &alice_session, accept).await;

    let call_response = call_task.await.unwrap().expect("call responds directly");
    assert_eq!(call_response.status, StatusCode::Ok as i32);
    let call_decoded: CallIdentityApplicationServiceResponse = decode_body(&call_response.body).unwrap();
    let caller_token = Uuid::from_slice(&call_decoded.caller_token).unwrap();
    let relay_id = core.relay.get_by_token(caller_token).unwrap().0.relay_id;

    // Bob's app service binds first; the relay isn't Open yet so nothing is
    // forwarded and the send completes immediately.
    let send1_body = encode_body(&AppServiceSendMessageRequest { relay_token: caller_token.as_bytes().to_vec(), payload: vec![1, 2, 3] });
    let send1_frame =
        RequestFrame { request_id: 1, type_code: RequestType::AppServiceSendMessage as i32, signature: None, body: send1_body };
    let send1_response = dispatcher::dispatch(&core, &bob_app_session, send1_frame).await.unwrap();
    assert_eq!(send1_response.status, StatusCode::Ok as i32);

    // Alice's app service binds second, opening the relay; the send now
    // forwards to Bob's original session and blocks on an ack.
    let core_for_send2 = core.clone();
    let alice_app_for_send2 = alice_app_session.clone();
    let send2_task = tokio::spawn(async move {
        let body = encode_body(&AppServiceSendMessageRequest { relay_token: callee_token.as_bytes().to_vec(), payload: vec![4, 5, 6] });
        let frame = RequestFrame { request_id: 2, type_code: RequestType::AppServiceSendMessage as i32, signature: None, body };
        dispatcher::dispatch(&core_for_send2, &alice_app_for_send2, frame).await
    });

    let forwarded = recv_request(&mut bob_rx).await;
    let forwarded_decoded: AppServiceReceiveMessageNotificationRequest = decode_body(&forwarded.body).unwrap();
    assert_eq!(forwarded_decoded.payload, vec![4, 5, 6]);
    // `handle_incoming_response`'s ack path only resolves when the acking
    // session itself has a `bound_relay`, which Bob's original session
    // never gets (only his app-service session does); unblock the send
    // directly the way the relay engine's own ack resolution does.
    core.relay.resolve_message_ack(relay_id, RelayEndpoint::Caller);

    let send2_response = send2_task.await.unwrap().expect("send responds directly");
    assert_eq!(send2_response.status, StatusCode::Ok as i32);

    core.relay.destroy(relay_id);

    let send3_body = encode_body(&AppServiceSendMessageRequest { relay_token: caller_token.as_bytes().to_vec(), payload: vec![7] });
    let send3_frame =
        RequestFrame { request_id: 3, type_code: RequestType::AppServiceSendMessage as i32, signature: None, body: send3_body };
    let send3_response = dispatcher::dispatch(&core, &bob_app_session, send3_frame).await.unwrap();
    assert_eq!(send3_response.status, StatusCode::NotFound as i32);
    assert!(bob_app_session.is_force_disconnected());
}

#[tokio::test]
async fn neighbor_initialization_streams_snapshot_and_marks_follower_initialized() {
    let (core, _shutdown_tx) = test_core(Arc::new(NullConnector));

    for seed in 0u8..2 {
        let identity = seeded_hosted_identity(100 + seed, "person", 10.0, 10.0);
        core.stores.hosted_identities.insert(identity).await.unwrap();
    }

    let peer_signer = Ed25519Signer::generate();
    let (peer_session, mut peer_rx) = test_session(role::SR_NEIGHBOR);
    let start_response =
        dispatcher::dispatch(&core, &peer_session, start_conversation_frame(1, peer_signer.public_key(), 21)).await.unwrap();
    let start_decoded: StartConversationResponse = decode_body(&start_response.body).unwrap();
    let verify_body = encode_body(&VerifyIdentityRequest { echoed_challenge: start_decoded.server_challenge.clone() });
    let verify_frame = RequestFrame {
        request_id: 2,
        type_code: RequestType::VerifyIdentity as i32,
        signature: Some(peer_signer.sign(&verify_body).0),
        body: verify_body,
    };
    let verify_response = dispatcher::dispatch(&core, &peer_session, verify_frame).await.unwrap();
    assert_eq!(verify_response.status, StatusCode::Ok as i32);

    let init_body = encode_body(&StartNeighborhoodInitRequest {
        primary_port: 12345,
        sr_neighbor_port: 12346,
        ip_address: "198.51.100.7".into(),
    });
    let init_frame =
        RequestFrame { request_id: 3, type_code: RequestType::StartNeighborhoodInit as i32, signature: None, body: init_body };
    // The handler answers on the session's own channel and tells the
    // dispatcher it already responded.
    assert!(dispatcher::dispatch(&core, &peer_session, init_frame).await.is_none());
    let ack = recv_response(&mut peer_rx).await;
    assert_eq!(ack.status, StatusCode::Ok as i32);

    let peer_identity_id = IdentityId::of_public_key(peer_signer.public_key());
    loop {
        let pushed = recv_request(&mut peer_rx).await;
        if pushed.type_code == RequestType::FinishNeighborhoodInit as i32 {
            let response = ResponseFrame {
                request_id: pushed.request_id,
                type_code: pushed.type_code,
                status: StatusCode::Ok as i32,
                error_message: None,
                body: encode_body(&FinishNeighborhoodInitResponse {}),
            };
            dispatcher::handle_incoming_response(&core, &peer_session, response).await;
            break;
        }
        assert_eq!(pushed.type_code, RequestType::NeighborhoodSharedProfileUpdate as i32);
        let response = ResponseFrame {
            request_id: pushed.request_id,
            type_code: pushed.type_code,
            status: StatusCode::Ok as i32,
            error_message: None,
            body: encode_body(&NeighborhoodSharedProfileUpdateResponse { applied_count: 0 }),
        };
        dispatcher::handle_incoming_response(&core, &peer_session, response).await;
    }

    for _ in 0..50 {
        if let Some(follower) = core.stores.followers.get(&peer_identity_id).await {
            if follower.initialized {
                assert_eq!(follower.shared_profiles_count, 2);
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("follower was never marked initialized");
}

struct ScriptedConnection {
    server_id: IdentityId,
    send_result: Result<(), ProtocolError>,
}

#[async_trait]
impl PeerConnection for ScriptedConnection {
    async fn authenticate(&mut self) -> Result<IdentityId, ProtocolError> {
        Ok(self.server_id.clone())
    }
    async fn list_roles(&mut self) -> Result<Vec<(u32, u16)>, ProtocolError> {
        Ok(Vec::new())
    }
    async fn start_neighborhood_initialization(
        &mut self,
        _primary_port: u16,
        _sr_neighbor_port: u16,
        _ip_address: IpAddr,
    ) -> Result<(), ProtocolError> {
        Ok(())
    }
    async fn recv_inbound(&mut self) -> Result<PeerInboundMessage, ProtocolError> {
        Ok(PeerInboundMessage::Finish)
    }
    async fn ack_inbound(&mut self) -> Result<(), ProtocolError> {
        Ok(())
    }
    async fn send_profile_update(
        &mut self,
        _items: Vec<profile_protocol::messages::NeighborhoodChangeItemMsg>,
    ) -> Result<(), ProtocolError> {
        self.send_result.clone()
    }
    async fn stop_neighborhood_updates(&mut self) -> Result<(), ProtocolError> {
        Ok(())
    }
}

struct ScriptedConnector {
    by_port: HashMap<u16, (IdentityId, Result<(), ProtocolError>)>,
}

#[async_trait]
impl PeerConnector for ScriptedConnector {
    async fn connect(&self, address: &PeerAddress) -> Result<Box<dyn PeerConnection>, ProtocolError> {
        let (server_id, send_result) = self.by_port.get(&address.primary_port).cloned().ok_or(ProtocolError::NotAvailable)?;
        Ok(Box::new(ScriptedConnection { server_id, send_result }))
    }
}

#[tokio::test]
async fn profile_update_propagates_and_drops_a_rejecting_follower() {
    let f1_signer = Ed25519Signer::generate();
    let f1_id = f1_signer.identity_id();
    let f2_signer = Ed25519Signer::generate();
    let f2_id = f2_signer.identity_id();

    let mut by_port: HashMap<u16, (IdentityId, Result<(), ProtocolError>)> = HashMap::new();
    by_port.insert(20001, (f1_id.clone(), Ok(())));
    by_port.insert(20011, (f2_id.clone(), Err(ProtocolError::Rejected)));
    let connector: Arc<dyn PeerConnector> = Arc::new(ScriptedConnector { by_port });

    let (core, shutdown_tx) = test_core(connector);

    core.stores
        .followers
        .upsert(Follower {
            server_id: f1_id.clone(),
            public_key: f1_signer.public_key().clone(),
            address: PeerAddress { ip: IpAddr::from([198, 51, 100, 10]), primary_port: 20001, sr_neighbor_port: Some(20002) },
            last_refresh_time: SystemTime::now(),
            initialized: true,
            shared_profiles_count: 0,
        })
        .await;
    core.stores
        .followers
        .upsert(Follower {
            server_id: f2_id.clone(),
            public_key: f2_signer.public_key().clone(),
            address: PeerAddress { ip: IpAddr::from([198, 51, 100, 11]), primary_port: 20011, sr_neighbor_port: Some(20012) },
            last_refresh_time: SystemTime::now(),
            initialized: true,
            shared_profiles_count: 0,
        })
        .await;

    let owner_signer = Ed25519Signer::generate();
    let (reg_session, _reg_rx) = test_session(role::CL_NON_CUSTOMER);
    dispatcher::dispatch(&core, &reg_session, start_conversation_frame(1, owner_signer.public_key(), 31)).await.unwrap();
    dispatcher::dispatch(&core, &reg_session, register_hosting_frame(2, "person")).await.unwrap();

    let (owner_session, _owner_rx) = test_session(role::CL_CUSTOMER);
    let start_response =
        dispatcher::dispatch(&core, &owner_session, start_conversation_frame(1, owner_signer.public_key(), 32)).await.unwrap();
    let start_decoded: StartConversationResponse = decode_body(&start_response.body).unwrap();
    let check_in_body = encode_body(&CheckInRequest { echoed_challenge: start_decoded.server_challenge.clone() });
    let check_in_frame = RequestFrame {
        request_id: 2,
        type_code: RequestType::CheckIn as i32,
        signature: Some(owner_signer.sign(&check_in_body).0),
        body: check_in_body,
    };
    dispatcher::dispatch(&core, &owner_session, check_in_frame).await.unwrap();

    let update_body = encode_body(&UpdateProfileRequest {
        set_version: Some(SemVerMsg { major: 1, minor: 0, patch: 0 }),
        set_name: Some("Alicia".into()),
        set_type: None,
        set_location: Some(GpsLocationMsg { latitude_fixed: 0, longitude_fixed: 0 }),
        set_extra_data: None,
        set_profile_image: None,
        set_thumbnail_image: None,
        clear_profile_image: false,
        clear_thumbnail_image: false,
    });
    let update_frame = RequestFrame {
        request_id: 3,
        type_code: RequestType::UpdateProfile as i32,
        signature: Some(owner_signer.sign(&update_body).0),
        body: update_body,
    };
    let update_response = dispatcher::dispatch(&core, &owner_session, update_frame).await.unwrap();
    assert_eq!(update_response.status, StatusCode::Ok as i32);

    assert_eq!(core.stores.neighborhood_actions.count_pending().await, 2);

    let run_handle = tokio::spawn(core.neighborhood.clone().run());

    for _ in 0..100 {
        if core.stores.followers.get(&f2_id).await.is_none() && core.stores.neighborhood_actions.count_pending().await == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert!(core.stores.followers.get(&f2_id).await.is_none(), "rejecting follower should have been dropped");
    assert!(core.stores.neighborhood_actions.list_pending_for_target(&f2_id).await.is_empty());
    assert!(core.stores.followers.get(&f1_id).await.is_some(), "accepting follower should remain");
    assert_eq!(core.stores.neighborhood_actions.count_pending().await, 0);

    run_handle.abort();
    let _ = shutdown_tx.send(true);
}
