//! Concrete [`PeerConnector`]/[`PeerConnection`] over TCP/TLS, filling the
//! seam `profile-core`'s neighborhood engine dials out through (§4.F.1,
//! §4.F.2). One connection, one request in flight at a time — the engine
//! never pipelines on an outbound peer connection, so a plain
//! request/response round trip per call is enough.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use profile_core::neighborhood_engine::{PeerConnection, PeerConnector, PeerInboundMessage};
use profile_protocol::codec::{expect_request, expect_response, read_envelope, write_envelope};
use profile_protocol::envelope::{decode_body, encode_body, Envelope, RequestFrame, RequestType};
use profile_protocol::messages::{
    FinishNeighborhoodInitResponse, ListRolesRequest, ListRolesResponse, NeighborhoodChangeItemMsg,
    NeighborhoodSharedProfileUpdateRequest, SemVerMsg, StartConversationRequest, StartConversationResponse,
    StartNeighborhoodInitRequest, StopNeighborhoodUpdatesRequest, VerifyIdentityRequest,
};
use profile_protocol::model::PeerAddress;
use profile_protocol::signing::{Signer, Validator};
use profile_protocol::{IdentityId, ProtocolError, PublicKey, StatusCode};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::tls::client_connector;

trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

/// Best-effort reconstruction of a [`ProtocolError`] from a response's
/// status code; the exact variant only matters insofar as
/// `classify_propagation_error` in `profile-core` groups it, so the
/// message is preserved but the finer variants (`InvalidValue`, etc.)
/// collapse to their status's most generic constructor.
fn error_from_response(status: i32, message: Option<String>) -> ProtocolError {
    match StatusCode::from_i32(status) {
        Some(StatusCode::Unsupported) => ProtocolError::Unsupported,
        Some(StatusCode::BadRole) => ProtocolError::BadRole,
        Some(StatusCode::BadConversationStatus) => ProtocolError::BadConversationStatus,
        Some(StatusCode::Unauthorized) => ProtocolError::Unauthorized,
        Some(StatusCode::InvalidSignature) => ProtocolError::InvalidSignature,
        Some(StatusCode::InvalidValue) => {
            ProtocolError::InvalidValue { path: "response".into(), reason: message.unwrap_or_default() }
        }
        Some(StatusCode::NotFound) => ProtocolError::NotFound,
        Some(StatusCode::AlreadyExists) => ProtocolError::AlreadyExists,
        Some(StatusCode::QuotaExceeded) => ProtocolError::QuotaExceeded,
        Some(StatusCode::Busy) => ProtocolError::Busy,
        Some(StatusCode::Rejected) => ProtocolError::Rejected,
        Some(StatusCode::NotAvailable) => ProtocolError::NotAvailable,
        Some(StatusCode::Uninitialized) => ProtocolError::Uninitialized,
        Some(StatusCode::Ok) | None => ProtocolError::Internal(format!("unexpected status {}", status)),
        Some(StatusCode::ProtocolViolation) => {
            ProtocolError::ProtocolViolation(message.unwrap_or_else(|| "peer reported a protocol violation".into()))
        }
        Some(StatusCode::Internal) => ProtocolError::Internal(message.unwrap_or_default()),
    }
}

fn io_err(context: &str, e: std::io::Error) -> ProtocolError {
    ProtocolError::Internal(format!("{}: {}", context, e))
}

/// Builds outbound connections for the neighborhood engine. Dials plain TCP
/// for role-discovery connections to the Primary port, and TLS for every
/// call made once a peer's `sr_neighbor` port is known — matching the
/// `tcp`/`tls` flags `RolePorts::table` advertises for each role.
pub struct TlsPeerConnector {
    signer: Arc<dyn Signer>,
}

impl TlsPeerConnector {
    pub fn new(signer: Arc<dyn Signer>) -> Self {
        Self { signer }
    }
}

#[async_trait]
impl PeerConnector for TlsPeerConnector {
    async fn connect(&self, address: &PeerAddress) -> Result<Box<dyn PeerConnection>, ProtocolError> {
        let (port, use_tls) = match address.sr_neighbor_port {
            Some(port) => (port, true),
            None => (address.primary_port, false),
        };
        let socket_addr = SocketAddr::new(address.ip, port);
        let tcp = TcpStream::connect(socket_addr).await.map_err(|e| io_err("connecting to peer", e))?;

        let stream: Box<dyn AsyncStream> = if use_tls {
            let connector = client_connector();
            // Certificate verification is disabled (see `tls::client_connector`);
            // the domain name only has to be syntactically valid.
            let domain = webpki::DNSNameRef::try_from_ascii_str("profile-peer")
                .expect("\"profile-peer\" is a valid DNS name");
            let tls = connector
                .connect(domain, tcp)
                .await
                .map_err(|e| io_err("TLS handshake with peer", e))?;
            Box::new(tls)
        } else {
            Box::new(tcp)
        };

        Ok(Box::new(TlsPeerConnection {
            stream,
            signer: self.signer.clone(),
            next_request_id: AtomicU32::new(1),
            pending_ack: None,
        }))
    }
}

pub struct TlsPeerConnection {
    stream: Box<dyn AsyncStream>,
    signer: Arc<dyn Signer>,
    next_request_id: AtomicU32,
    /// The server-originated request `recv_inbound` most recently
    /// returned, awaiting its `ack_inbound` reply on the same connection.
    pending_ack: Option<(u32, RequestType, usize)>,
}

impl TlsPeerConnection {
    fn next_id(&self) -> u32 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn call<Req: prost::Message, Resp: prost::Message + Default>(
        &mut self,
        request_type: RequestType,
        req: &Req,
        sign: bool,
    ) -> Result<Resp, ProtocolError> {
        let body = encode_body(req);
        let signature = if sign { Some(self.signer.sign(&body).0) } else { None };
        let frame = RequestFrame { request_id: self.next_id(), type_code: request_type as i32, signature, body };
        write_envelope(&mut self.stream, &Envelope::request(frame)).await?;

        let envelope = read_envelope(&mut self.stream)
            .await?
            .ok_or_else(|| ProtocolError::Internal("peer closed the connection".into()))?;
        let response = expect_response(envelope)?;
        if response.status != StatusCode::Ok as i32 {
            return Err(error_from_response(response.status, response.error_message));
        }
        decode_body(&response.body)
    }

    /// Answers a server-originated request the peer pushed on this same
    /// connection (§4.B "bidirectional"), used by `recv_inbound`/`ack_inbound`
    /// to read the push and by their callers to send back its ack.
    async fn read_pushed_request(&mut self) -> Result<RequestFrame, ProtocolError> {
        let envelope = read_envelope(&mut self.stream)
            .await?
            .ok_or_else(|| ProtocolError::Internal("peer closed the connection".into()))?;
        expect_request(envelope)
    }

    async fn ack_pushed_request(&mut self, request_id: u32, type_code: RequestType, body: Vec<u8>) -> Result<(), ProtocolError> {
        write_envelope(
            &mut self.stream,
            &Envelope::response(profile_protocol::envelope::ResponseFrame::ok(request_id, type_code, body)),
        )
        .await
    }
}

#[async_trait]
impl PeerConnection for TlsPeerConnection {
    async fn authenticate(&mut self) -> Result<IdentityId, ProtocolError> {
        let client_challenge = profile_crypto::random_challenge();
        let start: StartConversationResponse = self
            .call(
                RequestType::StartConversation,
                &StartConversationRequest {
                    public_key: self.signer.public_key().0.clone(),
                    supported_versions: vec![SemVerMsg {
                        major: profile_protocol::primitives::SUPPORTED_VERSION.major,
                        minor: profile_protocol::primitives::SUPPORTED_VERSION.minor,
                        patch: profile_protocol::primitives::SUPPORTED_VERSION.patch,
                    }],
                    client_challenge: client_challenge.0.to_vec(),
                },
                false,
            )
            .await?;

        let peer_public_key = PublicKey(start.server_public_key);
        let validator = profile_crypto::Ed25519Validator;
        let signature = profile_protocol::Signature(start.client_challenge_signature);
        if !validator.verify(&peer_public_key, &client_challenge.0, &signature) {
            return Err(ProtocolError::InvalidSignature);
        }

        let _: profile_protocol::messages::VerifyIdentityResponse = self
            .call(
                RequestType::VerifyIdentity,
                &VerifyIdentityRequest { echoed_challenge: start.server_challenge },
                true,
            )
            .await?;

        Ok(IdentityId::of_public_key(&peer_public_key))
    }

    async fn list_roles(&mut self) -> Result<Vec<(u32, u16)>, ProtocolError> {
        let resp: ListRolesResponse = self.call(RequestType::ListRoles, &ListRolesRequest {}, false).await?;
        Ok(resp.roles.into_iter().map(|r| (r.role_bit, r.port as u16)).collect())
    }

    async fn start_neighborhood_initialization(
        &mut self,
        primary_port: u16,
        sr_neighbor_port: u16,
        ip_address: std::net::IpAddr,
    ) -> Result<(), ProtocolError> {
        let _: profile_protocol::messages::StartNeighborhoodInitResponse = self
            .call(
                RequestType::StartNeighborhoodInit,
                &StartNeighborhoodInitRequest {
                    primary_port: primary_port as u32,
                    sr_neighbor_port: sr_neighbor_port as u32,
                    ip_address: ip_address.to_string(),
                },
                false,
            )
            .await?;
        Ok(())
    }

    async fn recv_inbound(&mut self) -> Result<PeerInboundMessage, ProtocolError> {
        let frame = self.read_pushed_request().await?;
        match RequestType::from_i32(frame.type_code) {
            Some(RequestType::NeighborhoodSharedProfileUpdate) => {
                let req: NeighborhoodSharedProfileUpdateRequest = decode_body(&frame.body)?;
                self.pending_ack = Some((frame.request_id, RequestType::NeighborhoodSharedProfileUpdate, req.items.len()));
                Ok(PeerInboundMessage::ProfileUpdate(req.items))
            }
            Some(RequestType::FinishNeighborhoodInit) => {
                self.pending_ack = Some((frame.request_id, RequestType::FinishNeighborhoodInit, 0));
                Ok(PeerInboundMessage::Finish)
            }
            _ => Err(ProtocolError::ProtocolViolation(format!(
                "unexpected push during initialization: type {}",
                frame.type_code
            ))),
        }
    }

    async fn ack_inbound(&mut self) -> Result<(), ProtocolError> {
        let (request_id, request_type, applied_count) =
            self.pending_ack.take().ok_or_else(|| ProtocolError::Internal("no pushed request to ack".into()))?;
        let body = match request_type {
            RequestType::NeighborhoodSharedProfileUpdate => encode_body(
                &profile_protocol::messages::NeighborhoodSharedProfileUpdateResponse { applied_count: applied_count as u32 },
            ),
            RequestType::FinishNeighborhoodInit => encode_body(&FinishNeighborhoodInitResponse {}),
            _ => Vec::new(),
        };
        self.ack_pushed_request(request_id, request_type, body).await
    }

    async fn send_profile_update(&mut self, items: Vec<NeighborhoodChangeItemMsg>) -> Result<(), ProtocolError> {
        let _: profile_protocol::messages::NeighborhoodSharedProfileUpdateResponse = self
            .call(RequestType::NeighborhoodSharedProfileUpdate, &NeighborhoodSharedProfileUpdateRequest { items }, false)
            .await?;
        Ok(())
    }

    async fn stop_neighborhood_updates(&mut self) -> Result<(), ProtocolError> {
        let _: profile_protocol::messages::StopNeighborhoodUpdatesResponse =
            self.call(RequestType::StopNeighborhoodUpdates, &StopNeighborhoodUpdatesRequest {}, false).await?;
        Ok(())
    }
}
