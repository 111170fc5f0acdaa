//! Per-connection state (§3 Session, §4.A). One `Session` is created per
//! accepted TLS connection and destroyed on disconnect; `SessionHandle` is
//! the `Arc`-shared reference the dispatcher, relay engine and
//! neighborhood engine all hold onto.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use profile_protocol::envelope::{Envelope, ResponseFrame};
use profile_protocol::roles::{role, ConversationStatus};
use profile_protocol::{Challenge, IdentityId, PublicKey};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::search_engine::CachedProfile;

/// Keep-alive window: a session with no traffic for this long is reaped.
pub const KEEP_ALIVE_TIMEOUT: Duration = Duration::from_secs(120);

/// Context stashed against a request id the server itself originated on
/// this session, resumed when the peer's response for that id arrives
/// (§4.C "request/response correlation", §9 "outbound pending-request
/// tracking").
#[derive(Clone, Debug)]
pub enum PendingResponseContext {
    /// Sent to a callee; resumes the caller's suspended CallIdentity
    /// handler (§4.D, §9 "long-polling on-hold caller").
    IncomingCallNotification { relay_id: Uuid },
    /// Sent to the other relay endpoint; only acks the sender once this
    /// resolves (§4.D "server acks X only after Y acks").
    AppServiceReceiveAck { relay_id: Uuid },
    /// Sent while streaming an initialization snapshot to a neighbor we're
    /// serving as Follower (§4.F.2); `remaining` is the item count still to
    /// stream after this batch's ack.
    NeighborhoodInitBatchAck { remaining_after: usize },
    NeighborhoodInitFinishAck,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RelayEndpoint {
    Caller,
    Callee,
}

pub struct SearchResultCache {
    pub results: Vec<CachedProfile>,
    pub includes_thumbnails: bool,
}

/// The mutable half of a session's state, behind one lock. Deliberately
/// coarse — handlers hold it only as long as it takes to read or mutate a
/// handful of fields, never across an I/O await point.
pub struct SessionState {
    pub status: ConversationStatus,
    pub public_key: Option<PublicKey>,
    pub identity_id: Option<IdentityId>,
    pub server_challenge: Option<Challenge>,
    pub app_services: Vec<String>,
    pub search_cache: Option<SearchResultCache>,
    pub neighborhood_init_in_progress: bool,
    pub pending_requests: HashMap<u32, PendingResponseContext>,
    /// The relay this session is currently bound to as an app-service
    /// endpoint, if any (§3 Relay "shared between its two endpoint
    /// sessions").
    pub bound_relay: Option<(Uuid, RelayEndpoint)>,
    /// One-shot resume channels for server-originated requests whose caller
    /// is parked awaiting the matching response inline (§4.F.2 streaming an
    /// initialization snapshot batch by batch; §9 "outbound pending-request
    /// tracking via callbacks... represent as a per-session map from
    /// request id to a future"). Distinct from `pending_requests`, which
    /// only carries the dispatch-time tag; this carries the actual
    /// resolution channel.
    response_waiters: HashMap<u32, oneshot::Sender<ResponseFrame>>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            status: ConversationStatus::NoConversation,
            public_key: None,
            identity_id: None,
            server_challenge: None,
            app_services: Vec::new(),
            search_cache: None,
            neighborhood_init_in_progress: false,
            pending_requests: HashMap::new(),
            bound_relay: None,
            response_waiters: HashMap::new(),
        }
    }
}

/// A connection's write side is a channel into its dedicated writer task
/// rather than a shared `AsyncWrite`, so `Session` stays non-generic and can
/// be stored in plain `Arc<Session>` collections (relay endpoint map,
/// pending-request contexts) without threading a socket type parameter
/// through the whole crate (§5 "per-session mutex around the output
/// stream" — the single-consumer channel gives the same serialization).
pub struct Session {
    pub remote_addr: SocketAddr,
    pub role: u32,
    state: RwLock<SessionState>,
    last_request_id: AtomicU32,
    last_activity: RwLock<Instant>,
    force_disconnect: AtomicBool,
    outbound: mpsc::UnboundedSender<Envelope>,
}

impl Session {
    pub fn new(remote_addr: SocketAddr, role: u32, outbound: mpsc::UnboundedSender<Envelope>) -> Self {
        Self {
            remote_addr,
            role,
            state: RwLock::new(SessionState::new()),
            last_request_id: AtomicU32::new(1),
            last_activity: RwLock::new(Instant::now()),
            force_disconnect: AtomicBool::new(false),
            outbound,
        }
    }

    /// Queues an envelope for the writer task. Fails only once the
    /// connection's writer half is already gone (disconnect race), in
    /// which case the caller should treat the session as dead.
    pub fn send(&self, envelope: Envelope) -> Result<(), ()> {
        self.outbound.send(envelope).map_err(|_| ())
    }

    pub fn has_role(&self, required: u32) -> bool {
        required == role::ANY || self.role & required != 0
    }

    pub fn status(&self) -> ConversationStatus {
        self.state.read().status
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&SessionState) -> R) -> R {
        f(&self.state.read())
    }

    pub fn with_state_mut<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        f(&mut self.state.write())
    }

    /// Allocates the next server-originated request id and registers its
    /// resume context (§4.A, §4.C).
    pub fn register_pending_request(&self, context: PendingResponseContext) -> u32 {
        let id = self.last_request_id.fetch_add(1, Ordering::Relaxed);
        self.state.write().pending_requests.insert(id, context);
        id
    }

    pub fn take_pending_request(&self, id: u32) -> Option<PendingResponseContext> {
        self.state.write().pending_requests.remove(&id)
    }

    /// Registers a server-originated request and returns both its id and a
    /// channel that resolves when the matching response arrives (or is
    /// dropped on disconnect, per §9 "on disconnect, all outstanding
    /// futures are cancelled").
    pub fn register_response_waiter(
        &self,
        context: PendingResponseContext,
    ) -> (u32, oneshot::Receiver<ResponseFrame>) {
        let (tx, rx) = oneshot::channel();
        let id = self.last_request_id.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.write();
        state.pending_requests.insert(id, context);
        state.response_waiters.insert(id, tx);
        (id, rx)
    }

    /// Resolves a previously-registered response waiter with the incoming
    /// frame. Returns `false` if no waiter was registered for this id (the
    /// response is either stray or belongs to a plain `pending_requests`
    /// entry with no parked caller).
    pub fn resolve_response_waiter(&self, id: u32, frame: ResponseFrame) -> bool {
        match self.state.write().response_waiters.remove(&id) {
            Some(tx) => tx.send(frame).is_ok(),
            None => false,
        }
    }

    pub fn touch(&self) {
        *self.last_activity.write() = Instant::now();
    }

    pub fn is_expired(&self, now: Instant, timeout: Duration) -> bool {
        now.duration_since(*self.last_activity.read()) > timeout
    }

    pub fn mark_force_disconnect(&self) {
        self.force_disconnect.store(true, Ordering::SeqCst);
    }

    pub fn is_force_disconnected(&self) -> bool {
        self.force_disconnect.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_session(addr: &str, role: u32) -> Session {
        let (tx, _rx) = mpsc::unbounded_channel();
        Session::new(addr.parse().unwrap(), role, tx)
    }

    #[test]
    fn pending_request_round_trips_through_registration() {
        let session = test_session("127.0.0.1:1234", role::SR_NEIGHBOR);
        let id = session.register_pending_request(PendingResponseContext::NeighborhoodInitFinishAck);
        let ctx = session.take_pending_request(id).unwrap();
        assert!(matches!(ctx, PendingResponseContext::NeighborhoodInitFinishAck));
        assert!(session.take_pending_request(id).is_none());
    }

    #[test]
    fn status_starts_at_no_conversation() {
        let session = test_session("127.0.0.1:1234", role::CL_CUSTOMER);
        assert_eq!(session.status(), ConversationStatus::NoConversation);
    }
}
