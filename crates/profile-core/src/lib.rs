//! The core of the profile server (§2): the session-bound request/response
//! engine, the call-relay state machine, the search engine and the
//! neighborhood replication engine, wired together behind one composition
//! root ([`Core`]). Everything this crate depends on outside the process —
//! storage, image blobs, signing, TLS, configuration loading — is reached
//! only through the trait seams declared in `profile-store`,
//! `profile-crypto`'s `Signer`/`Validator`, and
//! [`neighborhood_engine::PeerConnector`] (§9 "process-wide component
//! registry... replace with an explicit composition root").

pub mod config;
pub mod dispatcher;
pub mod handlers;
pub mod neighborhood_engine;
pub mod relay_engine;
pub mod search_engine;
pub mod session;

use std::sync::Arc;

use profile_crypto::Ed25519Validator;
use profile_protocol::signing::{Signer, Validator};
use profile_store::Stores;
use tokio::sync::watch;

use config::{CoreConfig, RolePorts, ServerIdentity};
use neighborhood_engine::{NeighborhoodEngine, PeerConnector};
use relay_engine::RelayEngine;
use search_engine::SearchEngine;

/// Every component a handler or the dispatcher might need, bundled behind
/// one clone-able handle (§9). `profile-server` builds one of these once at
/// startup and hands a clone to every accepted connection's session loop.
#[derive(Clone)]
pub struct Core {
    pub stores: Stores,
    pub search: Arc<SearchEngine>,
    pub relay: Arc<RelayEngine>,
    pub neighborhood: Arc<NeighborhoodEngine>,
    pub config: CoreConfig,
    pub identity: ServerIdentity,
    pub role_ports: RolePorts,
    pub signer: Arc<dyn Signer>,
    pub validator: Arc<dyn Validator>,
    /// Flips to `true` once the process starts shutting down (§9); each
    /// connection's reader loop selects on this alongside its keep-alive
    /// timeout so a drain doesn't have to wait out an idle connection.
    pub shutdown: watch::Receiver<bool>,
}

impl Core {
    /// Wires every component against the given stores and connector. The
    /// neighborhood engine's scheduling loop is returned separately
    /// ([`NeighborhoodEngine::run`]) so the caller decides how to spawn it
    /// and holds onto the `shutdown` sender.
    pub fn new(
        stores: Stores,
        connector: Arc<dyn PeerConnector>,
        config: CoreConfig,
        identity: ServerIdentity,
        role_ports: RolePorts,
        advertised_ip: std::net::IpAddr,
        signer: Arc<dyn Signer>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let search = Arc::new(SearchEngine::new(
            stores.hosted_identities.clone(),
            stores.neighbor_identities.clone(),
            stores.neighbors.clone(),
        ));
        let relay = Arc::new(RelayEngine::new());
        let neighborhood = NeighborhoodEngine::new(
            stores.clone(),
            connector,
            config.clone(),
            identity.server_id.clone(),
            role_ports.clone(),
            advertised_ip,
            shutdown.clone(),
        );
        Self {
            stores,
            search,
            relay,
            neighborhood,
            config,
            identity,
            role_ports,
            signer,
            validator: Arc::new(Ed25519Validator),
            shutdown,
        }
    }
}
