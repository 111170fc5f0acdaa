use std::sync::Arc;

use log::{error, info};
use profile_core::Core;
use profile_crypto::Ed25519Signer;
use profile_server::config::ServerConfig;
use profile_server::peer_connection::TlsPeerConnector;
use profile_server::{server, tls};
use profile_store::Stores;
use tokio::sync::watch;

#[tokio::main]
async fn main() {
    if log4rs::init_file("log4rs.yml", Default::default()).is_err() {
        eprintln!("no log4rs.yml found next to the working directory, logging to stderr only");
    }

    let config = match ServerConfig::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = std::fs::create_dir_all(&config.data_dir) {
        error!("failed to create data directory {}: {}", config.data_dir.display(), e);
        std::process::exit(1);
    }

    let signer = match Ed25519Signer::load_or_generate(&config.key_path()) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!("failed to load or generate signing key: {}", e);
            std::process::exit(1);
        }
    };
    let identity = config.server_identity(&signer);
    info!("server identity {:?}", identity.server_id);

    let tls_acceptor = match (&config.tls_cert, &config.tls_key) {
        (Some(cert), Some(key)) => match tls::server_acceptor(cert, key) {
            Ok(acceptor) => Some(acceptor),
            Err(e) => {
                error!("failed to build TLS acceptor: {}", e);
                std::process::exit(1);
            }
        },
        (None, None) => {
            error!("no tls-cert/tls-key configured, every role port but primary will stay closed");
            None
        }
        _ => {
            error!("tls-cert and tls-key must both be set or both be left unset");
            std::process::exit(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let connector = Arc::new(TlsPeerConnector::new(signer.clone()));
    let stores = Stores::new_in_memory();
    let core = Core::new(
        stores,
        connector,
        config.core.clone(),
        identity,
        config.role_ports.clone(),
        config.advertised_ip,
        signer,
        shutdown_rx.clone(),
    );

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    if let Err(e) = server::run(core, config.role_ports, tls_acceptor, shutdown_rx).await {
        error!("server loop exited with an error: {}", e);
        std::process::exit(1);
    }
    info!("server shutdown complete");
}
