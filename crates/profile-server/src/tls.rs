//! TLS material for the four client/neighbor-facing role ports (§6); the
//! Primary port is plain TCP role discovery and never touches this module.
//!
//! Every profile server identifies itself at the protocol layer, not the
//! certificate layer: `StartConversation`/`VerifyIdentity` already bind the
//! connection to an Ed25519 public key (§4.A), so there is no independent
//! certificate authority to trust or distrust here. The client side accepts
//! whatever certificate the server presents and leaves authentication to
//! that handshake, the same way the donor's capnp-rpc transport carried no
//! certificate validation of its own.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::{Certificate, ClientConfig, NoClientAuth, PrivateKey, ServerConfig};
use thiserror::Error;
use tokio_rustls::{TlsAcceptor, TlsConnector};

#[derive(Error, Debug)]
pub enum TlsError {
    #[error("failed to read {0}: {1}")]
    Io(String, std::io::Error),
    #[error("{0} contains no PEM certificates")]
    NoCertificates(String),
    #[error("{0} contains no PEM private key")]
    NoPrivateKey(String),
    #[error("rustls rejected the certificate/key pair: {0}")]
    Rustls(#[from] rustls::TLSError),
}

fn load_certs(path: &Path) -> Result<Vec<Certificate>, TlsError> {
    let file = File::open(path).map_err(|e| TlsError::Io(path.display().to_string(), e))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .map_err(|e| TlsError::Io(path.display().to_string(), e))?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.display().to_string()));
    }
    Ok(certs.into_iter().map(Certificate).collect())
}

fn load_private_key(path: &Path) -> Result<PrivateKey, TlsError> {
    let file = File::open(path).map_err(|e| TlsError::Io(path.display().to_string(), e))?;
    let mut reader = BufReader::new(file);
    let pkcs8 =
        rustls_pemfile::pkcs8_private_keys(&mut reader).map_err(|e| TlsError::Io(path.display().to_string(), e))?;
    if let Some(key) = pkcs8.into_iter().next() {
        return Ok(PrivateKey(key));
    }

    let file = File::open(path).map_err(|e| TlsError::Io(path.display().to_string(), e))?;
    let mut reader = BufReader::new(file);
    let rsa =
        rustls_pemfile::rsa_private_keys(&mut reader).map_err(|e| TlsError::Io(path.display().to_string(), e))?;
    rsa.into_iter().next().map(PrivateKey).ok_or_else(|| TlsError::NoPrivateKey(path.display().to_string()))
}

/// Builds the acceptor every TLS-serving role port shares; one certificate
/// chain and key cover all four of them (§6).
pub fn server_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor, TlsError> {
    let certs = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;

    let mut config = ServerConfig::new(NoClientAuth::new());
    config.set_single_cert(certs, key)?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

struct AcceptAnyServerCert;

impl rustls::ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _roots: &rustls::RootCertStore,
        _presented_certs: &[Certificate],
        _dns_name: webpki::DNSNameRef,
        _ocsp_response: &[u8],
    ) -> Result<rustls::ServerCertVerified, rustls::TLSError> {
        Ok(rustls::ServerCertVerified::assertion())
    }
}

/// Builds the connector the neighborhood engine's [`PeerConnector`](profile_core::neighborhood_engine::PeerConnector)
/// dials out with. See the module doc for why server certs go unchecked.
pub fn client_connector() -> TlsConnector {
    let mut config = ClientConfig::new();
    config.dangerous().set_certificate_verifier(Arc::new(AcceptAnyServerCert));
    TlsConnector::from(Arc::new(config))
}
