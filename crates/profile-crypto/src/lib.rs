//! Concrete Ed25519 signing/verification, filling the `Signer`/`Validator`
//! seams `profile-protocol` declares. Stands in for the donor workspace's
//! `did`/`keyvault` crates (HD wallets, multiple key slots), which are out
//! of scope here: the profile server only ever signs with one server key.

use ed25519_dalek::{Keypair, PublicKey as DalekPublicKey, Signature as DalekSignature, Signer as DalekSigner, Verifier};
use profile_protocol::signing::{Signer, Validator};
use profile_protocol::{PublicKey, Signature};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KeyError {
    #[error("failed to read key file {0}: {1}")]
    Io(String, std::io::Error),
    #[error("key file {0} has wrong length: expected 64 bytes, got {1}")]
    WrongLength(String, usize),
    #[error("invalid key material: {0}")]
    Invalid(#[from] ed25519_dalek::ed25519::Error),
}

/// A server's Ed25519 keypair plus the ability to sign on its behalf.
pub struct Ed25519Signer {
    keypair: Keypair,
    /// `profile_protocol::PublicKey` owns its bytes, so we keep a copy
    /// alongside the dalek keypair rather than allocate one on every call.
    public_key: PublicKey,
}

impl Ed25519Signer {
    fn from_keypair(keypair: Keypair) -> Self {
        let public_key = PublicKey(keypair.public.to_bytes().to_vec());
        Self { keypair, public_key }
    }

    pub fn generate() -> Self {
        let mut csprng = rand::rngs::OsRng {};
        Self::from_keypair(Keypair::generate(&mut csprng))
    }

    /// Loads a 64-byte `secret || public` keypair from disk (the format
    /// `ed25519_dalek::Keypair::to_bytes` produces), generating and
    /// persisting a fresh one if the file does not yet exist — matching
    /// the donor's `HdProfileVault::load` "load or bootstrap" shape.
    pub fn load_or_generate(path: &Path) -> Result<Self, KeyError> {
        if path.exists() {
            let bytes = std::fs::read(path).map_err(|e| KeyError::Io(path.display().to_string(), e))?;
            if bytes.len() != 64 {
                return Err(KeyError::WrongLength(path.display().to_string(), bytes.len()));
            }
            let keypair = Keypair::from_bytes(&bytes)?;
            Ok(Self::from_keypair(keypair))
        } else {
            let signer = Self::generate();
            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            std::fs::write(path, signer.keypair.to_bytes())
                .map_err(|e| KeyError::Io(path.display().to_string(), e))?;
            Ok(signer)
        }
    }

    pub fn identity_id(&self) -> profile_protocol::IdentityId {
        profile_protocol::IdentityId::of_public_key(self.public_key())
    }
}

impl Signer for Ed25519Signer {
    fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    fn sign(&self, data: &[u8]) -> Signature {
        let sig: DalekSignature = self.keypair.sign(data);
        Signature(sig.to_bytes().to_vec())
    }
}

/// Stateless Ed25519 signature verification against any given public key.
pub struct Ed25519Validator;

impl Validator for Ed25519Validator {
    fn verify(&self, public_key: &PublicKey, data: &[u8], signature: &Signature) -> bool {
        let dalek_pk = match DalekPublicKey::from_bytes(&public_key.0) {
            Ok(pk) => pk,
            Err(_) => return false,
        };
        let dalek_sig = match DalekSignature::from_bytes(&signature.0) {
            Ok(sig) => sig,
            Err(_) => return false,
        };
        dalek_pk.verify(data, &dalek_sig).is_ok()
    }
}

/// Generates a fresh 32-byte challenge (§4.A `StartConversation`).
pub fn random_challenge() -> profile_protocol::Challenge {
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    profile_protocol::Challenge(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_round_trips() {
        let signer = Ed25519Signer::generate();
        let data = b"hello profile server";
        let sig = signer.sign(data);
        let validator = Ed25519Validator;
        assert!(validator.verify(signer.public_key(), data, &sig));
    }

    #[test]
    fn tampered_data_fails_verification() {
        let signer = Ed25519Signer::generate();
        let sig = signer.sign(b"original");
        let validator = Ed25519Validator;
        assert!(!validator.verify(signer.public_key(), b"tampered", &sig));
    }

    #[test]
    fn load_or_generate_persists_and_reloads_identically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.key");
        let first = Ed25519Signer::load_or_generate(&path).unwrap();
        let second = Ed25519Signer::load_or_generate(&path).unwrap();
        assert_eq!(first.public_key(), second.public_key());
    }
}
