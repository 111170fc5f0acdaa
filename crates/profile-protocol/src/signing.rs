//! Signing/verification seams. Concrete Ed25519 implementations live in
//! `profile-crypto`; this crate only depends on the trait objects so the
//! wire layer never has to know about key formats.

use crate::primitives::{PublicKey, Signature};

/// Something that can sign data on behalf of this server's identity, but
/// never gives out the private key (mirrors the donor `home-protocol`
/// crate's `Signer` trait).
pub trait Signer: Send + Sync {
    fn public_key(&self) -> &PublicKey;
    fn sign(&self, data: &[u8]) -> Signature;
}

/// Verifies a signature against an arbitrary public key. Stateless, so one
/// instance is shared process-wide.
pub trait Validator: Send + Sync {
    fn verify(&self, public_key: &PublicKey, data: &[u8], signature: &Signature) -> bool;
}
