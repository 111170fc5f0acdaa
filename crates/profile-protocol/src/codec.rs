//! `MessageCodec` (§4.B): frames the wire as `uint32 length || body`, where
//! `body` is a protobuf-encoded [`Envelope`]; signs/verifies conversation
//! request bodies against a session's stored public key.

use prost::Message as _;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::envelope::{Envelope, EnvelopeKind, RequestFrame, ResponseFrame};
use crate::error::ProtocolError;
use crate::primitives::{PublicKey, Signature, MAX_FRAME_SIZE};
use crate::signing::Validator;

/// Reads one `length || body` frame and decodes it as an [`Envelope`].
/// Returns `Ok(None)` on clean EOF (peer closed the connection between
/// frames, not mid-frame).
pub async fn read_envelope<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Option<Envelope>, ProtocolError> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(ProtocolError::Internal(format!("frame read failed: {}", e))),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len == 0 || len > MAX_FRAME_SIZE {
        return Err(ProtocolError::ProtocolViolation(format!(
            "frame length {} exceeds bounds (0, {}]",
            len, MAX_FRAME_SIZE
        )));
    }

    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| ProtocolError::ProtocolViolation(format!("truncated frame: {}", e)))?;

    let envelope = Envelope::decode(body.as_slice())
        .map_err(|e| ProtocolError::ProtocolViolation(format!("malformed envelope: {}", e)))?;
    Ok(Some(envelope))
}

/// Encodes an [`Envelope`] and writes it as one `length || body` frame.
/// Callers serialize writes on a connection under their own per-session
/// lock (§5); this function issues exactly one write sequence so that two
/// interleaved calls from different tasks can never produce a half-frame
/// as long as that lock is held across the call.
pub async fn write_envelope<W: AsyncWrite + Unpin>(
    writer: &mut W,
    envelope: &Envelope,
) -> Result<(), ProtocolError> {
    let body = envelope.encode_to_vec();
    if body.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::Internal(format!(
            "outgoing frame of {} bytes exceeds {}",
            body.len(),
            MAX_FRAME_SIZE
        )));
    }
    let len = (body.len() as u32).to_be_bytes();
    writer
        .write_all(&len)
        .await
        .map_err(|e| ProtocolError::Internal(format!("frame write failed: {}", e)))?;
    writer
        .write_all(&body)
        .await
        .map_err(|e| ProtocolError::Internal(format!("frame write failed: {}", e)))?;
    writer.flush().await.map_err(|e| ProtocolError::Internal(format!("frame flush failed: {}", e)))?;
    Ok(())
}

/// Splits a just-read envelope into its request/response frame, rejecting
/// anything empty or malformed as a protocol violation (§4.B, §6).
pub fn expect_request(envelope: Envelope) -> Result<RequestFrame, ProtocolError> {
    match envelope.kind {
        Some(EnvelopeKind::Request(f)) => Ok(f),
        _ => Err(ProtocolError::ProtocolViolation("expected a request envelope".into())),
    }
}

pub fn expect_response(envelope: Envelope) -> Result<ResponseFrame, ProtocolError> {
    match envelope.kind {
        Some(EnvelopeKind::Response(f)) => Ok(f),
        _ => Err(ProtocolError::ProtocolViolation("expected a response envelope".into())),
    }
}

/// Signs the canonical bytes of a request body (its encoded form, which
/// already excludes the frame-level signature field since that field lives
/// alongside the body rather than inside it) under the caller's key.
pub fn sign_body(signer: &dyn crate::signing::Signer, canonical_body: &[u8]) -> Signature {
    signer.sign(canonical_body)
}

/// Verifies a conversation request's signature against the canonical body
/// bytes and the session's stored public key (§4.B, §8 property 3).
pub fn verify_signed_body(
    validator: &dyn Validator,
    public_key: &PublicKey,
    canonical_body: &[u8],
    signature: &Signature,
) -> bool {
    validator.verify(public_key, canonical_body, signature)
}
