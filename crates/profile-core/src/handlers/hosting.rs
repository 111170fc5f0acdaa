//! Hosting lifecycle (§4.C, §3 HostedIdentity): registering and updating a
//! hosted profile, cancelling it, app-service advertisement, and identity
//! relationship cards.

use std::sync::Arc;

use profile_protocol::envelope::{decode_body, encode_body};
use profile_protocol::messages::{
    AddRelatedIdentityRequest, AddRelatedIdentityResponse, AppServiceAddRequest, AppServiceAddResponse,
    AppServiceRemoveRequest, AppServiceRemoveResponse, CancelHostingAgreementRequest,
    CancelHostingAgreementResponse, CanPublishIpnsRequest, CanPublishIpnsResponse, CanStoreDataRequest,
    CanStoreDataResponse, RegisterHostingRequest, RegisterHostingResponse, RelatedIdentityCardMsg,
    RemoveRelatedIdentityRequest, RemoveRelatedIdentityResponse, UpdateProfileRequest, UpdateProfileResponse,
};
use profile_protocol::model::{
    validate_extra_data, validate_name, validate_public_key, validate_type, HostedIdentity, NeighborhoodActionType,
    RelatedIdentity,
};
use profile_protocol::{GpsLocation, IdentityId, ProtocolError, PublicKey, SemVer, Signature};

use super::profile::unix_to_system_time;
use crate::session::Session;
use crate::Core;

fn session_identity(session: &Session) -> Result<IdentityId, ProtocolError> {
    session.with_state(|s| s.identity_id.clone()).ok_or(ProtocolError::Unauthorized)
}

/// Canonical bytes a `RegisterHosting` contract signature is computed over.
/// The wire format leaves this unspecified; a simple concatenation of the
/// negotiated terms is enough to bind the signature to this request.
fn contract_canonical_bytes(identity_type: &str, plan_id: Option<&str>, start_time: Option<i64>) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(identity_type.as_bytes());
    buf.push(0);
    buf.extend_from_slice(plan_id.unwrap_or_default().as_bytes());
    buf.push(0);
    buf.extend_from_slice(&start_time.unwrap_or_default().to_be_bytes());
    buf
}

pub async fn register_hosting(core: &Core, session: &Arc<Session>, body: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let req: RegisterHostingRequest = decode_body(body)?;
    validate_type(&req.identity_type)?;

    let public_key = match req.identity_public_key {
        Some(bytes) => PublicKey(bytes),
        None => session.with_state(|s| s.public_key.clone()).ok_or(ProtocolError::Unauthorized)?,
    };
    validate_public_key(&public_key)?;

    if let Some(sig_bytes) = &req.contract_signature {
        let canonical = contract_canonical_bytes(&req.identity_type, req.plan_id.as_deref(), req.start_time);
        if !core.validator.verify(&public_key, &canonical, &Signature(sig_bytes.clone())) {
            return Err(ProtocolError::InvalidSignature);
        }
    }

    let identity_id = IdentityId::of_public_key(&public_key);
    if core.stores.hosted_identities.try_get(&identity_id).await.is_some() {
        return Err(ProtocolError::AlreadyExists);
    }
    if core.stores.hosted_identities.count().await as u32 >= core.config.max_hosted_identities {
        return Err(ProtocolError::QuotaExceeded);
    }

    let mut identity = HostedIdentity::new_uninitialized(identity_id, public_key);
    identity.identity_type = Some(req.identity_type);
    core.stores.hosted_identities.insert(identity).await?;

    Ok(encode_body(&RegisterHostingResponse {}))
}

pub async fn update_profile(core: &Core, session: &Arc<Session>, body: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let req: UpdateProfileRequest = decode_body(body)?;
    let identity_id = session_identity(session)?;
    let mut identity = core.stores.hosted_identities.get(&identity_id).await?;
    let was_initialized = identity.initialized;

    if let Some(v) = req.set_version {
        identity.version = Some(SemVer::new(v.major, v.minor, v.patch));
    }
    if let Some(name) = req.set_name {
        validate_name(&name)?;
        identity.name = Some(name);
    }
    if let Some(identity_type) = req.set_type {
        validate_type(&identity_type)?;
        identity.identity_type = Some(identity_type);
    }
    if let Some(loc) = req.set_location {
        identity.location = Some(GpsLocation { latitude_fixed: loc.latitude_fixed, longitude_fixed: loc.longitude_fixed });
    }
    if let Some(extra_data) = req.set_extra_data {
        validate_extra_data(&extra_data)?;
        identity.extra_data = extra_data;
    }

    if req.clear_profile_image {
        if let Some(old) = identity.profile_image_hash.take() {
            core.stores.images.remove_reference(&old).await;
        }
    }
    if let Some(bytes) = req.set_profile_image {
        if let Some(old) = identity.profile_image_hash.take() {
            core.stores.images.remove_reference(&old).await;
        }
        identity.profile_image_hash = Some(core.stores.images.save(bytes).await);
    }

    if req.clear_thumbnail_image {
        if let Some(old) = identity.thumbnail_image_hash.take() {
            core.stores.images.remove_reference(&old).await;
        }
    }
    if let Some(bytes) = req.set_thumbnail_image {
        if let Some(old) = identity.thumbnail_image_hash.take() {
            core.stores.images.remove_reference(&old).await;
        }
        identity.thumbnail_image_hash = Some(core.stores.images.save(bytes).await);
    }

    identity.initialized = identity.is_fully_set();
    let now_initialized = identity.initialized;
    core.stores.hosted_identities.update(identity).await?;

    if now_initialized {
        let action_type = if was_initialized { NeighborhoodActionType::ChangeProfile } else { NeighborhoodActionType::AddProfile };
        core.neighborhood.enqueue_for_all_followers(action_type, identity_id).await;
    }

    Ok(encode_body(&UpdateProfileResponse {}))
}

pub async fn cancel_hosting_agreement(
    core: &Core,
    session: &Arc<Session>,
    body: &[u8],
) -> Result<Vec<u8>, ProtocolError> {
    let req: CancelHostingAgreementRequest = decode_body(body)?;
    let identity_id = session_identity(session)?;
    let mut identity = core.stores.hosted_identities.get(&identity_id).await?;

    let redirect_to_server_id = match req.redirect_to_server_id {
        Some(bytes) => Some(IdentityId::from_slice(&bytes)?),
        None => None,
    };

    identity.cancelled = true;
    identity.expiration = Some(std::time::SystemTime::now());
    identity.hosting_server_id = redirect_to_server_id.clone();
    identity.check_cancellation_invariant()?;

    core.relay.unregister_online(&identity_id);
    core.neighborhood.enqueue_for_all_followers(NeighborhoodActionType::RemoveProfile, identity_id.clone()).await;

    if redirect_to_server_id.is_none() {
        // No redirect: nothing for the external cron to serve, delete now.
        core.stores.hosted_identities.remove(&identity_id).await?;
    } else {
        // Redirect present: keep the cancelled row around for the external
        // cron to collect once `expiration` passes (§3/§4.C grace period).
        core.stores.hosted_identities.update(identity).await?;
    }

    Ok(encode_body(&CancelHostingAgreementResponse {}))
}

pub async fn app_service_add(core: &Core, session: &Arc<Session>, body: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let req: AppServiceAddRequest = decode_body(body)?;
    resync_app_services(core, session, |services| {
        if !services.contains(&req.service_name) {
            services.push(req.service_name.clone());
        }
    })
    .await?;
    Ok(encode_body(&AppServiceAddResponse {}))
}

pub async fn app_service_remove(core: &Core, session: &Arc<Session>, body: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let req: AppServiceRemoveRequest = decode_body(body)?;
    resync_app_services(core, session, |services| services.retain(|s| s != &req.service_name)).await?;
    Ok(encode_body(&AppServiceRemoveResponse {}))
}

/// `register_online` snapshots `app_services` by value, so any session-side
/// mutation of the list must be re-synced to the relay engine explicitly.
async fn resync_app_services(
    core: &Core,
    session: &Arc<Session>,
    mutate: impl FnOnce(&mut Vec<String>),
) -> Result<(), ProtocolError> {
    let identity_id = session_identity(session)?;
    let app_services = session.with_state_mut(|s| {
        mutate(&mut s.app_services);
        s.app_services.clone()
    });
    core.relay.register_online(identity_id, session.clone(), app_services);
    Ok(())
}

fn relationship_canonical_bytes(card: &RelatedIdentityCardMsg) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&card.card_id);
    buf.extend_from_slice(card.application_id.as_bytes());
    buf.extend_from_slice(&card.issuer_public_key);
    buf.extend_from_slice(&card.recipient_public_key);
    buf.extend_from_slice(card.relation_type.as_bytes());
    buf.extend_from_slice(&card.valid_from.to_be_bytes());
    buf.extend_from_slice(&card.valid_to.to_be_bytes());
    buf
}

pub async fn add_related_identity(core: &Core, session: &Arc<Session>, body: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let req: AddRelatedIdentityRequest = decode_body(body)?;
    let card_msg = req.card.ok_or_else(|| ProtocolError::invalid_value("card", "missing"))?;
    if card_msg.card_id.len() != 32 {
        return Err(ProtocolError::invalid_value("card.card_id", "must be exactly 32 bytes"));
    }

    let identity_id = session_identity(session)?;
    let recipient_public_key = PublicKey(card_msg.recipient_public_key.clone());
    if IdentityId::of_public_key(&recipient_public_key) != identity_id {
        return Err(ProtocolError::invalid_value("card.recipient_public_key", "must be the caller's own key"));
    }

    let canonical = relationship_canonical_bytes(&card_msg);
    let issuer_public_key = PublicKey(card_msg.issuer_public_key.clone());
    if !core.validator.verify(&issuer_public_key, &canonical, &Signature(card_msg.issuer_signature.clone())) {
        return Err(ProtocolError::InvalidSignature);
    }
    if !core.validator.verify(&recipient_public_key, &canonical, &Signature(card_msg.recipient_signature.clone())) {
        return Err(ProtocolError::InvalidSignature);
    }

    if core.stores.related_identities.count_for_identity(&identity_id).await as u32 >= core.config.max_identity_relations {
        return Err(ProtocolError::QuotaExceeded);
    }

    let mut card_id = [0u8; 32];
    card_id.copy_from_slice(&card_msg.card_id);
    let card = RelatedIdentity {
        application_id: card_msg.application_id,
        card_id,
        issuer_public_key,
        issuer_signature: Signature(card_msg.issuer_signature),
        recipient_public_key,
        recipient_signature: Signature(card_msg.recipient_signature),
        relation_type: card_msg.relation_type,
        valid_from: unix_to_system_time(card_msg.valid_from),
        valid_to: unix_to_system_time(card_msg.valid_to),
    };
    card.check_validity_range()?;
    core.stores.related_identities.insert(card).await?;

    Ok(encode_body(&AddRelatedIdentityResponse {}))
}

pub async fn remove_related_identity(
    core: &Core,
    session: &Arc<Session>,
    body: &[u8],
) -> Result<Vec<u8>, ProtocolError> {
    let req: RemoveRelatedIdentityRequest = decode_body(body)?;
    if req.card_id.len() != 32 {
        return Err(ProtocolError::invalid_value("card_id", "must be exactly 32 bytes"));
    }
    let mut card_id = [0u8; 32];
    card_id.copy_from_slice(&req.card_id);

    let identity_id = session_identity(session)?;
    let card = core.stores.related_identities.get(&card_id).await.ok_or(ProtocolError::NotFound)?;
    if IdentityId::of_public_key(&card.recipient_public_key) != identity_id {
        return Err(ProtocolError::Unauthorized);
    }
    core.stores.related_identities.remove(&card_id).await?;

    Ok(encode_body(&RemoveRelatedIdentityResponse {}))
}

/// No storage-quota subsystem exists in this implementation; both checks are
/// deliberately permissive stubs (§6 leaves quota accounting server-specific).
pub fn can_store_data(body: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let _req: CanStoreDataRequest = decode_body(body)?;
    Ok(encode_body(&CanStoreDataResponse { allowed: true }))
}

pub fn can_publish_ipns(body: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let _req: CanPublishIpnsRequest = decode_body(body)?;
    Ok(encode_body(&CanPublishIpnsResponse { allowed: true }))
}
