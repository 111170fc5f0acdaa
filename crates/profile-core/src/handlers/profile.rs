//! Read-only profile queries (§4.C, §4.E): single-profile lookup, bounded
//! search, search-result pagination, stats, and relationship cards.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use profile_protocol::envelope::{decode_body, encode_body};
use profile_protocol::messages::{
    GetIdentityRelationshipsRequest, GetIdentityRelationshipsResponse, GetProfileInformationRequest,
    GetProfileInformationResponse, GpsLocationMsg, ProfileFilterMsg, ProfileQueryInformationMsg,
    ProfileSearchPartRequest, ProfileSearchPartResponse, ProfileSearchRequest, ProfileSearchResponse,
    ProfileStatsResponse, RelatedIdentityCardMsg, SemVerMsg,
};
use profile_protocol::model::{HostedIdentity, NeighborIdentity, RelatedIdentity};
use profile_protocol::{GpsLocation, IdentityId, ProtocolError};

use crate::search_engine::{CachedProfile, SearchFilter};
use crate::session::{SearchResultCache, Session};
use crate::Core;

fn to_unix(t: SystemTime) -> i64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => -(e.duration().as_secs() as i64),
    }
}

pub(crate) fn unix_to_system_time(secs: i64) -> SystemTime {
    if secs >= 0 {
        UNIX_EPOCH + Duration::from_secs(secs as u64)
    } else {
        UNIX_EPOCH - Duration::from_secs((-secs) as u64)
    }
}

fn hosted_to_query_msg(
    identity: &HostedIdentity,
    this_server_id: &IdentityId,
    thumbnail_image: Option<Vec<u8>>,
) -> ProfileQueryInformationMsg {
    ProfileQueryInformationMsg {
        identity_id: identity.identity_id.as_bytes().to_vec(),
        public_key: identity.public_key.0.clone(),
        version: identity.version.map(|v| SemVerMsg { major: v.major, minor: v.minor, patch: v.patch }),
        name: identity.name.clone().unwrap_or_default(),
        identity_type: identity.identity_type.clone().unwrap_or_default(),
        location: identity
            .location
            .map(|l| GpsLocationMsg { latitude_fixed: l.latitude_fixed, longitude_fixed: l.longitude_fixed }),
        extra_data: identity.extra_data.clone(),
        profile_image_hash: identity.profile_image_hash.clone(),
        thumbnail_image_hash: identity.thumbnail_image_hash.clone(),
        thumbnail_image,
        hosting_server_id: this_server_id.as_bytes().to_vec(),
    }
}

fn neighbor_to_query_msg(row: &NeighborIdentity, thumbnail_image: Option<Vec<u8>>) -> ProfileQueryInformationMsg {
    ProfileQueryInformationMsg {
        identity_id: row.identity_id.as_bytes().to_vec(),
        public_key: row.public_key.0.clone(),
        version: Some(SemVerMsg { major: row.version.major, minor: row.version.minor, patch: row.version.patch }),
        name: row.name.clone(),
        identity_type: row.identity_type.clone(),
        location: Some(GpsLocationMsg {
            latitude_fixed: row.location.latitude_fixed,
            longitude_fixed: row.location.longitude_fixed,
        }),
        extra_data: row.extra_data.clone(),
        profile_image_hash: row.profile_image_hash.clone(),
        thumbnail_image_hash: row.thumbnail_image_hash.clone(),
        thumbnail_image,
        hosting_server_id: row.hosting_server_id.as_bytes().to_vec(),
    }
}

fn cached_to_query_msg(p: &CachedProfile) -> ProfileQueryInformationMsg {
    ProfileQueryInformationMsg {
        identity_id: p.identity_id.as_bytes().to_vec(),
        public_key: p.public_key.0.clone(),
        version: Some(SemVerMsg { major: p.version.major, minor: p.version.minor, patch: p.version.patch }),
        name: p.name.clone(),
        identity_type: p.identity_type.clone(),
        location: Some(GpsLocationMsg {
            latitude_fixed: p.location.latitude_fixed,
            longitude_fixed: p.location.longitude_fixed,
        }),
        extra_data: p.extra_data.clone(),
        profile_image_hash: p.profile_image_hash.clone(),
        thumbnail_image_hash: p.thumbnail_image_hash.clone(),
        thumbnail_image: p.thumbnail_image.clone(),
        hosting_server_id: p.hosting_server_id.as_bytes().to_vec(),
    }
}

fn card_to_msg(card: &RelatedIdentity) -> RelatedIdentityCardMsg {
    RelatedIdentityCardMsg {
        card_id: card.card_id.to_vec(),
        application_id: card.application_id.clone(),
        issuer_public_key: card.issuer_public_key.0.clone(),
        issuer_signature: card.issuer_signature.0.clone(),
        recipient_public_key: card.recipient_public_key.0.clone(),
        recipient_signature: card.recipient_signature.0.clone(),
        relation_type: card.relation_type.clone(),
        valid_from: to_unix(card.valid_from),
        valid_to: to_unix(card.valid_to),
    }
}

pub async fn get_profile_information(core: &Core, body: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let req: GetProfileInformationRequest = decode_body(body)?;
    let identity_id = IdentityId::from_slice(&req.identity_id)?;

    if let Some(identity) = core.stores.hosted_identities.try_get(&identity_id).await {
        if identity.initialized && !identity.cancelled {
            let thumbnail = match &identity.thumbnail_image_hash {
                Some(hash) => core.stores.images.get(hash).await,
                None => None,
            };
            return Ok(encode_body(&GetProfileInformationResponse {
                profile: Some(hosted_to_query_msg(&identity, &core.identity.server_id, thumbnail)),
            }));
        }
    }

    let predicate = move |row: &NeighborIdentity| row.identity_id == identity_id;
    let mut matches = core.stores.neighbor_identities.search(&predicate, 1).await;
    if let Some(row) = matches.pop() {
        let thumbnail = match &row.thumbnail_image_hash {
            Some(hash) => core.stores.images.get(hash).await,
            None => None,
        };
        return Ok(encode_body(&GetProfileInformationResponse { profile: Some(neighbor_to_query_msg(&row, thumbnail)) }));
    }

    Err(ProtocolError::NotFound)
}

pub async fn profile_search(core: &Core, session: &Arc<Session>, body: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let req: ProfileSearchRequest = decode_body(body)?;
    let filter_msg = req.filter.unwrap_or_default();
    let location = build_location(&filter_msg);
    let filter = SearchFilter::parse(
        &filter_msg.type_pattern,
        &filter_msg.name_pattern,
        location,
        &filter_msg.extra_data_regex,
        filter_msg.include_thumbnails,
    )?;

    let mut outcome = core
        .search
        .search(&filter, req.max_total_records, req.max_response_records, req.include_hosted_only, &core.identity.server_id)
        .await?;

    if filter.include_thumbnails {
        for profile in outcome.returned.iter_mut() {
            if let Some(hash) = &profile.thumbnail_image_hash {
                profile.thumbnail_image = core.stores.images.get(hash).await;
            }
        }
    }

    let response = ProfileSearchResponse {
        profiles: outcome.returned.iter().map(cached_to_query_msg).collect(),
        total_record_count: outcome.total_record_count,
        covered_server_ids: outcome.covered_server_ids.iter().map(|id| id.as_bytes().to_vec()).collect(),
    };

    session.with_state_mut(|s| {
        s.search_cache = Some(SearchResultCache {
            includes_thumbnails: filter.include_thumbnails,
            results: std::mem::take(&mut outcome.returned).into_iter().chain(outcome.cache_overflow).collect(),
        })
    });

    Ok(encode_body(&response))
}

fn build_location(filter: &ProfileFilterMsg) -> Option<(GpsLocation, f64)> {
    filter
        .location
        .as_ref()
        .map(|l| (GpsLocation { latitude_fixed: l.latitude_fixed, longitude_fixed: l.longitude_fixed }, filter.radius_meters))
}

pub fn profile_search_part(session: &Arc<Session>, body: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let req: ProfileSearchPartRequest = decode_body(body)?;
    let cache = session.with_state(|s| s.search_cache.as_ref().map(|c| c.results.clone()));
    let results = cache.ok_or(ProtocolError::Uninitialized)?;

    let start = req.record_index as usize;
    let end = start.saturating_add(req.record_count as usize).min(results.len());
    let page = if start >= results.len() { &[][..] } else { &results[start..end] };

    Ok(encode_body(&ProfileSearchPartResponse { profiles: page.iter().map(cached_to_query_msg).collect() }))
}

pub async fn profile_stats(core: &Core) -> Result<Vec<u8>, ProtocolError> {
    Ok(encode_body(&ProfileStatsResponse {
        hosted_identity_count: core.stores.hosted_identities.count().await as u32,
        neighborhood_identity_count: core.stores.neighbor_identities.count().await as u32,
    }))
}

pub async fn get_identity_relationships(core: &Core, body: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let req: GetIdentityRelationshipsRequest = decode_body(body)?;
    let identity_id = IdentityId::from_slice(&req.identity_id)?;
    let cards = core.stores.related_identities.list_for_identity(&identity_id, req.relation_type.as_deref()).await;
    Ok(encode_body(&GetIdentityRelationshipsResponse { relationships: cards.iter().map(card_to_msg).collect() }))
}
