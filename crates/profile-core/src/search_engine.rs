//! Streaming bounded search over local + neighbor repositories (§4.E).

use std::sync::Arc;
use std::time::{Duration, Instant};

use profile_protocol::model::{HostedIdentity, NeighborIdentity};
use profile_protocol::{GpsLocation, IdentityId, ProtocolError, PublicKey, SemVer};
use profile_store::{HostedIdentityStore, NeighborIdentityStore, NeighborStore};
use regex::Regex;

pub const MAX_RESPONSE_WITH_THUMBNAILS: u32 = 100;
pub const MAX_TOTAL_WITH_THUMBNAILS: u32 = 1000;
pub const MAX_RESPONSE_WITHOUT_THUMBNAILS: u32 = 1000;
pub const MAX_TOTAL_WITHOUT_THUMBNAILS: u32 = 10_000;

const PER_PROFILE_REGEX_BUDGET: Duration = Duration::from_millis(25);
const CUMULATIVE_REGEX_BUDGET: Duration = Duration::from_secs(1);
const SEARCH_WALL_CLOCK_BUDGET: Duration = Duration::from_secs(15);
const BATCH_MULTIPLIER: u32 = 10;
const MIN_BATCH_SIZE: u32 = 1000;

/// A search result, shaped the way the wire response needs it and cached
/// verbatim in the session for `ProfileSearchPart` pagination.
#[derive(Clone, Debug)]
pub struct CachedProfile {
    pub identity_id: IdentityId,
    pub public_key: PublicKey,
    pub version: SemVer,
    pub name: String,
    pub identity_type: String,
    pub location: GpsLocation,
    pub extra_data: Vec<u8>,
    pub profile_image_hash: Option<Vec<u8>>,
    pub thumbnail_image_hash: Option<Vec<u8>>,
    pub thumbnail_image: Option<Vec<u8>>,
    pub hosting_server_id: IdentityId,
}

impl From<(&HostedIdentity, IdentityId)> for CachedProfile {
    fn from((identity, this_server_id): (&HostedIdentity, IdentityId)) -> Self {
        Self {
            identity_id: identity.identity_id.clone(),
            public_key: identity.public_key.clone(),
            version: identity.version.unwrap_or(SemVer::new(0, 0, 0)),
            name: identity.name.clone().unwrap_or_default(),
            identity_type: identity.identity_type.clone().unwrap_or_default(),
            location: identity.location.unwrap_or(GpsLocation { latitude_fixed: 0, longitude_fixed: 0 }),
            extra_data: identity.extra_data.clone(),
            profile_image_hash: identity.profile_image_hash.clone(),
            thumbnail_image_hash: identity.thumbnail_image_hash.clone(),
            thumbnail_image: None,
            hosting_server_id: this_server_id,
        }
    }
}

impl From<&NeighborIdentity> for CachedProfile {
    fn from(identity: &NeighborIdentity) -> Self {
        Self {
            identity_id: identity.identity_id.clone(),
            public_key: identity.public_key.clone(),
            version: identity.version,
            name: identity.name.clone(),
            identity_type: identity.identity_type.clone(),
            location: identity.location,
            extra_data: identity.extra_data.clone(),
            profile_image_hash: identity.profile_image_hash.clone(),
            thumbnail_image_hash: identity.thumbnail_image_hash.clone(),
            thumbnail_image: None,
            hosting_server_id: identity.hosting_server_id.clone(),
        }
    }
}

#[derive(Clone)]
pub struct SearchFilter {
    pub type_pattern: Option<Regex>,
    pub name_pattern: Option<Regex>,
    pub location: Option<(GpsLocation, f64)>,
    pub extra_data_regex: Option<Regex>,
    pub include_thumbnails: bool,
}

impl SearchFilter {
    /// Builds a filter from the raw wire patterns, compiling the
    /// `*`-wildcard `type`/`name` globs into anchored regexes the same way
    /// extraData's regex is validated up front (§4.E).
    pub fn parse(
        type_pattern: &str,
        name_pattern: &str,
        location: Option<(GpsLocation, f64)>,
        extra_data_regex: &str,
        include_thumbnails: bool,
    ) -> Result<Self, ProtocolError> {
        let type_re = wildcard_to_regex("filter.type_pattern", type_pattern)?;
        let name_re = wildcard_to_regex("filter.name_pattern", name_pattern)?;
        let extra_re = if extra_data_regex.is_empty() {
            None
        } else {
            Some(Regex::new(extra_data_regex).map_err(|e| {
                ProtocolError::invalid_value("filter.extra_data_regex", e.to_string())
            })?)
        };
        Ok(Self { type_pattern: type_re, name_pattern: name_re, location, extra_data_regex: extra_re, include_thumbnails })
    }
}

fn wildcard_to_regex(path: &str, pattern: &str) -> Result<Option<Regex>, ProtocolError> {
    if pattern.is_empty() {
        return Ok(None);
    }
    let body = pattern.split('*').map(regex::escape).collect::<Vec<_>>().join(".*");
    let anchored = format!("^{}$", body);
    Ok(Some(Regex::new(&anchored).map_err(|e| ProtocolError::invalid_value(path, e.to_string()))?))
}

pub struct SearchOutcome {
    pub returned: Vec<CachedProfile>,
    pub total_record_count: u32,
    pub covered_server_ids: Vec<IdentityId>,
    pub cache_overflow: Vec<CachedProfile>,
}

pub struct SearchEngine {
    hosted: Arc<dyn HostedIdentityStore>,
    neighbor_identities: Arc<dyn NeighborIdentityStore>,
    neighbors: Arc<dyn NeighborStore>,
}

impl SearchEngine {
    pub fn new(
        hosted: Arc<dyn HostedIdentityStore>,
        neighbor_identities: Arc<dyn NeighborIdentityStore>,
        neighbors: Arc<dyn NeighborStore>,
    ) -> Self {
        Self { hosted, neighbor_identities, neighbors }
    }

    pub fn validate_limits(
        max_total_records: u32,
        max_response_records: u32,
        include_thumbnails: bool,
    ) -> Result<(), ProtocolError> {
        if max_response_records > max_total_records {
            return Err(ProtocolError::invalid_value(
                "max_response_records",
                "must not exceed max_total_records",
            ));
        }
        let (response_limit, total_limit) = if include_thumbnails {
            (MAX_RESPONSE_WITH_THUMBNAILS, MAX_TOTAL_WITH_THUMBNAILS)
        } else {
            (MAX_RESPONSE_WITHOUT_THUMBNAILS, MAX_TOTAL_WITHOUT_THUMBNAILS)
        };
        if max_response_records > response_limit {
            return Err(ProtocolError::invalid_value("max_response_records", "exceeds limit"));
        }
        if max_total_records > total_limit {
            return Err(ProtocolError::invalid_value("max_total_records", "exceeds limit"));
        }
        Ok(())
    }

    pub async fn search(
        &self,
        filter: &SearchFilter,
        max_total_records: u32,
        max_response_records: u32,
        include_hosted_only: bool,
        this_server_id: &IdentityId,
    ) -> Result<SearchOutcome, ProtocolError> {
        Self::validate_limits(max_total_records, max_response_records, filter.include_thumbnails)?;

        let deadline = Instant::now() + SEARCH_WALL_CLOCK_BUDGET;
        let mut cumulative_regex_time = Duration::ZERO;
        let mut accepted: Vec<CachedProfile> = Vec::new();
        let mut covered_server_ids = vec![this_server_id.clone()];

        let batch_size = (max_total_records * BATCH_MULTIPLIER).max(MIN_BATCH_SIZE) as usize;

        let hosted_rows = self.hosted.list_all().await;
        'hosted: for chunk in hosted_rows.chunks(batch_size) {
            if Instant::now() >= deadline {
                break;
            }
            for identity in chunk {
                if identity.cancelled || !identity.initialized {
                    continue;
                }
                if accepted.len() >= max_total_records as usize {
                    break 'hosted;
                }
                let candidate = CachedProfile::from((identity, this_server_id.clone()));
                if matches_geo_and_wildcards(&candidate, filter)
                    && passes_extra_data_regex(&candidate, filter, &mut cumulative_regex_time)
                {
                    accepted.push(candidate);
                }
                if cumulative_regex_time >= CUMULATIVE_REGEX_BUDGET {
                    break 'hosted;
                }
            }
        }

        if !include_hosted_only && accepted.len() < max_total_records as usize && Instant::now() < deadline {
            let neighbors = self.neighbors.list_all().await;
            covered_server_ids.extend(neighbors.iter().map(|n| n.server_id.clone()));

            let remaining = max_total_records as usize - accepted.len();
            let filter_ref = filter.clone();
            let predicate = move |row: &NeighborIdentity| matches_geo_and_wildcards(&CachedProfile::from(row), &filter_ref);
            let candidates =
                self.neighbor_identities.search(&predicate, remaining * BATCH_MULTIPLIER as usize).await;

            'neighbor: for row in &candidates {
                if Instant::now() >= deadline || cumulative_regex_time >= CUMULATIVE_REGEX_BUDGET {
                    break 'neighbor;
                }
                if accepted.len() >= max_total_records as usize {
                    break 'neighbor;
                }
                let candidate = CachedProfile::from(row);
                if passes_extra_data_regex(&candidate, filter, &mut cumulative_regex_time) {
                    accepted.push(candidate);
                }
            }
        }

        let total_record_count = accepted.len() as u32;
        let (returned, overflow) = if accepted.len() > max_response_records as usize {
            let overflow = accepted.split_off(max_response_records as usize);
            (accepted, overflow)
        } else {
            (accepted, Vec::new())
        };

        Ok(SearchOutcome { returned, total_record_count, covered_server_ids, cache_overflow: overflow })
    }
}

fn matches_geo_and_wildcards(candidate: &CachedProfile, filter: &SearchFilter) -> bool {
    if let Some(re) = &filter.type_pattern {
        if !re.is_match(&candidate.identity_type) {
            return false;
        }
    }
    if let Some(re) = &filter.name_pattern {
        if !re.is_match(&candidate.name) {
            return false;
        }
    }
    if let Some((center, radius_m)) = &filter.location {
        if candidate.location.distance_meters(center) > *radius_m {
            return false;
        }
    }
    true
}

fn passes_extra_data_regex(
    candidate: &CachedProfile,
    filter: &SearchFilter,
    cumulative: &mut Duration,
) -> bool {
    match &filter.extra_data_regex {
        None => true,
        Some(re) => {
            let text = String::from_utf8_lossy(&candidate.extra_data);
            let start = Instant::now();
            let matched = re.is_match(&text);
            let elapsed = start.elapsed().min(PER_PROFILE_REGEX_BUDGET);
            *cumulative += elapsed;
            matched
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use profile_store::{InMemoryHostedIdentityStore, InMemoryNeighborIdentityStore, InMemoryNeighborStore};

    fn seeded_identity(seed: u8, name: &str, identity_type: &str) -> HostedIdentity {
        let pk = PublicKey(vec![seed; 32]);
        let mut identity = HostedIdentity::new_uninitialized(IdentityId::of_public_key(&pk), pk);
        identity.version = Some(SemVer::new(1, 0, 0));
        identity.name = Some(name.into());
        identity.identity_type = Some(identity_type.into());
        identity.location = Some(GpsLocation::from_degrees(50.0872, 14.4210));
        identity.initialized = true;
        identity
    }

    #[tokio::test]
    async fn search_returns_only_matching_type_wildcard() {
        let hosted = Arc::new(InMemoryHostedIdentityStore::new());
        hosted.insert(seeded_identity(1, "Alice", "person")).await.unwrap();
        hosted.insert(seeded_identity(2, "Bot9000", "bot")).await.unwrap();
        let engine = SearchEngine::new(
            hosted,
            Arc::new(InMemoryNeighborIdentityStore::new()),
            Arc::new(InMemoryNeighborStore::new()),
        );
        let filter = SearchFilter::parse("per*", "", None, "", false).unwrap();
        let this_id = IdentityId::of_public_key(&PublicKey(vec![0xFF; 32]));
        let outcome = engine.search(&filter, 20, 10, true, &this_id).await.unwrap();
        assert_eq!(outcome.returned.len(), 1);
        assert_eq!(outcome.returned[0].identity_type, "person");
        assert_eq!(outcome.covered_server_ids, vec![this_id]);
    }

    #[tokio::test]
    async fn overflow_beyond_max_response_is_not_in_the_returned_page() {
        let hosted = Arc::new(InMemoryHostedIdentityStore::new());
        for seed in 0..5u8 {
            hosted.insert(seeded_identity(seed, "Name", "person")).await.unwrap();
        }
        let engine = SearchEngine::new(
            hosted,
            Arc::new(InMemoryNeighborIdentityStore::new()),
            Arc::new(InMemoryNeighborStore::new()),
        );
        let filter = SearchFilter::parse("", "", None, "", false).unwrap();
        let this_id = IdentityId::of_public_key(&PublicKey(vec![0xFF; 32]));
        let outcome = engine.search(&filter, 5, 2, true, &this_id).await.unwrap();
        assert_eq!(outcome.returned.len(), 2);
        assert_eq!(outcome.total_record_count, 5);
        assert_eq!(outcome.cache_overflow.len(), 3);
    }

    #[tokio::test]
    async fn response_limit_above_cap_is_rejected() {
        let hosted = Arc::new(InMemoryHostedIdentityStore::new());
        let engine = SearchEngine::new(
            hosted,
            Arc::new(InMemoryNeighborIdentityStore::new()),
            Arc::new(InMemoryNeighborStore::new()),
        );
        let filter = SearchFilter::parse("", "", None, "", true).unwrap();
        let this_id = IdentityId::of_public_key(&PublicKey(vec![0xFF; 32]));
        let err = engine.search(&filter, 1000, 1000, true, &this_id).await.unwrap_err();
        assert_eq!(err.status_code(), profile_protocol::StatusCode::InvalidValue);
    }
}
