//! Profile cache: fetches a publisher's kind:0 profile, kind:10002 relay
//! list, and kind:10063 blob-server list in parallel and caches the bundle
//! for ten minutes per pubkey. Feeds the blob-server fallback chain
//! consulted when a manifest endorses no servers of its own.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use nostr_sdk::prelude::*;
use url::Url;

use crate::relay::{RelayPool, RelayPoolError};

pub const PROFILE_KIND: u64 = 0;
pub const RELAY_LIST_KIND: u64 = 10002;
pub const SERVER_LIST_KIND: u64 = 10063;

const TTL: Duration = Duration::from_secs(600);

/// What a pubkey's profile lookup yields: the raw profile event if any, plus
/// the relays and blob servers endorsed by their kind:10002 / kind:10063
/// lists.
#[derive(Debug, Clone, Default)]
pub struct ProfileBundle {
    pub profile_event: Option<Event>,
    pub relays: Vec<Url>,
    pub servers: Vec<Url>,
}

struct CacheEntry {
    fetched_at: Instant,
    bundle: ProfileBundle,
}

/// Per-pubkey cache of `ProfileBundle`, refetched across all three kinds
/// once ten minutes have elapsed since the last fetch.
pub struct ProfileCache {
    pool: RelayPool,
    entries: DashMap<PublicKey, CacheEntry>,
}

impl Default for ProfileCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ProfileCache {
    pub fn new() -> Self {
        Self {
            pool: RelayPool::new(),
            entries: DashMap::new(),
        }
    }

    /// Returns the cached bundle for `pubkey`, refetching over `relays` if
    /// it is missing or older than the TTL.
    pub async fn get(&self, relays: &[Url], pubkey: PublicKey, timeout: Duration) -> ProfileBundle {
        if let Some(entry) = self.entries.get(&pubkey) {
            if entry.fetched_at.elapsed() < TTL {
                return entry.bundle.clone();
            }
        }

        let bundle = self.fetch(relays, pubkey, timeout).await;
        self.entries.insert(
            pubkey,
            CacheEntry {
                fetched_at: Instant::now(),
                bundle: bundle.clone(),
            },
        );
        bundle
    }

    async fn fetch(&self, relays: &[Url], pubkey: PublicKey, timeout: Duration) -> ProfileBundle {
        let (profile, relay_list, server_list) = tokio::join!(
            self.fetch_kind(relays, pubkey, PROFILE_KIND, timeout),
            self.fetch_kind(relays, pubkey, RELAY_LIST_KIND, timeout),
            self.fetch_kind(relays, pubkey, SERVER_LIST_KIND, timeout),
        );

        let profile_event = events_or_warn(profile, "profile").into_iter().next();
        let relays = extract_urls(&events_or_warn(relay_list, "relay list"), "r");
        let servers = extract_urls(&events_or_warn(server_list, "server list"), "server");

        ProfileBundle {
            profile_event,
            relays,
            servers,
        }
    }

    async fn fetch_kind(
        &self,
        relays: &[Url],
        pubkey: PublicKey,
        kind: u64,
        timeout: Duration,
    ) -> Result<Vec<Event>, RelayPoolError> {
        let filter = Filter::new().kind(Kind::from(kind)).author(pubkey).limit(1);
        let events = self.pool.request(relays, filter, timeout).await?;
        Ok(events.into_iter().map(|e| e.event).collect())
    }
}

fn events_or_warn(result: Result<Vec<Event>, RelayPoolError>, what: &'static str) -> Vec<Event> {
    match result {
        Ok(events) => events,
        Err(err) => {
            tracing::warn!(error = %err, what, "profile cache fetch failed");
            Vec::new()
        }
    }
}

fn extract_urls(events: &[Event], tag_name: &str) -> Vec<Url> {
    events
        .iter()
        .flat_map(|event| event.tags.iter())
        .filter_map(|tag| {
            let values = tag.as_vec();
            if values.first().map(String::as_str) == Some(tag_name) {
                values.get(1).and_then(|v| Url::parse(v).ok())
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_urls_reads_matching_tag_only() {
        let keys = Keys::generate();
        let event = EventBuilder::new(
            Kind::from(SERVER_LIST_KIND),
            "",
            [
                Tag::parse(["server", "https://blossom.example"]).unwrap(),
                Tag::parse(["r", "wss://relay.example"]).unwrap(),
            ],
        )
        .to_event(&keys)
        .unwrap();

        let servers = extract_urls(&[event.clone()], "server");
        assert_eq!(servers, vec![Url::parse("https://blossom.example").unwrap()]);

        let relays = extract_urls(&[event], "r");
        assert_eq!(relays, vec![Url::parse("wss://relay.example").unwrap()]);
    }
}
