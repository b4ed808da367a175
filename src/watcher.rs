//! Component G: Update Watcher. Background re-resolution of a site's
//! manifest, off the request path, feeding the per-path "last updated"
//! timestamps that drive live reload.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use nostr_sdk::prelude::*;
use url::Url;

use crate::cache::TieredCache;
use crate::identity::SiteIdentity;
use crate::manifest::ManifestResolver;
use crate::store::EventStore;

/// Per-site watch state: at most one watcher runs at a time; a second
/// request observed during a watch just finds `running` already true and
/// moves on without spawning another.
#[derive(Default)]
pub struct UpdateWatcher {
    resolver: ManifestResolver,
    running: DashMap<String, ()>,
}

impl UpdateWatcher {
    pub fn new() -> Self {
        Self {
            resolver: ManifestResolver::new(),
            running: DashMap::new(),
        }
    }

    /// Spawns a background refresh for `site` unless one is already in
    /// flight. Returns immediately either way.
    pub fn maybe_spawn(
        self: &Arc<Self>,
        cache: Arc<TieredCache>,
        store: Arc<EventStore>,
        site: SiteIdentity,
        pubkey: PublicKey,
        relays: Vec<Url>,
        fallback_relays: Vec<Url>,
        allow_fallback: bool,
        timeout: Duration,
    ) {
        let key = site.cache_key();
        if self.running.insert(key.clone(), ()).is_some() {
            return;
        }

        let watcher = self.clone();
        tokio::spawn(async move {
            watcher
                .refresh_once(&cache, &store, &site, pubkey, &relays, &fallback_relays, allow_fallback, timeout)
                .await;
            watcher.running.remove(&key);
        });
    }

    async fn refresh_once(
        &self,
        cache: &TieredCache,
        store: &EventStore,
        site: &SiteIdentity,
        pubkey: PublicKey,
        relays: &[Url],
        fallback_relays: &[Url],
        allow_fallback: bool,
        timeout: Duration,
    ) {
        let identifier = site.identifier.as_deref();

        let resolved = match self
            .resolver
            .resolve(store, relays, pubkey, identifier, timeout)
            .await
        {
            Ok(Some(manifest)) => Some(manifest),
            Ok(None) if allow_fallback && !fallback_relays.is_empty() => {
                match self
                    .resolver
                    .resolve(store, fallback_relays, pubkey, identifier, timeout)
                    .await
                {
                    Ok(manifest) => manifest,
                    Err(err) => {
                        tracing::warn!(site = %key_for_log(site), error = %err, "watcher fallback resolve failed");
                        None
                    }
                }
            }
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(site = %key_for_log(site), error = %err, "watcher resolve failed");
                None
            }
        };

        let Some(manifest) = resolved else { return };

        let now_ms = nostr_sdk::Timestamp::now().as_u64() as i64 * 1000;
        let changed = cache.observe_manifest(site, manifest.clone(), now_ms);
        if !changed.is_empty() {
            if let Err(err) = cache.persist_manifest(site, &manifest) {
                tracing::warn!(site = %key_for_log(site), error = %err, "failed to persist refreshed manifest");
            }
            tracing::debug!(site = %key_for_log(site), changed = changed.len(), "manifest refreshed");
        }
    }
}

fn key_for_log(site: &SiteIdentity) -> String {
    site.cache_key()
}
