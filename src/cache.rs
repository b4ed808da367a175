//! Component E: Tiered Cache. Per-site manifest state with singleflight
//! loading, an in-memory blob cache, and an optional on-disk tier.
//!
//! Disk layout: `<cacheDir>/<npub>/<identifier|"root">/` holding
//! `manifest.json`, one file per raw blob hash, and `<hash>-decompressed`
//! for buffered decompressions.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use nostr_sdk::prelude::*;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Notify;

use crate::identity::SiteIdentity;
use crate::manifest::SiteManifest;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("stored manifest event is invalid: {0}")]
    InvalidEvent(String),
}

/// What kind of bytes a cached blob entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variant {
    Raw,
    Decompressed,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct BlobKey {
    site: String,
    hash: String,
    variant_tag: &'static str,
}

impl BlobKey {
    fn new(site: &SiteIdentity, hash: &str, variant: Variant) -> Self {
        Self {
            site: site.cache_key(),
            hash: hash.to_lowercase(),
            variant_tag: match variant {
                Variant::Raw => "raw",
                Variant::Decompressed => "decompressed",
            },
        }
    }
}

/// On-disk representation of the manifest, just enough to reconstruct the
/// path→hash map without re-verifying the signature every load.
#[derive(Debug, Serialize, Deserialize)]
struct StoredManifest {
    event_json: String,
}

/// Per-site in-memory record: the currently cached manifest, per-path
/// "updated since" timestamps, and the singleflight loading state.
pub struct SiteEntry {
    pub manifest: Option<SiteManifest>,
    pub path_updated_at: HashMap<String, i64>,
    pub manifest_found_but_empty: bool,
    /// Set once a resolution attempt has completed, whether or not it found
    /// a manifest. Distinguishes "still loading" (show the loading page)
    /// from "resolved, no such site" (show 404).
    pub resolution_attempted: bool,
}

impl Default for SiteEntry {
    fn default() -> Self {
        Self {
            manifest: None,
            path_updated_at: HashMap::new(),
            manifest_found_but_empty: false,
            resolution_attempted: false,
        }
    }
}

enum LoadState {
    InFlight(Arc<Notify>),
    Ready,
}

/// Outcome of asking the cache to coordinate a manifest load: either the
/// caller is now responsible for fetching (and must call `finish_loading`
/// when done), or the load is already in flight and the caller should wait
/// and then re-check the cache.
pub enum LoadGate {
    YouFetch,
    WaitOn(Arc<Notify>),
}

pub struct TieredCache {
    sites: DashMap<String, Arc<RwLock<SiteEntry>>>,
    loading: DashMap<String, LoadState>,
    blobs: DashMap<BlobKey, Vec<u8>>,
    disk_root: Option<PathBuf>,
}

impl TieredCache {
    pub fn new(disk_root: Option<PathBuf>) -> Self {
        Self {
            sites: DashMap::new(),
            loading: DashMap::new(),
            blobs: DashMap::new(),
            disk_root,
        }
    }

    fn site_entry(&self, site: &SiteIdentity) -> Arc<RwLock<SiteEntry>> {
        self.sites
            .entry(site.cache_key())
            .or_insert_with(|| Arc::new(RwLock::new(SiteEntry::default())))
            .clone()
    }

    pub fn snapshot(&self, site: &SiteIdentity) -> Arc<RwLock<SiteEntry>> {
        self.site_entry(site)
    }

    /// Singleflight gate for manifest resolution. The first caller for a
    /// site gets `YouFetch` and must call `finish_loading` (success or not)
    /// to release waiters; subsequent concurrent callers get `WaitOn` and
    /// should `notified().await` then re-check the snapshot.
    pub fn begin_loading(&self, site: &SiteIdentity) -> LoadGate {
        let key = site.cache_key();
        match self.loading.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(entry) => match entry.get() {
                LoadState::InFlight(notify) => LoadGate::WaitOn(notify.clone()),
                LoadState::Ready => LoadGate::YouFetch,
            },
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(LoadState::InFlight(Arc::new(Notify::new())));
                LoadGate::YouFetch
            }
        }
    }

    pub fn finish_loading(&self, site: &SiteIdentity) {
        let key = site.cache_key();
        if let Some((_, LoadState::InFlight(notify))) = self.loading.remove(&key) {
            notify.notify_waiters();
        }
    }

    /// Records that a resolution attempt has completed for `site`, so a
    /// genuine "no manifest exists" result can be told apart from "still
    /// loading" on the next request.
    pub fn mark_resolution_attempted(&self, site: &SiteIdentity) {
        let entry = self.site_entry(site);
        entry.write().resolution_attempted = true;
    }

    /// Replaces the cached manifest for a site iff `candidate` is newer
    /// than (or equal to, first observation) the one cached now. Returns
    /// the set of paths whose hash changed, was added, or was removed.
    pub fn observe_manifest(
        &self,
        site: &SiteIdentity,
        candidate: SiteManifest,
        now_ms: i64,
    ) -> Vec<String> {
        let entry = self.site_entry(site);
        let mut guard = entry.write();

        let is_newer = match &guard.manifest {
            Some(existing) => candidate.version_key() > existing.version_key(),
            None => true,
        };
        if !is_newer {
            return Vec::new();
        }

        let mut changed = Vec::new();
        let old_paths: HashMap<String, String> = guard
            .manifest
            .as_ref()
            .map(|m| {
                m.files
                    .iter()
                    .map(|f| (f.path.clone(), f.sha256.clone()))
                    .collect()
            })
            .unwrap_or_default();
        let new_paths: HashMap<String, String> = candidate
            .files
            .iter()
            .map(|f| (f.path.clone(), f.sha256.clone()))
            .collect();

        for (path, hash) in &new_paths {
            if old_paths.get(path) != Some(hash) {
                changed.push(path.clone());
            }
        }
        for path in old_paths.keys() {
            if !new_paths.contains_key(path) {
                changed.push(path.clone());
            }
        }

        let was_empty = guard.manifest_found_but_empty || guard.manifest.is_none();
        let is_empty_now = candidate.is_empty();
        if was_empty != is_empty_now {
            // Empty <-> populated transitions affect every path on the
            // non-empty side so loading pages and open tabs both reload.
            let affected: Vec<&String> = if is_empty_now {
                old_paths.keys().collect()
            } else {
                new_paths.keys().collect()
            };
            for path in affected {
                if !changed.contains(path) {
                    changed.push(path.clone());
                }
            }
        }

        for path in &changed {
            guard.path_updated_at.insert(path.clone(), now_ms);
            self.invalidate_path(site, &old_paths, path);
        }

        guard.manifest_found_but_empty = candidate.is_empty();
        guard.manifest = Some(candidate);
        changed
    }

    fn invalidate_path(&self, site: &SiteIdentity, old_paths: &HashMap<String, String>, path: &str) {
        if let Some(hash) = old_paths.get(path) {
            self.blobs
                .remove(&BlobKey::new(site, hash, Variant::Raw));
            self.blobs
                .remove(&BlobKey::new(site, hash, Variant::Decompressed));
        }
    }

    pub fn get_blob(&self, site: &SiteIdentity, hash: &str, variant: Variant) -> Option<Vec<u8>> {
        if let Some(bytes) = self.blobs.get(&BlobKey::new(site, hash, variant)) {
            return Some(bytes.clone());
        }
        self.read_disk(site, hash, variant).ok().flatten()
    }

    pub fn put_blob(&self, site: &SiteIdentity, hash: &str, variant: Variant, bytes: Vec<u8>) {
        self.blobs
            .insert(BlobKey::new(site, hash, variant), bytes.clone());
        let _ = self.write_disk(site, hash, variant, &bytes);
    }

    pub fn invalidate_blob(&self, site: &SiteIdentity, hash: &str, variant: Variant) {
        self.blobs.remove(&BlobKey::new(site, hash, variant));
    }

    fn disk_path(&self, site: &SiteIdentity, hash: &str, variant: Variant) -> Option<PathBuf> {
        let root = self.disk_root.as_ref()?;
        let (npub, leaf) = site.disk_subdir();
        let mut path = root.clone();
        path.push(npub);
        path.push(leaf);
        let filename = match variant {
            Variant::Raw => hash.to_lowercase(),
            Variant::Decompressed => format!("{}-decompressed", hash.to_lowercase()),
        };
        path.push(filename);
        Some(path)
    }

    fn read_disk(
        &self,
        site: &SiteIdentity,
        hash: &str,
        variant: Variant,
    ) -> Result<Option<Vec<u8>>, CacheError> {
        let Some(path) = self.disk_path(site, hash, variant) else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(std::fs::read(path)?))
    }

    fn write_disk(
        &self,
        site: &SiteIdentity,
        hash: &str,
        variant: Variant,
        bytes: &[u8],
    ) -> Result<(), CacheError> {
        let Some(path) = self.disk_path(site, hash, variant) else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, bytes)?;
        Ok(())
    }

    fn manifest_path(&self, site: &SiteIdentity) -> Option<PathBuf> {
        let root = self.disk_root.as_ref()?;
        let (npub, leaf) = site.disk_subdir();
        let mut path = root.clone();
        path.push(npub);
        path.push(leaf);
        path.push("manifest.json");
        Some(path)
    }

    pub fn persist_manifest(&self, site: &SiteIdentity, manifest: &SiteManifest) -> Result<(), CacheError> {
        let Some(path) = self.manifest_path(site) else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let stored = StoredManifest {
            event_json: manifest.event.as_json(),
        };
        std::fs::write(path, serde_json::to_vec_pretty(&stored)?)?;
        Ok(())
    }

    pub fn load_manifest_from_disk(&self, site: &SiteIdentity) -> Result<Option<Event>, CacheError> {
        let Some(path) = self.manifest_path(site) else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)?;
        let stored: StoredManifest = serde_json::from_str(&contents)?;
        let event = Event::from_json(&stored.event_json)
            .map_err(|e| CacheError::InvalidEvent(e.to_string()))?;
        Ok(Some(event))
    }

    pub fn last_updated(&self, site: &SiteIdentity, path: &str) -> Option<i64> {
        let entry = self.site_entry(site);
        let guard = entry.read();
        guard.path_updated_at.get(path).copied()
    }
}
