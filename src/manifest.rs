//! Component C: Manifest Resolver. Fetches the newest site-manifest event
//! for `(pubkey, identifier?)` and exposes its path→hash map and endorsed
//! blob-server list.

use std::collections::HashMap;
use std::time::Duration;

use nostr_sdk::prelude::*;
use thiserror::Error;
use url::Url;

use crate::relay::{RelayPool, RelayPoolError};
use crate::store::EventStore;

pub const ROOT_KIND: u64 = 15128;
pub const NAMED_KIND: u64 = 35128;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("relay pool error: {0}")]
    Relay(#[from] RelayPoolError),
    #[error("manifest event failed signature verification: {0}")]
    InvalidSignature(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: String,
    pub sha256: String,
}

/// A resolved, signed site manifest: its path→hash map plus whatever
/// `server`/`relay` hints the publisher endorsed.
#[derive(Debug, Clone)]
pub struct SiteManifest {
    pub event: Event,
    pub files: Vec<FileEntry>,
    pub servers: Vec<Url>,
    pub relays: Vec<Url>,
}

impl SiteManifest {
    pub fn created_at(&self) -> Timestamp {
        self.event.created_at
    }

    pub fn id(&self) -> EventId {
        self.event.id
    }

    /// `(created_at, id)` ordering key used for replaceability comparisons.
    pub fn version_key(&self) -> (Timestamp, EventId) {
        (self.created_at(), self.id())
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn find(&self, path: &str) -> Option<&FileEntry> {
        self.files.iter().find(|entry| entry.path == path)
    }
}

fn normalize_path(path: &str) -> String {
    if path.is_empty() {
        "/".to_string()
    } else if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

pub(crate) fn parse_manifest_event(event: &Event) -> Result<SiteManifest, ManifestError> {
    event
        .verify()
        .map_err(|e| ManifestError::InvalidSignature(e.to_string()))?;

    let mut files = Vec::new();
    let mut servers = Vec::new();
    let mut relays = Vec::new();

    for tag in &event.tags {
        let values = tag.as_vec();
        match values.first().map(String::as_str) {
            Some("path") => {
                if let (Some(path), Some(hash)) = (values.get(1), values.get(2)) {
                    files.push(FileEntry {
                        path: normalize_path(path),
                        sha256: hash.to_lowercase(),
                    });
                }
            }
            Some("server") => {
                if let Some(url) = values.get(1).and_then(|v| Url::parse(v).ok()) {
                    servers.push(url);
                }
            }
            Some("relay") => {
                if let Some(url) = values.get(1).and_then(|v| Url::parse(v).ok()) {
                    relays.push(url);
                }
            }
            _ => {}
        }
    }

    Ok(SiteManifest {
        event: event.clone(),
        files,
        servers,
        relays,
    })
}

/// Resolves the newest manifest event for a site and folds it into an
/// `EventStore`, picking the winner by `(created_at, id)`.
pub struct ManifestResolver {
    pool: RelayPool,
}

impl Default for ManifestResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ManifestResolver {
    pub fn new() -> Self {
        Self {
            pool: RelayPool::new(),
        }
    }

    /// Fetches the newest manifest for `(pubkey, identifier)` over `relays`.
    /// Returns `None` if the relay set yielded no events for this site.
    pub async fn resolve(
        &self,
        store: &EventStore,
        relays: &[Url],
        pubkey: PublicKey,
        identifier: Option<&str>,
        timeout: Duration,
    ) -> Result<Option<SiteManifest>, ManifestError> {
        let kind = if identifier.is_some() {
            NAMED_KIND
        } else {
            ROOT_KIND
        };

        let mut filter = Filter::new().kind(Kind::from(kind)).author(pubkey);
        if let Some(id) = identifier {
            filter = filter.identifier(id);
        }

        let events = self.pool.request(relays, filter, timeout).await?;

        let mut parsed: HashMap<EventId, SiteManifest> = HashMap::new();
        for relay_event in events {
            match parse_manifest_event(&relay_event.event) {
                Ok(manifest) => {
                    store.insert(manifest.event.clone());
                    parsed.insert(manifest.id(), manifest);
                }
                Err(err) => {
                    tracing::warn!(pubkey = %pubkey, error = %err, "skipping invalid manifest event");
                }
            }
        }

        let id = identifier.unwrap_or("");
        let winner_event = store.get_replaceable(kind, pubkey, id);
        Ok(winner_event.and_then(|event| parsed.remove(&event.id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest_event(keys: &Keys, identifier: &str, created_at: u64, files: &[(&str, &str)]) -> Event {
        let mut tags = vec![Tag::identifier(identifier)];
        for (path, hash) in files {
            tags.push(Tag::parse(["path", path, hash]).unwrap());
        }
        let kind = if identifier.is_empty() { ROOT_KIND } else { NAMED_KIND };
        EventBuilder::new(Kind::from(kind), "", tags)
            .custom_created_at(Timestamp::from(created_at))
            .to_event(keys)
            .unwrap()
    }

    #[test]
    fn parses_path_and_server_tags() {
        let keys = Keys::generate();
        let mut tags = vec![Tag::identifier("")];
        tags.push(Tag::parse(["path", "/index.html", "aaaa"]).unwrap());
        tags.push(Tag::parse(["server", "https://blossom.example"]).unwrap());
        let event = EventBuilder::new(Kind::from(ROOT_KIND), "", tags)
            .to_event(&keys)
            .unwrap();

        let manifest = parse_manifest_event(&event).unwrap();
        assert_eq!(manifest.files.len(), 1);
        assert_eq!(manifest.files[0].path, "/index.html");
        assert_eq!(manifest.servers.len(), 1);
    }

    #[test]
    fn store_keeps_newest_by_created_at() {
        let keys = Keys::generate();
        let store = EventStore::new();
        let older = manifest_event(&keys, "", 100, &[("/a.html", "h1")]);
        let newer = manifest_event(&keys, "", 200, &[("/a.html", "h2")]);

        store.insert(older);
        store.insert(newer.clone());

        let winner = store.get_replaceable(ROOT_KIND, keys.public_key(), "").unwrap();
        assert_eq!(winner.id, newer.id);
    }
}
