//! Component B: Event Store. An in-memory index of replaceable events keyed
//! by `(kind, pubkey, d)`, keeping only the event with the largest
//! `(created_at, id)` per key.

use dashmap::DashMap;
use nostr_sdk::prelude::*;

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct ReplaceableKey {
    kind: u64,
    pubkey: PublicKey,
    identifier: String,
}

/// Extracts the `d` tag value, defaulting to the empty string (root events).
fn identifier_of(event: &Event) -> String {
    event
        .tags
        .iter()
        .find_map(|tag| {
            let values = tag.as_vec();
            if values.first().map(String::as_str) == Some("d") {
                values.get(1).cloned()
            } else {
                None
            }
        })
        .unwrap_or_default()
}

fn wins(candidate: &Event, incumbent: &Event) -> bool {
    (candidate.created_at, candidate.id) > (incumbent.created_at, incumbent.id)
}

/// Not persisted; rebuilt from relay responses on every resolution.
#[derive(Default)]
pub struct EventStore {
    events: DashMap<ReplaceableKey, Event>,
}

impl EventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `event`, keeping the winner by `(created_at, id)`. Returns
    /// `true` if `event` became (or remains) the stored winner for its key.
    pub fn insert(&self, event: Event) -> bool {
        let key = ReplaceableKey {
            kind: event.kind.as_u64(),
            pubkey: event.pubkey,
            identifier: identifier_of(&event),
        };

        match self.events.get(&key) {
            Some(existing) if !wins(&event, &existing) => false,
            _ => {
                self.events.insert(key, event);
                true
            }
        }
    }

    pub fn get_replaceable(
        &self,
        kind: u64,
        pubkey: PublicKey,
        identifier: &str,
    ) -> Option<Event> {
        let key = ReplaceableKey {
            kind,
            pubkey,
            identifier: identifier.to_string(),
        };
        self.events.get(&key).map(|entry| entry.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event_with(keys: &Keys, d: &str, created_at: u64) -> Event {
        EventBuilder::new(Kind::from(15128u16), "", [Tag::identifier(d)])
            .custom_created_at(Timestamp::from(created_at))
            .to_event(keys)
            .unwrap()
    }

    #[test]
    fn newer_event_replaces_older() {
        let keys = Keys::generate();
        let store = EventStore::new();
        let older = event_with(&keys, "", 100);
        let newer = event_with(&keys, "", 200);

        assert!(store.insert(older.clone()));
        assert!(store.insert(newer.clone()));

        let winner = store
            .get_replaceable(15128, keys.public_key(), "")
            .unwrap();
        assert_eq!(winner.id, newer.id);
    }

    #[test]
    fn older_event_does_not_replace_newer() {
        let keys = Keys::generate();
        let store = EventStore::new();
        let newer = event_with(&keys, "", 200);
        let older = event_with(&keys, "", 100);

        store.insert(newer.clone());
        assert!(!store.insert(older));

        let winner = store
            .get_replaceable(15128, keys.public_key(), "")
            .unwrap();
        assert_eq!(winner.id, newer.id);
    }

    #[test]
    fn distinct_identifiers_do_not_collide() {
        let keys = Keys::generate();
        let store = EventStore::new();
        let root = event_with(&keys, "", 100);
        let named = event_with(&keys, "blog", 100);

        store.insert(root.clone());
        store.insert(named.clone());

        assert_eq!(
            store.get_replaceable(15128, keys.public_key(), "").unwrap().id,
            root.id
        );
        assert_eq!(
            store
                .get_replaceable(15128, keys.public_key(), "blog")
                .unwrap()
                .id,
            named.id
        );
    }
}
