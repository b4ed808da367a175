use std::collections::{HashMap, HashSet};
use std::time::Duration;

use nostr_sdk::prelude::*;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum RelayPoolError {
    #[error("nostr error: {0}")]
    Nostr(#[from] nostr_sdk::prelude::Error),
}

/// An event together with the set of relays that delivered it.
#[derive(Debug, Clone)]
pub struct RelayEvent {
    pub relays: HashSet<Url>,
    pub event: Event,
}

/// Per-relay result of a publish attempt.
#[derive(Debug, Clone)]
pub struct PublishOutcome {
    pub relay: Url,
    pub accepted: bool,
    pub message: Option<String>,
}

/// Talks to a set of relay URLs on demand. Connections are short-lived: a
/// fresh ephemeral client is opened per call and torn down afterwards,
/// matching the gateway's read-mostly, fan-out-then-forget access pattern.
#[derive(Clone, Default)]
pub struct RelayPool;

impl RelayPool {
    pub fn new() -> Self {
        Self
    }

    /// Opens a subscription against every relay in `relays`, forwards
    /// matching events, and returns once every relay has signalled
    /// end-of-stored-events or `timeout` elapses, whichever is first.
    /// Stragglers past the deadline are abandoned; their events are never
    /// observed by the caller.
    pub async fn request(
        &self,
        relays: &[Url],
        filter: Filter,
        timeout: Duration,
    ) -> Result<Vec<RelayEvent>, RelayPoolError> {
        if relays.is_empty() {
            return Ok(Vec::new());
        }

        let keys = Keys::generate();
        let opts = Options::new().connection_timeout(Some(timeout));
        let client = Client::with_opts(&keys, opts);

        for relay in relays {
            if let Err(err) = client.add_relay(relay.as_str()).await {
                tracing::warn!(relay = %relay, error = %err, "failed to add relay, skipping");
            }
        }
        client.connect().await;

        let events = client.get_events_of(vec![filter], Some(timeout)).await?;

        let _ = client.disconnect().await;

        let relay_set: HashSet<Url> = relays.iter().cloned().collect();
        let mut collected: HashMap<EventId, RelayEvent> = HashMap::new();
        for event in events {
            collected
                .entry(event.id)
                .or_insert_with(|| RelayEvent {
                    relays: relay_set.clone(),
                    event,
                });
        }

        Ok(collected.into_values().collect())
    }

    /// Best-effort publish to every relay in `relays`; a failure on one
    /// relay never prevents delivery to the others.
    pub async fn publish(
        &self,
        relays: &[Url],
        event: Event,
    ) -> Result<Vec<PublishOutcome>, RelayPoolError> {
        if relays.is_empty() {
            return Ok(Vec::new());
        }

        let keys = Keys::generate();
        let client = Client::new(&keys);
        for relay in relays {
            if let Err(err) = client.add_relay(relay.as_str()).await {
                tracing::warn!(relay = %relay, error = %err, "failed to add relay, skipping");
            }
        }
        client.connect().await;

        let mut outcomes = Vec::with_capacity(relays.len());
        for relay in relays {
            match client.send_event_to(relay.as_str(), event.clone()).await {
                Ok(_) => outcomes.push(PublishOutcome {
                    relay: relay.clone(),
                    accepted: true,
                    message: None,
                }),
                Err(err) => outcomes.push(PublishOutcome {
                    relay: relay.clone(),
                    accepted: false,
                    message: Some(err.to_string()),
                }),
            }
        }

        let _ = client.disconnect().await;
        Ok(outcomes)
    }
}
