//! Component A: Relay Pool. Multiplexes requests/publishes over a set of
//! Nostr relay URLs and delivers deduplicated events with a bounded wait.

mod pool;

pub use pool::{PublishOutcome, RelayEvent, RelayPool, RelayPoolError};
