//! nsyte-gateway: resolves nsite hostnames to signed manifests on Nostr relays
//! and serves their content-addressed blobs from a pool of Blossom servers.

pub mod blob;
pub mod cache;
pub mod config;
pub mod gateway;
pub mod identity;
pub mod manifest;
pub mod negotiation;
pub mod profile;
pub mod relay;
pub mod store;
pub mod watcher;

pub use config::GatewayConfig;
pub use gateway::{build_router, GatewayState};
