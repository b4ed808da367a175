//! Derives a site identity from an HTTP request hostname.
//!
//! Hostnames look like `<npub>.<suffix>` (root site) or
//! `<identifier>.<npub>.<suffix>` (named site). See `spec.md` §4.F "Host
//! parsing".

use nostr_sdk::prelude::*;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HostError {
    #[error("empty host")]
    Empty,
    #[error("invalid npub label: {0}")]
    InvalidNpub(String),
    #[error("invalid identifier label: {0}")]
    InvalidIdentifier(String),
    #[error("host does not resolve to a site")]
    NotASite,
}

/// `(pubkey, identifier)`. `identifier = None` means the root site.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SiteIdentity {
    pub pubkey: PublicKey,
    pub identifier: Option<String>,
}

impl SiteIdentity {
    pub fn cache_key(&self) -> String {
        match &self.identifier {
            Some(id) => format!("{}/{}", self.pubkey.to_hex(), id),
            None => format!("{}/root", self.pubkey.to_hex()),
        }
    }

    pub fn disk_subdir(&self) -> (String, String) {
        let npub = self.pubkey.to_bech32().unwrap_or_else(|_| self.pubkey.to_hex());
        let leaf = self.identifier.clone().unwrap_or_else(|| "root".to_string());
        (npub, leaf)
    }
}

/// Whether a bare `localhost`/`127.0.0.1`/`0.0.0.0` host was seen; the
/// gateway redirects these to the configured default site.
pub enum HostResolution {
    Site(SiteIdentity),
    BareLocalhost,
}

fn is_bare_localhost(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "0.0.0.0")
}

fn valid_identifier_label(label: &str) -> bool {
    !label.is_empty()
        && label
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Parses the `Host` header (port already stripped by the caller) into a
/// site identity, per spec.md §4.F.
pub fn resolve_host(host: &str) -> Result<HostResolution, HostError> {
    if host.is_empty() {
        return Err(HostError::Empty);
    }

    if is_bare_localhost(host) {
        return Ok(HostResolution::BareLocalhost);
    }

    let labels: Vec<&str> = host.split('.').collect();
    if labels.is_empty() {
        return Err(HostError::Empty);
    }

    if labels[0].starts_with("npub") {
        let pubkey = PublicKey::from_bech32(labels[0])
            .map_err(|_| HostError::InvalidNpub(labels[0].to_string()))?;
        return Ok(HostResolution::Site(SiteIdentity {
            pubkey,
            identifier: None,
        }));
    }

    if labels.len() >= 3 && labels[1].starts_with("npub") {
        if !valid_identifier_label(labels[0]) {
            return Err(HostError::InvalidIdentifier(labels[0].to_string()));
        }
        let pubkey = PublicKey::from_bech32(labels[1])
            .map_err(|_| HostError::InvalidNpub(labels[1].to_string()))?;
        return Ok(HostResolution::Site(SiteIdentity {
            pubkey,
            identifier: Some(labels[0].to_string()),
        }));
    }

    Err(HostError::NotASite)
}

/// Strips a trailing `:<port>` from a `Host` header value.
pub fn strip_port(host: &str) -> &str {
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_npub() -> String {
        Keys::generate().public_key().to_bech32().unwrap()
    }

    #[test]
    fn bare_localhost_redirects() {
        assert!(matches!(
            resolve_host("localhost").unwrap(),
            HostResolution::BareLocalhost
        ));
        assert!(matches!(
            resolve_host("127.0.0.1").unwrap(),
            HostResolution::BareLocalhost
        ));
    }

    #[test]
    fn root_site_from_npub_label() {
        let npub = sample_npub();
        let host = format!("{npub}.localhost");
        match resolve_host(&host).unwrap() {
            HostResolution::Site(identity) => assert!(identity.identifier.is_none()),
            _ => panic!("expected site"),
        }
    }

    #[test]
    fn named_site_from_identifier_and_npub() {
        let npub = sample_npub();
        let host = format!("blog.{npub}.localhost");
        match resolve_host(&host).unwrap() {
            HostResolution::Site(identity) => {
                assert_eq!(identity.identifier.as_deref(), Some("blog"))
            }
            _ => panic!("expected site"),
        }
    }

    #[test]
    fn invalid_npub_label_is_rejected() {
        let err = resolve_host("npub1notreallyanpub.localhost").unwrap_err();
        assert!(matches!(err, HostError::InvalidNpub(_)));
    }

    #[test]
    fn unrelated_two_label_host_is_not_a_site() {
        let err = resolve_host("example.com").unwrap_err();
        assert_eq!(err, HostError::NotASite);
    }

    #[test]
    fn strip_port_removes_numeric_suffix() {
        assert_eq!(strip_port("example.com:6798"), "example.com");
        assert_eq!(strip_port("example.com"), "example.com");
    }
}
