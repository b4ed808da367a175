//! Layered configuration: CLI flags > config file > environment variables >
//! built-in defaults. Mirrors the teacher's `RelayDirectory::load` pattern
//! (a typed struct deserialized from YAML with hardcoded fallbacks) folded
//! together with a `clap` CLI surface for the gateway binary itself.

use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use directories::ProjectDirs;
use nostr_sdk::prelude::*;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

const DEFAULT_PORT: u16 = 6798;
const DEFAULT_PROFILE_RELAYS: &[&str] = &["wss://relay.damus.io", "wss://nos.lol"];
const DEFAULT_FILE_RELAYS: &[&str] = &["wss://relay.damus.io", "wss://nos.lol"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid URL in config: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("invalid target pubkey: {0}")]
    InvalidPubkey(String),
}

/// On-disk / file config shape. Every field is optional; missing fields fall
/// back to environment variables, then to compiled-in defaults.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    port: Option<u16>,
    target_pubkey: Option<String>,
    target_identifier: Option<String>,
    profile_relays: Option<Vec<String>>,
    file_relays: Option<Vec<String>>,
    default_file_relays: Option<Vec<String>>,
    servers: Option<Vec<String>>,
    cache_dir: Option<PathBuf>,
    allow_fallback_relays: Option<bool>,
    allow_fallback_servers: Option<bool>,
    no_open: Option<bool>,
}

/// CLI surface for the gateway binary. These flags take precedence over the
/// config file and environment variables.
#[derive(Debug, Parser)]
#[command(name = "nsyte-gateway", about = "Resolver gateway for nsite hosting")]
pub struct CliArgs {
    /// Path to a YAML config file.
    #[arg(long, env = "NSYTE_GATEWAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// TCP port to listen on.
    #[arg(long, env = "NSYTE_GATEWAY_PORT")]
    pub port: Option<u16>,

    /// Default site pubkey (hex or npub) bare-localhost redirects to.
    #[arg(long, env = "NSYTE_GATEWAY_TARGET_PUBKEY")]
    pub target_pubkey: Option<String>,

    /// Default site identifier (named site) bare-localhost redirects to.
    #[arg(long, env = "NSYTE_GATEWAY_TARGET_IDENTIFIER")]
    pub target_identifier: Option<String>,

    /// Directory backing the on-disk cache. Disk caching is disabled if unset.
    #[arg(long, env = "NSYTE_GATEWAY_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Widen the relay pool with built-in defaults when configured relays
    /// return nothing.
    #[arg(long)]
    pub allow_fallback_relays: bool,

    /// Widen the blob-server pool with configured fallbacks when a manifest
    /// endorses none and the configured list is empty.
    #[arg(long)]
    pub allow_fallback_servers: bool,

    /// Suppress auto-opening a browser on startup.
    #[arg(long)]
    pub no_open: bool,
}

/// Fully resolved gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub port: u16,
    pub target: Option<SiteTarget>,
    pub profile_relays: Vec<Url>,
    pub file_relays: Vec<Url>,
    pub default_file_relays: Vec<Url>,
    pub servers: Vec<Url>,
    pub cache_dir: Option<PathBuf>,
    pub allow_fallback_relays: bool,
    pub allow_fallback_servers: bool,
    pub no_open: bool,
}

#[derive(Debug, Clone)]
pub struct SiteTarget {
    pub pubkey: PublicKey,
    pub identifier: Option<String>,
}

impl GatewayConfig {
    /// Loads config file (if present) and merges CLI args on top, falling
    /// back to environment-derived defaults for anything still unset.
    pub fn load(args: CliArgs) -> Result<Self, ConfigError> {
        let file_config = match args.config.clone().or_else(default_config_path) {
            Some(path) if path.exists() => load_file_config(&path)?,
            _ => FileConfig::default(),
        };

        let port = args.port.or(file_config.port).unwrap_or(DEFAULT_PORT);

        let target_pubkey_str = args
            .target_pubkey
            .clone()
            .or(file_config.target_pubkey.clone());
        let target_identifier = args
            .target_identifier
            .clone()
            .or(file_config.target_identifier.clone());
        let target = match target_pubkey_str {
            Some(raw) => Some(SiteTarget {
                pubkey: parse_pubkey(&raw)?,
                identifier: target_identifier,
            }),
            None => None,
        };

        let profile_relays = parse_relays(
            file_config.profile_relays.unwrap_or_default(),
            DEFAULT_PROFILE_RELAYS,
        )?;
        let file_relays = parse_relays(
            file_config.file_relays.unwrap_or_default(),
            DEFAULT_FILE_RELAYS,
        )?;
        let default_file_relays = parse_relays(file_config.default_file_relays.unwrap_or_default(), &[])?;

        let servers = file_config
            .servers
            .unwrap_or_default()
            .into_iter()
            .map(|s| Url::parse(&s))
            .collect::<Result<Vec<_>, _>>()?;

        let cache_dir = args.cache_dir.clone().or(file_config.cache_dir);

        Ok(Self {
            port,
            target,
            profile_relays,
            file_relays,
            default_file_relays,
            servers,
            cache_dir,
            allow_fallback_relays: args.allow_fallback_relays
                || file_config.allow_fallback_relays.unwrap_or(false),
            allow_fallback_servers: args.allow_fallback_servers
                || file_config.allow_fallback_servers.unwrap_or(false),
            no_open: args.no_open || file_config.no_open.unwrap_or(false),
        })
    }
}

fn parse_pubkey(raw: &str) -> Result<PublicKey, ConfigError> {
    if raw.starts_with("npub") {
        PublicKey::from_bech32(raw).map_err(|_| ConfigError::InvalidPubkey(raw.to_string()))
    } else {
        PublicKey::from_hex(raw).map_err(|_| ConfigError::InvalidPubkey(raw.to_string()))
    }
}

fn parse_relays(configured: Vec<String>, defaults: &[&str]) -> Result<Vec<Url>, ConfigError> {
    let source: Vec<String> = if configured.is_empty() {
        defaults.iter().map(|s| s.to_string()).collect()
    } else {
        configured
    };
    source
        .into_iter()
        .map(|s| Url::parse(&s))
        .collect::<Result<Vec<_>, _>>()
        .map_err(ConfigError::from)
}

fn load_file_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let contents = fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&contents)?)
}

fn default_config_path() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var("NSYTE_GATEWAY_DATA_DIR") {
        let mut path = PathBuf::from(dir);
        path.push("config.yaml");
        return Some(path);
    }
    ProjectDirs::from("org", "nsyte", "nsyte-gateway").map(|dirs| {
        let mut path = dirs.config_dir().to_path_buf();
        path.push("config.yaml");
        path
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn cli(config: Option<PathBuf>) -> CliArgs {
        CliArgs {
            config,
            port: None,
            target_pubkey: None,
            target_identifier: None,
            cache_dir: None,
            allow_fallback_relays: false,
            allow_fallback_servers: false,
            no_open: false,
        }
    }

    #[test]
    fn defaults_when_no_config_file() {
        let config = GatewayConfig::load(cli(Some(PathBuf::from("/nonexistent/path.yaml")))).unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.profile_relays.len(), DEFAULT_PROFILE_RELAYS.len());
        assert!(config.target.is_none());
    }

    #[test]
    fn file_config_overrides_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "port: 9000\nfile_relays:\n  - wss://relay.example\ncache_dir: /tmp/nsyte-cache"
        )
        .unwrap();
        let config = GatewayConfig::load(cli(Some(file.path().to_path_buf()))).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.file_relays.len(), 1);
        assert_eq!(config.cache_dir, Some(PathBuf::from("/tmp/nsyte-cache")));
    }

    #[test]
    fn cli_flag_overrides_file_config() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "port: 9000").unwrap();
        let mut args = cli(Some(file.path().to_path_buf()));
        args.port = Some(7000);
        let config = GatewayConfig::load(args).unwrap();
        assert_eq!(config.port, 7000);
    }
}
