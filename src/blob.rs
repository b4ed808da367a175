//! Component D: Blob Downloader. Fetches a blob by hash from a prioritised
//! server list, verifying the hash on every response; a mismatch is a
//! failure, never a success.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::Semaphore;
use url::Url;

const DEFAULT_BLOB_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_CONCURRENT_PER_SERVER: usize = 4;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },
    #[error("invalid hash: {0}")]
    InvalidHash(String),
    #[error("no server returned the blob; tried {tried:?}")]
    AllServersFailed { tried: Vec<Url> },
}

pub fn validate_hash(hash: &str) -> Result<(), BlobError> {
    if hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(BlobError::InvalidHash(hash.to_string()));
    }
    Ok(())
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn verify_hash(expected: &str, bytes: &[u8]) -> Result<(), BlobError> {
    let actual = sha256_hex(bytes);
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(BlobError::HashMismatch {
            expected: expected.to_string(),
            actual,
        })
    }
}

/// Fetches blobs by hash from a pool of Blossom servers. Tries servers in
/// the order given and returns bytes from the first one that serves a 2xx
/// response whose sha256 matches. Concurrency to any one server is capped so
/// the gateway stays a polite client even under a burst of distinct blob
/// requests.
pub struct BlobDownloader {
    http: reqwest::Client,
    timeout: Duration,
    server_limits: DashMap<Url, Arc<Semaphore>>,
}

impl Default for BlobDownloader {
    fn default() -> Self {
        Self::new(DEFAULT_BLOB_TIMEOUT)
    }
}

impl BlobDownloader {
    pub fn new(timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            timeout,
            server_limits: DashMap::new(),
        }
    }

    fn limiter_for(&self, server: &Url) -> Arc<Semaphore> {
        self.server_limits
            .entry(server.clone())
            .or_insert_with(|| Arc::new(Semaphore::new(MAX_CONCURRENT_PER_SERVER)))
            .clone()
    }

    pub async fn fetch(&self, hash: &str, servers: &[Url]) -> Result<Vec<u8>, BlobError> {
        validate_hash(hash)?;

        let mut tried = Vec::with_capacity(servers.len());
        for server in servers {
            tried.push(server.clone());
            match self.try_one(server, hash).await {
                Ok(bytes) => return Ok(bytes),
                Err(err) => {
                    tracing::warn!(server = %server, hash, error = %err, "blob fetch failed, trying next server");
                }
            }
        }

        Err(BlobError::AllServersFailed { tried })
    }

    async fn try_one(&self, server: &Url, hash: &str) -> Result<Vec<u8>, BlobError> {
        let limiter = self.limiter_for(server);
        let _permit = limiter.acquire_owned().await.expect("semaphore is never closed");

        let url = server
            .join(hash)
            .map_err(|_| BlobError::InvalidHash(hash.to_string()))?;

        let response = self
            .http
            .get(url)
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?;

        let bytes = response.bytes().await?.to_vec();
        verify_hash(hash, &bytes)?;
        Ok(bytes)
    }
}
