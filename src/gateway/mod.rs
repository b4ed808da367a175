//! Component F: Gateway HTTP Server. Accepts requests, derives site
//! identity from the hostname, orchestrates relay/manifest/blob/cache, and
//! serves responses with live-reload injection.

mod reload;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderName, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::Router;
use nostr_sdk::prelude::*;
use url::Url;

use crate::blob::BlobDownloader;
use crate::cache::{LoadGate, TieredCache, Variant};
use crate::config::GatewayConfig;
use crate::identity::{self, HostError, HostResolution, SiteIdentity};
use crate::manifest::{parse_manifest_event, ManifestResolver};
use crate::negotiation::{self, Compression};
use crate::profile::ProfileCache;
use crate::store::EventStore;
use crate::watcher::UpdateWatcher;

const T_REQ_MANIFEST: Duration = Duration::from_secs(15);
const T_BLOB: Duration = Duration::from_secs(30);
const T_PROFILE: Duration = Duration::from_secs(10);

const ROOT_CANDIDATES: &[&str] = &[
    "index.html",
    "index.htm",
    "README.md",
    "docs/index.html",
    "dist/index.html",
    "public/index.html",
    "build/index.html",
    "404.html",
    "docs/404.html",
];

pub struct GatewayState {
    pub config: GatewayConfig,
    pub store: Arc<EventStore>,
    pub resolver: ManifestResolver,
    pub downloader: BlobDownloader,
    pub cache: Arc<TieredCache>,
    pub watcher: Arc<UpdateWatcher>,
    pub profile_cache: ProfileCache,
}

impl GatewayState {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            cache: Arc::new(TieredCache::new(config.cache_dir.clone())),
            store: Arc::new(EventStore::new()),
            resolver: ManifestResolver::new(),
            downloader: BlobDownloader::new(T_BLOB),
            watcher: Arc::new(UpdateWatcher::new()),
            profile_cache: ProfileCache::new(),
            config,
        }
    }
}

pub fn build_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/_nsyte/healthz", get(healthz))
        .route("/_nsyte/check-updates", get(check_updates))
        .fallback(get(serve_site))
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

fn site_from_headers(headers: &HeaderMap) -> Result<HostResolution, HostError> {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    identity::resolve_host(identity::strip_port(host))
}

#[derive(serde::Deserialize)]
struct CheckUpdatesParams {
    path: Option<String>,
    since: Option<i64>,
}

async fn check_updates(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Query(params): Query<CheckUpdatesParams>,
) -> Response {
    let Some(path) = params.path else {
        return (StatusCode::BAD_REQUEST, "missing path").into_response();
    };
    let since = params.since.unwrap_or(0);

    let site = match site_from_headers(&headers) {
        Ok(HostResolution::Site(site)) => site,
        _ => return (StatusCode::BAD_REQUEST, "invalid host").into_response(),
    };

    let timestamp = state.cache.last_updated(&site, &path).unwrap_or(0);
    let body = reload::CheckUpdatesResponse {
        has_update: timestamp > since,
        timestamp,
    };
    axum::Json(body).into_response()
}

async fn serve_site(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    uri: axum::http::Uri,
) -> Response {
    let resolution = match site_from_headers(&headers) {
        Ok(resolution) => resolution,
        Err(_) => return (StatusCode::BAD_REQUEST, "invalid host").into_response(),
    };

    let site = match resolution {
        HostResolution::BareLocalhost => {
            return redirect_to_target(&state.config);
        }
        HostResolution::Site(site) => site,
    };

    let raw_path = uri.path().to_string();
    let accepted = negotiation::parse_accept_encoding(
        headers
            .get(header::ACCEPT_ENCODING)
            .and_then(|v| v.to_str().ok()),
    );

    let entry = state.cache.snapshot(&site);
    let (has_manifest, resolution_attempted) = {
        let guard = entry.read();
        (guard.manifest.is_some(), guard.resolution_attempted)
    };

    if !has_manifest {
        if let Some(manifest) = load_disk_manifest(&state, &site) {
            // A persisted manifest survives a process restart; serve from
            // it immediately while a relay round-trip refreshes it in the
            // background, rather than forcing every warm site back through
            // the cold loading page.
            let now_ms = Timestamp::now().as_u64() as i64 * 1000;
            state.cache.observe_manifest(&site, manifest, now_ms);
            ensure_manifest_loading(&state, &site);
        } else if resolution_attempted {
            // The relay set was queried and genuinely has no manifest for
            // this site; this is "not found", not "still loading".
            return built_in_not_found(&headers);
        } else {
            ensure_manifest_loading(&state, &site);
            return cold_response(&raw_path, &headers);
        }
    }

    let manifest = entry.read().manifest.clone().expect("checked above");

    if manifest.is_empty() {
        // Open question resolved in favor of the original behaviour: an
        // empty manifest is a 200 "no content" page, not a 404.
        return html_response(StatusCode::OK, "<!doctype html><html><body>empty site</body></html>".to_string(), &headers, None, &site, &raw_path, &state);
    }

    let logical_candidates = logical_path_candidates(&raw_path);
    let mut path_existed_but_unservable = false;

    for logical in &logical_candidates {
        let candidates = negotiation::candidates_for(&manifest, logical, accepted);
        if candidates.is_empty() {
            continue;
        }
        path_existed_but_unservable = true;
        for candidate in candidates {
            match serve_candidate(&state, &site, &candidate.entry, candidate.compression).await {
                Some(bytes) => {
                    spawn_background_refresh(&state, &site);
                    return respond_with_bytes(
                        logical,
                        &candidate.entry.sha256,
                        bytes,
                        StatusCode::OK,
                        &headers,
                        &site,
                        &state,
                    );
                }
                None => continue,
            }
        }
    }

    // The manifest lists this path but every candidate (every compression
    // variant, on every server) failed to download or verify: the content
    // exists but is unreachable, which is upstream unavailability, not a 404.
    if path_existed_but_unservable {
        let tried = endorsed_and_configured_servers(&state, &site).await;
        return upstream_unavailable(&tried);
    }

    // fall back to 404.html (with its own variants) before a built-in page
    let not_found_candidates = negotiation::candidates_for(&manifest, "/404.html", accepted);
    for candidate in not_found_candidates {
        if let Some(bytes) = serve_candidate(&state, &site, &candidate.entry, candidate.compression).await {
            spawn_background_refresh(&state, &site);
            return respond_with_bytes(
                "/404.html",
                &candidate.entry.sha256,
                bytes,
                StatusCode::NOT_FOUND,
                &headers,
                &site,
                &state,
            );
        }
    }

    built_in_not_found(&headers)
}

/// Seeds a `SiteEntry` from the on-disk manifest tier, if one exists and
/// parses cleanly. Does not touch `resolution_attempted`: the disk copy may
/// be stale, so a relay refresh is still warranted afterward.
fn load_disk_manifest(state: &GatewayState, site: &SiteIdentity) -> Option<crate::manifest::SiteManifest> {
    let event = match state.cache.load_manifest_from_disk(site) {
        Ok(Some(event)) => event,
        Ok(None) => return None,
        Err(err) => {
            tracing::warn!(site = %site.cache_key(), error = %err, "failed to read manifest from disk");
            return None;
        }
    };

    match parse_manifest_event(&event) {
        Ok(manifest) => Some(manifest),
        Err(err) => {
            tracing::warn!(site = %site.cache_key(), error = %err, "ignoring invalid manifest on disk");
            None
        }
    }
}

fn ensure_manifest_loading(state: &Arc<GatewayState>, site: &SiteIdentity) {
    match state.cache.begin_loading(site) {
        LoadGate::YouFetch => {
            let state = state.clone();
            let site = site.clone();
            tokio::spawn(async move {
                let relays = state.config.file_relays.clone();
                let result = state
                    .resolver
                    .resolve(&state.store, &relays, site.pubkey, site.identifier.as_deref(), T_REQ_MANIFEST)
                    .await;

                let resolved = match result {
                    Ok(Some(manifest)) => Some(manifest),
                    Ok(None) if state.config.allow_fallback_relays && !state.config.default_file_relays.is_empty() => {
                        state
                            .resolver
                            .resolve(
                                &state.store,
                                &state.config.default_file_relays,
                                site.pubkey,
                                site.identifier.as_deref(),
                                T_REQ_MANIFEST,
                            )
                            .await
                            .ok()
                            .flatten()
                    }
                    Ok(None) => None,
                    Err(err) => {
                        tracing::warn!(site = %site.cache_key(), error = %err, "initial manifest resolution failed");
                        None
                    }
                };

                if let Some(manifest) = resolved {
                    let now_ms = Timestamp::now().as_u64() as i64 * 1000;
                    state.cache.observe_manifest(&site, manifest.clone(), now_ms);
                    if let Err(err) = state.cache.persist_manifest(&site, &manifest) {
                        tracing::warn!(site = %site.cache_key(), error = %err, "failed to persist manifest");
                    }
                }

                state.cache.mark_resolution_attempted(&site);
                state.cache.finish_loading(&site);
            });
        }
        LoadGate::WaitOn(_) => {}
    }
}

/// Kicks off one background manifest re-check for `site`, unless the
/// watcher already has one in flight. Called after every successful
/// response so a populated cache stays fresh without blocking requests on
/// relay round-trips.
fn spawn_background_refresh(state: &Arc<GatewayState>, site: &SiteIdentity) {
    state.watcher.maybe_spawn(
        state.cache.clone(),
        state.store.clone(),
        site.clone(),
        site.pubkey,
        state.config.file_relays.clone(),
        state.config.default_file_relays.clone(),
        state.config.allow_fallback_relays,
        T_REQ_MANIFEST,
    );
}

fn cold_response(raw_path: &str, headers: &HeaderMap) -> Response {
    if accepts_html(headers) {
        let mut response = (
            StatusCode::OK,
            [(header::CACHE_CONTROL, "no-cache"), (header::CONTENT_TYPE, "text/html; charset=utf-8")],
            reload::loading_page_html(),
        )
            .into_response();
        response.headers_mut().insert(
            HeaderName::from_static("refresh"),
            "2".parse().unwrap(),
        );
        response
    } else {
        let _ = raw_path;
        (StatusCode::NOT_FOUND, "not found").into_response()
    }
}

fn accepts_html(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("text/html") || v.contains("*/*"))
        .unwrap_or(true)
}

fn redirect_to_target(config: &GatewayConfig) -> Response {
    let Some(target) = &config.target else {
        return (StatusCode::BAD_REQUEST, "no default site configured").into_response();
    };
    let npub = target.pubkey.to_bech32().unwrap_or_else(|_| target.pubkey.to_hex());
    let host = match &target.identifier {
        Some(id) => format!("{id}.{npub}.localhost:{}", config.port),
        None => format!("{npub}.localhost:{}", config.port),
    };
    let mut response = Redirect::to(&format!("http://{host}/")).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, "no-cache".parse().unwrap());
    response
}

fn logical_path_candidates(raw_path: &str) -> Vec<String> {
    let trimmed = raw_path.trim_start_matches('/');

    if trimmed.is_empty() {
        return ROOT_CANDIDATES.iter().map(|s| format!("/{s}")).collect();
    }

    let mut out = vec![format!("/{trimmed}")];
    if raw_path.ends_with('/') || !trimmed.contains('.') {
        let base = trimmed.trim_end_matches('/');
        out.push(format!("/{base}/index.html"));
        out.push(format!("/{base}/index.htm"));
        out.push(format!("/{base}/README.md"));
    }
    out
}

async fn serve_candidate(
    state: &GatewayState,
    site: &SiteIdentity,
    entry: &crate::manifest::FileEntry,
    compression: Compression,
) -> Option<Vec<u8>> {
    let hash = &entry.sha256;

    if compression != Compression::None {
        if let Some(bytes) = state.cache.get_blob(site, hash, Variant::Decompressed) {
            return Some(bytes);
        }
    } else if let Some(bytes) = state.cache.get_blob(site, hash, Variant::Raw) {
        return Some(bytes);
    }

    let raw = if let Some(bytes) = state.cache.get_blob(site, hash, Variant::Raw) {
        bytes
    } else {
        let servers = endorsed_and_configured_servers(state, site).await;
        match state.downloader.fetch(hash, &servers).await {
            Ok(bytes) => {
                state.cache.put_blob(site, hash, Variant::Raw, bytes.clone());
                bytes
            }
            Err(err) => {
                tracing::warn!(hash = %hash, error = %err, "blob download failed for all servers");
                return None;
            }
        }
    };

    if compression == Compression::None {
        return Some(raw);
    }

    match negotiation::decompress(compression, &raw) {
        Ok(decompressed) => {
            state
                .cache
                .put_blob(site, hash, Variant::Decompressed, decompressed.clone());
            Some(decompressed)
        }
        Err(err) => {
            tracing::warn!(hash = %hash, error = %err, "decompression failed, trying next candidate");
            state.cache.invalidate_blob(site, hash, Variant::Raw);
            state.cache.invalidate_blob(site, hash, Variant::Decompressed);
            None
        }
    }
}

/// Resolves the blob-server pool for a path download: the manifest's own
/// `server` tags, merged with the statically configured list, falling back
/// to the publisher's kind:10063 blob-server list (via the profile cache)
/// when both of those are empty and fallback servers are allowed.
async fn endorsed_and_configured_servers(state: &GatewayState, site: &SiteIdentity) -> Vec<Url> {
    let entry = state.cache.snapshot(site);
    let guard = entry.read();
    let endorsed = guard
        .manifest
        .as_ref()
        .map(|m| m.servers.clone())
        .unwrap_or_default();
    drop(guard);

    let mut servers = endorsed;
    for server in &state.config.servers {
        if !servers.contains(server) {
            servers.push(server.clone());
        }
    }

    if servers.is_empty() && state.config.allow_fallback_servers {
        let bundle = state
            .profile_cache
            .get(&state.config.profile_relays, site.pubkey, T_PROFILE)
            .await;
        for server in bundle.servers {
            if !servers.contains(&server) {
                servers.push(server);
            }
        }
    }

    servers
}

fn respond_with_bytes(
    logical_path: &str,
    hash: &str,
    bytes: Vec<u8>,
    status: StatusCode,
    headers: &HeaderMap,
    site: &SiteIdentity,
    state: &GatewayState,
) -> Response {
    let etag = format!("\"{hash}\"");
    if let Some(if_none_match) = headers.get(header::IF_NONE_MATCH).and_then(|v| v.to_str().ok()) {
        if if_none_match == etag {
            return (
                StatusCode::NOT_MODIFIED,
                [
                    (header::ETAG, etag.as_str()),
                    (header::CACHE_CONTROL, "public, max-age=3600"),
                ],
                "",
            )
                .into_response();
        }
    }

    let content_type = mime_guess::from_path(logical_path)
        .first_raw()
        .unwrap_or("application/octet-stream");

    if content_type.starts_with("text/html") {
        let html = String::from_utf8_lossy(&bytes).to_string();
        return html_response(status, html, headers, Some((etag, hash.to_string())), site, logical_path, state);
    }

    (
        status,
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, "public, max-age=3600"),
            (header::ETAG, etag.as_str()),
        ],
        bytes,
    )
        .into_response()
}

fn html_response(
    status: StatusCode,
    html: String,
    _headers: &HeaderMap,
    etag: Option<(String, String)>,
    site: &SiteIdentity,
    path: &str,
    state: &GatewayState,
) -> Response {
    // The live-reload poll script only makes sense on a page the client is
    // expected to keep open; a 404 response never gets it.
    let body = if status == StatusCode::NOT_FOUND {
        html
    } else {
        let now_ms = Timestamp::now().as_u64() as i64 * 1000;
        let since = state.cache.last_updated(site, path).unwrap_or(now_ms);
        reload::inject_reload_script(&html, path, since)
    };

    let mut response = (
        status,
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        body,
    )
        .into_response();

    if let Some((etag, _hash)) = etag {
        response
            .headers_mut()
            .insert(header::ETAG, etag.parse().unwrap());
        response
            .headers_mut()
            .insert(header::CACHE_CONTROL, "public, max-age=3600".parse().unwrap());
    }
    response
}

fn upstream_unavailable(tried: &[Url]) -> Response {
    let servers: Vec<String> = tried.iter().map(|u| u.to_string()).collect();
    tracing::warn!(servers = ?servers, "all blob servers failed for a path the manifest lists");
    let body = format!("upstream unavailable; tried: {}", servers.join(", "));
    (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
}

fn built_in_not_found(headers: &HeaderMap) -> Response {
    if accepts_html(headers) {
        (
            StatusCode::NOT_FOUND,
            [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
            reload::not_found_html(),
        )
            .into_response()
    } else {
        (StatusCode::NOT_FOUND, "not found").into_response()
    }
}
