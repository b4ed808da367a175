use std::collections::HashMap;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use nostr_sdk::prelude::Event;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub struct FakeBlobServer {
    pub addr: std::net::SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl FakeBlobServer {
    pub fn base_url(&self) -> Url {
        Url::parse(&format!("http://{}/", self.addr)).unwrap()
    }
}

impl Drop for FakeBlobServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Serves `GET /<hash>` over raw HTTP/1.1, returning each registered blob's
/// bytes by its content key.
pub async fn start_blob_server(blobs: HashMap<String, Vec<u8>>) -> FakeBlobServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let blobs = Arc::new(blobs);
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

    let handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                accept = listener.accept() => {
                    if let Ok((mut stream, _)) = accept {
                        let blobs = Arc::clone(&blobs);
                        tokio::spawn(async move {
                            let mut buffer = vec![0u8; 4096];
                            if let Ok(n) = stream.read(&mut buffer).await {
                                if n == 0 { return; }
                                let request = String::from_utf8_lossy(&buffer[..n]);
                                let path = request
                                    .lines()
                                    .next()
                                    .and_then(|line| line.split_whitespace().nth(1))
                                    .unwrap_or("/");
                                let key = path.trim_start_matches('/');
                                let (status_line, body) = if let Some(content) = blobs.get(key) {
                                    ("HTTP/1.1 200 OK\r\n", content.clone())
                                } else {
                                    ("HTTP/1.1 404 Not Found\r\n", Vec::new())
                                };
                                let header = format!(
                                    "{status}Content-Length: {}\r\nConnection: close\r\n\r\n",
                                    body.len(),
                                    status = status_line
                                );
                                let _ = stream.write_all(header.as_bytes()).await;
                                if !body.is_empty() {
                                    let _ = stream.write_all(&body).await;
                                }
                                let _ = stream.flush().await;
                            }
                        });
                    }
                }
                _ = &mut shutdown_rx => break,
            }
        }
    });

    FakeBlobServer {
        addr,
        shutdown: Some(shutdown_tx),
        handle: Some(handle),
    }
}

pub struct FakeRelay {
    pub url: Url,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl Drop for FakeRelay {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Minimal Nostr relay: answers `REQ` by replaying every registered event
/// whose kind is requested, then sends `EOSE`.
pub async fn start_relay(events: Vec<Event>) -> FakeRelay {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let events = Arc::new(events);
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

    let handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                Ok((stream, _)) = listener.accept() => {
                    let events = Arc::clone(&events);
                    tokio::spawn(async move {
                        if let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await {
                            while let Some(msg) = ws.next().await {
                                match msg {
                                    Ok(Message::Text(text)) => {
                                        if let Ok(value) = serde_json::from_str::<Value>(&text) {
                                            if value.get(0) == Some(&Value::String("REQ".into())) {
                                                if let Some(sub_id) = value.get(1).and_then(|v| v.as_str()) {
                                                    let requested_kinds: Vec<u64> = value
                                                        .as_array()
                                                        .into_iter()
                                                        .flatten()
                                                        .skip(2)
                                                        .filter_map(|f| f.get("kinds").and_then(|v| v.as_array()))
                                                        .flatten()
                                                        .filter_map(|k| k.as_u64())
                                                        .collect();

                                                    for event in events.iter() {
                                                        if requested_kinds.is_empty()
                                                            || requested_kinds.contains(&event.kind.as_u64())
                                                        {
                                                            let event_msg = json!(["EVENT", sub_id, serde_json::to_value(event).unwrap()]);
                                                            let _ = ws.send(Message::Text(event_msg.to_string())).await;
                                                        }
                                                    }
                                                    let eose_msg = json!(["EOSE", sub_id]);
                                                    let _ = ws.send(Message::Text(eose_msg.to_string())).await;
                                                }
                                            }
                                        }
                                    }
                                    Ok(Message::Ping(data)) => {
                                        let _ = ws.send(Message::Pong(data)).await;
                                    }
                                    Ok(Message::Close(_)) => break,
                                    _ => {}
                                }
                            }
                        }
                    });
                }
                _ = &mut shutdown_rx => break,
            }
        }
    });

    FakeRelay {
        url: Url::parse(&format!("ws://{addr}")).unwrap(),
        shutdown: Some(shutdown_tx),
        handle: Some(handle),
    }
}
