//! The control endpoint: accepts the tunnel client's WebSocket
//! upgrade, authenticates, negotiates a subdomain, and hands off to
//! the reader/writer pair that drives a `Tunnel` for the rest of its
//! life, split across the registry/correlation/connection seams
//! instead of one inline loop over a raw `HashMap`.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};
use uniroute_shared::error::ErrorKind;
use uniroute_shared::protocol::{Frame, DEFAULT_MAX_FRAME_SIZE};

use crate::auth;
use crate::connection::{ConnectionGuard, LastSeen, KEEPALIVE_PING_INTERVAL, KEEPALIVE_TIMEOUT};
use crate::registry::{Tunnel, TunnelRegistry};
use crate::stats::StatsObserver;
use crate::store::{TokenStore, TunnelRecord, TunnelStore};

#[derive(Clone)]
pub struct ControlState {
    pub registry: Arc<TunnelRegistry>,
    pub tunnel_store: Arc<dyn TunnelStore>,
    pub token_store: Arc<dyn TokenStore>,
    pub stats: StatsObserver,
    pub domain: String,
    pub max_frame_size: usize,
    pub outbound_queue_capacity: usize,
}

/// Subdomain preference, passed as a query parameter on the upgrade
/// request (`/tunnel?subdomain=foo`) since the `init` frame itself
/// carries only `version`, `local_url`, and `token` per the wire
/// schema.
#[derive(Deserialize)]
pub struct ControlQuery {
    pub subdomain: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<ControlQuery>,
    State(state): State<ControlState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query.subdomain))
}

async fn authenticate(state: &ControlState, token: Option<&str>) -> Result<(), ErrorKind> {
    let known_tokens = state
        .token_store
        .all()
        .await
        .map_err(|_| ErrorKind::Unauthorized)?;
    if known_tokens.is_empty() {
        return Ok(()); // no tokens provisioned: auth is not configured
    }
    let Some(token) = token else {
        return Err(ErrorKind::Unauthorized);
    };
    // Constant-time comparison against every provisioned hash, rather
    // than a hash-then-equality-lookup, so a rejected token never gives
    // a timing signal on which stored hash it came closest to matching.
    let record = known_tokens
        .iter()
        .find(|t| auth::verify_token(token, &t.token_hash))
        .ok_or(ErrorKind::Unauthorized)?;
    if !record.is_active {
        return Err(ErrorKind::Unauthorized);
    }
    if let Some(expires_at) = record.expires_at {
        if expires_at <= chrono::Utc::now() {
            return Err(ErrorKind::TokenExpired);
        }
    }
    Ok(())
}

async fn handle_socket(mut socket: WebSocket, state: ControlState, preferred_subdomain: Option<String>) {
    let guard = ConnectionGuard::new();

    let init = match socket.recv().await {
        Some(Ok(Message::Text(text))) => {
            match Frame::decode_checked(text.as_bytes(), state.max_frame_size) {
                Ok(frame @ Frame::Init { .. }) => frame,
                Ok(_) => {
                    let _ = send_error(&mut socket, ErrorKind::Protocol, "expected init frame").await;
                    return;
                }
                Err(e) => {
                    let kind = e.kind().unwrap_or(ErrorKind::Protocol);
                    let _ = send_error(&mut socket, kind, &e.to_string()).await;
                    return;
                }
            }
        }
        _ => return,
    };

    let Frame::Init { local_url, token, .. } = init else {
        unreachable!("checked above");
    };

    if let Err(kind) = authenticate(&state, token.as_deref()).await {
        let _ = send_error(&mut socket, kind, "authentication failed").await;
        return;
    }

    let subdomain = match state.registry.allocate(preferred_subdomain.as_deref()).await {
        Ok(s) => s,
        Err(e) => {
            let kind = e.kind().unwrap_or(ErrorKind::SubdomainExhausted);
            let _ = send_error(&mut socket, kind, &e.to_string()).await;
            return;
        }
    };

    let (tx, mut rx) = crate::connection::outbound_channel(state.outbound_queue_capacity);
    let tunnel_id = format!("tun_{}", subdomain);
    let public_url = format!("https://{subdomain}.{}", state.domain);
    let tunnel = Tunnel::new(
        tunnel_id.clone(),
        subdomain.clone(),
        local_url,
        public_url.clone(),
        tx,
    );

    if let Err(e) = state.registry.register(tunnel.clone()).await {
        let kind = e.kind().unwrap_or(ErrorKind::SubdomainTaken);
        let _ = send_error(&mut socket, kind, &e.to_string()).await;
        return;
    }

    state
        .tunnel_store
        .create(TunnelRecord {
            id: tunnel_id.clone(),
            subdomain: subdomain.clone(),
            owner_token_id: token.unwrap_or_default(),
            created_at: tunnel.created_at,
        })
        .await
        .ok();

    let created = Frame::TunnelCreated {
        tunnel_id: tunnel_id.clone(),
        subdomain: subdomain.clone(),
        public_url,
        status: "active".to_string(),
    };
    if send_frame(&mut socket, &created).await.is_err() {
        cleanup(&state, &tunnel).await;
        return;
    }

    guard.activate();
    info!(tunnel_id = %tunnel_id, subdomain = %subdomain, "tunnel active");

    let (mut sender, mut receiver) = socket.split();
    let last_seen = LastSeen::new();
    let mut ping_timer = tokio::time::interval(KEEPALIVE_PING_INTERVAL);

    loop {
        tokio::select! {
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        last_seen.touch();
                        match Frame::decode_checked(text.as_bytes(), state.max_frame_size) {
                            Ok(frame @ Frame::Response { ref request_id, .. }) => {
                                let request_id = request_id.clone();
                                if tunnel.pending().resolve(&request_id, frame).is_err() {
                                    // The overwhelming majority of these are routine:
                                    // the gateway's own wait already timed out and
                                    // cancelled the reservation before this response
                                    // arrived. Logging that at `warn!` floods normal
                                    // slow-origin traffic, so it's `debug!` here.
                                    debug!(tunnel_id = %tunnel_id, %request_id, "late or duplicate response");
                                }
                            }
                            Ok(frame @ Frame::Error { request_id: Some(_), .. }) => {
                                let Frame::Error { request_id: Some(ref rid), .. } = frame else {
                                    unreachable!()
                                };
                                let rid = rid.clone();
                                let _ = tunnel.pending().resolve(&rid, frame);
                            }
                            Ok(Frame::Ping) => {
                                let _ = send_frame(&mut sender, &Frame::Pong).await;
                            }
                            Ok(Frame::Pong) => {}
                            Ok(_) => {
                                warn!(tunnel_id = %tunnel_id, "unexpected frame on active connection");
                            }
                            Err(e) => {
                                warn!(tunnel_id = %tunnel_id, error = %e, "protocol error, closing");
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(d))) => {
                        last_seen.touch();
                        let _ = sender.send(Message::Pong(d)).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_seen.touch();
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Binary(_))) => {}
                    Some(Err(_)) => break,
                }
            }
            outbound = rx.recv() => {
                match outbound {
                    Some(frame) => {
                        if send_frame(&mut sender, &frame).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = ping_timer.tick() => {
                if last_seen.is_stale(KEEPALIVE_TIMEOUT) {
                    warn!(tunnel_id = %tunnel_id, "keepalive timeout, closing");
                    break;
                }
                if send_frame(&mut sender, &Frame::Ping).await.is_err() {
                    break;
                }
            }
        }
    }

    guard.close();
    cleanup(&state, &tunnel).await;
    info!(tunnel_id = %tunnel_id, subdomain = %subdomain, "tunnel closed");
}

async fn cleanup(state: &ControlState, tunnel: &Tunnel) {
    tunnel.pending().drain();
    state.registry.remove(&tunnel.subdomain).await;
    state.tunnel_store.remove(&tunnel.id).await.ok();
    state.stats.remove(&tunnel.id).await;
}

async fn send_frame<S>(sink: &mut S, frame: &Frame) -> Result<(), axum::Error>
where
    S: futures_util::Sink<Message, Error = axum::Error> + Unpin,
{
    let text = frame
        .encode()
        .unwrap_or_else(|_| r#"{"type":"error","code":"PROTOCOL","message":"encode failure"}"#.to_string());
    sink.send(Message::Text(text.into())).await
}

async fn send_error(socket: &mut WebSocket, kind: ErrorKind, message: &str) -> Result<(), axum::Error> {
    let frame = Frame::Error {
        code: kind,
        message: message.to_string(),
        request_id: None,
    };
    send_frame(socket, &frame).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryTokenStore, TokenRecord};

    #[tokio::test]
    async fn auth_passes_when_no_tokens_provisioned() {
        let state = ControlState {
            registry: Arc::new(TunnelRegistry::new()),
            tunnel_store: Arc::new(crate::store::InMemoryTunnelStore::default()),
            token_store: Arc::new(InMemoryTokenStore::default()),
            stats: StatsObserver::new(),
            domain: "example.com".into(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            outbound_queue_capacity: 16,
        };
        assert!(authenticate(&state, None).await.is_ok());
    }

    #[tokio::test]
    async fn auth_rejects_missing_token_when_configured() {
        let token_store = Arc::new(InMemoryTokenStore::default());
        token_store
            .insert(TokenRecord {
                id: "tok1".into(),
                token_hash: auth::hash_token("s3cr3t"),
                name: "default".into(),
                created_at: chrono::Utc::now(),
                expires_at: None,
                is_active: true,
            })
            .await
            .unwrap();
        let state = ControlState {
            registry: Arc::new(TunnelRegistry::new()),
            tunnel_store: Arc::new(crate::store::InMemoryTunnelStore::default()),
            token_store,
            stats: StatsObserver::new(),
            domain: "example.com".into(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            outbound_queue_capacity: 16,
        };
        assert!(authenticate(&state, None).await.is_err());
        assert!(authenticate(&state, Some("wrong")).await.is_err());
        assert!(authenticate(&state, Some("s3cr3t")).await.is_ok());
    }
}
