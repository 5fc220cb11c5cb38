//! Admin HTTP surface: read-only introspection into live tunnels and
//! their stats. Listed under External Interfaces rather than
//! Non-goals, so it's implemented directly instead of behind a trait
//! seam.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::Serialize;

use crate::registry::TunnelRegistry;
use crate::stats::StatsObserver;

#[derive(Clone)]
pub struct AdminState {
    pub registry: Arc<TunnelRegistry>,
    pub stats: StatsObserver,
}

#[derive(Serialize)]
struct TunnelSummary {
    id: String,
    subdomain: String,
    public_url: String,
    local_url: String,
    created_at: chrono::DateTime<chrono::Utc>,
    last_active_at: chrono::DateTime<chrono::Utc>,
    request_count: u64,
}

#[derive(Serialize)]
struct StatsSummary {
    requests: u64,
    errors: u64,
    bytes_in: u64,
    bytes_out: u64,
    p50_ms: u64,
    p90_ms: u64,
    p95_ms: u64,
    p99_ms: u64,
}

pub async fn list_tunnels(State(state): State<AdminState>) -> impl IntoResponse {
    let tunnels: Vec<TunnelSummary> = state
        .registry
        .list()
        .await
        .into_iter()
        .map(|t| TunnelSummary {
            id: t.id,
            subdomain: t.subdomain,
            public_url: t.public_url,
            local_url: t.local_url,
            created_at: t.created_at,
            last_active_at: t.last_active_at(),
            request_count: t.request_count(),
        })
        .collect();
    Json(tunnels)
}

pub async fn get_tunnel(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.registry.get_by_id(&id).await {
        Some(t) => Json(TunnelSummary {
            id: t.id,
            subdomain: t.subdomain,
            public_url: t.public_url,
            local_url: t.local_url,
            created_at: t.created_at,
            last_active_at: t.last_active_at(),
            request_count: t.request_count(),
        })
        .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

pub async fn get_tunnel_stats(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.stats.snapshot(&id).await {
        Some(s) => Json(StatsSummary {
            requests: s.requests,
            errors: s.errors,
            bytes_in: s.bytes_in,
            bytes_out: s.bytes_out,
            p50_ms: s.p50_ms,
            p90_ms: s.p90_ms,
            p95_ms: s.p95_ms,
            p99_ms: s.p99_ms,
        })
        .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

pub async fn health_handler(State(state): State<AdminState>) -> impl IntoResponse {
    let count = state.registry.len().await;
    Json(serde_json::json!({
        "status": "ok",
        "active_tunnels": count,
    }))
}
