//! The monitoring endpoints named in §6: active-client count, the
//! user-channel fleet snapshot, and per-principal channel stats. Consumed
//! by external ops tooling; fed by the Hub but exposed over plain HTTP
//! here rather than the WebSocket protocol.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Serialize;

use fanhub_core::channel_fleet::ChannelStatSnapshot;

use crate::state::AppState;

#[derive(Serialize)]
struct ChannelStatDto {
    principal: String,
    created_seconds_ago: f64,
    last_activity_seconds_ago: f64,
    sent: u64,
    received: u64,
}

impl From<ChannelStatSnapshot> for ChannelStatDto {
    fn from(s: ChannelStatSnapshot) -> Self {
        Self {
            principal: s.principal,
            created_seconds_ago: s.created_at.elapsed().as_secs_f64(),
            last_activity_seconds_ago: s.last_activity.elapsed().as_secs_f64(),
            sent: s.sent,
            received: s.received,
        }
    }
}

pub async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    let clients = state.hub.client_count().await;
    Json(serde_json::json!({
        "status": "ok",
        "instance_id": state.hub.instance_id,
        "active_clients": clients,
    }))
}

pub async fn active_channels(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.hub.channel_fleet().snapshot().await;
    let active_count = state.hub.channel_fleet().active_count();
    let stats: Vec<ChannelStatDto> = snapshot.into_iter().map(ChannelStatDto::from).collect();
    Json(serde_json::json!({
        "active_user_channel_count": active_count,
        "channels": stats,
    }))
}

pub async fn channel_stats_for_principal(
    State(state): State<AppState>,
    Path(principal): Path<String>,
) -> impl IntoResponse {
    match state.hub.channel_fleet().stats(&principal).await {
        Some(stats) => Json(ChannelStatDto::from(stats)).into_response(),
        None => (StatusCode::NOT_FOUND, "no active channel for principal").into_response(),
    }
}

pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics_handle {
        Some(handle) => (
            StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response(),
    }
}
