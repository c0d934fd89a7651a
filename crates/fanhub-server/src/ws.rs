//! The WebSocket upgrade endpoint: checks origin policy, resolves the
//! already-authenticated principal, and hands the socket to
//! [`fanhub_core::serve_websocket`] for its full lifecycle.

use axum::{
    extract::{State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use fanhub_core::serve_websocket;

use crate::auth::AuthenticatedPrincipal;
use crate::state::AppState;

pub async fn upgrade_handler(
    State(state): State<AppState>,
    principal: AuthenticatedPrincipal,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let origin = headers
        .get(axum::http::header::ORIGIN)
        .and_then(|v| v.to_str().ok());

    if !state.origin_policy.is_allowed(origin) {
        tracing::warn!(?origin, principal = %principal.principal_id, "rejected websocket upgrade: origin not allowed");
        return (StatusCode::UNAUTHORIZED, "origin not allowed").into_response();
    }

    let conn_id = Uuid::new_v4().to_string();
    let hub = state.hub.clone();
    let dispatcher = state.dispatcher.clone();
    let client_config = state.client_config.clone();

    ws.on_upgrade(move |socket| async move {
        serve_websocket(
            socket,
            conn_id,
            principal.principal_id,
            principal.display_name,
            hub,
            dispatcher,
            client_config,
        )
        .await;
    })
}
