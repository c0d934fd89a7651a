//! The per-client WebSocket duplex: one read loop with a deadline and pong
//! handler, one write loop with a ping ticker and batched drain.
//!
//! Grounded on the original client loops: `readPump`/`writePump` paired
//! with a single outbound channel, and the gateway's `ws.rs` handshake →
//! message-loop → cleanup structure.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use fanhub_protocol::{Action, InboundFrame, OutboundFrame};

use crate::dispatcher::Dispatcher;
use crate::error::HubError;
use crate::hub::Hub;
use crate::ingress;
use crate::rate_limiter::RateDecision;
use crate::topology;

/// Everything the rest of the Hub needs to address one connected client:
/// its identity and a non-owning handle to its outbound buffer and
/// cancellation token. The client's loops are the only owners of the
/// socket itself.
#[derive(Clone)]
pub struct ClientHandle {
    pub conn_id: String,
    pub principal: String,
    pub display_name: String,
    sender: mpsc::Sender<String>,
    cancel: CancellationToken,
}

impl ClientHandle {
    /// Non-blocking try-send of a pre-serialized frame. `false` means the
    /// outbound buffer is full — the caller (the Hub dispatcher) schedules
    /// a bounded unregister rather than blocking.
    pub fn try_send_raw(&self, payload: String) -> bool {
        self.sender.try_send(payload).is_ok()
    }

    pub fn try_send_frame(&self, frame: &OutboundFrame) -> bool {
        match serde_json::to_string(frame) {
            Ok(payload) => self.try_send_raw(payload),
            Err(err) => {
                tracing::warn!(%err, "failed to serialize outbound frame");
                false
            }
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Build a standalone handle backed by a bounded channel, with no
    /// socket or write loop attached. Used by `hub`/`dispatcher` tests that
    /// exercise registry and broadcast behavior without a real WebSocket.
    #[cfg(test)]
    pub(crate) fn test_handle(conn_id: &str, principal: &str, buffer: usize) -> (Self, mpsc::Receiver<String>) {
        let (sender, receiver) = mpsc::channel(buffer);
        let handle = Self {
            conn_id: conn_id.to_string(),
            principal: principal.to_string(),
            display_name: principal.to_string(),
            sender,
            cancel: CancellationToken::new(),
        };
        (handle, receiver)
    }
}

#[derive(Clone)]
pub struct ClientConfig {
    pub read_deadline: Duration,
    pub ping_period: Duration,
    pub write_deadline: Duration,
    pub max_message_bytes: usize,
    pub outbound_buffer: usize,
    pub rate_capacity: u32,
    pub rate_window: Duration,
}

impl ClientConfig {
    pub fn from_hub_config(cfg: &fanhub_config::HubConfig) -> Self {
        Self {
            read_deadline: Duration::from_secs(cfg.ws_read_deadline_sec),
            ping_period: Duration::from_secs(cfg.ws_ping_period_sec),
            write_deadline: Duration::from_secs(cfg.ws_write_deadline_sec),
            max_message_bytes: cfg.ws_max_message_bytes,
            outbound_buffer: cfg.ws_outbound_buffer,
            rate_capacity: cfg.rate_capacity,
            rate_window: Duration::from_secs(cfg.rate_window_sec),
        }
    }
}

/// Drive one client connection end-to-end. Blocks until the connection
/// ends; on return the client is fully unregistered and its broker
/// resources are released. Preconditions: the caller has already validated
/// credentials and resolved `principal`/`display_name`.
pub async fn serve_websocket(
    socket: WebSocket,
    conn_id: String,
    principal: String,
    display_name: String,
    hub: Arc<Hub>,
    dispatcher: Arc<Dispatcher>,
    cfg: ClientConfig,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<String>(cfg.outbound_buffer);
    let cancel = CancellationToken::new();

    let handle = ClientHandle {
        conn_id: conn_id.clone(),
        principal: principal.clone(),
        display_name,
        sender: out_tx,
        cancel: cancel.clone(),
    };

    if let Err(HubError::AtCapacity) = hub.register(handle.clone()).await {
        let _ = ws_tx
            .send(Message::Text("hub is at capacity".to_string().into()))
            .await;
        let _ = ws_tx.close().await;
        return;
    }

    // Open (or reuse) this principal's dedicated durable-bus channel and
    // start its per-principal consumer for targeted delivery. Best-effort:
    // a failure here is logged and the connection proceeds without a
    // direct channel, exactly as a broker outage degrades per §4.8 (the
    // client re-handshakes later to pick one up).
    let user_ingress_handle = match hub.channel_fleet().get_or_create(&principal).await {
        Ok(entry) => match topology::declare_user_queue(&entry.channel, hub.config(), &principal).await {
            Ok(_) => Some(tokio::spawn(ingress::run_user_ingress(
                hub.clone(),
                entry.channel.clone(),
                principal.clone(),
                handle.clone(),
                cancel.clone(),
            ))),
            Err(err) => {
                tracing::warn!(%err, principal, "failed to declare per-principal queue");
                None
            }
        },
        Err(err) => {
            tracing::warn!(%err, principal, "failed to open per-principal channel");
            None
        }
    };

    let write_cancel = cancel.clone();
    let write_deadline = cfg.write_deadline;
    let ping_period = cfg.ping_period;
    let write_handle = tokio::spawn(async move {
        run_write_loop(ws_tx, &mut out_rx, ping_period, write_deadline, write_cancel).await;
    });

    run_read_loop(&mut ws_rx, &handle, &hub, &dispatcher, &cfg, &cancel).await;

    // Termination order: context cancel, then hub unregister, then the
    // underlying connection close (handled by the write loop observing
    // cancellation and returning).
    cancel.cancel();
    hub.unregister(&conn_id).await;
    let _ = write_handle.await;
    if let Some(handle) = user_ingress_handle {
        let _ = handle.await;
    }
}

async fn run_read_loop(
    ws_rx: &mut futures::stream::SplitStream<WebSocket>,
    handle: &ClientHandle,
    hub: &Arc<Hub>,
    dispatcher: &Arc<Dispatcher>,
    cfg: &ClientConfig,
    cancel: &CancellationToken,
) {
    loop {
        let next = tokio::time::timeout(cfg.read_deadline, ws_rx.next());
        let msg = tokio::select! {
            _ = cancel.cancelled() => return,
            result = next => result,
        };

        let msg = match msg {
            Ok(Some(Ok(msg))) => msg,
            Ok(Some(Err(_))) | Ok(None) => return, // read error or stream closed
            Err(_) => return,                      // read deadline elapsed with no pong
        };

        match msg {
            Message::Text(text) => {
                if text.len() > cfg.max_message_bytes {
                    let err = OutboundFrame::error(Action::Unknown(String::new()), "frame too large");
                    let _ = handle.try_send_frame(&err);
                    return; // oversized frame: protocol error, close the connection
                }
                handle_inbound_text(&text, handle, hub, dispatcher, cfg).await;
            }
            Message::Close(_) => return,
            Message::Pong(_) => {} // resets the read deadline implicitly: the next loop iteration re-arms it
            Message::Ping(_) | Message::Binary(_) => {}
        }
    }
}

async fn handle_inbound_text(
    text: &str,
    handle: &ClientHandle,
    hub: &Arc<Hub>,
    dispatcher: &Arc<Dispatcher>,
    cfg: &ClientConfig,
) {
    let inbound: InboundFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(_) => {
            let err = OutboundFrame::error(Action::Unknown(String::new()), "malformed request");
            let _ = handle.try_send_frame(&err);
            return;
        }
    };

    match hub
        .rate_limiter()
        .check(&handle.principal, cfg.rate_capacity, cfg.rate_window)
    {
        RateDecision::Denied { retry_after_secs } => {
            fanhub_metrics::incr_rate_limit_denials();
            let err = OutboundFrame::rate_limited(inbound.action.clone(), retry_after_secs);
            let _ = handle.try_send_frame(&err);
            return; // rate denial is non-fatal: the frame is discarded, the connection stays open
        }
        RateDecision::Allowed { .. } => {}
    }

    if let Err(err) = dispatcher.dispatch(hub, handle, inbound.clone()).await {
        let reply = OutboundFrame::error(inbound.action, err.client_tag());
        let _ = handle.try_send_frame(&reply);
    }
}

async fn run_write_loop(
    mut ws_tx: futures::stream::SplitSink<WebSocket, Message>,
    out_rx: &mut mpsc::Receiver<String>,
    ping_period: Duration,
    write_deadline: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(ping_period);
    ticker.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = ws_tx.close().await;
                return;
            }
            _ = ticker.tick() => {
                if write_with_deadline(&mut ws_tx, Message::Ping(Vec::new().into()), write_deadline).await.is_err() {
                    cancel.cancel();
                    return;
                }
            }
            first = out_rx.recv() => {
                let Some(first) = first else {
                    let _ = ws_tx.close().await;
                    return;
                };
                let batched = drain_and_join(&first, out_rx);
                if write_with_deadline(&mut ws_tx, Message::Text(batched.into()), write_deadline).await.is_err() {
                    cancel.cancel();
                    return;
                }
            }
        }
    }
}

/// Drain whatever else is queued without blocking and join it onto `first`
/// with newline separators, so a burst of broadcasts becomes one frame.
fn drain_and_join(first: &str, out_rx: &mut mpsc::Receiver<String>) -> String {
    let mut batched = first.to_string();
    while let Ok(next) = out_rx.try_recv() {
        batched.push('\n');
        batched.push_str(&next);
    }
    batched
}

async fn write_with_deadline(
    ws_tx: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: Message,
    deadline: Duration,
) -> Result<(), ()> {
    tokio::time::timeout(deadline, ws_tx.send(msg))
        .await
        .map_err(|_| ())?
        .map_err(|_| ())
}
