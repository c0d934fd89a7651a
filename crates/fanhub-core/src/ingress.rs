//! Durable-bus ingress: the single consumer on this instance's chat fan-in
//! queue. Deserializes each envelope, drops it if `_source_id` is this
//! instance (the self-filter that prevents double delivery via the
//! egress+local-broadcast pair), and hands the rest to the Hub's local
//! chat-room broadcast.

use std::sync::Arc;

use futures::StreamExt;
use lapin::Channel;
use lapin::options::{BasicAckOptions, BasicConsumeOptions, BasicNackOptions};
use lapin::types::FieldTable;
use tokio_util::sync::CancellationToken;

use fanhub_protocol::Envelope;

use crate::channel_fleet::StatKind;
use crate::client::ClientHandle;
use crate::hub::Hub;

/// Consume `queue_name` until the Hub's cancellation token fires. On a
/// transient broker failure the consumer returns; the caller's supervision
/// loop is expected to restart it (§4.8).
pub async fn run_chat_ingress(hub: Arc<Hub>, channel: Channel, queue_name: String) {
    loop {
        if hub.cancellation().is_cancelled() {
            return;
        }
        match consume_once(&hub, &channel, &queue_name).await {
            Ok(()) => return,
            Err(err) => {
                tracing::warn!(%err, "chat ingress consumer lost connection, restarting");
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
        }
    }
}

async fn consume_once(hub: &Arc<Hub>, channel: &Channel, queue_name: &str) -> Result<(), lapin::Error> {
    let mut consumer = channel
        .basic_consume(
            queue_name,
            "fanhub-chat-ingress",
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await?;

    loop {
        tokio::select! {
            _ = hub.cancellation().cancelled() => return Ok(()),
            next = consumer.next() => {
                let Some(delivery) = next else { return Ok(()) };
                let delivery = delivery?;

                match serde_json::from_slice::<Envelope>(&delivery.data) {
                    Ok(envelope) => {
                        if envelope.is_from_instance(&hub.instance_id) {
                            // Self-filter: this instance already delivered the
                            // message locally when it egressed it.
                            delivery.ack(BasicAckOptions::default()).await?;
                            continue;
                        }
                        let room_id = envelope
                            .room_id
                            .clone()
                            .or_else(|| room_id_from_headers(&delivery.properties));
                        if let Some(room_id) = room_id {
                            hub.deliver_chat_ingress(&room_id, envelope.frame).await;
                        } else {
                            tracing::warn!("chat ingress envelope missing room_id");
                        }
                        delivery.ack(BasicAckOptions::default()).await?;
                    }
                    Err(err) => {
                        tracing::warn!(%err, "malformed chat ingress envelope, discarding");
                        delivery
                            .nack(BasicNackOptions {
                                requeue: false,
                                ..Default::default()
                            })
                            .await?;
                    }
                }
            }
        }
    }
}

/// Per-principal consumer on a client's own dedicated queue: delivers any
/// message addressed to this principal straight to its WebSocket, updating
/// the `received` counter on the channel-fleet entry. Exits on `cancel` (the
/// client's own cancellation token) or on the consumer channel closing.
pub async fn run_user_ingress(
    hub: Arc<Hub>,
    channel: Channel,
    principal: String,
    client: ClientHandle,
    cancel: CancellationToken,
) {
    let consumer = channel
        .basic_consume(
            &fanhub_protocol::queue::user_messages(&principal),
            "fanhub-user-ingress",
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await;
    let mut consumer = match consumer {
        Ok(c) => c,
        Err(err) => {
            tracing::warn!(%err, principal, "failed to start per-principal consumer");
            return;
        }
    };

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            next = consumer.next() => {
                let Some(delivery) = next else { return };
                let Ok(delivery) = delivery else { return };

                match serde_json::from_slice::<Envelope>(&delivery.data) {
                    Ok(envelope) => {
                        if client.try_send_frame(&envelope.frame) {
                            hub.channel_fleet().update_stats(&principal, StatKind::Received).await;
                        }
                        let _ = delivery.ack(BasicAckOptions::default()).await;
                    }
                    Err(err) => {
                        tracing::warn!(%err, principal, "malformed direct envelope, discarding");
                        let _ = delivery
                            .nack(BasicNackOptions { requeue: false, ..Default::default() })
                            .await;
                    }
                }
            }
        }
    }
}

fn room_id_from_headers(properties: &lapin::BasicProperties) -> Option<String> {
    let headers = properties.headers().as_ref()?;
    match headers.inner().get("room_id") {
        Some(lapin::types::AMQPValue::LongString(s)) => Some(s.to_string()),
        _ => None,
    }
}
