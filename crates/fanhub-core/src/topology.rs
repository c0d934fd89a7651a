//! Idempotent declaration of the durable-bus exchange, the instance-scoped
//! broadcast queue, and per-principal queues.
//!
//! Grounded on the original topology setup: a single `direct` exchange,
//! one exclusive, non-durable, auto-delete queue per instance bound to the
//! generic chat routing key, and one non-exclusive, non-durable,
//! auto-delete queue per principal with a TTL, a length cap, and a
//! dead-letter exchange.

use lapin::{
    Channel, ExchangeKind,
    options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions},
    types::{AMQPValue, FieldTable},
};

use fanhub_config::HubConfig;
use fanhub_protocol::queue;

use crate::error::HubError;

fn dlx_name(exchange: &str) -> String {
    format!("{exchange}.dlx")
}

/// Declare the process-wide direct exchange. Durable, idempotent — safe to
/// call once per boot and again after a reconnect.
pub async fn declare_exchange(channel: &Channel, cfg: &HubConfig) -> Result<(), HubError> {
    channel
        .exchange_declare(
            &cfg.bus_exchange,
            ExchangeKind::Direct,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| HubError::Fatal(format!("failed to declare exchange: {e}")))
}

/// Declare this instance's cross-instance chat fan-in queue, bound to the
/// shared chat routing key. Exclusive: only this process consumes from it,
/// and the broker deletes it the moment the bus connection drops.
pub async fn declare_instance_queue(
    channel: &Channel,
    cfg: &HubConfig,
    instance_id: &str,
) -> Result<String, HubError> {
    declare_exchange(channel, cfg).await?;

    let queue_name = queue::instance_chat(instance_id);
    let mut args = FieldTable::default();
    args.insert(
        "x-dead-letter-exchange".into(),
        AMQPValue::LongString(dlx_name(&cfg.bus_exchange).into()),
    );

    channel
        .queue_declare(
            &queue_name,
            QueueDeclareOptions {
                durable: false,
                auto_delete: true,
                exclusive: true,
                ..Default::default()
            },
            args,
        )
        .await
        .map_err(|e| HubError::Fatal(format!("failed to declare instance queue: {e}")))?;

    channel
        .queue_bind(
            &queue_name,
            &cfg.bus_exchange,
            &cfg.bus_routing_key,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(|e| HubError::Fatal(format!("failed to bind instance queue: {e}")))?;

    Ok(queue_name)
}

/// Declare (idempotently) a principal's direct-message queue. Not
/// exclusive — this is the fix over the original's inconsistent
/// exclusivity, chosen so a second browser tab or a reconnect can attach to
/// the same queue instead of fighting over ownership.
pub async fn declare_user_queue(
    channel: &Channel,
    cfg: &HubConfig,
    principal: &str,
) -> Result<String, HubError> {
    declare_exchange(channel, cfg).await?;

    let queue_name = queue::user_messages(principal);
    let mut args = FieldTable::default();
    args.insert(
        "x-message-ttl".into(),
        AMQPValue::LongLongInt(cfg.bus_user_queue_ttl_ms),
    );
    args.insert(
        "x-max-length".into(),
        AMQPValue::LongLongInt(cfg.bus_user_queue_max_len),
    );
    args.insert(
        "x-dead-letter-exchange".into(),
        AMQPValue::LongString(dlx_name(&cfg.bus_exchange).into()),
    );

    channel
        .queue_declare(
            &queue_name,
            QueueDeclareOptions {
                durable: false,
                auto_delete: true,
                exclusive: false,
                ..Default::default()
            },
            args,
        )
        .await
        .map_err(|e| HubError::Fatal(format!("failed to declare user queue: {e}")))?;

    channel
        .queue_bind(
            &queue_name,
            &cfg.bus_exchange,
            principal,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(|e| HubError::Fatal(format!("failed to bind user queue: {e}")))?;

    Ok(queue_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dlx_name_suffixes_the_exchange() {
        assert_eq!(dlx_name("chat.direct"), "chat.direct.dlx");
    }

    #[test]
    fn queue_name_helpers_match_the_spec_naming() {
        assert_eq!(queue::user_messages("42"), "user.42.messages");
        assert_eq!(queue::instance_chat("abc-123"), "chat.queue.abc-123");
    }
}
