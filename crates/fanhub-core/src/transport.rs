//! Cross-instance transport: the pub/sub bus (board broadcasts) and the
//! durable bus egress worker pool (chat / direct-to-user publishes).
//!
//! Two independent brokers are used intentionally (§4.6): the pub/sub bus
//! is fire-and-forget and cheap, the durable bus survives a momentary
//! subscriber outage. Mixing them into one abstraction would hide that
//! tradeoff, so each gets its own small API instead of a shared trait.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use futures::StreamExt;
use lapin::BasicProperties;
use lapin::options::BasicPublishOptions;
use lapin::types::{AMQPValue, FieldTable};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use fanhub_config::HubConfig;
use fanhub_protocol::DEFAULT_PUBSUB_PUBLISH_DEADLINE_SEC;

use crate::channel_pool::SharedChannelPool;
use crate::error::HubError;

// ── Pub/sub bus (board broadcasts) ──────────────────────────────────────────

/// A thin wrapper over the `redis` async connection used for board
/// broadcasts. Board topics are ephemeral and fire-and-forget: there is no
/// retry or durability here by design.
pub struct PubSubBus {
    client: redis::Client,
}

impl PubSubBus {
    pub fn connect(url: &str) -> Result<Self, HubError> {
        let client = redis::Client::open(url)
            .map_err(|e| HubError::Fatal(format!("invalid pub/sub bus url: {e}")))?;
        Ok(Self { client })
    }

    /// Publish to `board:<id>` with a fixed 5s deadline — shorter than the
    /// durable-bus publish deadline because a board update is an idempotent
    /// view refresh, not worth waiting long for.
    pub async fn publish_board(&self, topic: &str, payload: &[u8]) -> Result<(), HubError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| HubError::Transient(format!("pub/sub connect failed: {e}")))?;

        tokio::time::timeout(
            Duration::from_secs(DEFAULT_PUBSUB_PUBLISH_DEADLINE_SEC),
            redis::AsyncCommands::publish::<_, _, i64>(&mut conn, topic, payload),
        )
        .await
        .map_err(|_| HubError::Transient("pub/sub publish deadline exceeded".into()))?
        .map_err(|e| HubError::Transient(format!("pub/sub publish failed: {e}")))?;

        Ok(())
    }

    /// Pattern-subscribe to `board:*` and invoke `on_message(board_id,
    /// payload)` for each frame received. Runs until `cancel` fires. The
    /// subscription is expected to re-establish itself on broker
    /// disconnect — while down, cross-instance board updates are simply
    /// lost, which is acceptable per §4.8.
    pub fn spawn_board_ingress<F>(
        self: Arc<Self>,
        pattern: &'static str,
        cancel: CancellationToken,
        on_message: F,
    ) -> tokio::task::JoinHandle<()>
    where
        F: Fn(String, Vec<u8>) + Send + Sync + 'static,
    {
        tokio::spawn(async move {
            loop {
                if cancel.is_cancelled() {
                    return;
                }
                match self.run_board_ingress_once(pattern, &cancel, &on_message).await {
                    Ok(()) => return,
                    Err(err) => {
                        tracing::warn!(%err, "pub/sub board ingress lost connection, retrying");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        })
    }

    async fn run_board_ingress_once<F>(
        &self,
        pattern: &str,
        cancel: &CancellationToken,
        on_message: &F,
    ) -> Result<(), HubError>
    where
        F: Fn(String, Vec<u8>) + Send + Sync,
    {
        let conn = self
            .client
            .get_async_connection()
            .await
            .map_err(|e| HubError::Transient(format!("pub/sub connect failed: {e}")))?;
        let mut pubsub = conn.into_pubsub();
        pubsub
            .psubscribe(pattern)
            .await
            .map_err(|e| HubError::Transient(format!("pattern subscribe failed: {e}")))?;

        let mut stream = pubsub.on_message();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                msg = stream.next() => {
                    let Some(msg) = msg else { return Ok(()) };
                    let channel: String = msg.get_channel_name().to_string();
                    let Some(board_id) = channel.strip_prefix("board:") else { continue };
                    let payload: Vec<u8> = msg.get_payload_bytes().to_vec();
                    on_message(board_id.to_string(), payload);
                }
            }
        }
    }
}

// ── Durable bus egress (chat / direct-to-user) ──────────────────────────────

/// One item of outbound work for an egress worker: publish `payload` to the
/// exchange under `routing_key`, optionally carrying a `sender` header (used
/// by direct-to-user publishes so the recipient's consumer can recover who
/// sent it without parsing the body).
pub struct EgressJob {
    pub routing_key: String,
    pub payload: Vec<u8>,
    pub sender_header: Option<String>,
}

/// Handle used by broadcast/dispatch code to hand work to the egress pool.
/// Saturated queue -> drop with a warning (shed-at-edge backpressure); the
/// hub's dispatcher never blocks on this.
#[derive(Clone)]
pub struct EgressHandle {
    tx: mpsc::Sender<EgressJob>,
    buffer: usize,
}

impl EgressHandle {
    pub fn try_send(&self, job: EgressJob) -> bool {
        let sent = match self.tx.try_send(job) {
            Ok(()) => true,
            Err(_) => {
                fanhub_metrics::incr_egress_publish_errors();
                tracing::warn!("egress channel saturated, dropping publish");
                false
            }
        };
        fanhub_metrics::set_egress_queue_depth(self.buffer.saturating_sub(self.tx.capacity()));
        sent
    }
}

/// Spawn the egress worker pool. Each worker pulls from a shared receiver,
/// publishes via a pooled channel with a per-publish deadline, and pauses
/// after a run of consecutive errors to avoid hot-spinning against a broken
/// broker.
pub fn spawn_egress_workers(
    pool: Arc<SharedChannelPool>,
    cfg: &HubConfig,
    cancel: CancellationToken,
) -> (EgressHandle, Vec<tokio::task::JoinHandle<()>>) {
    let (tx, rx) = mpsc::channel(cfg.egress_buffer);
    let rx = Arc::new(Mutex::new(rx));

    let mut workers = Vec::with_capacity(cfg.bus_worker_count);
    for worker_id in 0..cfg.bus_worker_count {
        let pool = pool.clone();
        let rx = rx.clone();
        let cancel = cancel.clone();
        let exchange = cfg.bus_exchange.clone();
        let deadline = Duration::from_secs(cfg.publish_deadline_sec);

        workers.push(tokio::spawn(async move {
            let consecutive_errors = AtomicU32::new(0);
            loop {
                let job = {
                    let mut rx = rx.lock().await;
                    tokio::select! {
                        _ = cancel.cancelled() => None,
                        job = rx.recv() => job,
                    }
                };
                let Some(job) = job else { return };

                match publish_one(&pool, &exchange, &job, deadline).await {
                    Ok(()) => {
                        consecutive_errors.store(0, Ordering::Relaxed);
                    }
                    Err(err) => {
                        let errs = consecutive_errors.fetch_add(1, Ordering::Relaxed) + 1;
                        fanhub_metrics::incr_egress_publish_errors();
                        tracing::warn!(worker_id, %err, consecutive_errors = errs, "egress publish failed");
                        if errs >= fanhub_protocol::EGRESS_ERROR_PAUSE_THRESHOLD {
                            tokio::time::sleep(Duration::from_secs(
                                fanhub_protocol::EGRESS_ERROR_PAUSE_SEC,
                            ))
                            .await;
                        }
                    }
                }
            }
        }));
    }

    (
        EgressHandle {
            tx,
            buffer: cfg.egress_buffer,
        },
        workers,
    )
}

/// Publish directly on a principal's own channel, routed by the principal
/// id (the per-principal queue is bound to exactly that routing key). Used
/// for targeted delivery rather than the pooled-channel board/chat egress
/// path above.
pub async fn publish_direct(
    channel: &lapin::Channel,
    exchange: &str,
    principal: &str,
    payload: &[u8],
    deadline: Duration,
) -> Result<(), HubError> {
    let props = BasicProperties::default()
        .with_delivery_mode(2)
        .with_content_type("application/json".into());

    let publish = channel.basic_publish(
        exchange,
        principal,
        BasicPublishOptions::default(),
        payload,
        props,
    );

    tokio::time::timeout(deadline, publish)
        .await
        .map_err(|_| HubError::Transient("direct publish deadline exceeded".into()))?
        .map_err(|e| HubError::Transient(format!("direct publish failed: {e}")))?
        .await
        .map_err(|e| HubError::Transient(format!("direct publish confirm failed: {e}")))?;

    Ok(())
}

async fn publish_one(
    pool: &SharedChannelPool,
    exchange: &str,
    job: &EgressJob,
    deadline: Duration,
) -> Result<(), HubError> {
    let channel = pool.get_sticky(&job.routing_key).await?;

    let mut headers = FieldTable::default();
    if let Some(sender) = &job.sender_header {
        headers.insert("sender".into(), AMQPValue::LongString(sender.as_str().into()));
    }
    let props = BasicProperties::default()
        .with_delivery_mode(2) // persistent
        .with_content_type("application/json".into())
        .with_headers(headers);

    let publish = channel.basic_publish(
        exchange,
        &job.routing_key,
        BasicPublishOptions::default(),
        &job.payload,
        props,
    );

    let result = tokio::time::timeout(deadline, publish)
        .await
        .map_err(|_| HubError::Transient("publish deadline exceeded".into()))?
        .map_err(|e| HubError::Transient(format!("publish failed: {e}")))?
        .await
        .map_err(|e| HubError::Transient(format!("publish confirm failed: {e}")));

    pool.put(channel).await;
    result.map(|_| ())
}
