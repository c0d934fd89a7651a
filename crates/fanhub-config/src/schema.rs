//! The recognized configuration keys and their defaults.

use fanhub_protocol as proto;

/// Every knob the Hub and its collaborators read, with the spec's defaults.
/// Unrecognized environment variables are ignored — this is a closed set,
/// not an open schema.
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub max_clients: usize,

    pub bus_url: String,
    pub bus_exchange: String,
    pub bus_routing_key: String,
    pub bus_prefetch: u16,
    pub bus_worker_count: usize,
    pub bus_pool_size: usize,
    pub bus_user_queue_ttl_ms: i64,
    pub bus_user_queue_max_len: i64,

    pub pubsub_url: String,

    pub ws_read_deadline_sec: u64,
    pub ws_ping_period_sec: u64,
    pub ws_write_deadline_sec: u64,
    pub ws_max_message_bytes: usize,
    pub ws_outbound_buffer: usize,

    pub rate_capacity: u32,
    pub rate_window_sec: u64,

    pub idle_channel_timeout_sec: u64,
    pub sweep_interval_sec: u64,

    pub egress_buffer: usize,
    pub publish_deadline_sec: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_clients: proto::DEFAULT_MAX_CLIENTS,

            bus_url: "amqp://127.0.0.1:5672/%2f".to_string(),
            bus_exchange: "chat.direct".to_string(),
            bus_routing_key: "chat.message".to_string(),
            bus_prefetch: proto::DEFAULT_BUS_PREFETCH,
            bus_worker_count: proto::DEFAULT_BUS_WORKER_COUNT,
            bus_pool_size: proto::DEFAULT_BUS_POOL_SIZE,
            bus_user_queue_ttl_ms: proto::DEFAULT_USER_QUEUE_TTL_MS,
            bus_user_queue_max_len: proto::DEFAULT_USER_QUEUE_MAX_LEN,

            pubsub_url: "redis://127.0.0.1:6379".to_string(),

            ws_read_deadline_sec: proto::DEFAULT_READ_DEADLINE_SEC,
            ws_ping_period_sec: proto::DEFAULT_PING_PERIOD_SEC,
            ws_write_deadline_sec: proto::DEFAULT_WRITE_DEADLINE_SEC,
            ws_max_message_bytes: proto::DEFAULT_MAX_MESSAGE_BYTES,
            ws_outbound_buffer: proto::DEFAULT_OUTBOUND_BUFFER,

            rate_capacity: proto::DEFAULT_RATE_CAPACITY,
            rate_window_sec: proto::DEFAULT_RATE_WINDOW_SEC,

            idle_channel_timeout_sec: proto::DEFAULT_IDLE_CHANNEL_TIMEOUT_SEC,
            sweep_interval_sec: proto::DEFAULT_SWEEP_INTERVAL_SEC,

            egress_buffer: proto::DEFAULT_EGRESS_BUFFER,
            publish_deadline_sec: proto::DEFAULT_PUBLISH_DEADLINE_SEC,
        }
    }
}
