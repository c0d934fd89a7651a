//! Wire protocol for the realtime fan-out hub.
//!
//! All communication between a client and a Hub instance is JSON over a
//! WebSocket text frame. A client sends `{"action": ..., "payload": ...}`
//! (see [`InboundFrame`]); the Hub replies and broadcasts
//! `{"action", "status", "payload", "data", "error"}` (see [`OutboundFrame`]).
//! Cross-instance copies of the same envelope additionally carry
//! `_source_id` and, for chat, `room_id` — see [`Envelope`].

pub mod action;
pub mod envelope;

pub use action::Action;
pub use envelope::{Envelope, InboundFrame, OutboundFrame, Status};

// ── Constants ────────────────────────────────────────────────────────────────

/// Hard cap on registered clients per instance.
pub const DEFAULT_MAX_CLIENTS: usize = 10_000;

/// WebSocket read deadline, refreshed by every pong.
pub const DEFAULT_READ_DEADLINE_SEC: u64 = 60;
/// Ping ticker period (0.9 × read deadline).
pub const DEFAULT_PING_PERIOD_SEC: u64 = 54;
/// Per-write deadline on the socket.
pub const DEFAULT_WRITE_DEADLINE_SEC: u64 = 10;
/// Default inbound/outbound frame size cap.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 524_288;
/// Depth of a client's outbound buffer.
pub const DEFAULT_OUTBOUND_BUFFER: usize = 256;

/// Token bucket capacity.
pub const DEFAULT_RATE_CAPACITY: u32 = 10;
/// Token bucket refill window.
pub const DEFAULT_RATE_WINDOW_SEC: u64 = 60;

/// Idle user-channel eviction threshold.
pub const DEFAULT_IDLE_CHANNEL_TIMEOUT_SEC: u64 = 1_800;
/// Idle-channel sweeper tick interval.
pub const DEFAULT_SWEEP_INTERVAL_SEC: u64 = 300;

/// Egress channel depth.
pub const DEFAULT_EGRESS_BUFFER: usize = 1_000;
/// Per-publish deadline on the durable bus.
pub const DEFAULT_PUBLISH_DEADLINE_SEC: u64 = 15;
/// Per-publish deadline on the pub/sub bus (board broadcasts).
pub const DEFAULT_PUBSUB_PUBLISH_DEADLINE_SEC: u64 = 5;

/// Durable-bus QoS prefetch per user-channel.
pub const DEFAULT_BUS_PREFETCH: u16 = 10;
/// Egress worker pool size.
pub const DEFAULT_BUS_WORKER_COUNT: usize = 10;
/// Shared channel pool size.
pub const DEFAULT_BUS_POOL_SIZE: usize = 10;

/// Per-principal queue message TTL, milliseconds.
pub const DEFAULT_USER_QUEUE_TTL_MS: i64 = 86_400_000;
/// Per-principal queue length cap.
pub const DEFAULT_USER_QUEUE_MAX_LEN: i64 = 1_000;

/// Consecutive egress-publish errors before a worker pauses.
pub const EGRESS_ERROR_PAUSE_THRESHOLD: u32 = 5;
/// Pause duration after hitting the consecutive-error threshold.
pub const EGRESS_ERROR_PAUSE_SEC: u64 = 5;

/// Window the bounded unregister-on-slow-consumer wait is allowed to take.
pub const SLOW_CONSUMER_UNREGISTER_TIMEOUT_SEC: u64 = 1;

pub mod topic {
    /// Pub/sub topic for a board id, e.g. `board:42`.
    pub fn board(board_id: &str) -> String {
        format!("board:{board_id}")
    }

    /// Pattern subscription covering every board topic.
    pub const BOARD_PATTERN: &str = "board:*";
}

pub mod queue {
    /// Per-principal durable queue name.
    pub fn user_messages(principal: &str) -> String {
        format!("user.{principal}.messages")
    }

    /// Instance-scoped cross-instance chat fan-in queue name.
    pub fn instance_chat(instance_id: &str) -> String {
        format!("chat.queue.{instance_id}")
    }
}
