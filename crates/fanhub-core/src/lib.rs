//! Realtime fan-out hub: the component that owns every client connection,
//! multiplexes board/chat subscriptions over two brokers, and guarantees
//! at-most-once local delivery across instance failover.
//!
//! Lifecycle:
//! 1. Load + validate configuration ([`fanhub_config::HubConfig`])
//! 2. Open the durable-bus connection, declare topology, open the pub/sub
//!    connection
//! 3. Construct the [`hub::Hub`] and spawn its background tasks (idle
//!    sweeper, egress workers, board/chat ingress consumers)
//! 4. Attach the WebSocket upgrade handler ([`client::serve_websocket`])
//! 5. On shutdown signal, call [`hub::Hub::shutdown`] and drain the egress
//!    workers before closing the bus connections
//!
//! Persistence, authentication, and the HTTP CRUD surface are out of scope
//! here and are consumed only through the [`dispatcher::BoardAccess`],
//! [`dispatcher::ChatRoomAccess`], and [`dispatcher::DomainHandler`] traits.

pub mod channel_fleet;
pub mod channel_pool;
pub mod client;
pub mod dispatcher;
pub mod error;
pub mod hub;
pub mod ingress;
pub mod rate_limiter;
pub mod topology;
pub mod transport;

pub use client::{ClientConfig, ClientHandle, serve_websocket};
pub use dispatcher::{BoardAccess, ChatRoomAccess, Dispatcher, DomainHandler, EchoDomainHandler};
pub use error::HubError;
pub use hub::Hub;
