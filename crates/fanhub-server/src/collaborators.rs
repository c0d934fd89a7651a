//! Default collaborator implementations for standalone operation.
//!
//! Persistence (board/chat-room membership) and the relational store are
//! explicitly out of scope for the Hub (§1) — they are consumed purely
//! through the [`fanhub_core::BoardAccess`], [`fanhub_core::ChatRoomAccess`],
//! and [`fanhub_core::DomainHandler`] traits. This binary ships a
//! permissive stand-in so it runs without an external database; a real
//! deployment replaces these with adapters over its own persistence layer
//! before constructing the [`fanhub_core::Dispatcher`].

use async_trait::async_trait;

use fanhub_core::{BoardAccess, ChatRoomAccess, HubError};

/// Grants access to every board and every chat room. Suitable for local
/// development and for deployments that enforce membership entirely at the
/// HTTP CRUD layer before a client ever opens a WebSocket.
pub struct AllowAllAccess;

#[async_trait]
impl BoardAccess for AllowAllAccess {
    async fn has_access(&self, _board_id: &str, _principal: &str) -> Result<bool, HubError> {
        Ok(true)
    }
}

#[async_trait]
impl ChatRoomAccess for AllowAllAccess {
    async fn is_member(&self, _room_id: &str, _principal: &str) -> Result<bool, HubError> {
        Ok(true)
    }
}
