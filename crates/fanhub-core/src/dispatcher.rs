//! Action dispatcher: maps an inbound action to domain work through the
//! external collaborator traits, then routes the resulting event to the
//! scope encoded in the action itself (§4.7).
//!
//! Grounded on the original `BaseHandler`/`BoardHandler`/`ChatHandler`: a
//! handler-table dispatch, authorization-before-registration for joins,
//! and `SendSuccess`/`BroadcastSuccess`-shaped replies.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use fanhub_protocol::{Action, InboundFrame, OutboundFrame, Scope};

use crate::client::ClientHandle;
use crate::error::HubError;
use crate::hub::Hub;

/// Whether a principal may join a given board's room. Backed, outside this
/// crate, by the relational store's board-membership table.
#[async_trait]
pub trait BoardAccess: Send + Sync {
    async fn has_access(&self, board_id: &str, principal: &str) -> Result<bool, HubError>;
}

/// Whether a principal is a member of a given chat room.
#[async_trait]
pub trait ChatRoomAccess: Send + Sync {
    async fn is_member(&self, room_id: &str, principal: &str) -> Result<bool, HubError>;
}

/// Performs the actual domain work (persistence, validation) behind a
/// board/card/room/label/comment action and returns the server-attached
/// `data` to echo back. Everything this trait does is out of scope for the
/// Hub itself — it is consumed purely as a collaborator.
#[async_trait]
pub trait DomainHandler: Send + Sync {
    async fn handle(&self, action: &Action, principal: &str, payload: &Value) -> Result<Value, HubError>;
}

/// Routes an `{action, payload}` frame to its domain handler and then to
/// the fan-out scope the action's family encodes.
pub struct Dispatcher {
    board_access: Arc<dyn BoardAccess>,
    chat_access: Arc<dyn ChatRoomAccess>,
    domain: Arc<dyn DomainHandler>,
}

impl Dispatcher {
    pub fn new(
        board_access: Arc<dyn BoardAccess>,
        chat_access: Arc<dyn ChatRoomAccess>,
        domain: Arc<dyn DomainHandler>,
    ) -> Self {
        Self {
            board_access,
            chat_access,
            domain,
        }
    }

    pub async fn dispatch(
        &self,
        hub: &Arc<Hub>,
        client: &ClientHandle,
        inbound: InboundFrame,
    ) -> Result<(), HubError> {
        match &inbound.action {
            Action::JoinBoard => self.handle_join_board(hub, client, inbound).await,
            Action::JoinRoomChat => self.handle_join_room_chat(hub, client, inbound).await,
            _ => match inbound.action.scope() {
                Scope::Board => self.handle_board_action(hub, client, inbound).await,
                Scope::Fleet => self.handle_fleet_action(hub, client, inbound).await,
                Scope::ChatRoom => self.handle_chat_room_action(hub, client, inbound).await,
                Scope::ChatRoomLocalOnly => self.handle_typing_indicator(hub, client, inbound).await,
                Scope::Originator => self.handle_unknown(client, inbound).await,
            },
        }
    }

    async fn handle_join_board(
        &self,
        hub: &Arc<Hub>,
        client: &ClientHandle,
        inbound: InboundFrame,
    ) -> Result<(), HubError> {
        let board_id = require_id(&inbound.payload, "board_id")?;
        if !self.board_access.has_access(&board_id, &client.principal).await? {
            tracing::warn!(principal = %client.principal, board_id, "unauthorized board join attempt");
            return Err(HubError::Unauthorized(format!(
                "no access to board {board_id}"
            )));
        }
        hub.join_board(&board_id, client).await;
        let reply = OutboundFrame::success(inbound.action, inbound.payload, Value::Null);
        client.try_send_frame(&reply);
        Ok(())
    }

    async fn handle_join_room_chat(
        &self,
        hub: &Arc<Hub>,
        client: &ClientHandle,
        inbound: InboundFrame,
    ) -> Result<(), HubError> {
        let room_id = require_id(&inbound.payload, "room_id")?;
        if !self.chat_access.is_member(&room_id, &client.principal).await? {
            tracing::warn!(principal = %client.principal, room_id, "unauthorized chat room join attempt");
            return Err(HubError::Unauthorized(format!(
                "not a member of room {room_id}"
            )));
        }
        hub.join_chat_room(&room_id, client).await;
        let reply = OutboundFrame::success(inbound.action, inbound.payload, Value::Null);
        client.try_send_frame(&reply);
        Ok(())
    }

    async fn handle_board_action(
        &self,
        hub: &Arc<Hub>,
        client: &ClientHandle,
        inbound: InboundFrame,
    ) -> Result<(), HubError> {
        let board_id = require_id(&inbound.payload, "board_id")?;
        let data = self
            .domain
            .handle(&inbound.action, &client.principal, &inbound.payload)
            .await?;
        let frame = OutboundFrame::success(inbound.action, inbound.payload, data);
        hub.broadcast_to_board(&board_id, frame).await;
        Ok(())
    }

    async fn handle_fleet_action(
        &self,
        hub: &Arc<Hub>,
        client: &ClientHandle,
        inbound: InboundFrame,
    ) -> Result<(), HubError> {
        let data = self
            .domain
            .handle(&inbound.action, &client.principal, &inbound.payload)
            .await?;
        let frame = OutboundFrame::success(inbound.action, inbound.payload, data);
        hub.broadcast_fleet_local(frame).await;
        Ok(())
    }

    async fn handle_chat_room_action(
        &self,
        hub: &Arc<Hub>,
        client: &ClientHandle,
        inbound: InboundFrame,
    ) -> Result<(), HubError> {
        let room_id = require_id(&inbound.payload, "room_id")?;
        if !self.chat_access.is_member(&room_id, &client.principal).await? {
            return Err(HubError::Unauthorized(format!(
                "not a member of room {room_id}"
            )));
        }
        let data = self
            .domain
            .handle(&inbound.action, &client.principal, &inbound.payload)
            .await?;
        let frame = OutboundFrame::success(inbound.action, inbound.payload, data);
        hub.broadcast_to_chat_room(&room_id, frame, &client.principal).await;
        Ok(())
    }

    async fn handle_typing_indicator(
        &self,
        hub: &Arc<Hub>,
        client: &ClientHandle,
        inbound: InboundFrame,
    ) -> Result<(), HubError> {
        let room_id = require_id(&inbound.payload, "room_id")?;
        let frame = OutboundFrame::success(inbound.action, inbound.payload, Value::Null);
        // Local-only: never forwarded across instances (§9 REDESIGN FLAG).
        hub.broadcast_to_chat_room_local(&room_id, frame).await;
        let _ = client; // the sender receives it back via the local broadcast, like every other room member
        Ok(())
    }

    async fn handle_unknown(&self, client: &ClientHandle, inbound: InboundFrame) -> Result<(), HubError> {
        let reply = OutboundFrame::error(inbound.action.clone(), "unrecognized action");
        client.try_send_frame(&reply);
        Err(HubError::Protocol(format!("unrecognized action: {}", inbound.action)))
    }
}

/// Pull `field` out of `payload` as a string, accepting either a JSON
/// string or a JSON number (entity ids arrive as either depending on the
/// originating client).
fn require_id(payload: &Value, field: &str) -> Result<String, HubError> {
    match payload.get(field) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(HubError::Protocol(format!("missing or invalid {field}"))),
    }
}

/// A [`DomainHandler`] that performs no external work and echoes the
/// payload back as `data`. Useful where no real collaborator is wired yet
/// (tests, or a deployment that fans out events without server-side
/// enrichment).
pub struct EchoDomainHandler;

#[async_trait]
impl DomainHandler for EchoDomainHandler {
    async fn handle(&self, _action: &Action, _principal: &str, payload: &Value) -> Result<Value, HubError> {
        Ok(payload.clone())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn require_id_accepts_string_and_number() {
        let payload = serde_json::json!({ "board_id": "42" });
        assert_eq!(require_id(&payload, "board_id").unwrap(), "42");

        let payload = serde_json::json!({ "board_id": 42 });
        assert_eq!(require_id(&payload, "board_id").unwrap(), "42");
    }

    #[test]
    fn require_id_rejects_missing_field() {
        let payload = serde_json::json!({});
        assert!(require_id(&payload, "board_id").is_err());
    }

    #[tokio::test]
    async fn echo_domain_handler_returns_the_payload_unchanged() {
        let handler = EchoDomainHandler;
        let payload = serde_json::json!({ "message_text": "hi" });
        let data = handler
            .handle(&Action::SendRoomChatMessage, "u1", &payload)
            .await
            .expect("echo handler never fails");
        assert_eq!(data, payload);
    }
}
