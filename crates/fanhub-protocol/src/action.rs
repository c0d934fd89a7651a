//! The closed set of actions a client may send, and the fan-out scope each
//! one routes to.

use serde::{Deserialize, Serialize};

/// One member of the closed action set recognized by the dispatcher.
///
/// Unknown strings deserialize to [`Action::Unknown`] rather than failing,
/// so the dispatcher can answer with a single well-defined error path
/// instead of rejecting the frame at the JSON layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Action {
    JoinBoard,
    CreateTaskCard,
    UpdateTaskCard,
    UpdateTaskTabId,
    UpdateTaskTab,
    AssignTaskCardUser,
    UnassignTaskCardUser,
    CreateTaskCardComment,
    UpdateTaskCardComment,
    DeleteTaskCardComment,
    CreateLabel,
    UpdateLabel,
    DeleteLabel,
    AssignBoardUser,
    UnassignBoardUser,
    AssignWorkspaceUser,
    UnassignWorkspaceUser,
    JoinRoomChat,
    SendRoomChatMessage,
    EditRoomChatMessage,
    DeleteRoomChatMessage,
    TypingIndicator,
    Unknown(String),
}

/// Fan-out scope an action's resulting event is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Reply to the originator only; no broadcast.
    Originator,
    /// Broadcast to a board's local set, and cross-instance via the pub/sub
    /// bus topic `board:<id>`.
    Board,
    /// Broadcast fleet-wide, local and cross-instance (no workspace
    /// registry is kept, so there is no narrower scope to target).
    Fleet,
    /// Broadcast to a chat room's local set, and cross-instance via the
    /// durable bus.
    ChatRoom,
    /// Broadcast to a chat room's local set only; never forwarded
    /// cross-instance.
    ChatRoomLocalOnly,
}

impl Action {
    /// The fan-out scope this action routes to, per the dispatcher table.
    pub fn scope(&self) -> Scope {
        use Action::*;
        match self {
            JoinBoard => Scope::Originator,
            CreateTaskCard
            | UpdateTaskCard
            | UpdateTaskTabId
            | UpdateTaskTab
            | AssignTaskCardUser
            | UnassignTaskCardUser
            | CreateTaskCardComment
            | UpdateTaskCardComment
            | DeleteTaskCardComment
            | CreateLabel
            | UpdateLabel
            | DeleteLabel
            | AssignBoardUser
            | UnassignBoardUser => Scope::Board,
            AssignWorkspaceUser | UnassignWorkspaceUser => Scope::Fleet,
            JoinRoomChat | SendRoomChatMessage | EditRoomChatMessage | DeleteRoomChatMessage => {
                Scope::ChatRoom
            }
            TypingIndicator => Scope::ChatRoomLocalOnly,
            Unknown(_) => Scope::Originator,
        }
    }

    /// `true` for the handful of actions that require an authorization
    /// check before the registry is mutated (board join).
    pub fn requires_authorization(&self) -> bool {
        matches!(self, Action::JoinBoard | Action::JoinRoomChat)
    }

    fn as_wire(&self) -> &str {
        use Action::*;
        match self {
            JoinBoard => "join_board",
            CreateTaskCard => "create_task_card",
            UpdateTaskCard => "update_task_card",
            UpdateTaskTabId => "update_task_tab_id",
            UpdateTaskTab => "update_task_tab",
            AssignTaskCardUser => "assign_task_card_user",
            UnassignTaskCardUser => "unassign_task_card_user",
            CreateTaskCardComment => "create_task_card_comment",
            UpdateTaskCardComment => "update_task_card_comment",
            DeleteTaskCardComment => "delete_task_card_comment",
            CreateLabel => "create_label",
            UpdateLabel => "update_label",
            DeleteLabel => "delete_label",
            AssignBoardUser => "assign_board_user",
            UnassignBoardUser => "unassign_board_user",
            AssignWorkspaceUser => "assign_workspace_user",
            UnassignWorkspaceUser => "unassign_workspace_user",
            JoinRoomChat => "join_room_chat",
            SendRoomChatMessage => "send_room_chat_message",
            EditRoomChatMessage => "edit_room_chat_message",
            DeleteRoomChatMessage => "delete_room_chat_message",
            TypingIndicator => "typing_indicator",
            Unknown(s) => s,
        }
    }
}

impl From<String> for Action {
    fn from(s: String) -> Self {
        use Action::*;
        match s.as_str() {
            "join_board" => JoinBoard,
            "create_task_card" => CreateTaskCard,
            "update_task_card" => UpdateTaskCard,
            "update_task_tab_id" => UpdateTaskTabId,
            "update_task_tab" => UpdateTaskTab,
            "assign_task_card_user" => AssignTaskCardUser,
            "unassign_task_card_user" => UnassignTaskCardUser,
            "create_task_card_comment" => CreateTaskCardComment,
            "update_task_card_comment" => UpdateTaskCardComment,
            "delete_task_card_comment" => DeleteTaskCardComment,
            "create_label" => CreateLabel,
            "update_label" => UpdateLabel,
            "delete_label" => DeleteLabel,
            "assign_board_user" => AssignBoardUser,
            "unassign_board_user" => UnassignBoardUser,
            "assign_workspace_user" => AssignWorkspaceUser,
            "unassign_workspace_user" => UnassignWorkspaceUser,
            "join_room_chat" => JoinRoomChat,
            "send_room_chat_message" => SendRoomChatMessage,
            "edit_room_chat_message" => EditRoomChatMessage,
            "delete_room_chat_message" => DeleteRoomChatMessage,
            "typing_indicator" => TypingIndicator,
            _ => Unknown(s),
        }
    }
}

impl From<Action> for String {
    fn from(a: Action) -> Self {
        a.as_wire().to_string()
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_wire())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn board_actions_route_to_board_scope() {
        assert_eq!(Action::from("create_task_card".to_string()).scope(), Scope::Board);
        assert_eq!(Action::from("assign_board_user".to_string()).scope(), Scope::Board);
    }

    #[test]
    fn typing_indicator_is_local_only() {
        assert_eq!(Action::TypingIndicator.scope(), Scope::ChatRoomLocalOnly);
    }

    #[test]
    fn workspace_actions_are_fleet_wide() {
        assert_eq!(Action::AssignWorkspaceUser.scope(), Scope::Fleet);
    }

    #[test]
    fn unknown_action_round_trips_its_wire_string() {
        let a = Action::from("totally_made_up".to_string());
        assert_eq!(String::from(a.clone()), "totally_made_up");
        assert_eq!(a.scope(), Scope::Originator);
    }

    #[test]
    fn join_actions_require_authorization() {
        assert!(Action::JoinBoard.requires_authorization());
        assert!(Action::JoinRoomChat.requires_authorization());
        assert!(!Action::TypingIndicator.requires_authorization());
    }
}
