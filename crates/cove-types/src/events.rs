use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::{SendDirectMessage, SendGroupMessage};
use crate::models::StoredMessage;

/// Events sent over the WebSocket gateway, server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum GatewayEvent {
    /// Server confirms successful authentication.
    Ready { user_id: Uuid, username: String },

    /// A direct message pushed to a live recipient.
    PrivateMessage { message: StoredMessage },

    /// A group message fanned out to subscribed members.
    GroupMessage { message: StoredMessage },

    /// Acknowledgment to the sender: true means at least one live handle
    /// received the push, false means the message waits in history.
    MessageDelivered {
        message_id: Uuid,
        conversation_id: String,
        delivered: bool,
    },

    /// Live-only typing indicator. Never persisted.
    Typing {
        conversation_id: String,
        user_id: Uuid,
    },

    /// A member joined a group's live channel.
    JoinedGroup { group_id: Uuid, user_id: Uuid },

    /// A member left a group's live channel.
    LeftGroup { group_id: Uuid, user_id: Uuid },

    /// Recoverable error reported back to the originating session.
    Error { code: String, message: String },
}

impl GatewayEvent {
    /// Returns the conversation id if this event is scoped to one stream.
    /// Unscoped events are targeted at a single connection and bypass the
    /// subscription filter.
    pub fn conversation_id(&self) -> Option<String> {
        match self {
            Self::GroupMessage { message } => Some(message.conversation_id.clone()),
            Self::Typing {
                conversation_id, ..
            } => Some(conversation_id.clone()),
            Self::JoinedGroup { group_id, .. } | Self::LeftGroup { group_id, .. } => {
                Some(format!("group:{group_id}"))
            }
            _ => None,
        }
    }
}

/// Commands sent from client to server over the WebSocket.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum GatewayCommand {
    /// First frame on every connection: authenticate with a bearer token.
    Identify { token: String },

    /// Subscribe to a group's live channel (membership required).
    JoinGroup { group_id: Uuid },

    /// Unsubscribe from a group's live channel.
    LeaveGroup { group_id: Uuid },

    SendDirectMessage(SendDirectMessage),

    SendGroupMessage(SendGroupMessage),

    /// Live-only typing indicator for a conversation the caller is in.
    Typing { conversation_id: String },

    /// Accepted and acknowledged, currently a no-op.
    MarkAsRead { conversation_id: String },
}
