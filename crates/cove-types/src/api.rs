use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::models::{RequestStatus, User};

// -- JWT Claims --

/// JWT claims shared between the REST middleware and the gateway's
/// Identify handshake. Canonical definition lives here so both layers
/// verify the same shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub public_key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub username: String,
    pub token: String,
}

// -- Users --

/// Public view of an account: everything except the credential hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub username: String,
    pub public_key: Option<String>,
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub allowed_regions: Vec<String>,
    pub settings: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<User> for UserProfile {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            public_key: user.public_key,
            display_name: user.display_name,
            bio: user.bio,
            allowed_regions: user.allowed_regions,
            settings: user.settings,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

/// Allow-listed profile patch. Anything not present here cannot be changed
/// through the update path.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfilePatch {
    #[serde(default)]
    pub public_key: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub allowed_regions: Option<Vec<String>>,
    #[serde(default)]
    pub settings: Option<HashMap<String, Value>>,
}

// -- Contacts --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendContactRequest {
    pub username: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RespondContactRequest {
    pub accept: bool,
}

#[derive(Debug, Serialize)]
pub struct ContactRequestView {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub status: RequestStatus,
    pub sender_username: String,
    pub recipient_username: String,
    pub created_at: DateTime<Utc>,
}

impl From<crate::models::ContactRequest> for ContactRequestView {
    fn from(req: crate::models::ContactRequest) -> Self {
        Self {
            id: req.id,
            sender_id: req.sender_id,
            recipient_id: req.recipient_id,
            status: req.status,
            sender_username: req.sender_username,
            recipient_username: req.recipient_username,
            created_at: req.created_at,
        }
    }
}

// -- Groups --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateGroupRequest {
    pub name: String,
    #[serde(default)]
    pub members: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateGroupRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddMembersRequest {
    pub members: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct GroupView {
    pub id: Uuid,
    pub name: String,
    pub created_by: Uuid,
    pub members: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// -- Messages --

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendDirectMessage {
    pub recipient_id: Uuid,
    pub ciphertext: String,
    pub key_envelope: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendGroupMessage {
    pub group_id: Uuid,
    pub ciphertext: String,
    pub key_envelopes: HashMap<Uuid, String>,
}

/// Fallback send path over HTTP, for clients without a live gateway
/// connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SendMessageRequest {
    Direct(SendDirectMessage),
    Group(SendGroupMessage),
}

/// Synchronous acknowledgment returned to the sender for every accepted
/// message. `delivered` reflects whether any live recipient handle got the
/// push; false means history-only until the recipient reconnects.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryReceipt {
    pub message_id: Uuid,
    pub conversation_id: String,
    pub delivered: bool,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

// -- Errors --

/// Wire shape for error responses and gateway error events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}
