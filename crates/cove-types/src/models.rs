use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A registered account. The credential hash is opaque to everything except
/// the auth boundary; it is never exposed through API responses (handlers
/// convert to `UserProfile` before serializing outward).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub credential_hash: String,
    #[serde(default)]
    pub public_key: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    /// Two-letter country codes the account may connect from. Empty means
    /// unrestricted.
    #[serde(default)]
    pub allowed_regions: Vec<String>,
    /// Free-form client settings, merged key-wise on update.
    #[serde(default)]
    pub settings: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(username: String, credential_hash: String, public_key: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            username,
            credential_hash,
            public_key,
            display_name: None,
            bio: None,
            allowed_regions: Vec::new(),
            settings: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Rejected,
}

/// A proposed, not-yet-mutual contact relationship. Display fields are
/// snapshots taken at creation time so the request stays renderable even if
/// a participant renames later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactRequest {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub status: RequestStatus,
    pub sender_username: String,
    pub recipient_username: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContactRequest {
    pub fn new(sender: &User, recipient: &User) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            sender_id: sender.id,
            recipient_id: recipient.id,
            status: RequestStatus::Pending,
            sender_username: sender.username.clone(),
            recipient_username: recipient.username.clone(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Group record. The member set lives in its own store key so membership
/// mutation stays idempotent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: Uuid,
    pub name: String,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Group {
    pub fn new(name: String, created_by: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name,
            created_by,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Per-recipient key material accompanying a ciphertext body. Opaque to the
/// server: a single envelope for direct messages, a per-member map for
/// group messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyEnvelope {
    Direct(String),
    Group(HashMap<Uuid, String>),
}

/// Messages are stored exactly as received: ciphertext and key envelope are
/// never inspected. Append-only once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub conversation_id: String,
    #[serde(default)]
    pub recipient_id: Option<Uuid>,
    #[serde(default)]
    pub group_id: Option<Uuid>,
    pub ciphertext: String,
    pub key_envelope: KeyEnvelope,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_read: bool,
}
