//! Persisted key layout. Every key the system writes is built here so the
//! namespace stays greppable in one place.
//!
//!   user:{id}
//!   username:{lowercased}
//!   message:{id}                              (TTL 7 days)
//!   conversation:{conversationId}:history     (TTL 30 days)
//!   contacts:{userId}
//!   contactRequest:{id}                       (TTL 30 days)
//!   contactRequestPending:{senderId}:{recipientId}
//!   contactRequests:{userId}:outgoing
//!   contactRequests:{userId}:incoming
//!   group:{id}
//!   group:{id}:members

use uuid::Uuid;

pub const GROUP_PREFIX: &str = "group:";
pub const GROUP_MEMBERS_SUFFIX: &str = ":members";

pub fn user(id: Uuid) -> String {
    format!("user:{id}")
}

pub fn username(normalized: &str) -> String {
    format!("username:{normalized}")
}

pub fn message(id: Uuid) -> String {
    format!("message:{id}")
}

pub fn conversation_history(conversation_id: &str) -> String {
    format!("conversation:{conversation_id}:history")
}

pub fn contacts(user_id: Uuid) -> String {
    format!("contacts:{user_id}")
}

pub fn contact_request(id: Uuid) -> String {
    format!("contactRequest:{id}")
}

/// Guard key claimed with `set_nx` to enforce at most one pending request
/// per ordered (sender, recipient) pair.
pub fn pending_pair(sender_id: Uuid, recipient_id: Uuid) -> String {
    format!("contactRequestPending:{sender_id}:{recipient_id}")
}

pub fn outgoing_requests(user_id: Uuid) -> String {
    format!("contactRequests:{user_id}:outgoing")
}

pub fn incoming_requests(user_id: Uuid) -> String {
    format!("contactRequests:{user_id}:incoming")
}

pub fn group(id: Uuid) -> String {
    format!("group:{id}")
}

pub fn group_members(id: Uuid) -> String {
    format!("group:{id}:members")
}

/// Inverse of [`group`]: extracts the group id from a record key, rejecting
/// member-set keys and anything else under the prefix.
pub fn parse_group_key(key: &str) -> Option<Uuid> {
    let rest = key.strip_prefix(GROUP_PREFIX)?;
    rest.parse().ok()
}
