//! Append-only message persistence and TTL-bounded history.

use std::time::Duration;

use chrono::Utc;
use cove_store::{Store, keys};
use cove_types::api::{SendDirectMessage, SendGroupMessage};
use cove_types::models::{KeyEnvelope, StoredMessage, User};
use uuid::Uuid;

use crate::conversation;
use crate::error::CoreError;

/// Message bodies expire before the history index that lists them, so a
/// listed id may dangle near the end of its life (readers skip it) but the
/// index never outlives its own retention window.
pub const MESSAGE_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);
pub const HISTORY_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Validate a direct send and materialize the record. The conversation id
/// is computed from the participant pair, never taken from the client.
pub fn build_direct(sender: &User, req: &SendDirectMessage) -> Result<StoredMessage, CoreError> {
    if req.ciphertext.is_empty() {
        return Err(CoreError::validation("ciphertext is required"));
    }
    if req.key_envelope.is_empty() {
        return Err(CoreError::validation("key_envelope is required"));
    }

    Ok(StoredMessage {
        id: Uuid::new_v4(),
        sender_id: sender.id,
        conversation_id: conversation::direct(sender.id, req.recipient_id),
        recipient_id: Some(req.recipient_id),
        group_id: None,
        ciphertext: req.ciphertext.clone(),
        key_envelope: KeyEnvelope::Direct(req.key_envelope.clone()),
        timestamp: Utc::now(),
        is_read: false,
    })
}

pub fn build_group(sender: &User, req: &SendGroupMessage) -> Result<StoredMessage, CoreError> {
    if req.ciphertext.is_empty() {
        return Err(CoreError::validation("ciphertext is required"));
    }
    if req.key_envelopes.is_empty() {
        return Err(CoreError::validation(
            "a per-member key_envelopes map is required",
        ));
    }

    Ok(StoredMessage {
        id: Uuid::new_v4(),
        sender_id: sender.id,
        conversation_id: conversation::group(req.group_id),
        recipient_id: None,
        group_id: Some(req.group_id),
        ciphertext: req.ciphertext.clone(),
        key_envelope: KeyEnvelope::Group(req.key_envelopes.clone()),
        timestamp: Utc::now(),
        is_read: false,
    })
}

/// Persist the body and prepend its id to the conversation history. Once
/// written, the record is never mutated.
pub fn store_message(store: &Store, message: &StoredMessage) -> Result<(), CoreError> {
    store.setex(
        &keys::message(message.id),
        &serde_json::to_string(message)?,
        MESSAGE_TTL,
    )?;

    let history_key = keys::conversation_history(&message.conversation_id);
    store.lpush(&history_key, &message.id.to_string())?;
    store.expire(&history_key, HISTORY_TTL)?;
    Ok(())
}

/// Most-recent-first page of a conversation's history. Ids whose bodies
/// have expired are skipped.
pub fn history(
    store: &Store,
    conversation_id: &str,
    offset: usize,
    limit: usize,
) -> Result<Vec<StoredMessage>, CoreError> {
    let ids = store.lrange(&keys::conversation_history(conversation_id), offset, limit)?;

    let mut messages = Vec::with_capacity(ids.len());
    for id in ids {
        let Ok(id) = id.parse::<Uuid>() else { continue };
        if let Some(json) = store.get(&keys::message(id))? {
            messages.push(serde_json::from_str(&json)?);
        }
    }
    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::create_user;

    fn store() -> Store {
        Store::open_in_memory().unwrap()
    }

    fn direct_req(recipient_id: Uuid) -> SendDirectMessage {
        SendDirectMessage {
            recipient_id,
            ciphertext: "b64ciphertext".into(),
            key_envelope: "b64envelope".into(),
        }
    }

    #[test]
    fn shape_validation() {
        let s = store();
        let alice = create_user(&s, "alice", "h", None).unwrap();

        let mut req = direct_req(Uuid::new_v4());
        req.ciphertext = String::new();
        assert!(matches!(
            build_direct(&alice, &req),
            Err(CoreError::Validation(_))
        ));

        let group_req = SendGroupMessage {
            group_id: Uuid::new_v4(),
            ciphertext: "c".into(),
            key_envelopes: Default::default(),
        };
        assert!(matches!(
            build_group(&alice, &group_req),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn history_is_most_recent_first() {
        let s = store();
        let alice = create_user(&s, "alice", "h", None).unwrap();
        let bob_id = Uuid::new_v4();

        let mut ids = Vec::new();
        for _ in 0..3 {
            let message = build_direct(&alice, &direct_req(bob_id)).unwrap();
            store_message(&s, &message).unwrap();
            ids.push(message.id);
        }

        let conversation_id = conversation::direct(alice.id, bob_id);
        let page = history(&s, &conversation_id, 0, 50).unwrap();
        assert_eq!(
            page.iter().map(|m| m.id).collect::<Vec<_>>(),
            vec![ids[2], ids[1], ids[0]]
        );

        // Pagination
        let second = history(&s, &conversation_id, 1, 1).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, ids[1]);
    }

    #[test]
    fn dangling_ids_are_skipped() {
        let s = store();
        let alice = create_user(&s, "alice", "h", None).unwrap();
        let bob_id = Uuid::new_v4();

        let kept = build_direct(&alice, &direct_req(bob_id)).unwrap();
        store_message(&s, &kept).unwrap();
        let dropped = build_direct(&alice, &direct_req(bob_id)).unwrap();
        store_message(&s, &dropped).unwrap();

        // Simulate the body expiring ahead of the index
        s.del(&cove_store::keys::message(dropped.id)).unwrap();

        let conversation_id = conversation::direct(alice.id, bob_id);
        let page = history(&s, &conversation_id, 0, 50).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, kept.id);
    }
}
