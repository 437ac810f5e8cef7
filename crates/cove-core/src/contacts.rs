//! Contact-request state machine and the mutual contact edge.

use std::time::Duration;

use cove_store::{Store, keys};
use cove_types::models::{ContactRequest, RequestStatus, User};
use tracing::debug;
use uuid::Uuid;

use crate::error::CoreError;
use crate::users;

/// Request records and the pending-pair guard share this TTL.
pub const REQUEST_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Create a pending request from `sender` to the named recipient.
///
/// Checks run in a fixed order and the first failure wins: recipient
/// existence, self-request, existing contact edge, existing pending request
/// for the ordered pair. The pair guard is claimed atomically, so two
/// concurrent sends cannot both create a pending request.
pub fn send_contact_request(
    store: &Store,
    sender: &User,
    recipient_username: &str,
) -> Result<ContactRequest, CoreError> {
    let recipient =
        users::find_by_username(store, recipient_username)?.ok_or(CoreError::NotFound)?;

    if recipient.id == sender.id {
        return Err(CoreError::validation(
            "cannot send a contact request to yourself",
        ));
    }

    if store.sismember(&keys::contacts(sender.id), &recipient.id.to_string())? {
        return Err(CoreError::conflict("already a contact"));
    }

    let request = ContactRequest::new(sender, &recipient);

    let guard = keys::pending_pair(sender.id, recipient.id);
    if !store.set_nx(&guard, &request.id.to_string())? {
        return Err(CoreError::conflict("a contact request is already pending"));
    }
    store.expire(&guard, REQUEST_TTL)?;

    store.setex(
        &keys::contact_request(request.id),
        &serde_json::to_string(&request)?,
        REQUEST_TTL,
    )?;
    store.sadd(
        &keys::outgoing_requests(sender.id),
        &request.id.to_string(),
    )?;
    store.sadd(
        &keys::incoming_requests(recipient.id),
        &request.id.to_string(),
    )?;

    debug!(request_id = %request.id, sender = %sender.id, recipient = %recipient.id,
        "contact request created");
    Ok(request)
}

/// Accept or reject a pending request. Only the recorded recipient may
/// respond, and only while the request is pending. Accepting writes both
/// contact-edge directions before the status flips, so a failure partway
/// leaves the request pending rather than half-accepted.
pub fn respond_to_request(
    store: &Store,
    request_id: Uuid,
    responder_id: Uuid,
    accept: bool,
) -> Result<ContactRequest, CoreError> {
    let mut request = get_request(store, request_id)?.ok_or(CoreError::NotFound)?;

    if request.recipient_id != responder_id {
        return Err(CoreError::authorization(
            "only the recipient may respond to a contact request",
        ));
    }
    if request.status != RequestStatus::Pending {
        return Err(CoreError::conflict("contact request already processed"));
    }

    if accept {
        store.sadd(
            &keys::contacts(request.sender_id),
            &request.recipient_id.to_string(),
        )?;
        store.sadd(
            &keys::contacts(request.recipient_id),
            &request.sender_id.to_string(),
        )?;
        request.status = RequestStatus::Accepted;
    } else {
        request.status = RequestStatus::Rejected;
    }

    request.updated_at = chrono::Utc::now();
    store.setex(
        &keys::contact_request(request.id),
        &serde_json::to_string(&request)?,
        REQUEST_TTL,
    )?;

    // Terminal state: both index entries go together, and the pair guard is
    // released so a fresh request may be sent later.
    store.srem(
        &keys::outgoing_requests(request.sender_id),
        &request.id.to_string(),
    )?;
    store.srem(
        &keys::incoming_requests(request.recipient_id),
        &request.id.to_string(),
    )?;
    store.del(&keys::pending_pair(request.sender_id, request.recipient_id))?;

    debug!(request_id = %request.id, accepted = accept, "contact request resolved");
    Ok(request)
}

pub fn get_request(store: &Store, id: Uuid) -> Result<Option<ContactRequest>, CoreError> {
    match store.get(&keys::contact_request(id))? {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

/// Requests still indexed for a user. Records whose TTL elapsed are skipped.
pub fn list_requests(
    store: &Store,
    user_id: Uuid,
    outgoing: bool,
) -> Result<Vec<ContactRequest>, CoreError> {
    let index = if outgoing {
        keys::outgoing_requests(user_id)
    } else {
        keys::incoming_requests(user_id)
    };

    let mut requests = Vec::new();
    for id in store.smembers(&index)? {
        let Ok(id) = id.parse::<Uuid>() else { continue };
        if let Some(request) = get_request(store, id)? {
            requests.push(request);
        }
    }
    requests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(requests)
}

pub fn is_contact(store: &Store, user_id: Uuid, other: Uuid) -> Result<bool, CoreError> {
    Ok(store.sismember(&keys::contacts(user_id), &other.to_string())?)
}

/// Resolve the contact edge set to full user records, skipping ids whose
/// accounts have since disappeared.
pub fn contacts_of(store: &Store, user_id: Uuid) -> Result<Vec<User>, CoreError> {
    let mut result = Vec::new();
    for id in store.smembers(&keys::contacts(user_id))? {
        let Ok(id) = id.parse::<Uuid>() else { continue };
        if let Some(user) = users::load(store, id)? {
            result.push(user);
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::create_user;

    fn store() -> Store {
        Store::open_in_memory().unwrap()
    }

    fn two_users(s: &Store) -> (User, User) {
        let alice = create_user(s, "alice", "h", None).unwrap();
        let bob = create_user(s, "bob", "h", None).unwrap();
        (alice, bob)
    }

    #[test]
    fn accept_creates_symmetric_edge() {
        let s = store();
        let (alice, bob) = two_users(&s);

        let request = send_contact_request(&s, &alice, "bob").unwrap();
        assert_eq!(request.status, RequestStatus::Pending);
        assert_eq!(list_requests(&s, bob.id, false).unwrap().len(), 1);
        assert_eq!(list_requests(&s, alice.id, true).unwrap().len(), 1);

        let resolved = respond_to_request(&s, request.id, bob.id, true).unwrap();
        assert_eq!(resolved.status, RequestStatus::Accepted);

        // Edge symmetry
        assert!(is_contact(&s, alice.id, bob.id).unwrap());
        assert!(is_contact(&s, bob.id, alice.id).unwrap());

        // Index entries removed together
        assert!(list_requests(&s, bob.id, false).unwrap().is_empty());
        assert!(list_requests(&s, alice.id, true).unwrap().is_empty());

        let contacts = contacts_of(&s, alice.id).unwrap();
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].id, bob.id);
    }

    #[test]
    fn reject_leaves_no_edge() {
        let s = store();
        let (alice, bob) = two_users(&s);

        let request = send_contact_request(&s, &alice, "bob").unwrap();
        let resolved = respond_to_request(&s, request.id, bob.id, false).unwrap();
        assert_eq!(resolved.status, RequestStatus::Rejected);

        assert!(!is_contact(&s, alice.id, bob.id).unwrap());
        assert!(!is_contact(&s, bob.id, alice.id).unwrap());
    }

    #[test]
    fn at_most_one_pending_per_ordered_pair() {
        let s = store();
        let (alice, _bob) = two_users(&s);

        let first = send_contact_request(&s, &alice, "bob").unwrap();
        let err = send_contact_request(&s, &alice, "bob").unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));

        // Only the first record exists
        let incoming = list_requests(&s, first.recipient_id, false).unwrap();
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].id, first.id);
    }

    #[test]
    fn pair_guard_released_after_resolution() {
        let s = store();
        let (alice, bob) = two_users(&s);

        let request = send_contact_request(&s, &alice, "bob").unwrap();
        respond_to_request(&s, request.id, bob.id, false).unwrap();

        // Rejected: a new request may be sent again
        send_contact_request(&s, &alice, "bob").unwrap();
    }

    #[test]
    fn ordered_checks() {
        let s = store();
        let (alice, bob) = two_users(&s);

        // Recipient existence is checked first
        assert!(matches!(
            send_contact_request(&s, &alice, "ghost"),
            Err(CoreError::NotFound)
        ));

        // Self-request
        assert!(matches!(
            send_contact_request(&s, &alice, "alice"),
            Err(CoreError::Validation(_))
        ));

        // Existing contact wins over pending check
        let request = send_contact_request(&s, &alice, "bob").unwrap();
        respond_to_request(&s, request.id, bob.id, true).unwrap();
        assert!(matches!(
            send_contact_request(&s, &alice, "bob"),
            Err(CoreError::Conflict(_))
        ));
    }

    #[test]
    fn only_recipient_responds_and_only_once() {
        let s = store();
        let (alice, bob) = two_users(&s);
        let carol = create_user(&s, "carol", "h", None).unwrap();

        let request = send_contact_request(&s, &alice, "bob").unwrap();

        assert!(matches!(
            respond_to_request(&s, request.id, carol.id, true),
            Err(CoreError::Authorization(_))
        ));
        assert!(matches!(
            respond_to_request(&s, request.id, alice.id, true),
            Err(CoreError::Authorization(_))
        ));

        respond_to_request(&s, request.id, bob.id, true).unwrap();
        assert!(matches!(
            respond_to_request(&s, request.id, bob.id, true),
            Err(CoreError::Conflict(_))
        ));

        assert!(matches!(
            respond_to_request(&s, Uuid::new_v4(), bob.id, true),
            Err(CoreError::NotFound)
        ));
    }
}
