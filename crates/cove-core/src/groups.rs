//! Group records and idempotent membership.

use cove_store::{Store, keys};
use cove_types::models::{Group, User};
use tracing::debug;
use uuid::Uuid;

use crate::error::CoreError;
use crate::users;

pub const NAME_MAX: usize = 64;

fn validate_name(name: &str) -> Result<(), CoreError> {
    if name.trim().is_empty() {
        return Err(CoreError::validation("group name cannot be empty"));
    }
    if name.chars().count() > NAME_MAX {
        return Err(CoreError::validation(format!(
            "group name must be at most {NAME_MAX} characters"
        )));
    }
    Ok(())
}

/// Create a group. The member set is the given list plus the creator;
/// creator inclusion is unconditional, and ids that do not resolve to an
/// existing account are dropped.
pub fn create_group(
    store: &Store,
    creator: &User,
    name: &str,
    initial_members: &[Uuid],
) -> Result<(Group, Vec<Uuid>), CoreError> {
    validate_name(name)?;

    let group = Group::new(name.trim().to_string(), creator.id);
    store.set(&keys::group(group.id), &serde_json::to_string(&group)?)?;

    let members_key = keys::group_members(group.id);
    store.sadd(&members_key, &creator.id.to_string())?;
    for id in initial_members {
        if *id != creator.id && users::load(store, *id)?.is_some() {
            store.sadd(&members_key, &id.to_string())?;
        }
    }

    let members = members_of(store, group.id)?;
    debug!(group_id = %group.id, members = members.len(), "group created");
    Ok((group, members))
}

pub fn get_group(store: &Store, id: Uuid) -> Result<Group, CoreError> {
    match store.get(&keys::group(id))? {
        Some(json) => Ok(serde_json::from_str(&json)?),
        None => Err(CoreError::NotFound),
    }
}

pub fn members_of(store: &Store, id: Uuid) -> Result<Vec<Uuid>, CoreError> {
    let members = store
        .smembers(&keys::group_members(id))?
        .into_iter()
        .filter_map(|m| m.parse().ok())
        .collect();
    Ok(members)
}

pub fn is_member(store: &Store, group_id: Uuid, user_id: Uuid) -> Result<bool, CoreError> {
    Ok(store.sismember(&keys::group_members(group_id), &user_id.to_string())?)
}

/// Rename. Creator only.
pub fn rename_group(
    store: &Store,
    group_id: Uuid,
    requester_id: Uuid,
    name: &str,
) -> Result<Group, CoreError> {
    validate_name(name)?;
    let mut group = get_group(store, group_id)?;
    if group.created_by != requester_id {
        return Err(CoreError::authorization(
            "only the group creator may rename the group",
        ));
    }
    group.name = name.trim().to_string();
    group.updated_at = chrono::Utc::now();
    store.set(&keys::group(group.id), &serde_json::to_string(&group)?)?;
    Ok(group)
}

/// Add members. Any current member may add; adds are idempotent and ids
/// without an account are dropped. Returns the resulting member list.
pub fn add_members(
    store: &Store,
    group_id: Uuid,
    requester_id: Uuid,
    member_ids: &[Uuid],
) -> Result<Vec<Uuid>, CoreError> {
    get_group(store, group_id)?;
    if !is_member(store, group_id, requester_id)? {
        return Err(CoreError::authorization(
            "only group members may add members",
        ));
    }

    let members_key = keys::group_members(group_id);
    for id in member_ids {
        if users::load(store, *id)?.is_some() {
            store.sadd(&members_key, &id.to_string())?;
        }
    }
    members_of(store, group_id)
}

/// Remove a member. The creator may remove anyone but themself; everyone
/// else may only remove themselves. The creator is irremovable while
/// holding the role, even by their own request.
pub fn remove_member(
    store: &Store,
    group_id: Uuid,
    requester_id: Uuid,
    target_id: Uuid,
) -> Result<(), CoreError> {
    let group = get_group(store, group_id)?;

    if target_id == group.created_by {
        return Err(CoreError::authorization(
            "the group creator cannot be removed",
        ));
    }
    if requester_id != group.created_by && requester_id != target_id {
        return Err(CoreError::authorization(
            "only the group creator may remove other members",
        ));
    }

    store.srem(&keys::group_members(group_id), &target_id.to_string())?;
    debug!(group_id = %group_id, member = %target_id, "group member removed");
    Ok(())
}

/// Every group the user belongs to. This scans all group member sets,
/// O(number of groups), which is acceptable at the expected cardinality.
pub fn groups_of(store: &Store, user_id: Uuid) -> Result<Vec<Group>, CoreError> {
    let member = user_id.to_string();
    let mut result = Vec::new();
    for key in store.keys(keys::GROUP_PREFIX)? {
        let Some(group_id) = keys::parse_group_key(&key) else {
            continue;
        };
        if store.sismember(&keys::group_members(group_id), &member)? {
            result.push(get_group(store, group_id)?);
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

    #[test]
    fn creator_is_always_a_member() {
        let s = store();
        let alice = create_user(&s, "alice", "h", None).unwrap();
        let bob = create_user(&s, "bob", "h", None).unwrap();

        // Duplicates and self-inclusion in the input make no difference
        let (group, members) =
            create_group(&s, &alice, "team", &[bob.id, bob.id, alice.id]).unwrap();
        let mut members = members;
        members.sort();
        let mut expected = vec![alice.id, bob.id];
        expected.sort();
        assert_eq!(members, expected);
        assert_eq!(group.created_by, alice.id);

        // Unknown ids are dropped
        let (_, members) = create_group(&s, &alice, "solo", &[Uuid::new_v4()]).unwrap();
        assert_eq!(members, vec![alice.id]);
    }

    #[test]
    fn adding_existing_member_is_idempotent() {
        let s = store();
        let alice = create_user(&s, "alice", "h", None).unwrap();
        let bob = create_user(&s, "bob", "h", None).unwrap();

        let (group, _) = create_group(&s, &alice, "team", &[bob.id]).unwrap();
        let before = members_of(&s, group.id).unwrap().len();

        let after = add_members(&s, group.id, alice.id, &[bob.id]).unwrap();
        assert_eq!(after.len(), before);
    }

    #[test]
    fn non_members_cannot_add() {
        let s = store();
        let alice = create_user(&s, "alice", "h", None).unwrap();
        let carol = create_user(&s, "carol", "h", None).unwrap();

        let (group, _) = create_group(&s, &alice, "team", &[]).unwrap();
        assert!(matches!(
            add_members(&s, group.id, carol.id, &[carol.id]),
            Err(CoreError::Authorization(_))
        ));
    }

    #[test]
    fn creator_is_irremovable() {
        let s = store();
        let alice = create_user(&s, "alice", "h", None).unwrap();
        let bob = create_user(&s, "bob", "h", None).unwrap();
        let (group, _) = create_group(&s, &alice, "team", &[bob.id]).unwrap();

        // By another member
        assert!(matches!(
            remove_member(&s, group.id, bob.id, alice.id),
            Err(CoreError::Authorization(_))
        ));
        // Even by themself
        assert!(matches!(
            remove_member(&s, group.id, alice.id, alice.id),
            Err(CoreError::Authorization(_))
        ));
    }

    #[test]
    fn removal_permissions() {
        let s = store();
        let alice = create_user(&s, "alice", "h", None).unwrap();
        let bob = create_user(&s, "bob", "h", None).unwrap();
        let carol = create_user(&s, "carol", "h", None).unwrap();
        let (group, _) = create_group(&s, &alice, "team", &[bob.id, carol.id]).unwrap();

        // A member cannot force-remove another member
        assert!(matches!(
            remove_member(&s, group.id, bob.id, carol.id),
            Err(CoreError::Authorization(_))
        ));

        // Self-removal is fine
        remove_member(&s, group.id, bob.id, bob.id).unwrap();
        assert!(!is_member(&s, group.id, bob.id).unwrap());

        // The creator may force-remove
        remove_member(&s, group.id, alice.id, carol.id).unwrap();
        assert!(!is_member(&s, group.id, carol.id).unwrap());
    }

    #[test]
    fn rename_is_creator_only() {
        let s = store();
        let alice = create_user(&s, "alice", "h", None).unwrap();
        let bob = create_user(&s, "bob", "h", None).unwrap();
        let (group, _) = create_group(&s, &alice, "team", &[bob.id]).unwrap();

        assert!(matches!(
            rename_group(&s, group.id, bob.id, "coup"),
            Err(CoreError::Authorization(_))
        ));

        let renamed = rename_group(&s, group.id, alice.id, "crew").unwrap();
        assert_eq!(renamed.name, "crew");
    }

    #[test]
    fn groups_of_scans_membership() {
        let s = store();
        let alice = create_user(&s, "alice", "h", None).unwrap();
        let bob = create_user(&s, "bob", "h", None).unwrap();

        let (g1, _) = create_group(&s, &alice, "both", &[bob.id]).unwrap();
        create_group(&s, &alice, "alice only", &[]).unwrap();

        let groups = groups_of(&s, bob.id).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].id, g1.id);
        assert_eq!(groups_of(&s, alice.id).unwrap().len(), 2);
    }
}
