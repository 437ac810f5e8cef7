use cove_store::{Store, keys};
use cove_types::api::ProfilePatch;
use cove_types::models::User;
use tracing::debug;
use uuid::Uuid;

use crate::error::CoreError;

pub const USERNAME_MIN: usize = 3;
pub const USERNAME_MAX: usize = 32;

fn normalize(username: &str) -> String {
    username.trim().to_lowercase()
}

fn validate_username(username: &str) -> Result<(), CoreError> {
    let len = username.chars().count();
    if !(USERNAME_MIN..=USERNAME_MAX).contains(&len) {
        return Err(CoreError::validation(format!(
            "username must be {USERNAME_MIN}-{USERNAME_MAX} characters"
        )));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    {
        return Err(CoreError::validation(
            "username may only contain letters, digits, '_', '.' and '-'",
        ));
    }
    Ok(())
}

/// Create an account. The username index is claimed first with an atomic
/// set-if-not-exists, so a lost race fails cleanly with `Conflict` and
/// never leaves an orphaned user record behind.
pub fn create_user(
    store: &Store,
    username: &str,
    credential_hash: &str,
    public_key: Option<String>,
) -> Result<User, CoreError> {
    let username = username.trim();
    validate_username(username)?;

    let user = User::new(username.to_string(), credential_hash.to_string(), public_key);

    let claimed = store.set_nx(&keys::username(&normalize(username)), &user.id.to_string())?;
    if !claimed {
        return Err(CoreError::conflict("username already taken"));
    }

    save(store, &user)?;
    debug!(user_id = %user.id, "user created");
    Ok(user)
}

pub fn get_user(store: &Store, id: Uuid) -> Result<User, CoreError> {
    load(store, id)?.ok_or(CoreError::NotFound)
}

/// Case-insensitive exact lookup through the secondary index.
pub fn find_by_username(store: &Store, username: &str) -> Result<Option<User>, CoreError> {
    let Some(id) = store.get(&keys::username(&normalize(username)))? else {
        return Ok(None);
    };
    let id: Uuid = id
        .parse()
        .map_err(|_| CoreError::validation("corrupt username index"))?;
    load(store, id)
}

/// Merge an allow-listed patch into the record. Region entries that are not
/// exactly two ASCII letters are silently filtered; settings merge key-wise
/// with the existing map rather than replacing it.
pub fn update_user(store: &Store, id: Uuid, patch: ProfilePatch) -> Result<User, CoreError> {
    let mut user = get_user(store, id)?;

    if let Some(public_key) = patch.public_key {
        user.public_key = Some(public_key);
    }
    if let Some(display_name) = patch.display_name {
        user.display_name = Some(display_name);
    }
    if let Some(bio) = patch.bio {
        user.bio = Some(bio);
    }
    if let Some(regions) = patch.allowed_regions {
        user.allowed_regions = regions
            .into_iter()
            .filter(|r| r.len() == 2 && r.chars().all(|c| c.is_ascii_alphabetic()))
            .map(|r| r.to_ascii_uppercase())
            .collect();
    }
    if let Some(settings) = patch.settings {
        user.settings.extend(settings);
    }

    user.updated_at = chrono::Utc::now();
    save(store, &user)?;
    Ok(user)
}

pub(crate) fn load(store: &Store, id: Uuid) -> Result<Option<User>, CoreError> {
    match store.get(&keys::user(id))? {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

pub(crate) fn save(store: &Store, user: &User) -> Result<(), CoreError> {
    store.set(&keys::user(user.id), &serde_json::to_string(user)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> Store {
        Store::open_in_memory().unwrap()
    }

    #[test]
    fn create_and_lookup() {
        let s = store();
        let user = create_user(&s, "Alice", "hash", None).unwrap();
        assert_eq!(user.username, "Alice");

        // Case-insensitive lookup through the index
        let found = find_by_username(&s, "ALICE").unwrap().unwrap();
        assert_eq!(found.id, user.id);
        assert_eq!(get_user(&s, user.id).unwrap().id, user.id);
    }

    #[test]
    fn duplicate_username_conflicts() {
        let s = store();
        create_user(&s, "alice", "h1", None).unwrap();
        let err = create_user(&s, "ALICE", "h2", None).unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[test]
    fn username_validation() {
        let s = store();
        assert!(matches!(
            create_user(&s, "ab", "h", None),
            Err(CoreError::Validation(_))
        ));
        assert!(matches!(
            create_user(&s, "has space", "h", None),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn patch_merges_and_filters() {
        let s = store();
        let user = create_user(&s, "alice", "h", None).unwrap();
        update_user(
            &s,
            user.id,
            ProfilePatch {
                settings: Some([("theme".to_string(), json!("dark"))].into()),
                ..Default::default()
            },
        )
        .unwrap();

        let updated = update_user(
            &s,
            user.id,
            ProfilePatch {
                display_name: Some("Alice".into()),
                allowed_regions: Some(vec![
                    "fr".into(),
                    "USA".into(), // not 2 letters, dropped
                    "12".into(),  // not alphabetic, dropped
                    "DE".into(),
                ]),
                settings: Some([("lang".to_string(), json!("en"))].into()),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(updated.display_name.as_deref(), Some("Alice"));
        assert_eq!(updated.allowed_regions, vec!["FR", "DE"]);
        // Key-wise merge keeps earlier settings
        assert_eq!(updated.settings["theme"], json!("dark"));
        assert_eq!(updated.settings["lang"], json!("en"));
    }

    #[test]
    fn missing_user_is_not_found() {
        let s = store();
        assert!(matches!(
            get_user(&s, Uuid::new_v4()),
            Err(CoreError::NotFound)
        ));
        assert!(find_by_username(&s, "ghost").unwrap().is_none());
    }
}
