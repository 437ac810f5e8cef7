//! Deterministic conversation identity.
//!
//! A conversation id is a pure function of the participant identities and
//! is always recomputed server-side; client-supplied ids are never trusted
//! for direct messages, so one pair cannot spoof another pair's history.

use uuid::Uuid;

use crate::error::CoreError;

const DELIMITER: char = ':';
const GROUP_PREFIX: &str = "group:";

/// Direct conversation id: the two ids sorted lexicographically and joined,
/// so both participants derive the same stream regardless of who initiates.
pub fn direct(a: Uuid, b: Uuid) -> String {
    let (a, b) = (a.to_string(), b.to_string());
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{lo}{DELIMITER}{hi}")
}

pub fn group(group_id: Uuid) -> String {
    format!("{GROUP_PREFIX}{group_id}")
}

/// The stream a conversation id addresses, as parsed from the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Direct(Uuid, Uuid),
    Group(Uuid),
}

/// Parse a conversation id supplied by a client. Anything that is not a
/// canonical direct pair or group id is rejected, bare UUIDs included:
/// unrecognized formats are never assumed authorized.
pub fn parse(conversation_id: &str) -> Result<Target, CoreError> {
    if let Some(rest) = conversation_id.strip_prefix(GROUP_PREFIX) {
        let group_id = rest
            .parse()
            .map_err(|_| CoreError::validation("malformed conversation id"))?;
        return Ok(Target::Group(group_id));
    }

    let (lo, hi) = conversation_id
        .split_once(DELIMITER)
        .ok_or_else(|| CoreError::validation("malformed conversation id"))?;
    let lo: Uuid = lo
        .parse()
        .map_err(|_| CoreError::validation("malformed conversation id"))?;
    let hi: Uuid = hi
        .parse()
        .map_err(|_| CoreError::validation("malformed conversation id"))?;
    if lo.to_string() > hi.to_string() {
        return Err(CoreError::validation("malformed conversation id"));
    }
    Ok(Target::Direct(lo, hi))
}

/// Whether `user_id` is one of the two participants of a direct id.
pub fn is_direct_participant(target: &Target, user_id: Uuid) -> bool {
    match target {
        Target::Direct(a, b) => *a == user_id || *b == user_id,
        Target::Group(_) => false,
    }
}
