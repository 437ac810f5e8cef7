//! Regional admission gate.
//!
//! Best-effort: when the country of origin cannot be determined the check
//! degrades to "allow" unless strict mode is configured. The account's own
//! `allowed_regions` set is the policy; an empty set means unrestricted.

use axum::http::HeaderMap;
use cove_types::models::User;
use tracing::warn;

const COUNTRY_HEADERS: [&str; 2] = ["cf-ipcountry", "x-country-code"];

/// Country code of the connecting client, as reported by the edge.
pub fn country_from_headers(headers: &HeaderMap) -> Option<String> {
    for name in COUNTRY_HEADERS {
        if let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) {
            let code = value.trim();
            if code.len() == 2 && code.chars().all(|c| c.is_ascii_alphabetic()) {
                return Some(code.to_ascii_uppercase());
            }
        }
    }
    None
}

/// Admission predicate for a connection context.
pub fn admit(user: &User, country: Option<&str>, strict: bool) -> bool {
    if user.allowed_regions.is_empty() {
        return true;
    }
    match country {
        Some(code) => user
            .allowed_regions
            .iter()
            .any(|r| r.eq_ignore_ascii_case(code)),
        None => {
            if strict {
                warn!(user = %user.id, "no country information, strict mode denies");
                false
            } else {
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_with_regions(regions: &[&str]) -> User {
        let mut user = User::new("alice".into(), "h".into(), None);
        user.allowed_regions = regions.iter().map(|r| r.to_string()).collect();
        user
    }

    #[test]
    fn unrestricted_account_always_admitted() {
        let user = user_with_regions(&[]);
        assert!(admit(&user, Some("FR"), true));
        assert!(admit(&user, None, true));
    }

    #[test]
    fn restricted_account_matches_case_insensitively() {
        let user = user_with_regions(&["FR", "DE"]);
        assert!(admit(&user, Some("fr"), false));
        assert!(!admit(&user, Some("US"), false));
    }

    #[test]
    fn missing_country_degrades_to_allow_unless_strict() {
        let user = user_with_regions(&["FR"]);
        assert!(admit(&user, None, false));
        assert!(!admit(&user, None, true));
    }

    #[test]
    fn header_extraction() {
        let mut headers = HeaderMap::new();
        headers.insert("cf-ipcountry", "de".parse().unwrap());
        assert_eq!(country_from_headers(&headers), Some("DE".into()));

        let mut headers = HeaderMap::new();
        headers.insert("x-country-code", "XX1".parse().unwrap());
        assert_eq!(country_from_headers(&headers), None);
        assert_eq!(country_from_headers(&HeaderMap::new()), None);
    }
}
