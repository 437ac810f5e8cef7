use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::{Extension, Json};
use serde::Deserialize;

use cove_core::{CoreError, users};
use cove_types::api::{Claims, ProfilePatch, UserProfile};

use crate::AppState;
use crate::error::ApiError;

pub async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user = users::get_user(&state.store, claims.sub)?;
    Ok(Json(UserProfile::from(user)))
}

pub async fn update_me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(patch): Json<ProfilePatch>,
) -> Result<impl IntoResponse, ApiError> {
    let user = users::update_user(&state.store, claims.sub, patch)?;
    Ok(Json(UserProfile::from(user)))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub username: String,
}

/// Exact-username lookup. Misses are a generic 404; the endpoint does not
/// confirm which usernames exist beyond an exact match.
pub async fn search(
    State(state): State<AppState>,
    Extension(_claims): Extension<Claims>,
    Query(query): Query<SearchQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let user =
        users::find_by_username(&state.store, &query.username)?.ok_or(CoreError::NotFound)?;
    Ok(Json(UserProfile::from(user)))
}
