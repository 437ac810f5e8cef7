use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use uuid::Uuid;

use cove_core::{CoreError, groups, users};
use cove_types::api::{AddMembersRequest, Claims, CreateGroupRequest, GroupView, UpdateGroupRequest};
use cove_types::models::Group;

use crate::AppState;
use crate::error::ApiError;

fn view(group: Group, members: Vec<Uuid>) -> GroupView {
    GroupView {
        id: group.id,
        name: group.name,
        created_by: group.created_by,
        members,
        created_at: group.created_at,
        updated_at: group.updated_at,
    }
}

pub async fn create(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateGroupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let creator = users::get_user(&state.store, claims.sub)?;
    let (group, members) = groups::create_group(&state.store, &creator, &req.name, &req.members)?;
    Ok((StatusCode::CREATED, Json(view(group, members))))
}

pub async fn list_mine(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let mut views = Vec::new();
    for group in groups::groups_of(&state.store, claims.sub)? {
        let members = groups::members_of(&state.store, group.id)?;
        views.push(view(group, members));
    }
    Ok(Json(views))
}

/// Group records are visible to members only.
pub async fn get(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(group_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let group = groups::get_group(&state.store, group_id)?;
    if !groups::is_member(&state.store, group_id, claims.sub)? {
        return Err(CoreError::NotFound.into());
    }
    let members = groups::members_of(&state.store, group_id)?;
    Ok(Json(view(group, members)))
}

pub async fn rename(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(group_id): Path<Uuid>,
    Json(req): Json<UpdateGroupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let group = groups::rename_group(&state.store, group_id, claims.sub, &req.name)?;
    let members = groups::members_of(&state.store, group_id)?;
    Ok(Json(view(group, members)))
}

pub async fn add_members(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(group_id): Path<Uuid>,
    Json(req): Json<AddMembersRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let members = groups::add_members(&state.store, group_id, claims.sub, &req.members)?;
    let group = groups::get_group(&state.store, group_id)?;
    Ok(Json(view(group, members)))
}

pub async fn remove_member(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((group_id, user_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    groups::remove_member(&state.store, group_id, claims.sub, user_id)?;
    Ok(StatusCode::NO_CONTENT)
}
