use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use serde::Deserialize;
use uuid::Uuid;

use cove_core::{contacts, users};
use cove_types::api::{
    Claims, ContactRequestView, RespondContactRequest, SendContactRequest, UserProfile,
};

use crate::AppState;
use crate::error::ApiError;

pub async fn send_request(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendContactRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let sender = users::get_user(&state.store, claims.sub)?;
    let request = contacts::send_contact_request(&state.store, &sender, &req.username)?;
    Ok((StatusCode::CREATED, Json(ContactRequestView::from(request))))
}

#[derive(Debug, Deserialize)]
pub struct ListRequestsQuery {
    pub direction: Option<String>,
}

pub async fn list_requests(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<ListRequestsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let outgoing = matches!(query.direction.as_deref(), Some("outgoing"));
    let requests = contacts::list_requests(&state.store, claims.sub, outgoing)?;
    let views: Vec<ContactRequestView> =
        requests.into_iter().map(ContactRequestView::from).collect();
    Ok(Json(views))
}

pub async fn respond(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(request_id): Path<Uuid>,
    Json(req): Json<RespondContactRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let resolved =
        contacts::respond_to_request(&state.store, request_id, claims.sub, req.accept)?;
    Ok(Json(ContactRequestView::from(resolved)))
}

pub async fn list_contacts(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let contacts = contacts::contacts_of(&state.store, claims.sub)?;
    let views: Vec<UserProfile> = contacts.into_iter().map(UserProfile::from).collect();
    Ok(Json(views))
}
