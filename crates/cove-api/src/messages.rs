use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};

use cove_core::conversation::{self, Target};
use cove_core::{CoreError, messages, users};
use cove_types::api::{Claims, HistoryQuery, SendMessageRequest};
use cove_types::models::StoredMessage;

use crate::AppState;
use crate::error::ApiError;

const MAX_PAGE: usize = 200;

/// Paginated history fetch, most recent first. The caller must be a
/// participant: one of the two ids of a direct conversation, or a member
/// of the group. Non-canonical conversation ids are rejected outright.
pub async fn history(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(conversation_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let target = conversation::parse(&conversation_id)?;
    match target {
        Target::Direct(..) => {
            if !conversation::is_direct_participant(&target, claims.sub) {
                return Err(
                    CoreError::authorization("not a participant of this conversation").into(),
                );
            }
        }
        Target::Group(group_id) => {
            if !cove_core::groups::is_member(&state.store, group_id, claims.sub)? {
                return Err(CoreError::authorization("not a member of this group").into());
            }
        }
    }

    let limit = query.limit.min(MAX_PAGE);
    let offset = query.offset;

    // Run the blocking store reads off the async runtime
    let store = state.store.clone();
    let page: Vec<StoredMessage> = tokio::task::spawn_blocking(move || {
        messages::history(&store, &conversation_id, offset, limit)
    })
    .await
    .map_err(ApiError::internal)??;

    Ok(Json(page))
}

/// Fallback send path for clients without a live gateway connection. The
/// acknowledgment carries the same delivered flag a gateway sender gets.
pub async fn send(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let sender = users::get_user(&state.store, claims.sub)?;

    let receipt = match req {
        SendMessageRequest::Direct(direct) => state.router.send_direct(&sender, direct).await?,
        SendMessageRequest::Group(group) => state.router.send_group(&sender, group).await?,
    };

    Ok((StatusCode::CREATED, Json(receipt)))
}
