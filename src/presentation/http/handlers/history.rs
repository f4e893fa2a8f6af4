//! Conversation History Handler

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};

use crate::application::dto::request::HistoryQuery;
use crate::application::dto::response::MessageResponse;
use crate::presentation::middleware::AuthUser;
use crate::shared::error::AppError;
use crate::startup::AppState;

/// Get messages from a conversation, ascending by id, with keyset
/// pagination (`before` + `limit`). Membership-checked.
pub async fn get_history(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(conversation_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<MessageResponse>>, AppError> {
    let conversation_id: i64 = conversation_id
        .parse()
        .map_err(|_| AppError::BadRequest("Invalid conversation ID".into()))?;

    let before = query.before.and_then(|s| s.parse().ok());

    let messages = state
        .delivery
        .history(auth.identity_id, conversation_id, before, query.limit)
        .await
        .map_err(AppError::from)?;

    Ok(Json(messages))
}
