use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::error;
use uuid::Uuid;

use courier_db::StoreError;
use courier_gateway::delivery::DeliveryError;
use courier_types::api::{Claims, ConversationSummary, MarkReadResponse, MessagePage};

use crate::auth::AppState;

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 {
    50
}

/// The caller's conversations, most recently active first.
pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let viewer = claims.sub;

    let rows = tokio::task::spawn_blocking(move || db.list_conversations_for(viewer))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let summaries: Vec<ConversationSummary> = rows
        .into_iter()
        .map(|row| ConversationSummary::for_viewer(&row.into_model(), viewer))
        .collect();

    Ok(Json(summaries))
}

/// One page of history, newest first. Participants only.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<PageQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let limit = query.limit.clamp(1, 200);
    let offset = query.offset;

    let db = state.db.clone();
    let (conversation, rows, total) = tokio::task::spawn_blocking(move || {
        let conversation = db.get_conversation(conversation_id)?;
        let (rows, total) = db.list_page(conversation_id, limit, offset)?;
        Ok::<_, StoreError>((conversation, rows, total))
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    // Unknown conversations get the same answer as foreign ones.
    let involved = conversation
        .map(|row| row.into_model().involves(claims.sub))
        .unwrap_or(false);
    if !involved {
        return Err(StatusCode::FORBIDDEN);
    }

    let messages = rows.into_iter().map(|row| row.into_model()).collect();
    Ok(Json(MessagePage {
        messages,
        total,
        has_more: u64::from(offset) + u64::from(limit) < total,
    }))
}

/// Read receipt over REST; same engine operation the gateway command uses.
pub async fn mark_read(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let updated = state
        .engine
        .mark_read(conversation_id, claims.sub)
        .await
        .map_err(|err| match err {
            DeliveryError::AccessDenied => StatusCode::FORBIDDEN,
            DeliveryError::InvalidRequest(_) | DeliveryError::InvalidPair => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        })?;

    Ok(Json(MarkReadResponse {
        conversation_id,
        updated,
    }))
}
