//! Operator endpoints over the dead-letter store.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use outbox::{DeadLetterMessage, DeadLetterStatus, ReprocessResult};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::{AppState, Backends};

#[derive(Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
}

#[derive(Deserialize)]
pub struct IgnoreRequest {
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Serialize)]
pub struct PendingCountResponse {
    pub pending: u64,
}

/// GET /dead-letters[?status=PENDING|REPROCESSED|IGNORED], newest first.
pub async fn list<B: Backends>(
    State(state): State<Arc<AppState<B>>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<DeadLetterMessage>>, ApiError> {
    let messages = match query.status.as_deref() {
        Some(status) => {
            let status: DeadLetterStatus = status.parse()?;
            state.dead_letters.list_by_status(status).await?
        }
        None => state.dead_letters.list_all().await?,
    };
    Ok(Json(messages))
}

/// GET /dead-letters/{id}
pub async fn get<B: Backends>(
    State(state): State<Arc<AppState<B>>>,
    Path(id): Path<i64>,
) -> Result<Json<DeadLetterMessage>, ApiError> {
    Ok(Json(state.dead_letters.get_by_id(id).await?))
}

/// POST /dead-letters/{id}/reprocess
///
/// A refused or failed republish is reported in the body with
/// `success: false`, not as an HTTP error.
pub async fn reprocess<B: Backends>(
    State(state): State<Arc<AppState<B>>>,
    Path(id): Path<i64>,
) -> Result<Json<ReprocessResult>, ApiError> {
    Ok(Json(state.dead_letters.reprocess(id).await?))
}

/// POST /dead-letters/{id}/ignore
pub async fn ignore<B: Backends>(
    State(state): State<Arc<AppState<B>>>,
    Path(id): Path<i64>,
    Json(request): Json<IgnoreRequest>,
) -> Result<Json<DeadLetterMessage>, ApiError> {
    let note = request.note.unwrap_or_default();
    Ok(Json(state.dead_letters.ignore(id, &note).await?))
}

/// GET /dead-letters/pending/count
pub async fn pending_count<B: Backends>(
    State(state): State<Arc<AppState<B>>>,
) -> Result<Json<PendingCountResponse>, ApiError> {
    let pending = state.dead_letters.count_pending().await?;
    Ok(Json(PendingCountResponse { pending }))
}
