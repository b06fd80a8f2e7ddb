use crate::error::{AppError, AppResult};
use crate::state::{AppState, SessionRecord};
use axum::extract::{Path, State};
use axum::Json as AxumJson;
use std::sync::Arc;

pub async fn session_status_handler(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
) -> AppResult<AxumJson<SessionRecord>> {
    let sessions = state.sessions.read().await;
    let s = sessions
        .get(address.trim())
        .ok_or_else(|| AppError::NotFound("unknown session".into()))?;
    Ok(AxumJson(s.clone()))
}
