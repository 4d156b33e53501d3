use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    auth::CronGuard,
    error::{AppError, AppResult},
    state::AppState,
    unseen,
};

#[derive(Deserialize)]
pub struct SweepParams {
    pub hours: Option<i64>,
}

pub async fn notify_unseen(
    _guard: CronGuard,
    State(state): State<AppState>,
    Query(params): Query<SweepParams>,
) -> AppResult<Json<Value>> {
    let hours = normalize_hours(params.hours, &state)?;
    let summary = unseen::run_sweep(&state, hours).await?;

    Ok(Json(json!({
        "message": "unseen message sweep completed",
        "notifications_sent": summary.notifications_sent,
        "users_notified": summary.users_notified,
    })))
}

pub async fn preview_unseen(
    State(state): State<AppState>,
    Query(params): Query<SweepParams>,
) -> AppResult<Json<unseen::SweepPreview>> {
    let hours = normalize_hours(params.hours, &state)?;
    let mut conn = state.db()?;
    let preview = unseen::preview(&mut conn, hours)?;
    Ok(Json(preview))
}

fn normalize_hours(hours: Option<i64>, state: &AppState) -> AppResult<i64> {
    let hours = hours.unwrap_or(state.config.unseen_hours_threshold);
    if hours < 0 {
        return Err(AppError::bad_request("hours must not be negative"));
    }
    Ok(hours)
}
