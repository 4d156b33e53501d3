use std::collections::HashMap;

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    auth::{CronGuard, OptionalCronGuard},
    drain,
    error::{AppError, AppResult},
    queue, render,
    state::AppState,
    templates,
};

use super::mail::{QueueEmailView, TemplateDetail, TemplateSummary};

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 200;

pub async fn process_status(
    _guard: OptionalCronGuard,
    State(state): State<AppState>,
) -> AppResult<Json<Value>> {
    let mut conn = state.db()?;
    let counts = queue::status_counts(&mut conn).map_err(AppError::internal)?;

    Ok(Json(json!({
        "status": {
            "pending": counts.pending,
            "sending": counts.sending,
            "sent": counts.sent,
            "failed": counts.failed,
        },
        "message": format!("{} emails waiting", counts.pending),
    })))
}

pub async fn process_queue(
    _guard: CronGuard,
    State(state): State<AppState>,
) -> AppResult<Json<Value>> {
    let summary = drain::drain_pending(&state).await?;

    Ok(Json(json!({
        "message": "queue processed",
        "processed": summary.processed,
        "successful": summary.successful,
        "failed": summary.failed,
    })))
}

#[derive(Deserialize)]
pub struct QueueListParams {
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn list_queue(
    State(state): State<AppState>,
    Query(params): Query<QueueListParams>,
) -> AppResult<Json<Value>> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    let offset = params.offset.unwrap_or(0).max(0);

    let mut conn = state.db()?;
    let (rows, total) = queue::list(&mut conn, params.status.as_deref(), limit, offset)
        .map_err(AppError::internal)?;
    let emails: Vec<QueueEmailView> = rows.into_iter().map(QueueEmailView::from).collect();

    Ok(Json(json!({
        "emails": emails,
        "total": total,
        "limit": limit,
        "offset": offset,
    })))
}

#[derive(Deserialize)]
pub struct SendEmailRequest {
    pub to: String,
    pub template: Option<String>,
    #[serde(default)]
    pub variables: HashMap<String, String>,
    pub subject: Option<String>,
    pub body: Option<String>,
}

/// One-off send: either a stored template rendered with the supplied
/// variables, or a raw subject/body where the plain-text body is upgraded to
/// HTML on the fly.
pub async fn send_email(
    State(state): State<AppState>,
    Json(payload): Json<SendEmailRequest>,
) -> AppResult<Json<Value>> {
    let to = payload.to.trim();
    if to.is_empty() {
        return Err(AppError::bad_request("recipient is required"));
    }

    let (subject, html, text) = match payload.template.as_deref() {
        Some(template_name) => {
            let mut conn = state.db()?;
            let template = templates::get_template(&mut conn, template_name)?;
            let rendered = render::render(&template, &payload.variables);
            (rendered.subject, rendered.html, rendered.text)
        }
        None => {
            let subject = payload
                .subject
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .ok_or_else(|| AppError::bad_request("subject is required"))?;
            let body = payload
                .body
                .as_deref()
                .filter(|value| !value.is_empty())
                .ok_or_else(|| AppError::bad_request("body is required"))?;
            (
                subject.to_string(),
                render::newline_to_br(body),
                body.to_string(),
            )
        }
    };

    let (email_id, outcome) = drain::send_direct(&state, to, &subject, &html, &text).await?;
    match outcome {
        Ok(()) => Ok(Json(json!({
            "message": "Email sent",
            "emailId": email_id,
        }))),
        Err(error) => Err(AppError::internal(error)),
    }
}

#[derive(Deserialize)]
pub struct TemplateParams {
    pub template: Option<String>,
}

pub async fn get_templates(
    State(state): State<AppState>,
    Query(params): Query<TemplateParams>,
) -> AppResult<Json<Value>> {
    let mut conn = state.db()?;
    match params.template.as_deref() {
        Some(name) => {
            let template = templates::get_template(&mut conn, name)?;
            Ok(Json(json!({ "template": TemplateDetail::from(template) })))
        }
        None => {
            let rows = templates::list_templates(&mut conn)?;
            let list: Vec<TemplateSummary> =
                rows.into_iter().map(TemplateSummary::from).collect();
            Ok(Json(json!({ "templates": list })))
        }
    }
}
