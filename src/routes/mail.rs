use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    drain,
    error::{AppError, AppResult},
    models::{EmailTemplate, QueuedEmail},
    notify::{resolve_recipients, RecipientSelector},
    queue,
    render::newline_to_br,
    state::AppState,
    templates,
};

#[derive(Serialize)]
pub struct QueueEmailView {
    pub id: Uuid,
    pub recipient: String,
    pub subject: String,
    pub status: String,
    pub scheduled_at: NaiveDateTime,
    pub sent_at: Option<NaiveDateTime>,
    pub error_message: Option<String>,
    pub created_at: NaiveDateTime,
}

impl From<QueuedEmail> for QueueEmailView {
    fn from(email: QueuedEmail) -> Self {
        Self {
            id: email.id,
            recipient: email.recipient,
            subject: email.subject,
            status: email.status,
            scheduled_at: email.scheduled_at,
            sent_at: email.sent_at,
            error_message: email.error_message,
            created_at: email.created_at,
        }
    }
}

/// List view: bodies excluded.
#[derive(Serialize)]
pub struct TemplateSummary {
    pub id: Uuid,
    pub name: String,
    pub subject: String,
    pub description: Option<String>,
    pub variables: Vec<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<EmailTemplate> for TemplateSummary {
    fn from(template: EmailTemplate) -> Self {
        Self {
            id: template.id,
            name: template.name,
            subject: template.subject,
            description: template.description,
            variables: template.variables,
            created_at: template.created_at,
            updated_at: template.updated_at,
        }
    }
}

#[derive(Serialize)]
pub struct TemplateDetail {
    pub id: Uuid,
    pub name: String,
    pub subject: String,
    pub body_html: String,
    pub body_text: Option<String>,
    pub description: Option<String>,
    pub variables: Vec<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<EmailTemplate> for TemplateDetail {
    fn from(template: EmailTemplate) -> Self {
        Self {
            id: template.id,
            name: template.name,
            subject: template.subject,
            body_html: template.body_html,
            body_text: template.body_text,
            description: template.description,
            variables: template.variables,
            created_at: template.created_at,
            updated_at: template.updated_at,
        }
    }
}

pub async fn list_queue(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let mut conn = state.db()?;
    let rows = queue::recent(&mut conn, 100).map_err(AppError::internal)?;
    let queue: Vec<QueueEmailView> = rows.into_iter().map(QueueEmailView::from).collect();
    Ok(Json(json!({ "queue": queue })))
}

pub async fn stats(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let mut conn = state.db()?;
    let counts = queue::status_counts(&mut conn).map_err(AppError::internal)?;
    let rows = queue::recent(&mut conn, 10).map_err(AppError::internal)?;
    let recent: Vec<QueueEmailView> = rows.into_iter().map(QueueEmailView::from).collect();

    Ok(Json(json!({
        "stats": {
            "sent": counts.sent,
            "pending": counts.pending,
            "sending": counts.sending,
            "failed": counts.failed,
            "recent": recent,
        }
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkSendRequest {
    pub recipient_type: String,
    pub recipient: Option<String>,
    pub role: Option<String>,
    pub subject: String,
    pub body: String,
    pub scheduled_at: Option<DateTime<Utc>>,
}

pub async fn bulk_send(
    State(state): State<AppState>,
    Json(payload): Json<BulkSendRequest>,
) -> AppResult<Json<Value>> {
    if payload.subject.trim().is_empty() || payload.body.trim().is_empty() {
        return Err(AppError::bad_request("subject and body are required"));
    }

    let selector = match payload.recipient_type.as_str() {
        "single" => {
            let recipient = payload
                .recipient
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .ok_or_else(|| AppError::bad_request("recipient is required"))?;
            RecipientSelector::Single(recipient.to_string())
        }
        "all" => RecipientSelector::All,
        "role" => {
            let role = payload
                .role
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .ok_or_else(|| AppError::bad_request("role is required"))?;
            RecipientSelector::Role(role.to_string())
        }
        other => {
            return Err(AppError::bad_request(format!(
                "invalid recipientType: {other}"
            )))
        }
    };

    let recipients = {
        let mut conn = state.db()?;
        resolve_recipients(&mut conn, &selector)?
    };
    if recipients.is_empty() {
        return Err(AppError::bad_request("No recipients found"));
    }

    let now = Utc::now();
    let scheduled = payload
        .scheduled_at
        .map(|scheduled_at| scheduled_at > now)
        .unwrap_or(false);
    let scheduled_at = payload.scheduled_at.map(|value| value.naive_utc());
    let html = newline_to_br(&payload.body);

    {
        let mut conn = state.db()?;
        for recipient in &recipients {
            queue::enqueue(&mut conn, recipient, &payload.subject, &html, scheduled_at)
                .map_err(AppError::internal)?;
        }
    }

    if !scheduled {
        drain::drain_pending(&state).await?;
    }

    Ok(Json(json!({
        "success": true,
        "recipientCount": recipients.len(),
        "scheduled": scheduled,
    })))
}

pub async fn list_templates(State(state): State<AppState>) -> AppResult<Json<Vec<TemplateSummary>>> {
    let mut conn = state.db()?;
    let rows = templates::list_templates(&mut conn)?;
    Ok(Json(rows.into_iter().map(TemplateSummary::from).collect()))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertTemplateRequest {
    pub name: String,
    pub subject: String,
    pub body_html: String,
    pub body_text: Option<String>,
    pub description: Option<String>,
}

pub async fn create_template(
    State(state): State<AppState>,
    Json(payload): Json<UpsertTemplateRequest>,
) -> AppResult<Json<TemplateDetail>> {
    if payload.name.trim().is_empty() {
        return Err(AppError::bad_request("name must not be empty"));
    }
    if payload.subject.trim().is_empty() || payload.body_html.trim().is_empty() {
        return Err(AppError::bad_request("subject and bodyHtml are required"));
    }

    let mut conn = state.db()?;
    let template = templates::upsert_template(
        &mut conn,
        payload.name.trim(),
        &payload.subject,
        &payload.body_html,
        payload.body_text.as_deref(),
        payload.description.as_deref(),
    )?;
    Ok(Json(TemplateDetail::from(template)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTemplateRequest {
    pub id: Uuid,
    pub name: Option<String>,
    pub subject: Option<String>,
    pub body_html: Option<String>,
    pub body_text: Option<String>,
    pub description: Option<String>,
}

pub async fn update_template(
    State(state): State<AppState>,
    Json(payload): Json<UpdateTemplateRequest>,
) -> AppResult<Json<TemplateDetail>> {
    let mut conn = state.db()?;
    let changes = templates::TemplateChanges {
        name: payload.name,
        subject: payload.subject,
        body_html: payload.body_html,
        body_text: payload.body_text.map(Some),
        description: payload.description.map(Some),
    };
    let template = templates::update_template(&mut conn, payload.id, changes)?;
    Ok(Json(TemplateDetail::from(template)))
}

#[derive(Deserialize)]
pub struct DeleteTemplateParams {
    pub id: Uuid,
}

pub async fn delete_template(
    State(state): State<AppState>,
    Query(params): Query<DeleteTemplateParams>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    let deleted = templates::delete_template(&mut conn, params.id)?;
    if deleted == 0 {
        return Err(AppError::not_found());
    }
    Ok(StatusCode::NO_CONTENT)
}
