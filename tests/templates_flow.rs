mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, body_to_vec, test_app};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

#[derive(Deserialize)]
struct TemplateResponse {
    id: Uuid,
    name: String,
    subject: String,
    variables: Vec<String>,
}

#[tokio::test]
async fn template_crud_flow() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = test_app().await? else {
        return Ok(());
    };

    let create = app
        .post_json(
            "/api/mail/templates",
            &json!({
                "name": "welcome",
                "subject": "Hi {{name}}",
                "bodyHtml": "<p>{{name}} - {{role}} - {{name}}</p>",
                "description": "Welcome mail",
            }),
            None,
        )
        .await?;
    assert_eq!(create.status(), StatusCode::OK);
    let body = body_to_vec(create.into_body()).await?;
    let created: TemplateResponse = serde_json::from_slice(&body)?;
    assert_eq!(created.name, "welcome");
    assert_eq!(created.variables, vec!["name".to_string(), "role".to_string()]);

    // List view excludes bodies.
    let list = app.get("/api/mail/templates", None).await?;
    assert_eq!(list.status(), StatusCode::OK);
    let body = body_to_vec(list.into_body()).await?;
    let parsed: serde_json::Value = serde_json::from_slice(&body)?;
    let entries = parsed.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].get("body_html").is_none());
    assert_eq!(entries[0]["variables"], json!(["name", "role"]));

    // Full body available through the template fetch endpoint.
    let fetch = app.get("/api/email/send?template=welcome", None).await?;
    assert_eq!(fetch.status(), StatusCode::OK);
    let body = body_to_vec(fetch.into_body()).await?;
    let parsed: serde_json::Value = serde_json::from_slice(&body)?;
    assert_eq!(
        parsed["template"]["body_html"],
        "<p>{{name}} - {{role}} - {{name}}</p>"
    );

    // Re-saving with a placeholder-free body empties the variable hint.
    let update = app
        .patch_json(
            "/api/mail/templates",
            &json!({
                "id": created.id,
                "bodyHtml": "<p>static content</p>",
            }),
            None,
        )
        .await?;
    assert_eq!(update.status(), StatusCode::OK);
    let body = body_to_vec(update.into_body()).await?;
    let updated: TemplateResponse = serde_json::from_slice(&body)?;
    assert!(updated.variables.is_empty());
    assert_eq!(updated.subject, "Hi {{name}}");

    // POST with an existing name upserts in place.
    let upsert = app
        .post_json(
            "/api/mail/templates",
            &json!({
                "name": "welcome",
                "subject": "Hello {{username}}",
                "bodyHtml": "<p>{{username}}</p>",
            }),
            None,
        )
        .await?;
    assert_eq!(upsert.status(), StatusCode::OK);
    let body = body_to_vec(upsert.into_body()).await?;
    let upserted: TemplateResponse = serde_json::from_slice(&body)?;
    assert_eq!(upserted.id, created.id);
    assert_eq!(upserted.variables, vec!["username".to_string()]);

    let delete = app
        .delete(&format!("/api/mail/templates?id={}", created.id), None)
        .await?;
    assert_eq!(delete.status(), StatusCode::NO_CONTENT);

    let missing = app.get("/api/email/send?template=welcome", None).await?;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn create_template_validates_required_fields() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = test_app().await? else {
        return Ok(());
    };

    let response = app
        .post_json(
            "/api/mail/templates",
            &json!({ "name": "", "subject": "s", "bodyHtml": "<p>b</p>" }),
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .post_json(
            "/api/mail/templates",
            &json!({ "name": "x", "subject": "", "bodyHtml": "" }),
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    app.cleanup().await?;
    Ok(())
}
