use axum::http::HeaderValue;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub mod chat;
pub mod email;
pub mod health;
pub mod mail;

pub fn create_router(state: AppState) -> Router<()> {
    let cors = if let Some(origins) = state.config.cors_allowed_origin.as_ref() {
        let headers: Vec<HeaderValue> = origins
            .split(',')
            .filter_map(|value| {
                let trimmed = value.trim();
                (!trimmed.is_empty()).then(|| {
                    trimmed
                        .parse::<HeaderValue>()
                        .expect("invalid CORS allowed origin")
                })
            })
            .collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(headers))
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::mirror_request())
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
    };

    let email_routes = Router::new()
        .route(
            "/process",
            get(email::process_status).post(email::process_queue),
        )
        .route("/queue", get(email::list_queue))
        .route("/send", get(email::get_templates).post(email::send_email));

    let mail_routes = Router::new()
        .route("/queue", get(mail::list_queue))
        .route("/send", post(mail::bulk_send))
        .route("/stats", get(mail::stats))
        .route(
            "/templates",
            get(mail::list_templates)
                .post(mail::create_template)
                .patch(mail::update_template)
                .delete(mail::delete_template),
        );

    let chat_routes = Router::new().route(
        "/notify-unseen",
        get(chat::preview_unseen).post(chat::notify_unseen),
    );

    Router::new()
        .nest("/api/email", email_routes)
        .nest("/api/mail", mail_routes)
        .nest("/api/chat", chat_routes)
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
