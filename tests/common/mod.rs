use std::collections::HashSet;
use std::env;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request};
use axum::Router;
use chrono::{Duration, NaiveDateTime, Utc};
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::PgConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use http_body_util::BodyExt;
use mailroom::config::AppConfig;
use mailroom::db::{self, PgPool};
use mailroom::mailer::{Mailer, OutgoingEmail, SendOutcome};
use mailroom::models::{
    NewChatGroup, NewChatGroupMember, NewChatMessage, NewRole, NewUser, NewUserRole, QueuedEmail,
};
use mailroom::routes;
use mailroom::state::AppState;
use once_cell::sync::Lazy;
use serde::Serialize;
use uuid::Uuid;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

static DB_LOCK: Lazy<tokio::sync::Mutex<()>> = Lazy::new(|| tokio::sync::Mutex::new(()));

pub const CRON_SECRET: &str = "test-cron-secret";

/// Captures sent messages in memory; addresses registered via `fail_for`
/// simulate a transport failure instead.
#[derive(Default)]
pub struct FakeMailer {
    sent: Mutex<Vec<OutgoingEmail>>,
    failing: Mutex<HashSet<String>>,
}

impl FakeMailer {
    pub fn sent_messages(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().unwrap().clone()
    }

    #[allow(dead_code)]
    pub fn last_message(&self) -> Option<OutgoingEmail> {
        self.sent.lock().unwrap().last().cloned()
    }

    pub fn fail_for(&self, address: &str) {
        self.failing.lock().unwrap().insert(address.to_string());
    }

    #[allow(dead_code)]
    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
        self.failing.lock().unwrap().clear();
    }
}

#[async_trait]
impl Mailer for FakeMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<SendOutcome> {
        if self.failing.lock().unwrap().contains(&email.to) {
            return Err(anyhow!("simulated transport failure"));
        }
        self.sent.lock().unwrap().push(email);
        Ok(SendOutcome {
            message_id: Some(format!("fake-{}", Uuid::new_v4())),
        })
    }
}

pub struct TestApp {
    pub state: AppState,
    router: Router,
    mailer: Arc<FakeMailer>,
}

/// Returns `None` when `TEST_DATABASE_URL` is unset so the suite stays green
/// without a provisioned database.
pub async fn test_app() -> Result<Option<TestApp>> {
    let Ok(database_url) = env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set, skipping integration test");
        return Ok(None);
    };

    let config = AppConfig {
        database_url,
        database_max_pool_size: db::DEFAULT_MAX_POOL_SIZE,
        server_host: "127.0.0.1".to_string(),
        server_port: 0,
        cron_secret: Some(CRON_SECRET.to_string()),
        site_url: "http://test.local".to_string(),
        from_email: "noreply@test.local".to_string(),
        from_name: "Mailroom Test".to_string(),
        mail_driver: None,
        smtp_host: None,
        smtp_port: 587,
        smtp_username: None,
        smtp_password: None,
        resend_api_key: None,
        unseen_hours_threshold: 12,
        drain_batch_size: 50,
        worker_poll_interval_secs: 60,
        cors_allowed_origin: None,
    };

    let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
    prepare_database(&pool).await?;

    let mailer = Arc::new(FakeMailer::default());
    let mailer_for_state: Arc<dyn Mailer> = mailer.clone();
    let state = AppState::new(pool, config, Some(mailer_for_state));
    let router = routes::create_router(state.clone());

    Ok(Some(TestApp {
        state,
        router,
        mailer,
    }))
}

impl TestApp {
    pub fn mailer(&self) -> Arc<FakeMailer> {
        self.mailer.clone()
    }

    pub async fn cleanup(&self) -> Result<()> {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get cleanup connection: {err}"))?;
            truncate_all(&mut conn)?;
            Ok(())
        })
        .await
        .context("cleanup task panicked")?
    }

    pub async fn insert_user(
        &self,
        username: &str,
        email: Option<&str>,
        personal_email: Option<&str>,
    ) -> Result<Uuid> {
        let user = NewUser {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email: email.map(str::to_string),
            personal_email: personal_email.map(str::to_string),
        };
        let id = user.id;
        self.with_conn(move |conn| {
            diesel::insert_into(mailroom::schema::users::table)
                .values(&user)
                .execute(conn)
                .context("failed to insert user")?;
            Ok(id)
        })
        .await
    }

    pub async fn insert_role(&self, name: &str) -> Result<Uuid> {
        let role = NewRole {
            id: Uuid::new_v4(),
            name: name.to_string(),
        };
        let id = role.id;
        self.with_conn(move |conn| {
            diesel::insert_into(mailroom::schema::roles::table)
                .values(&role)
                .execute(conn)
                .context("failed to insert role")?;
            Ok(id)
        })
        .await
    }

    pub async fn assign_role(&self, user_id: Uuid, role_id: Uuid) -> Result<()> {
        self.with_conn(move |conn| {
            diesel::insert_into(mailroom::schema::user_roles::table)
                .values(&NewUserRole { user_id, role_id })
                .execute(conn)
                .context("failed to assign role")?;
            Ok(())
        })
        .await
    }

    pub async fn insert_group(&self, name: &str) -> Result<Uuid> {
        let group = NewChatGroup {
            id: Uuid::new_v4(),
            name: name.to_string(),
        };
        let id = group.id;
        self.with_conn(move |conn| {
            diesel::insert_into(mailroom::schema::chat_groups::table)
                .values(&group)
                .execute(conn)
                .context("failed to insert group")?;
            Ok(id)
        })
        .await
    }

    pub async fn add_member(
        &self,
        group_id: Uuid,
        user_id: Uuid,
        last_seen_at: Option<NaiveDateTime>,
    ) -> Result<()> {
        self.with_conn(move |conn| {
            diesel::insert_into(mailroom::schema::chat_group_members::table)
                .values(&NewChatGroupMember {
                    group_id,
                    user_id,
                    last_seen_at,
                })
                .execute(conn)
                .context("failed to insert membership")?;
            Ok(())
        })
        .await
    }

    pub async fn insert_message(
        &self,
        group_id: Uuid,
        sender_id: Uuid,
        content: &str,
        created_at: NaiveDateTime,
    ) -> Result<Uuid> {
        let message = NewChatMessage {
            id: Uuid::new_v4(),
            group_id,
            sender_id,
            content: content.to_string(),
            created_at,
        };
        let id = message.id;
        self.with_conn(move |conn| {
            diesel::insert_into(mailroom::schema::chat_messages::table)
                .values(&message)
                .execute(conn)
                .context("failed to insert message")?;
            Ok(id)
        })
        .await
    }

    pub async fn queue_rows(&self) -> Result<Vec<QueuedEmail>> {
        self.with_conn(|conn| {
            use mailroom::schema::email_queue::dsl::{created_at, email_queue};
            let rows = email_queue
                .order(created_at.asc())
                .load::<QueuedEmail>(conn)
                .context("failed to load queue rows")?;
            Ok(rows)
        })
        .await
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::from(body))?;
        self.oneshot(request).await
    }

    pub async fn patch_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        let mut builder = Request::builder()
            .method(Method::PATCH)
            .uri(path)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::from(body))?;
        self.oneshot(request).await
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(Method::GET).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::empty())?;
        self.oneshot(request).await
    }

    #[allow(dead_code)]
    pub async fn delete(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(Method::DELETE).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::empty())?;
        self.oneshot(request).await
    }

    async fn oneshot(&self, request: Request<Body>) -> Result<hyper::Response<Body>> {
        use tower::util::ServiceExt;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut PgConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get database connection: {err}"))?;
            f(&mut conn)
        })
        .await
        .context("connection task panicked")?
    }
}

pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

#[allow(dead_code)]
pub fn hours_ago(hours: i64) -> NaiveDateTime {
    Utc::now().naive_utc() - Duration::hours(hours)
}

#[allow(dead_code)]
pub fn hours_from_now(hours: i64) -> NaiveDateTime {
    Utc::now().naive_utc() + Duration::hours(hours)
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|err| anyhow!("failed to run migrations: {err}"))?;
        truncate_all(&mut conn)?;
        Ok(())
    })
    .await
    .context("migration task panicked")?
}

fn truncate_all(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute(
        "TRUNCATE TABLE unseen_notifications, chat_messages, chat_group_members, chat_groups, \
         email_queue, email_templates, user_roles, roles, users RESTART IDENTITY CASCADE;",
    )
    .context("failed to truncate tables")?;
    Ok(())
}
