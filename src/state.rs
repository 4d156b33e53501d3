use std::sync::Arc;

use diesel::{
    pg::PgConnection,
    r2d2::{ConnectionManager, PooledConnection},
};

use crate::{
    config::AppConfig,
    db::PgPool,
    error::{AppError, AppResult},
    mailer::Mailer,
};

type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<AppConfig>,
    mailer: Option<Arc<dyn Mailer>>,
}

impl AppState {
    pub fn new(pool: PgPool, config: AppConfig, mailer: Option<Arc<dyn Mailer>>) -> Self {
        Self {
            pool,
            config: Arc::new(config),
            mailer,
        }
    }

    pub fn db(&self) -> AppResult<PgPooledConnection> {
        self.pool
            .get()
            .map_err(|err| AppError::internal(format!("database pool error: {err}")))
    }

    /// Missing transport credentials surface as a configuration error on the
    /// request that needed them, never at startup.
    pub fn mailer(&self) -> AppResult<&Arc<dyn Mailer>> {
        self.mailer
            .as_ref()
            .ok_or_else(|| AppError::internal("mail transport is not configured"))
    }
}
