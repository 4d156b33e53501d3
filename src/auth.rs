use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::headers::{authorization::Bearer, Authorization};
use axum_extra::TypedHeader;

use crate::{error::AppError, state::AppState};

/// Shared-secret bearer guard for the batch endpoints. Rejects before any
/// side effect; a deployment without `CRON_SECRET` gets a configuration
/// error rather than an open drain endpoint.
pub struct CronGuard;

#[async_trait]
impl FromRequestParts<AppState> for CronGuard {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let secret = state
            .config
            .cron_secret
            .as_deref()
            .ok_or_else(|| AppError::internal("CRON_SECRET is not configured"))?;

        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| AppError::unauthorized())?;

        if bearer.token() != secret {
            return Err(AppError::unauthorized());
        }

        Ok(CronGuard)
    }
}

/// Read-only variant: enforced only when a secret is configured.
pub struct OptionalCronGuard;

#[async_trait]
impl FromRequestParts<AppState> for OptionalCronGuard {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(secret) = state.config.cron_secret.as_deref() else {
            return Ok(OptionalCronGuard);
        };

        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| AppError::unauthorized())?;

        if bearer.token() != secret {
            return Err(AppError::unauthorized());
        }

        Ok(OptionalCronGuard)
    }
}
