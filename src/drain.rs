use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    mailer::OutgoingEmail,
    models::QueuedEmail,
    queue,
    render::strip_tags,
    state::AppState,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct DrainSummary {
    pub processed: u64,
    pub successful: u64,
    pub failed: u64,
}

/// Drains every due pending row. Each job is claimed, dispatched and
/// finalized independently; a single job's transport failure never aborts the
/// batch.
pub async fn drain_pending(state: &AppState) -> AppResult<DrainSummary> {
    let mailer = state.mailer()?.clone();
    let batch_size = state.config.drain_batch_size;
    let mut summary = DrainSummary::default();

    loop {
        let batch = {
            let mut conn = state.db()?;
            queue::claim_due(&mut conn, batch_size).map_err(AppError::internal)?
        };
        if batch.is_empty() {
            break;
        }

        for job in batch {
            summary.processed += 1;
            match mailer.send(outgoing(&job)).await {
                Ok(outcome) => {
                    summary.successful += 1;
                    info!(email_id = %job.id, recipient = %job.recipient, message_id = ?outcome.message_id, "email sent");
                    finalize(state, job.id, None);
                }
                Err(err) => {
                    summary.failed += 1;
                    warn!(email_id = %job.id, recipient = %job.recipient, error = %err, "email send failed");
                    finalize(state, job.id, Some(err.to_string()));
                }
            }
        }
    }

    Ok(summary)
}

/// The manual-send path: persists a queue row, then dispatches and finalizes
/// it through the same guarded transitions the drainer uses. Returns the row
/// id together with the per-send outcome.
pub async fn send_direct(
    state: &AppState,
    recipient: &str,
    subject: &str,
    html: &str,
    text: &str,
) -> AppResult<(Uuid, Result<(), String>)> {
    let mailer = state.mailer()?.clone();

    let job = {
        let mut conn = state.db()?;
        let job = queue::enqueue(&mut conn, recipient, subject, html, None)
            .map_err(AppError::internal)?;
        queue::claim_one(&mut conn, job.id).map_err(AppError::internal)?;
        job
    };

    let result = match mailer
        .send(OutgoingEmail {
            to: recipient.to_string(),
            subject: subject.to_string(),
            html: html.to_string(),
            text: text.to_string(),
        })
        .await
    {
        Ok(outcome) => {
            info!(email_id = %job.id, recipient = %recipient, message_id = ?outcome.message_id, "email sent");
            finalize(state, job.id, None);
            Ok(())
        }
        Err(err) => {
            warn!(email_id = %job.id, recipient = %recipient, error = %err, "email send failed");
            let message = err.to_string();
            finalize(state, job.id, Some(message.clone()));
            Err(message)
        }
    };

    Ok((job.id, result))
}

fn outgoing(job: &QueuedEmail) -> OutgoingEmail {
    OutgoingEmail {
        to: job.recipient.clone(),
        subject: job.subject.clone(),
        html: job.body.clone(),
        text: strip_tags(&job.body),
    }
}

fn finalize(state: &AppState, id: Uuid, error_message: Option<String>) {
    match state.db() {
        Ok(mut conn) => {
            let result = match error_message.as_deref() {
                None => queue::mark_sent(&mut conn, id),
                Some(message) => queue::mark_failed(&mut conn, id, message),
            };
            if let Err(err) = result {
                error!(email_id = %id, error = %err, "failed to finalize queue row");
            }
        }
        Err(err) => {
            error!(email_id = %id, error = ?err, "no connection to finalize queue row");
        }
    }
}
