use chrono::{NaiveDateTime, Utc};
use diesel::dsl::count_star;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{NewQueuedEmail, QueuedEmail};
use crate::schema::email_queue;

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_SENDING: &str = "sending";
pub const STATUS_SENT: &str = "sent";
pub const STATUS_FAILED: &str = "failed";

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
}

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Clone, Copy, Default)]
pub struct StatusCounts {
    pub pending: i64,
    pub sending: i64,
    pub sent: i64,
    pub failed: i64,
}

pub fn enqueue(
    conn: &mut PgConnection,
    recipient: &str,
    subject: &str,
    body: &str,
    scheduled_at: Option<NaiveDateTime>,
) -> QueueResult<QueuedEmail> {
    let new_email = NewQueuedEmail {
        id: Uuid::new_v4(),
        recipient: recipient.to_string(),
        subject: subject.to_string(),
        body: body.to_string(),
        status: STATUS_PENDING.to_string(),
        scheduled_at: scheduled_at.unwrap_or_else(|| Utc::now().naive_utc()),
    };

    diesel::insert_into(email_queue::table)
        .values(&new_email)
        .execute(conn)?;

    let email = email_queue::table.find(new_email.id).first(conn)?;
    Ok(email)
}

/// Claims a batch of due pending rows by flipping them to `sending` inside a
/// transaction. `FOR UPDATE SKIP LOCKED` keeps concurrent drains from ever
/// dispatching the same row twice.
pub fn claim_due(conn: &mut PgConnection, limit: i64) -> QueueResult<Vec<QueuedEmail>> {
    let now = Utc::now().naive_utc();

    conn.transaction(|conn| {
        let due: Vec<QueuedEmail> = email_queue::table
            .filter(email_queue::status.eq(STATUS_PENDING))
            .filter(email_queue::scheduled_at.le(now))
            .order(email_queue::scheduled_at.asc())
            .limit(limit)
            .for_update()
            .skip_locked()
            .load(conn)?;

        if due.is_empty() {
            return Ok::<Vec<QueuedEmail>, diesel::result::Error>(Vec::new());
        }

        let ids: Vec<Uuid> = due.iter().map(|email| email.id).collect();
        diesel::update(email_queue::table.filter(email_queue::id.eq_any(&ids)))
            .set(email_queue::status.eq(STATUS_SENDING))
            .execute(conn)?;

        email_queue::table
            .filter(email_queue::id.eq_any(&ids))
            .order(email_queue::scheduled_at.asc())
            .load(conn)
    })
    .map_err(QueueError::from)
}

/// Finalizes a claimed row. A no-op on rows already in a terminal state, so
/// re-draining can never re-send or resurrect anything.
pub fn mark_sent(conn: &mut PgConnection, id: Uuid) -> QueueResult<usize> {
    let updated = diesel::update(
        email_queue::table
            .find(id)
            .filter(email_queue::status.eq_any([STATUS_PENDING, STATUS_SENDING])),
    )
    .set((
        email_queue::status.eq(STATUS_SENT),
        email_queue::sent_at.eq(Some(Utc::now().naive_utc())),
        email_queue::error_message.eq::<Option<String>>(None),
    ))
    .execute(conn)?;
    Ok(updated)
}

pub fn mark_failed(conn: &mut PgConnection, id: Uuid, error_message: &str) -> QueueResult<usize> {
    let updated = diesel::update(
        email_queue::table
            .find(id)
            .filter(email_queue::status.eq_any([STATUS_PENDING, STATUS_SENDING])),
    )
    .set((
        email_queue::status.eq(STATUS_FAILED),
        email_queue::error_message.eq(Some(error_message.to_string())),
    ))
    .execute(conn)?;
    Ok(updated)
}

/// Claims a single pending row regardless of its scheduled time. Used by the
/// direct-send path so its status writes go through the same guarded
/// transitions as the drainer's.
pub fn claim_one(conn: &mut PgConnection, id: Uuid) -> QueueResult<usize> {
    let updated = diesel::update(
        email_queue::table
            .find(id)
            .filter(email_queue::status.eq(STATUS_PENDING)),
    )
    .set(email_queue::status.eq(STATUS_SENDING))
    .execute(conn)?;
    Ok(updated)
}

pub fn status_counts(conn: &mut PgConnection) -> QueueResult<StatusCounts> {
    let rows: Vec<(String, i64)> = email_queue::table
        .group_by(email_queue::status)
        .select((email_queue::status, count_star()))
        .load(conn)?;

    let mut counts = StatusCounts::default();
    for (status, count) in rows {
        match status.as_str() {
            STATUS_PENDING => counts.pending = count,
            STATUS_SENDING => counts.sending = count,
            STATUS_SENT => counts.sent = count,
            STATUS_FAILED => counts.failed = count,
            _ => {}
        }
    }
    Ok(counts)
}

pub fn recent(conn: &mut PgConnection, limit: i64) -> QueueResult<Vec<QueuedEmail>> {
    let rows = email_queue::table
        .order(email_queue::scheduled_at.desc())
        .limit(limit)
        .load(conn)?;
    Ok(rows)
}

pub fn list(
    conn: &mut PgConnection,
    status: Option<&str>,
    limit: i64,
    offset: i64,
) -> QueueResult<(Vec<QueuedEmail>, i64)> {
    let mut query = email_queue::table.into_boxed();
    if let Some(status) = status {
        query = query.filter(email_queue::status.eq(status.to_string()));
    }

    let total: i64 = match status {
        Some(status) => email_queue::table
            .filter(email_queue::status.eq(status))
            .select(count_star())
            .first(conn)?,
        None => email_queue::table.select(count_star()).first(conn)?,
    };
    let rows = query
        .order(email_queue::scheduled_at.desc())
        .limit(limit)
        .offset(offset)
        .load(conn)?;
    Ok((rows, total))
}
