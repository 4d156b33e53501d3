use std::collections::{HashMap, HashSet};

use chrono::{Duration, NaiveDateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::QueryResult;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    mailer::OutgoingEmail,
    models::{ChatGroupMember, ChatMessage, NewUnseenNotification, User},
    notify::preferred_address,
    render::{render_str, strip_tags},
    schema::{chat_group_members, chat_groups, chat_messages, unseen_notifications},
    state::AppState,
    templates,
};

pub const TPL_UNSEEN_DIGEST: &str = "chat-unseen-digest";

const MAX_LISTED_MESSAGES: usize = 5;
const PREVIEW_CHARS: usize = 120;

/// One pending digest email: the unseen messages of a single (user, group)
/// pair, oldest first.
#[derive(Debug, Clone)]
pub struct UnseenDigest {
    pub user_id: Uuid,
    pub username: String,
    pub recipient: Option<String>,
    pub group_id: Uuid,
    pub group_name: String,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SweepSummary {
    pub notifications_sent: u64,
    pub users_notified: u64,
}

#[derive(Debug, Serialize)]
pub struct SweepPreview {
    pub total_messages: usize,
    pub users: Vec<PreviewUser>,
    pub hours_threshold: i64,
}

#[derive(Debug, Serialize)]
pub struct PreviewUser {
    pub user_id: Uuid,
    pub username: String,
    pub email: Option<String>,
    pub unseen_messages: usize,
    pub groups: Vec<PreviewGroup>,
}

#[derive(Debug, Serialize)]
pub struct PreviewGroup {
    pub group_id: Uuid,
    pub group_name: String,
    pub unseen_messages: usize,
}

/// A message counts as unseen when it was written by someone else, after the
/// member's `last_seen_at` (a null `last_seen_at` means nothing was ever
/// seen), has been sitting unread for longer than the hour threshold, and was
/// not already covered by an earlier digest.
pub fn collect_digests(
    conn: &mut PgConnection,
    now: NaiveDateTime,
    hours: i64,
) -> QueryResult<Vec<UnseenDigest>> {
    let cutoff = now - Duration::hours(hours);

    let group_names: HashMap<Uuid, String> = chat_groups::table
        .select((chat_groups::id, chat_groups::name))
        .load::<(Uuid, String)>(conn)?
        .into_iter()
        .collect();

    let memberships: Vec<(ChatGroupMember, User)> = chat_group_members::table
        .inner_join(crate::schema::users::table)
        .load(conn)?;

    let mut digests = Vec::new();
    for (membership, user) in memberships {
        let mut query = chat_messages::table
            .filter(chat_messages::group_id.eq(membership.group_id))
            .filter(chat_messages::sender_id.ne(membership.user_id))
            .filter(chat_messages::created_at.le(cutoff))
            .into_boxed();
        if let Some(last_seen) = membership.last_seen_at {
            query = query.filter(chat_messages::created_at.gt(last_seen));
        }
        let candidates: Vec<ChatMessage> =
            query.order(chat_messages::created_at.asc()).load(conn)?;
        if candidates.is_empty() {
            continue;
        }

        let covered: HashSet<Uuid> = unseen_notifications::table
            .filter(unseen_notifications::user_id.eq(membership.user_id))
            .filter(unseen_notifications::group_id.eq(membership.group_id))
            .select(unseen_notifications::message_id)
            .load::<Uuid>(conn)?
            .into_iter()
            .collect();

        let messages: Vec<ChatMessage> = candidates
            .into_iter()
            .filter(|message| !covered.contains(&message.id))
            .collect();
        if messages.is_empty() {
            continue;
        }

        let group_name = group_names
            .get(&membership.group_id)
            .cloned()
            .unwrap_or_default();
        digests.push(UnseenDigest {
            user_id: membership.user_id,
            username: user.username.clone(),
            recipient: preferred_address(&user).map(str::to_string),
            group_id: membership.group_id,
            group_name,
            messages,
        });
    }

    Ok(digests)
}

/// Sends at most one digest email per (user, group) pair. Every message a
/// successfully sent digest covered is recorded in the ledger so the next
/// sweep skips it; a failed send records nothing and the sweep retries later.
pub async fn run_sweep(state: &AppState, hours: i64) -> AppResult<SweepSummary> {
    let mailer = state.mailer()?.clone();
    let now = Utc::now().naive_utc();

    let digests = {
        let mut conn = state.db()?;
        collect_digests(&mut conn, now, hours)?
    };

    let sender_names = {
        let mut conn = state.db()?;
        load_usernames(&mut conn)?
    };

    let mut summary = SweepSummary::default();
    let mut notified_users: HashSet<Uuid> = HashSet::new();

    for digest in digests {
        let Some(recipient) = digest.recipient.clone() else {
            warn!(user_id = %digest.user_id, "no usable address for unseen digest");
            continue;
        };

        let email = build_digest_email(state, &digest, &recipient, &sender_names)?;
        match mailer.send(email).await {
            Ok(_) => {
                summary.notifications_sent += 1;
                notified_users.insert(digest.user_id);
                info!(
                    user_id = %digest.user_id,
                    group_id = %digest.group_id,
                    messages = digest.messages.len(),
                    "unseen digest sent"
                );
                let mut conn = state.db()?;
                record_covered(&mut conn, &digest)?;
            }
            Err(err) => {
                warn!(
                    user_id = %digest.user_id,
                    group_id = %digest.group_id,
                    error = %err,
                    "unseen digest send failed"
                );
            }
        }
    }

    summary.users_notified = notified_users.len() as u64;
    Ok(summary)
}

pub fn preview(conn: &mut PgConnection, hours: i64) -> QueryResult<SweepPreview> {
    let now = Utc::now().naive_utc();
    let digests = collect_digests(conn, now, hours)?;

    let total_messages = digests.iter().map(|digest| digest.messages.len()).sum();
    let mut users: Vec<PreviewUser> = Vec::new();
    for digest in digests {
        let group = PreviewGroup {
            group_id: digest.group_id,
            group_name: digest.group_name.clone(),
            unseen_messages: digest.messages.len(),
        };
        match users.iter_mut().find(|user| user.user_id == digest.user_id) {
            Some(user) => {
                user.unseen_messages += digest.messages.len();
                user.groups.push(group);
            }
            None => users.push(PreviewUser {
                user_id: digest.user_id,
                username: digest.username,
                email: digest.recipient,
                unseen_messages: digest.messages.len(),
                groups: vec![group],
            }),
        }
    }

    Ok(SweepPreview {
        total_messages,
        users,
        hours_threshold: hours,
    })
}

fn build_digest_email(
    state: &AppState,
    digest: &UnseenDigest,
    recipient: &str,
    sender_names: &HashMap<Uuid, String>,
) -> AppResult<OutgoingEmail> {
    let mut lines: Vec<String> = digest
        .messages
        .iter()
        .take(MAX_LISTED_MESSAGES)
        .map(|message| {
            let sender = sender_names
                .get(&message.sender_id)
                .map(String::as_str)
                .unwrap_or("someone");
            format!("<strong>{sender}</strong>: {}", snippet(&message.content))
        })
        .collect();
    if digest.messages.len() > MAX_LISTED_MESSAGES {
        lines.push(format!(
            "+{} more",
            digest.messages.len() - MAX_LISTED_MESSAGES
        ));
    }

    let bindings: HashMap<String, String> = [
        ("username".to_string(), digest.username.clone()),
        ("group_name".to_string(), digest.group_name.clone()),
        (
            "message_count".to_string(),
            digest.messages.len().to_string(),
        ),
        ("message_list".to_string(), lines.join("<br>")),
        (
            "link".to_string(),
            format!("{}/chat/{}", state.config.site_url, digest.group_id),
        ),
    ]
    .into_iter()
    .collect();

    let mut conn = state.db()?;
    let stored = templates::get_template(&mut conn, TPL_UNSEEN_DIGEST).optional()?;
    let (subject_tpl, html_tpl) = match &stored {
        Some(template) => (template.subject.as_str(), template.body_html.as_str()),
        None => (
            "Unread messages in {{group_name}}",
            "<p>Hi {{username}}, you have {{message_count}} unread messages in \
             <strong>{{group_name}}</strong>:</p><p>{{message_list}}</p>\
             <p><a href=\"{{link}}\">Catch up</a></p>",
        ),
    };

    let subject = render_str(subject_tpl, &bindings);
    let html = render_str(html_tpl, &bindings);
    let text = strip_tags(&html);

    Ok(OutgoingEmail {
        to: recipient.to_string(),
        subject,
        html,
        text,
    })
}

fn record_covered(conn: &mut PgConnection, digest: &UnseenDigest) -> Result<(), AppError> {
    let rows: Vec<NewUnseenNotification> = digest
        .messages
        .iter()
        .map(|message| NewUnseenNotification {
            user_id: digest.user_id,
            group_id: digest.group_id,
            message_id: message.id,
        })
        .collect();

    diesel::insert_into(unseen_notifications::table)
        .values(&rows)
        .on_conflict_do_nothing()
        .execute(conn)?;
    Ok(())
}

fn load_usernames(conn: &mut PgConnection) -> QueryResult<HashMap<Uuid, String>> {
    use crate::schema::users;
    Ok(users::table
        .select((users::id, users::username))
        .load::<(Uuid, String)>(conn)?
        .into_iter()
        .collect())
}

fn snippet(content: &str) -> String {
    if content.chars().count() <= PREVIEW_CHARS {
        content.to_string()
    } else {
        let truncated: String = content.chars().take(PREVIEW_CHARS).collect();
        format!("{truncated}…")
    }
}
