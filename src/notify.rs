use std::collections::HashMap;

use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::QueryResult;
use futures_util::future::join_all;
use tracing::warn;
use uuid::Uuid;

use crate::{
    error::AppResult,
    mailer::OutgoingEmail,
    models::{ChatGroup, User},
    render::{render_str, strip_tags},
    schema::{chat_groups, roles, user_roles, users},
    state::AppState,
    templates,
};

pub const TPL_CHAT_MESSAGE: &str = "chat-message";
pub const TPL_CHAT_GROUP_ADDED: &str = "chat-group-added";
pub const TPL_ROLE_CHANGED: &str = "role-changed";
pub const TPL_TICKET_ASSIGNED: &str = "ticket-assigned";
pub const TPL_REGISTRATION_APPROVED: &str = "registration-approved";
pub const TPL_REGISTRATION_REJECTED: &str = "registration-rejected";

#[derive(Debug, Clone)]
pub enum RecipientSelector {
    Single(String),
    All,
    Role(String),
}

/// Login addresses can live on a synthetic internal domain; notifications
/// must reach a real inbox, so the personal address wins when present.
pub fn preferred_address(user: &User) -> Option<&str> {
    user.personal_email
        .as_deref()
        .filter(|addr| !addr.is_empty())
        .or(user.email.as_deref().filter(|addr| !addr.is_empty()))
}

pub fn resolve_recipients(
    conn: &mut PgConnection,
    selector: &RecipientSelector,
) -> QueryResult<Vec<String>> {
    match selector {
        RecipientSelector::Single(address) => Ok(vec![address.clone()]),
        RecipientSelector::All => {
            let all: Vec<User> = users::table.order(users::username.asc()).load(conn)?;
            Ok(all
                .iter()
                .filter_map(preferred_address)
                .map(str::to_string)
                .collect())
        }
        RecipientSelector::Role(role_name) => {
            let assigned: Vec<User> = users::table
                .inner_join(user_roles::table.inner_join(roles::table))
                .filter(roles::name.eq(role_name))
                .select(users::all_columns)
                .order(users::username.asc())
                .load(conn)?;
            Ok(assigned
                .iter()
                .filter_map(preferred_address)
                .map(str::to_string)
                .collect())
        }
    }
}

/// Resolves a stored template by its well-known name, falling back to the
/// built-in copy when the store has no row (soft reference by name).
fn subject_and_bodies(
    conn: &mut PgConnection,
    template_name: &str,
    default_subject: &str,
    default_html: &str,
    bindings: &HashMap<String, String>,
) -> QueryResult<(String, String, String)> {
    let stored = templates::get_template(conn, template_name).optional()?;
    let (subject_tpl, html_tpl, text_tpl) = match &stored {
        Some(template) => (
            template.subject.as_str(),
            template.body_html.as_str(),
            template.body_text.as_deref(),
        ),
        None => (default_subject, default_html, None),
    };

    let subject = render_str(subject_tpl, bindings);
    let html = render_str(html_tpl, bindings);
    let text = match text_tpl {
        Some(text_tpl) => render_str(text_tpl, bindings),
        None => strip_tags(&html),
    };
    Ok((subject, html, text))
}

/// Awaits the full send set and reports how many went out. Transport failures
/// are logged per recipient and never propagate to the domain action that
/// triggered the notification.
async fn send_all(state: &AppState, batch: Vec<OutgoingEmail>) -> usize {
    let mailer = match state.mailer() {
        Ok(mailer) => mailer.clone(),
        Err(_) => {
            warn!(
                recipients = batch.len(),
                "mail transport not configured, dropping notifications"
            );
            return 0;
        }
    };

    let results = join_all(batch.into_iter().map(|email| {
        let mailer = mailer.clone();
        async move {
            let to = email.to.clone();
            (to, mailer.send(email).await)
        }
    }))
    .await;

    let mut sent = 0;
    for (to, result) in results {
        match result {
            Ok(_) => sent += 1,
            Err(err) => warn!(recipient = %to, error = %err, "notification send failed"),
        }
    }
    sent
}

fn binding_map(pairs: &[(&str, String)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.clone()))
        .collect()
}

/// New chat message: every member of the group except the sender.
pub async fn notify_group_message(
    state: &AppState,
    group_id: Uuid,
    sender_id: Uuid,
    preview: &str,
) -> AppResult<usize> {
    let batch = {
        let mut conn = state.db()?;
        let group: ChatGroup = chat_groups::table.find(group_id).first(&mut conn)?;
        let sender: User = users::table.find(sender_id).first(&mut conn)?;
        let members: Vec<User> = users::table
            .inner_join(crate::schema::chat_group_members::table)
            .filter(crate::schema::chat_group_members::group_id.eq(group_id))
            .filter(users::id.ne(sender_id))
            .select(users::all_columns)
            .load(&mut conn)?;

        let bindings = binding_map(&[
            ("group_name", group.name.clone()),
            ("sender_name", sender.username.clone()),
            ("message_preview", preview.to_string()),
            ("link", format!("{}/chat/{}", state.config.site_url, group_id)),
        ]);
        let (subject, html, text) = subject_and_bodies(
            &mut conn,
            TPL_CHAT_MESSAGE,
            "New message in {{group_name}}",
            "<p>{{sender_name}} wrote in {{group_name}}:</p>\
             <blockquote>{{message_preview}}</blockquote>\
             <p><a href=\"{{link}}\">Open the conversation</a></p>",
            &bindings,
        )?;

        members
            .iter()
            .filter_map(preferred_address)
            .map(|address| OutgoingEmail {
                to: address.to_string(),
                subject: subject.clone(),
                html: html.clone(),
                text: text.clone(),
            })
            .collect()
    };

    Ok(send_all(state, batch).await)
}

/// Users invited into a chat group.
pub async fn notify_added_to_group(
    state: &AppState,
    group_id: Uuid,
    user_ids: &[Uuid],
) -> AppResult<usize> {
    let batch = {
        let mut conn = state.db()?;
        let group: ChatGroup = chat_groups::table.find(group_id).first(&mut conn)?;
        let invited: Vec<User> = users::table
            .filter(users::id.eq_any(user_ids))
            .load(&mut conn)?;

        let bindings = binding_map(&[
            ("group_name", group.name.clone()),
            ("link", format!("{}/chat/{}", state.config.site_url, group_id)),
        ]);
        let (subject, html, text) = subject_and_bodies(
            &mut conn,
            TPL_CHAT_GROUP_ADDED,
            "You were added to {{group_name}}",
            "<p>You are now a member of <strong>{{group_name}}</strong>.</p>\
             <p><a href=\"{{link}}\">Open the group</a></p>",
            &bindings,
        )?;

        invited
            .iter()
            .filter_map(preferred_address)
            .map(|address| OutgoingEmail {
                to: address.to_string(),
                subject: subject.clone(),
                html: html.clone(),
                text: text.clone(),
            })
            .collect()
    };

    Ok(send_all(state, batch).await)
}

/// Role assignment changed for a user.
pub async fn notify_role_changed(
    state: &AppState,
    user_id: Uuid,
    role_name: &str,
) -> AppResult<usize> {
    let batch = {
        let mut conn = state.db()?;
        let user: User = users::table.find(user_id).first(&mut conn)?;

        let bindings = binding_map(&[
            ("username", user.username.clone()),
            ("role_name", role_name.to_string()),
            ("link", format!("{}/profile", state.config.site_url)),
        ]);
        let (subject, html, text) = subject_and_bodies(
            &mut conn,
            TPL_ROLE_CHANGED,
            "Your role was updated",
            "<p>Hi {{username}}, your role is now <strong>{{role_name}}</strong>.</p>\
             <p><a href=\"{{link}}\">View your profile</a></p>",
            &bindings,
        )?;

        preferred_address(&user)
            .map(|address| OutgoingEmail {
                to: address.to_string(),
                subject,
                html,
                text,
            })
            .into_iter()
            .collect()
    };

    Ok(send_all(state, batch).await)
}

/// Support ticket handed to an assignee.
pub async fn notify_ticket_assigned(
    state: &AppState,
    assignee_id: Uuid,
    ticket_title: &str,
    ticket_id: Uuid,
) -> AppResult<usize> {
    let batch = {
        let mut conn = state.db()?;
        let assignee: User = users::table.find(assignee_id).first(&mut conn)?;

        let bindings = binding_map(&[
            ("username", assignee.username.clone()),
            ("ticket_title", ticket_title.to_string()),
            (
                "link",
                format!("{}/tickets/{}", state.config.site_url, ticket_id),
            ),
        ]);
        let (subject, html, text) = subject_and_bodies(
            &mut conn,
            TPL_TICKET_ASSIGNED,
            "Ticket assigned: {{ticket_title}}",
            "<p>Hi {{username}}, the ticket <strong>{{ticket_title}}</strong> was assigned to you.</p>\
             <p><a href=\"{{link}}\">Open the ticket</a></p>",
            &bindings,
        )?;

        preferred_address(&assignee)
            .map(|address| OutgoingEmail {
                to: address.to_string(),
                subject,
                html,
                text,
            })
            .into_iter()
            .collect()
    };

    Ok(send_all(state, batch).await)
}

/// Registration decision for a new account.
pub async fn notify_registration_outcome(
    state: &AppState,
    user_id: Uuid,
    approved: bool,
) -> AppResult<usize> {
    let batch = {
        let mut conn = state.db()?;
        let user: User = users::table.find(user_id).first(&mut conn)?;

        let bindings = binding_map(&[
            ("username", user.username.clone()),
            ("link", state.config.site_url.clone()),
        ]);
        let (template_name, default_subject, default_html) = if approved {
            (
                TPL_REGISTRATION_APPROVED,
                "Your account was approved",
                "<p>Welcome {{username}}, your account is ready.</p>\
                 <p><a href=\"{{link}}\">Sign in</a></p>",
            )
        } else {
            (
                TPL_REGISTRATION_REJECTED,
                "Your registration was declined",
                "<p>Hi {{username}}, your registration request was declined.</p>",
            )
        };
        let (subject, html, text) =
            subject_and_bodies(&mut conn, template_name, default_subject, default_html, &bindings)?;

        preferred_address(&user)
            .map(|address| OutgoingEmail {
                to: address.to_string(),
                subject,
                html,
                text,
            })
            .into_iter()
            .collect()
    };

    Ok(send_all(state, batch).await)
}
