use chrono::Utc;
use diesel::prelude::*;
use diesel::QueryResult;
use once_cell::sync::Lazy;
use regex::Regex;
use uuid::Uuid;

use crate::models::{EmailTemplate, NewEmailTemplate};
use crate::schema::email_templates;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{(\w+)\}\}").expect("valid placeholder regex"));

/// Scans a template body for `{{identifier}}` tokens. The result is advisory
/// metadata only; rendering never enforces it.
pub fn extract_variables(body: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for capture in PLACEHOLDER.captures_iter(body) {
        let name = capture[1].to_string();
        if !seen.contains(&name) {
            seen.push(name);
        }
    }
    seen
}

pub fn get_template(conn: &mut PgConnection, name: &str) -> QueryResult<EmailTemplate> {
    email_templates::table
        .filter(email_templates::name.eq(name))
        .first(conn)
}

pub fn list_templates(conn: &mut PgConnection) -> QueryResult<Vec<EmailTemplate>> {
    email_templates::table
        .order(email_templates::name.asc())
        .load(conn)
}

pub fn upsert_template(
    conn: &mut PgConnection,
    name: &str,
    subject: &str,
    body_html: &str,
    body_text: Option<&str>,
    description: Option<&str>,
) -> QueryResult<EmailTemplate> {
    let variables = extract_variables(body_html);
    let new_template = NewEmailTemplate {
        id: Uuid::new_v4(),
        name: name.to_string(),
        subject: subject.to_string(),
        body_html: body_html.to_string(),
        body_text: body_text.map(str::to_string),
        description: description.map(str::to_string),
        variables: variables.clone(),
    };

    diesel::insert_into(email_templates::table)
        .values(&new_template)
        .on_conflict(email_templates::name)
        .do_update()
        .set((
            email_templates::subject.eq(subject),
            email_templates::body_html.eq(body_html),
            email_templates::body_text.eq(body_text),
            email_templates::description.eq(description),
            email_templates::variables.eq(&variables),
            email_templates::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)?;

    get_template(conn, name)
}

#[derive(Debug, Default)]
pub struct TemplateChanges {
    pub name: Option<String>,
    pub subject: Option<String>,
    pub body_html: Option<String>,
    pub body_text: Option<Option<String>>,
    pub description: Option<Option<String>>,
}

pub fn update_template(
    conn: &mut PgConnection,
    id: Uuid,
    changes: TemplateChanges,
) -> QueryResult<EmailTemplate> {
    let existing: EmailTemplate = email_templates::table.find(id).first(conn)?;

    let name = changes.name.unwrap_or(existing.name);
    let subject = changes.subject.unwrap_or(existing.subject);
    let body_html = changes.body_html.unwrap_or(existing.body_html);
    let body_text = changes.body_text.unwrap_or(existing.body_text);
    let description = changes.description.unwrap_or(existing.description);
    let variables = extract_variables(&body_html);

    diesel::update(email_templates::table.find(id))
        .set((
            email_templates::name.eq(&name),
            email_templates::subject.eq(&subject),
            email_templates::body_html.eq(&body_html),
            email_templates::body_text.eq(&body_text),
            email_templates::description.eq(&description),
            email_templates::variables.eq(&variables),
            email_templates::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)?;

    email_templates::table.find(id).first(conn)
}

pub fn delete_template(conn: &mut PgConnection, id: Uuid) -> QueryResult<usize> {
    diesel::delete(email_templates::table.find(id)).execute(conn)
}

#[cfg(test)]
mod tests {
    use super::extract_variables;

    #[test]
    fn extracts_deduplicated_variables() {
        let vars = extract_variables("<p>Hi {{name}}, your role is {{role}}. Bye {{name}}</p>");
        assert_eq!(vars, vec!["name".to_string(), "role".to_string()]);
    }

    #[test]
    fn empty_for_placeholder_free_body() {
        assert!(extract_variables("<p>No tokens here</p>").is_empty());
    }

    #[test]
    fn ignores_malformed_tokens() {
        let vars = extract_variables("{{ spaced }} {{kebab-case}} {{valid_1}}");
        assert_eq!(vars, vec!["valid_1".to_string()]);
    }

    #[test]
    fn is_case_sensitive() {
        let vars = extract_variables("{{Name}} {{name}}");
        assert_eq!(vars, vec!["Name".to_string(), "name".to_string()]);
    }
}
