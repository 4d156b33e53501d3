use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::models::EmailTemplate;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{(\w+)\}\}").expect("valid placeholder regex"));

#[derive(Debug, Clone)]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// Substitutes `{{key}}` tokens from `bindings`. Tokens without a binding are
/// left verbatim so a partially configured template still produces a usable
/// email. List values are pre-joined by the caller before binding.
pub fn render_str(input: &str, bindings: &HashMap<String, String>) -> String {
    PLACEHOLDER
        .replace_all(input, |caps: &Captures| match bindings.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

pub fn render(template: &EmailTemplate, bindings: &HashMap<String, String>) -> RenderedEmail {
    let subject = render_str(&template.subject, bindings);
    let html = render_str(&template.body_html, bindings);
    let text = match template.body_text.as_deref() {
        Some(body_text) => render_str(body_text, bindings),
        None => strip_tags(&html),
    };
    RenderedEmail {
        subject,
        html,
        text,
    }
}

/// Manual-send convenience: turns a plain-text body into HTML line by line.
/// Stored templates are never run through this.
pub fn newline_to_br(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\n', "<br>")
}

pub(crate) fn strip_tags(html: &str) -> String {
    static BR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<br\s*/?>").expect("valid br regex"));
    static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("valid tag regex"));
    let with_breaks = BR.replace_all(html, "\n");
    TAG.replace_all(&with_breaks, "").into_owned()
}
