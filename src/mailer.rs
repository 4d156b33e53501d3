use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::config::AppConfig;

#[derive(Debug, Clone)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
}

#[derive(Debug, Clone, Default)]
pub struct SendOutcome {
    pub message_id: Option<String>,
}

/// Transport seam. Exactly one backend is active per deployment; callers
/// never know which. Errors stay inside `Result` so batch callers can record
/// them per job and move on.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: OutgoingEmail) -> Result<SendOutcome>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(
        host: &str,
        port: u16,
        username: &str,
        password: &str,
        from_name: &str,
        from_email: &str,
    ) -> Result<Self> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .context("failed to create SMTP transport")?
            .port(port)
            .credentials(Credentials::new(username.to_string(), password.to_string()))
            .build();
        let from: Mailbox = format!("{from_name} <{from_email}>")
            .parse()
            .context("invalid from address")?;
        Ok(Self { transport, from })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<SendOutcome> {
        let to: Mailbox = email
            .to
            .parse()
            .with_context(|| format!("invalid recipient address: {}", email.to))?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(&email.subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(email.text),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(email.html),
                    ),
            )
            .context("failed to build email")?;

        let response = self
            .transport
            .send(message)
            .await
            .context("SMTP delivery failed")?;

        Ok(SendOutcome {
            message_id: Some(response.message().collect::<Vec<_>>().join(" ")),
        })
    }
}

pub struct ResendMailer {
    client: reqwest::Client,
    api_key: String,
    from: String,
}

impl ResendMailer {
    pub fn new(api_key: &str, from_name: &str, from_email: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.to_string(),
            from: format!("{from_name} <{from_email}>"),
        }
    }
}

#[derive(Deserialize)]
struct ResendResponse {
    id: Option<String>,
}

#[async_trait]
impl Mailer for ResendMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<SendOutcome> {
        let response = self
            .client
            .post("https://api.resend.com/emails")
            .bearer_auth(&self.api_key)
            .json(&json!({
                "from": self.from,
                "to": email.to,
                "subject": email.subject,
                "html": email.html,
                "text": email.text,
            }))
            .send()
            .await
            .context("provider API request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("provider API error {status}: {body}"));
        }

        let parsed: ResendResponse = response.json().await.unwrap_or(ResendResponse { id: None });
        Ok(SendOutcome {
            message_id: parsed.id,
        })
    }
}

/// Development transport: logs instead of delivering.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<SendOutcome> {
        info!(
            to = %email.to,
            subject = %email.subject,
            "would send email\n---HTML---\n{}\n---TEXT---\n{}",
            email.html,
            email.text,
        );
        Ok(SendOutcome::default())
    }
}

/// Picks the active backend: explicit `MAIL_DRIVER`, else provider API key,
/// else SMTP credentials. `None` means sends surface a configuration error.
pub fn build_mailer(config: &AppConfig) -> Result<Option<Arc<dyn Mailer>>> {
    match config.mail_driver.as_deref() {
        Some("smtp") => Ok(Some(Arc::new(smtp_from_config(config)?))),
        Some("resend") => {
            let api_key = config
                .resend_api_key
                .as_deref()
                .ok_or_else(|| anyhow!("MAIL_DRIVER=resend requires RESEND_API_KEY"))?;
            Ok(Some(Arc::new(ResendMailer::new(
                api_key,
                &config.from_name,
                &config.from_email,
            ))))
        }
        Some("log") => Ok(Some(Arc::new(LogMailer))),
        Some(other) => Err(anyhow!("unknown MAIL_DRIVER: {other}")),
        None => {
            if let Some(api_key) = config.resend_api_key.as_deref() {
                Ok(Some(Arc::new(ResendMailer::new(
                    api_key,
                    &config.from_name,
                    &config.from_email,
                ))))
            } else if config.smtp_host.is_some() && config.smtp_password.is_some() {
                Ok(Some(Arc::new(smtp_from_config(config)?)))
            } else {
                Ok(None)
            }
        }
    }
}

fn smtp_from_config(config: &AppConfig) -> Result<SmtpMailer> {
    let host = config
        .smtp_host
        .as_deref()
        .ok_or_else(|| anyhow!("SMTP transport requires SMTP_HOST"))?;
    let password = config
        .smtp_password
        .as_deref()
        .ok_or_else(|| anyhow!("SMTP transport requires SMTP_PASSWORD"))?;
    let username = config.smtp_username.as_deref().unwrap_or(&config.from_email);
    SmtpMailer::new(
        host,
        config.smtp_port,
        username,
        password,
        &config.from_name,
        &config.from_email,
    )
}
