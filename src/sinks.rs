//! Summary sinks — the chat webhook and the SMTP reply email.
//!
//! Both sit behind [`SummarySink`] so the dispatcher can be exercised with
//! recording fakes. Delivery failures are the sink's caller's problem to
//! log; nothing here terminates the process.

use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::EmailSettings;
use crate::error::SinkError;
use crate::fetch::FetchedMail;

/// Prefix for reply-email subjects ("摘要" = summary).
pub const REPLY_SUBJECT_PREFIX: &str = "摘要：";

/// Destination for a finished summary.
#[async_trait]
pub trait SummarySink: Send + Sync {
    fn name(&self) -> &'static str;
    async fn deliver(&self, summary: &str, mail: &FetchedMail) -> Result<(), SinkError>;
}

// ── Webhook ─────────────────────────────────────────────────────────

/// Wire envelope for the chat webhook.
#[derive(Debug, Serialize)]
pub struct WebhookPayload {
    msgtype: &'static str,
    text: WebhookText,
}

#[derive(Debug, Serialize)]
struct WebhookText {
    content: String,
}

impl WebhookPayload {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            msgtype: "text",
            text: WebhookText {
                content: content.into(),
            },
        }
    }
}

/// Fire-and-forget JSON POST to the configured webhook URL.
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(client: reqwest::Client, url: String) -> Self {
        Self { client, url }
    }
}

#[async_trait]
impl SummarySink for WebhookSink {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn deliver(&self, summary: &str, _mail: &FetchedMail) -> Result<(), SinkError> {
        let response = self
            .client
            .post(&self.url)
            .json(&WebhookPayload::text(summary))
            .send()
            .await
            .map_err(|e| SinkError::Webhook(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Webhook(format!("HTTP {status}")));
        }
        debug!("summary posted to webhook");
        Ok(())
    }
}

// ── Reply email ─────────────────────────────────────────────────────

/// Replies to the original sender over SMTP submission (STARTTLS), with
/// the summary as a plain-text body and a prefixed subject.
pub struct EmailReplySink {
    settings: EmailSettings,
}

impl EmailReplySink {
    pub fn new(settings: EmailSettings) -> Self {
        Self { settings }
    }

    pub fn reply_subject(original: &str) -> String {
        format!("{REPLY_SUBJECT_PREFIX}{original}")
    }

    /// Build the reply message: `To` = original sender, `Subject` =
    /// prefixed original subject, body = summary (text/plain UTF-8).
    pub fn build_reply(
        from: &str,
        mail: &FetchedMail,
        summary: &str,
    ) -> Result<Message, SinkError> {
        let to = mail.sender.as_deref().ok_or_else(|| SinkError::Address {
            address: "(none)".to_string(),
            reason: "message has no sender to reply to".to_string(),
        })?;

        Message::builder()
            .from(from.parse().map_err(|e| SinkError::Address {
                address: from.to_string(),
                reason: format!("{e}"),
            })?)
            .to(to.parse().map_err(|e| SinkError::Address {
                address: to.to_string(),
                reason: format!("{e}"),
            })?)
            .subject(Self::reply_subject(&mail.subject))
            .body(summary.to_string())
            .map_err(|e| SinkError::Smtp(e.to_string()))
    }
}

#[async_trait]
impl SummarySink for EmailReplySink {
    fn name(&self) -> &'static str {
        "email"
    }

    async fn deliver(&self, summary: &str, mail: &FetchedMail) -> Result<(), SinkError> {
        let message = Self::build_reply(&self.settings.username, mail, summary)?;
        let settings = self.settings.clone();

        // lettre's SmtpTransport is blocking.
        tokio::task::spawn_blocking(move || send_reply(&settings, &message))
            .await
            .map_err(|e| SinkError::Smtp(format!("send task failed: {e}")))??;

        info!(to = mail.sender.as_deref().unwrap_or("unknown"), "summary reply sent");
        Ok(())
    }
}

fn send_reply(settings: &EmailSettings, message: &Message) -> Result<(), SinkError> {
    let creds = Credentials::new(settings.username.clone(), settings.password.clone());
    let transport = SmtpTransport::starttls_relay(&settings.smtp_server)
        .map_err(|e| SinkError::Smtp(format!("SMTP relay setup: {e}")))?
        .port(settings.smtp_port)
        .credentials(creds)
        .build();
    transport
        .send(message)
        .map_err(|e| SinkError::Smtp(e.to_string()))?;
    Ok(())
}
