//! SMTP delivery through lettre's async transport.
//!
//! A transport is built per attempt and dropped at the end of it, so nothing is
//! pooled across attempts or sends.

use super::{AttemptOutcome, MailTransport, OutgoingMessage, SmtpParams};
use crate::config::MailConfig;
use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Attachment, Mailbox, MultiPart, SinglePart, header::ContentType},
    transport::smtp::{
        authentication::Credentials,
        client::{Tls, TlsParameters},
    },
};
use std::time::Duration;
use tracing::{debug, instrument};

/// Sends over SMTP with the configured connect, greeting and socket timeouts.
#[derive(Debug, Clone)]
pub struct SmtpTransport {
    connect_timeout: Duration,
    greeting_timeout: Duration,
    socket_timeout: Duration,
}

impl SmtpTransport {
    #[must_use]
    pub const fn new(config: &MailConfig) -> Self {
        Self {
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            greeting_timeout: Duration::from_millis(config.greeting_timeout_ms),
            socket_timeout: Duration::from_millis(config.socket_timeout_ms),
        }
    }

    fn connect(
        &self,
        smtp: &SmtpParams,
    ) -> Result<AsyncSmtpTransport<Tokio1Executor>, lettre::transport::smtp::Error> {
        let builder = if smtp.secure {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp.host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&smtp.host)
                .tls(Tls::Opportunistic(TlsParameters::new(smtp.host.clone())?))
        };
        let mut builder = builder.port(smtp.port).timeout(Some(self.socket_timeout));
        if let Some((user, password)) = smtp.credentials() {
            builder = builder.credentials(Credentials::new(user.to_string(), password.to_string()));
        }
        Ok(builder.build())
    }
}

#[async_trait]
impl MailTransport for SmtpTransport {
    #[instrument(skip_all, fields(host = %smtp.host, port = smtp.port))]
    async fn attempt(&self, smtp: &SmtpParams, message: &OutgoingMessage) -> AttemptOutcome {
        let email = match build_message(message).await {
            Ok(email) => email,
            Err(error) => return AttemptOutcome::FatalFailure(error),
        };

        let transport = match self.connect(smtp) {
            Ok(transport) => transport,
            Err(e) => return AttemptOutcome::TransientFailure(e.to_string()),
        };

        let verify_budget = self.connect_timeout + self.greeting_timeout;
        match tokio::time::timeout(verify_budget, transport.test_connection()).await {
            Ok(Ok(true)) => debug!("SMTP connection verified"),
            Ok(Ok(false)) => {
                return AttemptOutcome::TransientFailure(
                    "SMTP server rejected the connection check".to_string(),
                );
            }
            Ok(Err(e)) => return AttemptOutcome::TransientFailure(e.to_string()),
            Err(_) => {
                return AttemptOutcome::TransientFailure(format!(
                    "SMTP connection timed out after {}ms",
                    verify_budget.as_millis()
                ));
            }
        }

        match transport.send(email).await {
            Ok(response) => {
                debug!(code = %response.code(), "SMTP server accepted message");
                AttemptOutcome::Delivered
            }
            Err(e) => AttemptOutcome::TransientFailure(e.to_string()),
        }
    }
}

/// Assembles the MIME message, reading attachment files from disk.
async fn build_message(message: &OutgoingMessage) -> Result<Message, String> {
    let from = Mailbox::new(
        Some(message.from_name.clone()),
        message
            .from_address
            .parse()
            .map_err(|e| format!("Invalid sender address {}: {e}", message.from_address))?,
    );
    let reply_to: Mailbox = message
        .reply_to
        .parse()
        .map_err(|e| format!("Invalid reply-to address {}: {e}", message.reply_to))?;
    let to: Mailbox = message
        .to
        .parse()
        .map_err(|e| format!("Invalid recipient address {}: {e}", message.to))?;

    let mut builder = Message::builder()
        .from(from)
        .reply_to(reply_to)
        .to(to)
        .subject(message.subject.clone());
    if let Some(bcc) = &message.bcc {
        let bcc: Mailbox = bcc
            .parse()
            .map_err(|e| format!("Invalid bcc address {bcc}: {e}"))?;
        builder = builder.bcc(bcc);
    }

    let mut parts = MultiPart::mixed().singlepart(SinglePart::plain(message.body.clone()));
    for file in &message.attachments {
        let bytes = tokio::fs::read(&file.path)
            .await
            .map_err(|e| format!("Cannot read attachment {}: {e}", file.path.display()))?;
        let content_type = ContentType::parse(&file.content_type)
            .map_err(|e| format!("Invalid content type {}: {e}", file.content_type))?;
        parts = parts.singlepart(Attachment::new(file.filename.clone()).body(bytes, content_type));
    }

    builder.multipart(parts).map_err(|e| e.to_string())
}
