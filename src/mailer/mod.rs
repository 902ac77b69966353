//! Mail dispatcher - delivers the invoice email with a bounded retry loop.
//!
//! Every attempt opens its own transport, verifies it, and transmits. The
//! attempt reports an [`AttemptOutcome`] and the loop branches on it: transient
//! failures are retried after a linear backoff, fatal failures stop at once.
//! Only the last error reaches the caller.

/// Invoice email contents
pub mod message;
/// SMTP transport over lettre
pub mod smtp;

use crate::{
    cancel::Cancellation,
    config::MailConfig,
    entities::settings,
    errors::{Error, Result},
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, instrument, warn};

pub use message::{MailAttachment, OutgoingMessage};
pub use smtp::SmtpTransport;

/// Connection parameters for one SMTP server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpParams {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Implicit TLS; STARTTLS when the server offers it otherwise
    pub secure: bool,
}

impl SmtpParams {
    /// Reads the SMTP part of the settings row.
    ///
    /// # Errors
    /// Returns [`Error::ConfigurationMissing`] if no host is set, and
    /// [`Error::Config`] for a port outside `1..=65535`.
    pub fn from_settings(settings: &settings::Model) -> Result<Self> {
        let host = settings.smtp_host().ok_or(Error::ConfigurationMissing)?;
        let port = u16::try_from(settings.smtp_port)
            .ok()
            .filter(|port| *port != 0)
            .ok_or_else(|| Error::Config {
                message: format!("Invalid SMTP port {}", settings.smtp_port),
            })?;
        Ok(Self {
            host: host.to_string(),
            port,
            user: non_empty(settings.smtp_user.as_deref()),
            password: settings.smtp_password.clone(),
            secure: settings.smtp_secure,
        })
    }

    /// Credentials, when a user name is configured.
    #[must_use]
    pub fn credentials(&self) -> Option<(&str, &str)> {
        self.user
            .as_deref()
            .map(|user| (user, self.password.as_deref().unwrap_or_default()))
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
}

/// Result of a single delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Delivered,
    /// Connection, authentication, verification or transmission failed; worth retrying
    TransientFailure(String),
    /// Retrying cannot help (the message itself could not be built)
    FatalFailure(String),
}

/// One way of getting a message to a mail server.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Opens a fresh connection, verifies it, transmits `message`, and closes.
    async fn attempt(&self, smtp: &SmtpParams, message: &OutgoingMessage) -> AttemptOutcome;
}

/// Runs delivery attempts against a [`MailTransport`] under the retry policy.
#[derive(Clone)]
pub struct Dispatcher {
    transport: Arc<dyn MailTransport>,
    config: MailConfig,
}

impl Dispatcher {
    #[must_use]
    pub fn new(transport: Arc<dyn MailTransport>, config: MailConfig) -> Self {
        Self { transport, config }
    }

    /// Delivers `message`, retrying transient failures up to the attempt budget.
    ///
    /// Returns the number of attempts it took.
    ///
    /// # Errors
    /// - [`Error::Delivery`] carrying the last attempt's error
    /// - [`Error::Cancelled`] if `cancel` fires during an attempt or a backoff
    #[instrument(skip_all, fields(to = %message.to))]
    pub async fn dispatch(
        &self,
        smtp: &SmtpParams,
        message: &OutgoingMessage,
        cancel: &Cancellation,
    ) -> Result<u32> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                let wait = self.config.backoff_after(attempt - 1);
                info!(attempt, ?wait, "Retrying email send");
                cancel.guard(tokio::time::sleep(wait)).await?;
            }

            match cancel.guard(self.transport.attempt(smtp, message)).await? {
                AttemptOutcome::Delivered => {
                    info!(attempt, "Email sent");
                    return Ok(attempt);
                }
                AttemptOutcome::TransientFailure(error) => {
                    warn!(attempt, max_attempts, %error, "Email attempt failed");
                    last_error = error;
                }
                AttemptOutcome::FatalFailure(error) => {
                    warn!(attempt, %error, "Email cannot be sent, not retrying");
                    return Err(Error::Delivery { message: error });
                }
            }
        }

        Err(Error::Delivery {
            message: last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::test_utils::{FakeMailer, sample_settings};
    use std::time::Duration;
    use tokio::time::Instant;

    fn message() -> OutgoingMessage {
        OutgoingMessage {
            from_name: "ACME Corp".to_string(),
            from_address: "billing@acme.test".to_string(),
            reply_to: "billing@acme.test".to_string(),
            to: "a@b.com".to_string(),
            bcc: None,
            subject: "Invoice #1001 from ACME Corp".to_string(),
            body: "hello".to_string(),
            attachments: Vec::new(),
        }
    }

    fn dispatcher(mailer: &FakeMailer) -> Dispatcher {
        Dispatcher::new(mailer.transport(), MailConfig::default())
    }

    fn smtp() -> SmtpParams {
        SmtpParams::from_settings(&sample_settings()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_third_attempt() -> Result<()> {
        let mailer = FakeMailer::failing_first(2);
        let attempts = dispatcher(&mailer)
            .dispatch(&smtp(), &message(), &Cancellation::new())
            .await?;
        assert_eq!(attempts, 3);
        assert_eq!(mailer.attempts(), 3);
        assert_eq!(mailer.delivered().len(), 1);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_surfaces_last_error_after_three_attempts() {
        let mailer = FakeMailer::always_failing();
        let err = dispatcher(&mailer)
            .dispatch(&smtp(), &message(), &Cancellation::new())
            .await
            .unwrap_err();
        assert_eq!(mailer.attempts(), 3);
        assert_eq!(err.to_string(), "connection refused (attempt 3)");
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_failure_is_not_retried() {
        let mailer = FakeMailer::fatal("invalid recipient address");
        let err = dispatcher(&mailer)
            .dispatch(&smtp(), &message(), &Cancellation::new())
            .await
            .unwrap_err();
        assert_eq!(mailer.attempts(), 1);
        assert!(
            matches!(err, Error::Delivery { ref message } if message == "invalid recipient address")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_is_linear() {
        let mailer = FakeMailer::always_failing();
        let start = Instant::now();
        let _ = dispatcher(&mailer)
            .dispatch(&smtp(), &message(), &Cancellation::new())
            .await;

        // 1s after the first failure, 2s after the second.
        let times = mailer.attempt_times();
        assert_eq!(times.len(), 3);
        let close_to = |gap: Duration, expected: Duration| {
            gap >= expected && gap < expected + Duration::from_millis(5)
        };
        assert!(close_to(times[0] - start, Duration::ZERO));
        assert!(close_to(times[1] - times[0], Duration::from_secs(1)));
        assert!(close_to(times[2] - times[1], Duration::from_secs(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let mailer = FakeMailer::always_failing();
        let cancel = Cancellation::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });

        let err = dispatcher(&mailer)
            .dispatch(&smtp(), &message(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(mailer.attempts(), 1);
    }

    #[test]
    fn test_smtp_params_from_settings() {
        let mut settings = sample_settings();
        settings.smtp_user = Some("  ".to_string());
        let params = SmtpParams::from_settings(&settings).unwrap();
        assert_eq!(params.host, "smtp.example.com");
        assert_eq!(params.port, 587);
        assert_eq!(params.credentials(), None);

        settings.smtp_host = None;
        assert!(matches!(
            SmtpParams::from_settings(&settings),
            Err(Error::ConfigurationMissing)
        ));

        settings.smtp_host = Some("smtp.example.com".to_string());
        settings.smtp_port = 70000;
        assert!(matches!(SmtpParams::from_settings(&settings), Err(Error::Config { .. })));
    }
}
