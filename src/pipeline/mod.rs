//! Send orchestrator - sequences fetch, render, rasterize, mail and audit for
//! one send request and guarantees it gets exactly one reply.
//!
//! Each [`SendOrchestrator::send`] call runs the pipeline on its own task next
//! to a watchdog task. Both race to the shared [`ReplyGuard`]; whichever
//! replies first wins and the loser's reply is dropped with a log line. When
//! the watchdog wins it also fires the send's [`Cancellation`], so the browser
//! and SMTP session are torn down at their next suspension point instead of
//! running on unobserved.

/// Registry of invoices with a send in progress
pub mod inflight;
/// Exactly-once reply slot
pub mod reply;

use crate::{
    cancel::Cancellation,
    config::{AppConfig, PathsConfig, SendConfig},
    core::{attachment, customer, email_log, invoice, settings},
    document::{DocumentBundle, Renderer, pdf_file_name},
    entities::{
        EmailStatus, attachment as attachment_entity, customer as customer_entity,
        invoice as invoice_entity, line_item, settings as settings_entity,
    },
    errors::{Error, Result},
    mailer::{Dispatcher, MailTransport, OutgoingMessage, SmtpParams},
    rasterizer::{BrowserEngine, Rasterizer},
};
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, info, instrument, warn};

pub use inflight::{InFlightRegistry, SendLease};
pub use reply::ReplyGuard;

static NEXT_CORRELATION_ID: AtomicU64 = AtomicU64::new(1);

/// A request to email one invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    /// Echoed back in the matching [`SendResponse`]
    pub correlation_id: u64,
    pub invoice_id: i64,
    /// Falls back to the customer's address when empty
    pub recipient_email: Option<String>,
}

impl SendRequest {
    #[must_use]
    pub fn new(invoice_id: i64, recipient_email: Option<String>) -> Self {
        Self {
            correlation_id: NEXT_CORRELATION_ID.fetch_add(1, Ordering::Relaxed),
            invoice_id,
            recipient_email,
        }
    }
}

/// The single reply to a [`SendRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendResponse {
    pub correlation_id: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SendResponse {
    #[must_use]
    pub const fn success(correlation_id: u64) -> Self {
        Self {
            correlation_id,
            success: true,
            error: None,
        }
    }

    #[must_use]
    pub fn failure(correlation_id: u64, error: impl Into<String>) -> Self {
        Self {
            correlation_id,
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Everything the pipeline reads for one invoice.
struct SendContext {
    settings: settings_entity::Model,
    smtp: SmtpParams,
    invoice: invoice_entity::Model,
    customer: customer_entity::Model,
    line_items: Vec<line_item::Model>,
    attachments: Vec<attachment_entity::Model>,
    recipient: String,
}

/// Runs send requests against the store, a browser engine and a mail transport.
#[derive(Clone)]
pub struct SendOrchestrator {
    db: DatabaseConnection,
    renderer: Renderer,
    rasterizer: Rasterizer,
    dispatcher: Dispatcher,
    in_flight: InFlightRegistry,
    paths: PathsConfig,
    policy: SendConfig,
}

impl SendOrchestrator {
    /// Wires the pipeline together. Must be called inside a Tokio runtime
    /// because it starts the in-flight registry task.
    #[must_use]
    pub fn new(
        db: DatabaseConnection,
        config: &AppConfig,
        engine: Arc<dyn BrowserEngine>,
        transport: Arc<dyn MailTransport>,
    ) -> Self {
        Self {
            db,
            renderer: Renderer::new(config.paths.templates.clone()),
            rasterizer: Rasterizer::new(engine, config.browser.budgets()),
            dispatcher: Dispatcher::new(transport, config.mail.clone()),
            in_flight: InFlightRegistry::spawn(),
            paths: config.paths.clone(),
            policy: config.send.clone(),
        }
    }

    /// Handles one send request and returns its only reply.
    ///
    /// Never fails: every error becomes `{success: false, error}`. The reply
    /// arrives no later than the configured deadline.
    #[instrument(
        skip_all,
        fields(invoice_id = request.invoice_id, correlation_id = request.correlation_id)
    )]
    pub async fn send(&self, request: SendRequest) -> SendResponse {
        let correlation_id = request.correlation_id;
        let (guard, reply) = ReplyGuard::new();
        let cancel = Cancellation::new();

        let watchdog = tokio::spawn({
            let guard = guard.clone();
            let cancel = cancel.clone();
            let deadline = self.policy.deadline();
            async move {
                tokio::time::sleep(deadline).await;
                let timeout = SendResponse::failure(correlation_id, Error::Timeout.to_string());
                if guard.send(timeout) {
                    warn!(?deadline, "Send watchdog fired, cancelling pipeline");
                    cancel.cancel();
                }
            }
        });

        tokio::spawn({
            let this = self.clone();
            async move {
                let response = match this.run(&request, &cancel).await {
                    Ok(()) => SendResponse::success(correlation_id),
                    Err(e) => {
                        error!(invoice_id = request.invoice_id, "Invoice send failed: {}", e);
                        SendResponse::failure(correlation_id, e.to_string())
                    }
                };
                if guard.send(response) {
                    watchdog.abort();
                } else {
                    warn!(
                        invoice_id = request.invoice_id,
                        correlation_id, "Suppressed reply after watchdog timeout"
                    );
                }
            }
        });

        reply.await.unwrap_or_else(|_| {
            // Only reachable when the runtime shuts down before either task replies.
            SendResponse::failure(correlation_id, "Invoice send failed unexpectedly.")
        })
    }

    async fn run(&self, request: &SendRequest, cancel: &Cancellation) -> Result<()> {
        let _lease = cancel
            .guard(self.in_flight.acquire(request.invoice_id, self.policy.duplicate_sends))
            .await??;

        let ctx = self.load(request).await?;
        let invoice_id = ctx.invoice.id;

        let rendered = self
            .produce_pdf(
                &ctx.settings,
                &ctx.customer,
                &ctx.invoice,
                &ctx.line_items,
                cancel,
            )
            .await;
        let pdf_path = match rendered {
            Ok(path) => path,
            Err(e) => {
                if self.policy.log_render_failures && e.is_render_failure() {
                    email_log::append_email_log(
                        &self.db,
                        invoice_id,
                        &ctx.recipient,
                        EmailStatus::Failed,
                        Some(e.to_string()),
                    )
                    .await?;
                }
                return Err(e);
            }
        };

        let message = OutgoingMessage::for_invoice(
            &ctx.settings,
            &ctx.customer,
            &ctx.invoice,
            &ctx.recipient,
            &pdf_path,
            &ctx.attachments,
        );

        match self.dispatcher.dispatch(&ctx.smtp, &message, cancel).await {
            Ok(attempts) => {
                info!(invoice_id, attempts, recipient = %ctx.recipient, "Invoice sent");
                self.record_delivery(invoice_id, &ctx.recipient).await;
                Ok(())
            }
            Err(e) => {
                // A dispatch cut short by the watchdog is recorded as the timeout it was.
                let e = if matches!(e, Error::Cancelled) { Error::Timeout } else { e };
                email_log::append_email_log(
                    &self.db,
                    invoice_id,
                    &ctx.recipient,
                    EmailStatus::Failed,
                    Some(e.to_string()),
                )
                .await?;
                Err(e)
            }
        }
    }

    /// Bookkeeping after the mail went out. The send already succeeded, so a
    /// failure here is logged and does not change the reply.
    async fn record_delivery(&self, invoice_id: i64, recipient: &str) {
        if let Err(e) = email_log::append_email_log(
            &self.db,
            invoice_id,
            recipient,
            EmailStatus::Success,
            None,
        )
        .await
        {
            warn!(invoice_id, "Failed to write email log after delivery: {}", e);
        }

        match invoice::record_sent(&self.db, invoice_id).await {
            Ok(updated) => {
                debug!(invoice_id, status = %updated.status, "Recorded invoice as sent");
            }
            Err(e) => {
                warn!(invoice_id, "Failed to record sent invoice after delivery: {}", e);
            }
        }
    }

    /// Fetch steps, in order, each failing with its own not-found error. Every
    /// read happens here, before anything is rendered.
    async fn load(&self, request: &SendRequest) -> Result<SendContext> {
        let settings = settings::get_settings(&self.db)
            .await?
            .ok_or(Error::ConfigurationMissing)?;
        let smtp = SmtpParams::from_settings(&settings)?;

        let invoice = invoice::get_invoice_by_id(&self.db, request.invoice_id)
            .await?
            .ok_or(Error::InvoiceNotFound {
                id: request.invoice_id,
            })?;
        let customer = customer::get_customer_by_id(&self.db, invoice.customer_id)
            .await?
            .ok_or(Error::CustomerNotFound {
                id: invoice.customer_id,
            })?;

        let recipient = resolve_recipient(request.recipient_email.as_deref(), &customer.email)
            .ok_or(Error::MissingRecipient {
                invoice_id: invoice.id,
            })?;

        let line_items = invoice::get_line_items(&self.db, invoice.id).await?;
        let attachments = attachment::list_attachments(&self.db, invoice.id).await?;

        Ok(SendContext {
            settings,
            smtp,
            invoice,
            customer,
            line_items,
            attachments,
            recipient,
        })
    }

    /// Renders and rasterizes the invoice into its output path.
    async fn produce_pdf(
        &self,
        settings: &settings_entity::Model,
        customer: &customer_entity::Model,
        invoice: &invoice_entity::Model,
        line_items: &[line_item::Model],
        cancel: &Cancellation,
    ) -> Result<PathBuf> {
        let bundle = DocumentBundle::new(settings, customer, invoice, line_items);
        let html = cancel.guard(self.renderer.render(&bundle)).await??;

        let destination = self
            .paths
            .output_dir
            .join(pdf_file_name(&settings.invoice_prefix, &invoice.invoice_number));
        self.rasterizer.rasterize(&html, &destination, cancel).await?;
        Ok(destination)
    }

    /// Renders the PDF of an invoice without sending it (preview). Writes no
    /// email log row and leaves the invoice untouched.
    ///
    /// # Errors
    /// Fails like the render steps of [`send`](Self::send), and with
    /// [`Error::Timeout`] past the configured deadline.
    #[instrument(skip(self))]
    pub async fn generate_pdf(&self, invoice_id: i64) -> Result<PathBuf> {
        let settings = settings::get_settings(&self.db)
            .await?
            .ok_or_else(|| Error::Config {
                message: "Company settings not configured.".to_string(),
            })?;
        let invoice = invoice::get_invoice_by_id(&self.db, invoice_id)
            .await?
            .ok_or(Error::InvoiceNotFound { id: invoice_id })?;
        let customer = customer::get_customer_by_id(&self.db, invoice.customer_id)
            .await?
            .ok_or(Error::CustomerNotFound {
                id: invoice.customer_id,
            })?;
        let line_items = invoice::get_line_items(&self.db, invoice.id).await?;

        let cancel = Cancellation::new();
        let timer = tokio::spawn({
            let cancel = cancel.clone();
            let deadline = self.policy.deadline();
            async move {
                tokio::time::sleep(deadline).await;
                cancel.cancel();
            }
        });
        let result = self
            .produce_pdf(&settings, &customer, &invoice, &line_items, &cancel)
            .await;
        timer.abort();

        result.map_err(|e| match e {
            Error::Cancelled => Error::Timeout,
            other => other,
        })
    }
}

/// The request's address when it has one, otherwise the customer's.
fn resolve_recipient(requested: Option<&str>, customer_email: &str) -> Option<String> {
    requested
        .map(str::trim)
        .filter(|email| !email.is_empty())
        .or_else(|| Some(customer_email.trim()).filter(|email| !email.is_empty()))
        .map(ToString::to_string)
}
