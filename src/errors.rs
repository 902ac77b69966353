//! Unified error type for the invoice send pipeline.
//!
//! Every failure the pipeline can surface to a caller is a variant here. The
//! `Display` text of each variant is what ends up in the reply to the UI and
//! in the `email_logs.error_message` column, so it is written for humans.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Environment variable error: {0}")]
    EnvVar(#[from] std::env::VarError),

    #[error("SMTP settings not configured.")]
    ConfigurationMissing,

    #[error("Invoice not found.")]
    InvoiceNotFound { id: i64 },

    #[error("Customer not found.")]
    CustomerNotFound { id: i64 },

    #[error("Attachment not found.")]
    AttachmentNotFound { id: i64 },

    #[error("No recipient email address for invoice {invoice_id}.")]
    MissingRecipient { invoice_id: i64 },

    #[error("Invoice template not found (searched: {searched})")]
    TemplateMissing { searched: String },

    #[error("Template error: {message}")]
    Template { message: String },

    #[error("Headless browser unavailable: {message}")]
    RasterizerUnavailable { message: String },

    #[error("{step} timed out after {}ms", budget.as_millis())]
    StepTimeout { step: String, budget: Duration },

    #[error("Browser error: {message}")]
    Browser { message: String },

    #[error("{message}")]
    Delivery { message: String },

    #[error("Invoice {invoice_id} is already being sent.")]
    AlreadySending { invoice_id: i64 },

    #[error("Invoice send timed out. Please try again.")]
    Timeout,

    #[error("Invoice send was cancelled.")]
    Cancelled,
}

impl Error {
    /// Failures raised while producing the document, before any delivery attempt.
    #[must_use]
    pub const fn is_render_failure(&self) -> bool {
        matches!(
            self,
            Self::TemplateMissing { .. }
                | Self::Template { .. }
                | Self::RasterizerUnavailable { .. }
                | Self::StepTimeout { .. }
                | Self::Browser { .. }
        )
    }
}

impl From<thirtyfour::error::WebDriverError> for Error {
    fn from(value: thirtyfour::error::WebDriverError) -> Self {
        Self::Browser {
            message: value.to_string(),
        }
    }
}

// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;
