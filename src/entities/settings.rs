//! Settings entity - Singleton row (id = 1) holding company identity and SMTP settings.
//!
//! The send pipeline reads this row and never writes it.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Primary key of the only settings row.
pub const SETTINGS_ID: i32 = 1;

/// Settings database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "settings")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i32,
    pub company_name: String,
    pub company_address: Option<String>,
    /// Sender, reply-to and bcc address for outgoing invoices
    pub company_email: String,
    pub company_phone: Option<String>,
    /// Logo as a base64 data payload, embedded into the document
    pub logo_base64: Option<String>,
    pub invoice_due_days: i32,
    /// Prefix of generated PDF file names (e.g., "ACME" -> `ACME-Invoice-1001.pdf`)
    pub invoice_prefix: String,
    /// Unset or empty means mail delivery is not configured
    pub smtp_host: Option<String>,
    pub smtp_port: i32,
    pub smtp_user: Option<String>,
    pub smtp_password: Option<String>,
    /// Implicit TLS when true, opportunistic STARTTLS otherwise
    pub smtp_secure: bool,
    pub updated_at: DateTimeUtc,
}

impl Model {
    /// The SMTP host, if one is configured.
    #[must_use]
    pub fn smtp_host(&self) -> Option<&str> {
        self.smtp_host
            .as_deref()
            .map(str::trim)
            .filter(|host| !host.is_empty())
    }
}

/// Settings have no relationships with other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
