//! Invoice entity - The document the send pipeline renders and mails.
//!
//! `status` is stored as text; [`InvoiceStatus`] is the typed view of it.
//! `total` always equals the sum of the invoice's line totals and `subtotal`
//! equals `total` (no tax or discount modelling).

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Invoice database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "invoices")]
pub struct Model {
    /// Unique identifier for the invoice
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Monotonic display number (e.g., "1001")
    #[sea_orm(unique)]
    pub invoice_number: String,
    /// Customer this invoice is addressed to
    pub customer_id: i64,
    pub issue_date: Date,
    pub due_date: Date,
    /// One of `Draft`, `Sent`, `Paid`, `Overdue`, `Cancelled`
    pub status: String,
    pub payment_terms: Option<String>,
    pub subtotal: f64,
    pub total: f64,
    /// Printed on the document
    pub notes: Option<String>,
    /// Never leaves the application
    pub internal_memo: Option<String>,
    pub sent_at: Option<DateTimeUtc>,
    pub paid_at: Option<DateTimeUtc>,
    /// Soft delete marker - deleted invoices are invisible to the pipeline
    pub deleted_at: Option<DateTimeUtc>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

impl Model {
    /// Typed status. Unknown values are treated as `Draft`.
    #[must_use]
    pub fn status(&self) -> InvoiceStatus {
        self.status.parse().unwrap_or(InvoiceStatus::Draft)
    }
}

/// Defines relationships between Invoice and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each invoice belongs to one customer
    #[sea_orm(
        belongs_to = "super::customer::Entity",
        from = "Column::CustomerId",
        to = "super::customer::Column::Id"
    )]
    Customer,
    /// One invoice has many line items
    #[sea_orm(has_many = "super::line_item::Entity")]
    LineItems,
    /// One invoice has many stored attachments
    #[sea_orm(has_many = "super::attachment::Entity")]
    Attachments,
    /// One invoice has many email log rows
    #[sea_orm(has_many = "super::email_log::Entity")]
    EmailLogs,
}

impl Related<super::customer::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Customer.def()
    }
}

impl Related<super::line_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::LineItems.def()
    }
}

impl Related<super::attachment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Attachments.def()
    }
}

impl Related<super::email_log::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::EmailLogs.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Lifecycle of an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceStatus {
    Draft,
    Sent,
    Paid,
    Overdue,
    Cancelled,
}

impl InvoiceStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "Draft",
            Self::Sent => "Sent",
            Self::Paid => "Paid",
            Self::Overdue => "Overdue",
            Self::Cancelled => "Cancelled",
        }
    }

    /// Whether a successful send moves this invoice to `Sent`.
    ///
    /// Only `Draft` and `Sent` do; a paid, cancelled or overdue invoice keeps
    /// its status when it is (re)mailed.
    #[must_use]
    pub const fn moves_to_sent(self) -> bool {
        matches!(self, Self::Draft | Self::Sent)
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvoiceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Draft" => Ok(Self::Draft),
            "Sent" => Ok(Self::Sent),
            "Paid" => Ok(Self::Paid),
            "Overdue" => Ok(Self::Overdue),
            "Cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown invoice status: {other}")),
        }
    }
}
