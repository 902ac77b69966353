//! Email log - the append-only audit trail of send outcomes.

use crate::{
    entities::{EmailLog, EmailStatus, email_log},
    errors::Result,
};
use sea_orm::{QueryOrder, Set, prelude::*};
use tracing::debug;

/// Appends one audit row for a terminal send outcome.
pub async fn append_email_log(
    db: &DatabaseConnection,
    invoice_id: i64,
    recipient_email: &str,
    status: EmailStatus,
    error_message: Option<String>,
) -> Result<email_log::Model> {
    debug!(invoice_id, %status, "Appending email log row");
    let row = email_log::ActiveModel {
        invoice_id: Set(invoice_id),
        recipient_email: Set(recipient_email.to_string()),
        sent_at: Set(chrono::Utc::now()),
        status: Set(status.as_str().to_string()),
        error_message: Set(error_message),
        ..Default::default()
    };
    row.insert(db).await.map_err(Into::into)
}

/// Lists the audit rows of one invoice, newest first.
pub async fn list_email_logs(
    db: &DatabaseConnection,
    invoice_id: i64,
) -> Result<Vec<email_log::Model>> {
    EmailLog::find()
        .filter(email_log::Column::InvoiceId.eq(invoice_id))
        .order_by_desc(email_log::Column::SentAt)
        .order_by_desc(email_log::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}
