//! Invoice business logic - creation, lookups and the post-send status update.
//!
//! Totals are always derived from the line items at creation time
//! (`line_total = unit_price * quantity`, `subtotal = total = Σ line_total`), so
//! the stored `total` can be trusted by the renderer and the mail body.

use crate::{
    entities::{Invoice, InvoiceStatus, LineItem, invoice, line_item},
    errors::{Error, Result},
};
use sea_orm::{QueryOrder, QuerySelect, Set, TransactionTrait, prelude::*};
use tracing::{debug, info, instrument};

/// First number handed out by an empty store.
pub const FIRST_INVOICE_NUMBER: u64 = 1001;

/// Input for one line of a new invoice.
#[derive(Debug, Clone)]
pub struct NewLineItem {
    pub product_id: Option<i64>,
    pub product_name: String,
    pub description: Option<String>,
    pub unit_price: f64,
    pub quantity: f64,
}

/// Input for a new invoice. Totals are computed, not supplied.
#[derive(Debug, Clone)]
pub struct NewInvoice {
    pub invoice_number: String,
    pub customer_id: i64,
    pub issue_date: Date,
    pub due_date: Date,
    pub payment_terms: Option<String>,
    pub notes: Option<String>,
    pub internal_memo: Option<String>,
    pub line_items: Vec<NewLineItem>,
}

/// Retrieves an invoice by ID. Soft-deleted invoices are treated as absent.
pub async fn get_invoice_by_id(
    db: &DatabaseConnection,
    invoice_id: i64,
) -> Result<Option<invoice::Model>> {
    Invoice::find_by_id(invoice_id)
        .filter(invoice::Column::DeletedAt.is_null())
        .one(db)
        .await
        .map_err(Into::into)
}

/// Retrieves the line items of an invoice in rendering order.
pub async fn get_line_items(
    db: &DatabaseConnection,
    invoice_id: i64,
) -> Result<Vec<line_item::Model>> {
    LineItem::find()
        .filter(line_item::Column::InvoiceId.eq(invoice_id))
        .order_by_asc(line_item::Column::SortOrder)
        .order_by_asc(line_item::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Creates a draft invoice together with its line items, atomically.
///
/// # Errors
/// Returns an error if:
/// - The invoice number is empty
/// - A quantity or unit price is negative or not finite
/// - The database insert fails (including a duplicate invoice number)
#[instrument(skip(db, new_invoice), fields(invoice_number = %new_invoice.invoice_number))]
pub async fn create_invoice(
    db: &DatabaseConnection,
    new_invoice: NewInvoice,
) -> Result<invoice::Model> {
    if new_invoice.invoice_number.trim().is_empty() {
        return Err(Error::Config {
            message: "Invoice number cannot be empty".to_string(),
        });
    }
    for item in &new_invoice.line_items {
        if !item.unit_price.is_finite() || item.unit_price < 0.0 {
            return Err(Error::Config {
                message: format!("Invalid unit price for {}", item.product_name),
            });
        }
        if !item.quantity.is_finite() || item.quantity < 0.0 {
            return Err(Error::Config {
                message: format!("Invalid quantity for {}", item.product_name),
            });
        }
    }

    let total: f64 = new_invoice
        .line_items
        .iter()
        .map(|item| item.unit_price * item.quantity)
        .sum();
    let now = chrono::Utc::now();

    let txn = db.begin().await?;

    let created = invoice::ActiveModel {
        invoice_number: Set(new_invoice.invoice_number.trim().to_string()),
        customer_id: Set(new_invoice.customer_id),
        issue_date: Set(new_invoice.issue_date),
        due_date: Set(new_invoice.due_date),
        status: Set(InvoiceStatus::Draft.as_str().to_string()),
        payment_terms: Set(new_invoice.payment_terms),
        subtotal: Set(total),
        total: Set(total),
        notes: Set(new_invoice.notes),
        internal_memo: Set(new_invoice.internal_memo),
        sent_at: Set(None),
        paid_at: Set(None),
        deleted_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    for (position, item) in new_invoice.line_items.into_iter().enumerate() {
        line_item::ActiveModel {
            invoice_id: Set(created.id),
            product_id: Set(item.product_id),
            product_name: Set(item.product_name),
            description: Set(item.description),
            unit_price: Set(item.unit_price),
            quantity: Set(item.quantity),
            line_total: Set(item.unit_price * item.quantity),
            sort_order: Set(i32::try_from(position).unwrap_or(i32::MAX)),
            ..Default::default()
        }
        .insert(&txn)
        .await?;
    }

    txn.commit().await?;
    info!(invoice_id = created.id, total, "Invoice created");
    Ok(created)
}

/// Suggests the next invoice number: the most recent number plus one, or
/// [`FIRST_INVOICE_NUMBER`] when the store is empty or the last number is not numeric.
pub async fn next_invoice_number(db: &DatabaseConnection) -> Result<String> {
    let last: Option<String> = Invoice::find()
        .select_only()
        .column(invoice::Column::InvoiceNumber)
        .order_by_desc(invoice::Column::Id)
        .into_tuple()
        .one(db)
        .await?;

    let next = last
        .and_then(|number| number.trim().parse::<u64>().ok())
        .map_or(FIRST_INVOICE_NUMBER, |number| number + 1);
    Ok(next.to_string())
}

/// Records a successful send on the invoice.
///
/// `sent_at` is always stamped. The status moves to `Sent` only from `Draft`
/// or `Sent`; paid, cancelled and overdue invoices keep their status.
#[instrument(skip(db))]
pub async fn record_sent(db: &DatabaseConnection, invoice_id: i64) -> Result<invoice::Model> {
    let current = get_invoice_by_id(db, invoice_id)
        .await?
        .ok_or(Error::InvoiceNotFound { id: invoice_id })?;
    let status = current.status();

    let now = chrono::Utc::now();
    let mut active: invoice::ActiveModel = current.into();
    if status.moves_to_sent() {
        active.status = Set(InvoiceStatus::Sent.as_str().to_string());
    } else {
        debug!(%status, "Keeping invoice status after send");
    }
    active.sent_at = Set(Some(now));
    active.updated_at = Set(now);

    active.update(db).await.map_err(Into::into)
}

/// Overwrites the status of an invoice. Used by the CRUD side (mark paid, cancel).
pub async fn set_status(
    db: &DatabaseConnection,
    invoice_id: i64,
    status: InvoiceStatus,
) -> Result<invoice::Model> {
    let current = get_invoice_by_id(db, invoice_id)
        .await?
        .ok_or(Error::InvoiceNotFound { id: invoice_id })?;

    let now = chrono::Utc::now();
    let mut active: invoice::ActiveModel = current.into();
    active.status = Set(status.as_str().to_string());
    if status == InvoiceStatus::Paid {
        active.paid_at = Set(Some(now));
    }
    active.updated_at = Set(now);
    active.update(db).await.map_err(Into::into)
}

/// Soft deletes an invoice. Its line items, attachments and logs are kept.
pub async fn soft_delete_invoice(db: &DatabaseConnection, invoice_id: i64) -> Result<()> {
    let current = get_invoice_by_id(db, invoice_id)
        .await?
        .ok_or(Error::InvoiceNotFound { id: invoice_id })?;

    let now = chrono::Utc::now();
    let mut active: invoice::ActiveModel = current.into();
    active.deleted_at = Set(Some(now));
    active.updated_at = Set(now);
    active.update(db).await?;
    Ok(())
}
