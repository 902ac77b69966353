//! Stored attachments - user files that travel with an invoice's email.
//!
//! Uploading copies the source file into the attachments directory under a
//! generated name (`{invoice_id}_{millis}{ext}`) so the stored copy survives the
//! original being moved or edited. Deleting removes both the file and the row.

use crate::{
    entities::{Attachment, attachment},
    errors::{Error, Result},
};
use sea_orm::{QueryOrder, Set, prelude::*};
use std::path::Path;
use tracing::{info, instrument, warn};

/// Lists the attachments of an invoice in upload order.
pub async fn list_attachments(
    db: &DatabaseConnection,
    invoice_id: i64,
) -> Result<Vec<attachment::Model>> {
    Attachment::find()
        .filter(attachment::Column::InvoiceId.eq(invoice_id))
        .order_by_asc(attachment::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Copies `source` into `attachments_dir` and records it against the invoice.
///
/// # Errors
/// Returns an error if the source has no file name, the copy fails, or the
/// insert fails. A failed insert removes the copied file again.
#[instrument(skip(db))]
pub async fn upload_attachment(
    db: &DatabaseConnection,
    attachments_dir: &Path,
    invoice_id: i64,
    source: &Path,
) -> Result<attachment::Model> {
    let original_filename = source
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| Error::Config {
            message: format!("Attachment path has no file name: {}", source.display()),
        })?;
    let extension = source
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();
    let now = chrono::Utc::now();
    let filename = format!("{invoice_id}_{}{extension}", now.timestamp_millis());

    tokio::fs::create_dir_all(attachments_dir).await?;
    let destination = attachments_dir.join(&filename);
    let file_size = tokio::fs::copy(source, &destination).await?;

    let row = attachment::ActiveModel {
        invoice_id: Set(invoice_id),
        filename: Set(filename),
        original_filename: Set(original_filename),
        file_path: Set(destination.to_string_lossy().into_owned()),
        file_size: Set(i64::try_from(file_size).unwrap_or(i64::MAX)),
        created_at: Set(now),
        ..Default::default()
    };

    match row.insert(db).await {
        Ok(model) => {
            info!(attachment_id = model.id, file_size, "Attachment stored");
            Ok(model)
        }
        Err(e) => {
            if let Err(cleanup) = tokio::fs::remove_file(&destination).await {
                warn!("Failed to remove orphaned attachment copy: {}", cleanup);
            }
            Err(e.into())
        }
    }
}

/// Deletes an attachment: the stored file first (if still present), then the row.
pub async fn delete_attachment(db: &DatabaseConnection, attachment_id: i64) -> Result<()> {
    let existing = Attachment::find_by_id(attachment_id)
        .one(db)
        .await?
        .ok_or(Error::AttachmentNotFound { id: attachment_id })?;

    match tokio::fs::remove_file(&existing.file_path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(attachment_id, "Stored attachment file already missing");
        }
        Err(e) => return Err(e.into()),
    }

    Attachment::delete_by_id(attachment_id).exec(db).await?;
    Ok(())
}
