//! The invoice email: envelope, text body and attachment list.

use crate::{
    document::{format_usd, pdf_file_name},
    entities::{attachment, customer, invoice, settings},
};
use std::path::{Path, PathBuf};

pub const PDF_CONTENT_TYPE: &str = "application/pdf";

/// A file to attach, read from disk when the message is transmitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailAttachment {
    /// Name the recipient sees
    pub filename: String,
    pub path: PathBuf,
    pub content_type: String,
}

/// Everything needed to transmit one invoice email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub from_name: String,
    pub from_address: String,
    pub reply_to: String,
    pub to: String,
    pub bcc: Option<String>,
    pub subject: String,
    pub body: String,
    pub attachments: Vec<MailAttachment>,
}

impl OutgoingMessage {
    /// Builds the invoice email: the generated PDF first, then every stored
    /// attachment under its original file name.
    ///
    /// Reply-to and bcc both go to the company address so the sender keeps a copy.
    #[must_use]
    pub fn for_invoice(
        settings: &settings::Model,
        customer: &customer::Model,
        invoice: &invoice::Model,
        recipient: &str,
        pdf_path: &Path,
        stored: &[attachment::Model],
    ) -> Self {
        let mut attachments = Vec::with_capacity(stored.len() + 1);
        attachments.push(MailAttachment {
            filename: pdf_file_name(&settings.invoice_prefix, &invoice.invoice_number),
            path: pdf_path.to_path_buf(),
            content_type: PDF_CONTENT_TYPE.to_string(),
        });
        attachments.extend(stored.iter().map(|file| MailAttachment {
            filename: file.original_filename.clone(),
            path: PathBuf::from(&file.file_path),
            content_type: mime_guess::from_path(&file.original_filename)
                .first_or_octet_stream()
                .to_string(),
        }));

        let company_email = settings.company_email.trim();
        Self {
            from_name: settings.company_name.clone(),
            from_address: company_email.to_string(),
            reply_to: company_email.to_string(),
            to: recipient.to_string(),
            bcc: (!company_email.is_empty()).then(|| company_email.to_string()),
            subject: format!(
                "Invoice #{} from {}",
                invoice.invoice_number, settings.company_name
            ),
            body: body_text(settings, customer, invoice),
            attachments,
        }
    }
}

fn body_text(
    settings: &settings::Model,
    customer: &customer::Model,
    invoice: &invoice::Model,
) -> String {
    format!(
        "Dear {customer},\n\n\
         Please find attached invoice #{number}, due on {due}, for a total of {total}.\n\n\
         Thank you for your business.\n\n\
         {company}\n",
        customer = customer.name,
        number = invoice.invoice_number,
        due = invoice.due_date,
        total = format_usd(invoice.total),
        company = settings.company_name,
    )
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::core::customer::get_customer_by_id;
    use crate::errors::Result;
    use crate::test_utils::{sample_settings, setup_with_invoice};

    #[tokio::test]
    async fn test_invoice_message() -> Result<()> {
        let (db, invoice) = setup_with_invoice().await?;
        let customer = get_customer_by_id(&db, invoice.customer_id).await?.unwrap();
        let settings = sample_settings();
        let stored = stored_file(invoice.id, "timesheet.PNG");

        let message = OutgoingMessage::for_invoice(
            &settings,
            &customer,
            &invoice,
            "a@b.com",
            Path::new("/out/ACME-Invoice-1001.pdf"),
            &[stored],
        );

        assert_eq!(message.subject, "Invoice #1001 from ACME Corp");
        assert_eq!(message.to, "a@b.com");
        assert_eq!(message.reply_to, settings.company_email);
        assert_eq!(message.bcc.as_deref(), Some(settings.company_email.as_str()));
        assert!(message.body.contains("$150.00"));
        assert!(message.body.contains("Thank you for your business."));

        let names: Vec<_> = message.attachments.iter().map(|a| a.filename.as_str()).collect();
        assert_eq!(names, ["ACME-Invoice-1001.pdf", "timesheet.PNG"]);
        assert_eq!(message.attachments[1].content_type, "image/png");
        Ok(())
    }

    fn stored_file(invoice_id: i64, original_filename: &str) -> attachment::Model {
        attachment::Model {
            id: 7,
            invoice_id,
            filename: format!("1_1700000000000-{original_filename}"),
            original_filename: original_filename.to_string(),
            file_path: format!("/data/attachments/1_1700000000000-{original_filename}"),
            file_size: 10,
            created_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_attachment_content_types() -> Result<()> {
        let (db, invoice) = setup_with_invoice().await?;
        let customer = get_customer_by_id(&db, invoice.customer_id).await?.unwrap();
        let stored: Vec<_> = ["contract.docx", "hours.csv", "archive.xyz", "README"]
            .into_iter()
            .map(|name| stored_file(invoice.id, name))
            .collect();

        let message = OutgoingMessage::for_invoice(
            &sample_settings(),
            &customer,
            &invoice,
            "a@b.com",
            Path::new("/out/ACME-Invoice-1001.pdf"),
            &stored,
        );

        let types: Vec<_> = message
            .attachments
            .iter()
            .map(|a| a.content_type.as_str())
            .collect();
        assert_eq!(
            types,
            [
                PDF_CONTENT_TYPE,
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
                "text/csv",
                "application/octet-stream",
                "application/octet-stream",
            ]
        );
        Ok(())
    }
}
