//! Document renderer - merges invoice data into the HTML invoice template.
//!
//! The template is looked up on a list of candidate paths (packaged layout
//! first, development layout second) and read once per render. Rendering has no
//! other side effects.
//!
//! View fields are plain strings, with `has_*` flags for optional blocks, so the
//! template never sees a null value.

/// US-dollar amount formatting
pub mod currency;

use crate::{
    entities::{customer, invoice, line_item, settings},
    errors::{Error, Result},
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub use currency::format_usd;

/// Company block of the document.
#[derive(Debug, Clone, Serialize)]
pub struct CompanyView {
    pub name: String,
    pub address: String,
    pub email: String,
    pub phone: String,
    pub has_phone: bool,
    /// Base64 PNG, empty when no logo is configured
    pub logo: String,
    pub has_logo: bool,
}

/// Recipient block of the document.
#[derive(Debug, Clone, Serialize)]
pub struct CustomerView {
    pub name: String,
    pub email: String,
    pub billing_address: String,
}

/// Invoice header fields.
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceView {
    pub number: String,
    pub issue_date: String,
    pub due_date: String,
    pub payment_terms: String,
    pub has_payment_terms: bool,
    pub notes: String,
    pub has_notes: bool,
}

/// One rendered row: raw numbers plus their currency strings.
#[derive(Debug, Clone, Serialize)]
pub struct LineItemView {
    pub product_name: String,
    pub description: String,
    pub quantity: f64,
    pub unit_price: f64,
    pub line_total: f64,
    pub unit_price_formatted: String,
    pub line_total_formatted: String,
}

/// Everything the template can reference.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentBundle {
    pub company: CompanyView,
    pub customer: CustomerView,
    pub invoice: InvoiceView,
    pub line_items: Vec<LineItemView>,
    pub subtotal: f64,
    pub total: f64,
    pub subtotal_formatted: String,
    pub total_formatted: String,
}

impl DocumentBundle {
    /// Builds the bundle from store rows. `line_items` must already be in `sort_order`.
    #[must_use]
    pub fn new(
        settings: &settings::Model,
        customer: &customer::Model,
        invoice: &invoice::Model,
        line_items: &[line_item::Model],
    ) -> Self {
        Self {
            company: CompanyView {
                name: settings.company_name.clone(),
                address: text(settings.company_address.as_deref()),
                email: settings.company_email.clone(),
                phone: text(settings.company_phone.as_deref()),
                has_phone: present(settings.company_phone.as_deref()),
                logo: text(settings.logo_base64.as_deref()),
                has_logo: present(settings.logo_base64.as_deref()),
            },
            customer: CustomerView {
                name: customer.name.clone(),
                email: customer.email.clone(),
                billing_address: text(customer.billing_address.as_deref()),
            },
            invoice: InvoiceView {
                number: invoice.invoice_number.clone(),
                issue_date: invoice.issue_date.to_string(),
                due_date: invoice.due_date.to_string(),
                payment_terms: text(invoice.payment_terms.as_deref()),
                has_payment_terms: present(invoice.payment_terms.as_deref()),
                notes: text(invoice.notes.as_deref()),
                has_notes: present(invoice.notes.as_deref()),
            },
            line_items: line_items
                .iter()
                .map(|item| LineItemView {
                    product_name: item.product_name.clone(),
                    description: text(item.description.as_deref()),
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                    line_total: item.line_total,
                    unit_price_formatted: format_usd(item.unit_price),
                    line_total_formatted: format_usd(item.line_total),
                })
                .collect(),
            subtotal: invoice.subtotal,
            total: invoice.total,
            subtotal_formatted: format_usd(invoice.subtotal),
            total_formatted: format_usd(invoice.total),
        }
    }
}

fn text(value: Option<&str>) -> String {
    value.unwrap_or_default().to_string()
}

fn present(value: Option<&str>) -> bool {
    value.is_some_and(|value| !value.trim().is_empty())
}

/// File name of the generated PDF, e.g. `ACME-Invoice-1001.pdf`.
#[must_use]
pub fn pdf_file_name(invoice_prefix: &str, invoice_number: &str) -> String {
    format!("{invoice_prefix}-Invoice-{invoice_number}.pdf")
}

/// Renders [`DocumentBundle`]s into HTML using the first template found on its search path.
#[derive(Debug, Clone)]
pub struct Renderer {
    search_paths: Vec<PathBuf>,
}

impl Renderer {
    #[must_use]
    pub const fn new(search_paths: Vec<PathBuf>) -> Self {
        Self { search_paths }
    }

    /// First existing template location.
    ///
    /// # Errors
    /// Returns [`Error::TemplateMissing`] listing every searched path if none exists.
    pub fn resolve_template(&self) -> Result<&Path> {
        self.search_paths
            .iter()
            .find(|candidate| candidate.is_file())
            .map(PathBuf::as_path)
            .ok_or_else(|| Error::TemplateMissing {
                searched: self
                    .search_paths
                    .iter()
                    .map(|path| path.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }

    /// Reads the template and renders `bundle` into an HTML string.
    pub async fn render(&self, bundle: &DocumentBundle) -> Result<String> {
        let template_path = self.resolve_template()?;
        debug!("Template path: {}", template_path.display());

        let source = tokio::fs::read_to_string(template_path).await?;
        let template = mustache::compile_str(&source).map_err(|e| Error::Template {
            message: e.to_string(),
        })?;
        let html = template
            .render_to_string(bundle)
            .map_err(|e| Error::Template {
                message: e.to_string(),
            })?;

        info!(html_length = html.len(), "Rendered invoice template");
        Ok(html)
    }
}
