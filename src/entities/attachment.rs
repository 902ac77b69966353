//! Attachment entity - A user-supplied file mailed alongside the invoice PDF.
//!
//! `filename` is the name the file was stored under, `original_filename` is
//! what the recipient sees.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Stored attachment database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "invoice_attachments")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub invoice_id: i64,
    /// Name on disk (`{invoice_id}_{millis}{ext}`)
    pub filename: String,
    /// Name shown to users and used in the outgoing mail
    pub original_filename: String,
    /// Absolute location of the stored copy
    pub file_path: String,
    pub file_size: i64,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::invoice::Entity",
        from = "Column::InvoiceId",
        to = "super::invoice::Column::Id"
    )]
    Invoice,
}

impl Related<super::invoice::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Invoice.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
