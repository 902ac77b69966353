//! Entity module - Contains all SeaORM entity definitions for the invoicing store.
//! These entities represent the database tables and their relationships.
//! Each entity has a Model struct for data and an Entity struct for operations.

pub mod attachment;
pub mod customer;
pub mod email_log;
pub mod invoice;
pub mod line_item;
pub mod settings;

// Re-export specific types to avoid conflicts
pub use attachment::{Column as AttachmentColumn, Entity as Attachment, Model as AttachmentModel};
pub use customer::{Column as CustomerColumn, Entity as Customer, Model as CustomerModel};
pub use email_log::{
    Column as EmailLogColumn, EmailStatus, Entity as EmailLog, Model as EmailLogModel,
};
pub use invoice::{Column as InvoiceColumn, Entity as Invoice, InvoiceStatus, Model as InvoiceModel};
pub use line_item::{Column as LineItemColumn, Entity as LineItem, Model as LineItemModel};
pub use settings::{Column as SettingsColumn, Entity as Settings, Model as SettingsModel};
