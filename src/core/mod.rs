//! Store operations used by the send pipeline.
//!
//! These are the only functions that touch the database. Each takes a
//! `DatabaseConnection` and returns plain entity models, so the pipeline never
//! builds queries itself.

/// Stored file attachments: upload, list, delete
pub mod attachment;
/// Customer lookups
pub mod customer;
/// Append-only send audit trail
pub mod email_log;
/// Invoices, their line items and the post-send status transition
pub mod invoice;
/// Company identity and SMTP settings singleton
pub mod settings;
