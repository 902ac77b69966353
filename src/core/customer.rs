//! Customer lookups and creation.

use crate::{
    entities::{Customer, customer},
    errors::{Error, Result},
};
use sea_orm::{Set, prelude::*};

/// Retrieves a customer by its unique ID.
pub async fn get_customer_by_id(
    db: &DatabaseConnection,
    customer_id: i64,
) -> Result<Option<customer::Model>> {
    Customer::find_by_id(customer_id)
        .one(db)
        .await
        .map_err(Into::into)
}

/// Creates a customer. The name is trimmed and must not be empty.
///
/// An empty email is accepted here; the send pipeline refuses to mail such a
/// customer unless the request names a recipient explicitly.
pub async fn create_customer(
    db: &DatabaseConnection,
    name: String,
    email: String,
    billing_address: Option<String>,
) -> Result<customer::Model> {
    if name.trim().is_empty() {
        return Err(Error::Config {
            message: "Customer name cannot be empty".to_string(),
        });
    }

    let now = chrono::Utc::now();
    let customer = customer::ActiveModel {
        name: Set(name.trim().to_string()),
        email: Set(email.trim().to_string()),
        billing_address: Set(billing_address),
        phone: Set(None),
        notes: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };
    customer.insert(db).await.map_err(Into::into)
}
