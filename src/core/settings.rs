//! Company and SMTP settings - the singleton row with id 1.

use crate::{
    entities::{Settings, settings},
    errors::Result,
};
use sea_orm::prelude::*;
use tracing::{debug, instrument};

/// Reads the settings row, or `None` if the application was never configured.
pub async fn get_settings(db: &DatabaseConnection) -> Result<Option<settings::Model>> {
    Settings::find_by_id(settings::SETTINGS_ID)
        .one(db)
        .await
        .map_err(Into::into)
}

/// Writes the settings row, creating it on first save.
///
/// The `id` of the passed model is ignored; the row is always id 1.
#[instrument(skip_all)]
pub async fn save_settings(
    db: &DatabaseConnection,
    mut values: settings::Model,
) -> Result<settings::Model> {
    values.id = settings::SETTINGS_ID;
    values.updated_at = chrono::Utc::now();

    let existing = get_settings(db).await?;
    // Mark every column dirty so the full row is written.
    let active = settings::ActiveModel::from(values).reset_all();
    if existing.is_some() {
        debug!("Updating existing settings row");
        active.update(db).await.map_err(Into::into)
    } else {
        debug!("Inserting settings row");
        active.insert(db).await.map_err(Into::into)
    }
}
