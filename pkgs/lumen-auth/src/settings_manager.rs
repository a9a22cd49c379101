//! Settings manager for the subsystem's persisted slots
//!
//! A thin string key → string value facade over the local database. The
//! identity subsystem owns exactly three slots, each under its own key, so
//! an operation on one can never clobber another.

use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, NotSet, QueryFilter, Set,
};
use tracing::{debug, info};

use crate::entities::settings;

/// Key for the encrypted vault record
pub const VAULT_KEY: &str = "lumen.vault";

/// Key for the session password token
pub const SESSION_KEY: &str = "lumen.session";

/// Key for the last known authentication state
pub const AUTH_STATE_KEY: &str = "lumen.auth_state";

/// Settings manager for storing and retrieving persisted slots
#[derive(Clone)]
pub struct SettingsManager {
    db: DatabaseConnection,
}

impl SettingsManager {
    /// Create a new settings manager
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Get a value by key
    pub async fn get(&self, key: &str) -> Result<Option<String>, DbErr> {
        debug!("Getting setting: {}", key);

        let result = settings::Entity::find()
            .filter(settings::Column::Key.eq(key))
            .one(&self.db)
            .await?;

        Ok(result.map(|model| model.value))
    }

    /// Set a value, replacing any previous value under the same key
    pub async fn set(&self, key: &str, value: &str) -> Result<(), DbErr> {
        debug!("Setting key: {}", key);

        let now = chrono::Utc::now().timestamp_millis();

        let existing = settings::Entity::find()
            .filter(settings::Column::Key.eq(key))
            .one(&self.db)
            .await?;

        if let Some(model) = existing {
            let mut active_model: settings::ActiveModel = model.into();
            active_model.value = Set(value.to_string());
            active_model.updated_at = Set(now);
            active_model.update(&self.db).await?;
        } else {
            let new_setting = settings::ActiveModel {
                id: NotSet,
                key: Set(key.to_string()),
                value: Set(value.to_string()),
                updated_at: Set(now),
            };
            new_setting.insert(&self.db).await?;
        }

        info!("Setting '{}' updated", key);
        Ok(())
    }

    /// Remove a key and its value
    pub async fn remove(&self, key: &str) -> Result<bool, DbErr> {
        debug!("Removing setting: {}", key);

        let result = settings::Entity::delete_many()
            .filter(settings::Column::Key.eq(key))
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected > 0)
    }

    /// Check whether a key is present
    pub async fn exists(&self, key: &str) -> Result<bool, DbErr> {
        let result = settings::Entity::find()
            .filter(settings::Column::Key.eq(key))
            .one(&self.db)
            .await?;

        Ok(result.is_some())
    }
}
