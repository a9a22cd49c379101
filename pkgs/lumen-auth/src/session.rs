//! Session password cache
//!
//! Remembers the vault password for a bounded window so the user is not
//! prompted on every signature. The cache is purely an ergonomics layer:
//! losing it never loses the key, it only forces a re-prompt. An expired
//! token is treated exactly like an absent one and purged on sight.

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::AuthError;
use crate::settings_manager::{SettingsManager, SESSION_KEY};

/// How long a cached password stays trusted (3 days, in milliseconds)
pub const SESSION_TTL_MILLIS: i64 = 3 * 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionToken {
    password: String,
    expiry: i64,
}

/// In-memory password copy plus its persisted mirror.
///
/// The persisted pair lives in its own settings slot, distinct from the
/// vault record; it is a cache, never a substitute for proof.
pub struct SessionCache {
    settings: SettingsManager,
    cached: RwLock<Option<SessionToken>>,
}

impl SessionCache {
    /// Create a new session cache over the settings store
    pub fn new(settings: SettingsManager) -> Self {
        Self {
            settings,
            cached: RwLock::new(None),
        }
    }

    /// Return the cached password, or `None` if absent or expired.
    ///
    /// An expired or unreadable token is purged from both copies.
    pub async fn get(&self) -> Result<Option<String>, AuthError> {
        let token = match self.cached.read().await.clone() {
            Some(token) => Some(token),
            None => self.load_persisted().await?,
        };

        let Some(token) = token else {
            return Ok(None);
        };

        if chrono::Utc::now().timestamp_millis() > token.expiry {
            debug!("Session token expired, purging");
            self.clear().await?;
            return Ok(None);
        }

        *self.cached.write().await = Some(token.clone());
        Ok(Some(token.password))
    }

    /// Cache a password with a freshly computed expiry
    pub async fn set(&self, password: &str) -> Result<(), AuthError> {
        let token = SessionToken {
            password: password.to_string(),
            expiry: chrono::Utc::now().timestamp_millis() + SESSION_TTL_MILLIS,
        };
        let raw = serde_json::to_string(&token)
            .map_err(|e| AuthError::Internal(format!("failed to serialize session token: {e}")))?;
        self.settings.set(SESSION_KEY, &raw).await?;
        *self.cached.write().await = Some(token);
        debug!("Session token refreshed");
        Ok(())
    }

    /// Remove both the in-memory and the persisted copy
    pub async fn clear(&self) -> Result<(), AuthError> {
        *self.cached.write().await = None;
        self.settings.remove(SESSION_KEY).await?;
        Ok(())
    }

    async fn load_persisted(&self) -> Result<Option<SessionToken>, AuthError> {
        let Some(raw) = self.settings.get(SESSION_KEY).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(token) => Ok(Some(token)),
            Err(e) => {
                warn!("Discarding unreadable session token: {}", e);
                self.settings.remove(SESSION_KEY).await?;
                Ok(None)
            }
        }
    }
}
