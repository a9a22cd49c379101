//! Authentication state machine for the Lumen client
//!
//! `AuthManager` is the single surface the rest of the application talks
//! to. It owns the vault, the session cache, the persisted last-known
//! state and the current `AuthState`, and decides at any moment whether
//! the client may produce signatures. State-mutating operations serialize
//! on the state write lock; reads interleave freely.

use std::sync::Arc;
use std::time::Duration;

use sea_orm::DatabaseConnection;
use secp256k1::{All, Secp256k1};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::encoding;
use crate::error::AuthError;
use crate::key_derivation::{self, Credentials, MIN_PASSWORD_CHARS};
use crate::session::SessionCache;
use crate::settings_manager::{SettingsManager, AUTH_STATE_KEY};
use crate::signer::{self, EventTemplate, ExtensionSigner, SignedEvent};
use crate::vault::{self, KeyVault};

/// How long startup restoration waits for a late-injected extension signer
const SIGNER_RESTORE_WAIT: Duration = Duration::from_secs(3);

/// Public account information (safe to display, no secret material)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountInfo {
    pub public_identity: String,
    pub is_entrance_key: bool,
}

/// Authentication state.
///
/// The raw variant is informational; [`AuthManager::can_sign`] is the
/// predicate callers must consult before attempting to sign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuthState {
    LoggedOut,
    ExtensionSigner {
        public_identity: String,
    },
    ReadOnly {
        public_identity: String,
    },
    EncryptedKey {
        public_identity: String,
        needs_reauth: bool,
        is_entrance_key: bool,
        needs_profile_setup: bool,
    },
}

/// Authentication manager
pub struct AuthManager {
    secp: Secp256k1<All>,
    settings: SettingsManager,
    vault: KeyVault,
    session: SessionCache,
    signer: parking_lot::RwLock<Option<Arc<dyn ExtensionSigner>>>,
    state: tokio::sync::RwLock<AuthState>,
}

impl AuthManager {
    /// Create a new auth manager over the local database
    pub fn new(db: DatabaseConnection) -> Self {
        let settings = SettingsManager::new(db);
        Self {
            secp: Secp256k1::new(),
            vault: KeyVault::new(settings.clone()),
            session: SessionCache::new(settings.clone()),
            settings,
            signer: parking_lot::RwLock::new(None),
            state: tokio::sync::RwLock::new(AuthState::LoggedOut),
        }
    }

    /// Attach the external signer capability once it becomes available
    pub fn attach_extension_signer(&self, signer: Arc<dyn ExtensionSigner>) {
        *self.signer.write() = Some(signer);
    }

    /// Detach the external signer capability
    pub fn detach_extension_signer(&self) {
        *self.signer.write() = None;
    }

    /// Current state snapshot
    pub async fn state(&self) -> AuthState {
        self.state.read().await.clone()
    }

    /// Whether the client may currently produce signatures.
    ///
    /// True for an extension login, or an encrypted-key login whose trust
    /// window has not lapsed.
    pub async fn can_sign(&self) -> bool {
        matches!(
            &*self.state.read().await,
            AuthState::ExtensionSigner { .. }
                | AuthState::EncryptedKey {
                    needs_reauth: false,
                    ..
                }
        )
    }

    /// The public identity currently logged in, if any
    pub async fn public_identity(&self) -> Option<String> {
        match &*self.state.read().await {
            AuthState::LoggedOut => None,
            AuthState::ExtensionSigner { public_identity }
            | AuthState::ReadOnly { public_identity }
            | AuthState::EncryptedKey {
                public_identity, ..
            } => Some(public_identity.clone()),
        }
    }

    /// Check whether an account record exists on this device
    pub async fn has_account(&self) -> Result<bool, AuthError> {
        self.vault.has_record().await
    }

    /// Account info from the stored record, without decryption
    pub async fn account_info(&self) -> Result<Option<AccountInfo>, AuthError> {
        Ok(self.vault.load().await?.map(|record| AccountInfo {
            public_identity: record.public_identity,
            is_entrance_key: record.is_entrance_key,
        }))
    }

    /// Create a new account from credentials.
    ///
    /// Derives the signing key, encrypts it into the vault, opens a
    /// session, and lands in `EncryptedKey` ready for profile setup.
    /// Fails if an account record already exists on this device.
    pub async fn create_account(
        &self,
        credentials: Credentials,
        progress: impl Fn(u8) + Send + 'static,
    ) -> Result<AccountInfo, AuthError> {
        info!("Creating new account");
        let mut state = self.state.write().await;

        if self.vault.has_record().await? {
            return Err(AuthError::Validation(
                "an account already exists on this device".to_string(),
            ));
        }

        key_derivation::validate(&credentials)?;
        let password = credentials.password.clone();
        let secret =
            key_derivation::derive(credentials, progress, CancellationToken::new()).await?;

        let (npub, _nsec) = encoding::scalar_to_public_identity(&self.secp, &secret)?;
        let record = vault::encrypt(&secret, &password, &npub, true)?;
        self.vault.store(&record).await?;
        self.session.set(&password).await?;

        let new_state = AuthState::EncryptedKey {
            public_identity: npub.clone(),
            needs_reauth: false,
            is_entrance_key: true,
            needs_profile_setup: true,
        };
        self.persist_state(&new_state).await?;
        *state = new_state;

        info!("Account created for {}", npub);
        Ok(AccountInfo {
            public_identity: npub,
            is_entrance_key: true,
        })
    }

    /// Import an existing secret key (nsec or hex) under a new password.
    ///
    /// The imported identity is not an entrance key and needs no profile
    /// setup. Fails if an account record already exists on this device.
    pub async fn import_account(
        &self,
        encoded_secret: &str,
        password: &str,
    ) -> Result<AccountInfo, AuthError> {
        info!("Importing existing key");
        let mut state = self.state.write().await;

        if self.vault.has_record().await? {
            return Err(AuthError::Validation(
                "an account already exists on this device".to_string(),
            ));
        }
        if password.chars().count() < MIN_PASSWORD_CHARS {
            return Err(AuthError::Validation(format!(
                "password must be at least {MIN_PASSWORD_CHARS} characters"
            )));
        }

        let secret = if encoded_secret.starts_with("nsec1") {
            encoding::decode_secret(encoded_secret)?
        } else {
            encoding::secret_from_hex(encoded_secret)?
        };

        let (npub, _nsec) = encoding::scalar_to_public_identity(&self.secp, &secret)?;
        let record = vault::encrypt(&secret, password, &npub, false)?;
        self.vault.store(&record).await?;
        self.session.set(password).await?;

        let new_state = AuthState::EncryptedKey {
            public_identity: npub.clone(),
            needs_reauth: false,
            is_entrance_key: false,
            needs_profile_setup: false,
        };
        self.persist_state(&new_state).await?;
        *state = new_state;

        info!("Key imported for {}", npub);
        Ok(AccountInfo {
            public_identity: npub,
            is_entrance_key: false,
        })
    }

    /// Unlock the stored key with a password.
    ///
    /// On success the session is refreshed and signing re-enabled. On
    /// failure the state is left untouched.
    pub async fn unlock_with_password(&self, password: &str) -> Result<AccountInfo, AuthError> {
        info!("Unlocking stored key");
        let mut state = self.state.write().await;

        let record = self.vault.load().await?.ok_or(AuthError::Decrypt)?;
        let secret = vault::decrypt(&record, password)?;

        // Defense in depth: the decrypted scalar must reproduce the stored
        // identity anchor
        let (npub, _nsec) = encoding::scalar_to_public_identity(&self.secp, &secret)?;
        if npub != record.public_identity {
            warn!("Decrypted key does not match the stored identity");
            return Err(AuthError::Decrypt);
        }

        self.session.set(password).await?;

        let needs_profile_setup = matches!(
            &*state,
            AuthState::EncryptedKey {
                needs_profile_setup: true,
                ..
            }
        );
        let new_state = AuthState::EncryptedKey {
            public_identity: npub.clone(),
            needs_reauth: false,
            is_entrance_key: record.is_entrance_key,
            needs_profile_setup,
        };
        self.persist_state(&new_state).await?;
        *state = new_state;

        info!("Unlocked {}", npub);
        Ok(AccountInfo {
            public_identity: npub,
            is_entrance_key: record.is_entrance_key,
        })
    }

    /// Restore authentication state at process start.
    ///
    /// An encrypted-key login whose session window has lapsed comes back
    /// as `needs_reauth: true`: the identity is browsable but signing
    /// stays disabled until [`Self::unlock_with_password`] succeeds.
    pub async fn restore_on_startup(&self) -> Result<AuthState, AuthError> {
        debug!("Restoring authentication state");
        let mut state = self.state.write().await;

        let restored = match self.load_persisted_state().await? {
            None | Some(AuthState::LoggedOut) => AuthState::LoggedOut,
            Some(AuthState::ReadOnly { public_identity }) => {
                AuthState::ReadOnly { public_identity }
            }
            Some(AuthState::ExtensionSigner { public_identity }) => {
                let found = signer::await_signer(
                    || self.signer.read().clone(),
                    SIGNER_RESTORE_WAIT,
                    &CancellationToken::new(),
                )
                .await;
                match found {
                    Some(_) => AuthState::ExtensionSigner { public_identity },
                    None => {
                        warn!("Extension signer not available, logging out");
                        AuthState::LoggedOut
                    }
                }
            }
            Some(AuthState::EncryptedKey {
                public_identity,
                is_entrance_key,
                needs_profile_setup,
                ..
            }) => {
                if !self.vault.has_record().await? {
                    warn!("Stored state references a missing vault record");
                    AuthState::LoggedOut
                } else {
                    // The session cache is the only thing that can spare a
                    // password prompt; it is never proof by itself
                    let needs_reauth = self.session.get().await?.is_none();
                    AuthState::EncryptedKey {
                        public_identity,
                        needs_reauth,
                        is_entrance_key,
                        needs_profile_setup,
                    }
                }
            }
        };

        *state = restored.clone();
        Ok(restored)
    }

    /// Log in through the external signer capability; the vault is never
    /// touched on this path.
    pub async fn login_with_extension(&self) -> Result<AccountInfo, AuthError> {
        info!("Logging in with extension signer");
        let mut state = self.state.write().await;

        let signer = self.signer.read().clone().ok_or_else(|| {
            AuthError::ExternalSigner("no extension signer attached".to_string())
        })?;
        let public_identity = signer.get_public_key().await?;
        let npub = encoding::to_npub(&public_identity)?;

        let new_state = AuthState::ExtensionSigner {
            public_identity: npub.clone(),
        };
        self.persist_state(&new_state).await?;
        *state = new_state;

        info!("Extension login as {}", npub);
        Ok(AccountInfo {
            public_identity: npub,
            is_entrance_key: false,
        })
    }

    /// Log in with a public identity only; browsing works, signing never
    /// does.
    pub async fn login_read_only(&self, public_identity: &str) -> Result<AccountInfo, AuthError> {
        info!("Logging in read-only");
        let mut state = self.state.write().await;

        let npub = encoding::to_npub(public_identity)?;
        let new_state = AuthState::ReadOnly {
            public_identity: npub.clone(),
        };
        self.persist_state(&new_state).await?;
        *state = new_state;

        Ok(AccountInfo {
            public_identity: npub,
            is_entrance_key: false,
        })
    }

    /// Log out, keeping the vault record.
    ///
    /// A later [`Self::unlock_with_password`] restores the account without
    /// re-deriving anything.
    pub async fn logout(&self) -> Result<(), AuthError> {
        info!("Logging out");
        let mut state = self.state.write().await;

        self.session.clear().await?;
        self.settings.remove(AUTH_STATE_KEY).await?;
        *state = AuthState::LoggedOut;
        Ok(())
    }

    /// Delete the account: session, persisted state and vault record.
    /// Irreversible.
    pub async fn delete_account(&self) -> Result<(), AuthError> {
        info!("Deleting account");
        let mut state = self.state.write().await;

        self.session.clear().await?;
        self.vault.clear().await?;
        self.settings.remove(AUTH_STATE_KEY).await?;
        *state = AuthState::LoggedOut;

        info!("Account deleted");
        Ok(())
    }

    /// Mark onboarding profile setup as done
    pub async fn complete_profile_setup(&self) -> Result<(), AuthError> {
        let mut state = self.state.write().await;

        if let AuthState::EncryptedKey {
            needs_profile_setup,
            ..
        } = &mut *state
        {
            *needs_profile_setup = false;
            let snapshot = state.clone();
            self.persist_state(&snapshot).await?;
        }
        Ok(())
    }

    /// Sign an event on behalf of the current login.
    ///
    /// Routes to the extension signer or to the vault-unlock path. The
    /// decrypted scalar lives only for the duration of this call.
    pub async fn sign_event(&self, template: EventTemplate) -> Result<SignedEvent, AuthError> {
        let snapshot = self.state.read().await.clone();

        match snapshot {
            AuthState::ExtensionSigner { .. } => {
                let signer = self.signer.read().clone().ok_or_else(|| {
                    AuthError::ExternalSigner("extension signer no longer attached".to_string())
                })?;
                signer.sign_event(template).await
            }
            AuthState::EncryptedKey {
                needs_reauth: false,
                ..
            } => {
                let Some(password) = self.session.get().await? else {
                    // The trust window lapsed since the state was computed
                    warn!("Session expired, re-authentication required");
                    self.mark_needs_reauth().await?;
                    return Err(AuthError::NotAuthorized);
                };

                let record = self.vault.load().await?.ok_or(AuthError::Decrypt)?;
                let secret = vault::decrypt(&record, &password)?;
                signer::sign_event(&self.secp, &secret, &template)
            }
            _ => Err(AuthError::NotAuthorized),
        }
    }

    async fn mark_needs_reauth(&self) -> Result<(), AuthError> {
        let mut state = self.state.write().await;
        if let AuthState::EncryptedKey { needs_reauth, .. } = &mut *state {
            *needs_reauth = true;
            let snapshot = state.clone();
            self.persist_state(&snapshot).await?;
        }
        Ok(())
    }

    async fn persist_state(&self, state: &AuthState) -> Result<(), AuthError> {
        let raw = serde_json::to_string(state)
            .map_err(|e| AuthError::Internal(format!("failed to serialize auth state: {e}")))?;
        self.settings.set(AUTH_STATE_KEY, &raw).await?;
        Ok(())
    }

    async fn load_persisted_state(&self) -> Result<Option<AuthState>, AuthError> {
        let Some(raw) = self.settings.get(AUTH_STATE_KEY).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                warn!("Discarding unreadable auth state: {}", e);
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_state_serde_round_trip() {
        let states = [
            AuthState::LoggedOut,
            AuthState::ReadOnly {
                public_identity: "npub1example".to_string(),
            },
            AuthState::ExtensionSigner {
                public_identity: "npub1example".to_string(),
            },
            AuthState::EncryptedKey {
                public_identity: "npub1example".to_string(),
                needs_reauth: true,
                is_entrance_key: true,
                needs_profile_setup: false,
            },
        ];
        for state in states {
            let raw = serde_json::to_string(&state).unwrap();
            let back: AuthState = serde_json::from_str(&raw).unwrap();
            assert_eq!(state, back);
        }
    }
}
