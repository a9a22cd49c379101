//! Identity, key custody and authentication for Lumen
//!
//! This crate provides the account subsystem for the Lumen client:
//! - Deterministic signing-key derivation from an account name, password
//!   and extra secret
//! - Encrypted storage of the derived key, unlocked by the password
//! - A session password cache with a bounded trust window
//! - The authentication state machine the rest of the client consults
//!   before attempting to sign

pub mod auth_manager;
pub mod encoding;
pub mod entities;
pub mod error;
pub mod key_derivation;
pub mod migration;
pub mod normalize;
pub mod session;
pub mod settings_manager;
pub mod signer;
pub mod vault;

pub use auth_manager::{AccountInfo, AuthManager, AuthState};
pub use error::AuthError;
pub use key_derivation::{Credentials, DerivedSecret};
pub use session::SessionCache;
pub use settings_manager::SettingsManager;
pub use signer::{EventTemplate, ExtensionSigner, SignedEvent};
pub use vault::{EncryptedVaultRecord, KeyVault};
