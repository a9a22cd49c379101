//! Encrypted storage of the account secret key
//!
//! The derived secret is kept on disk only inside an authenticated-encrypted
//! record, unlocked by the account password. A missing record means "logged
//! out"; a corrupt record is treated the same rather than crashing. The
//! record is the sole durable owner of key material.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chacha20poly1305::aead::Aead;
use chacha20poly1305::{ChaCha20Poly1305, Key, KeyInit, Nonce};
use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{info, warn};
use zeroize::Zeroize;

use crate::error::AuthError;
use crate::key_derivation::DerivedSecret;
use crate::settings_manager::{SettingsManager, VAULT_KEY};

/// PBKDF2-HMAC-SHA-256 iteration count for the vault key
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Salt length in bytes
pub const SALT_LEN: usize = 16;

/// ChaCha20-Poly1305 nonce length in bytes
pub const NONCE_LEN: usize = 12;

/// Persisted vault record.
///
/// `ciphertext` carries the Poly1305 tag. `public_identity` is the
/// verification anchor: after decryption, re-deriving the public identity
/// from the plaintext secret must reproduce it, or the record is rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedVaultRecord {
    pub ciphertext: String,
    pub iv: String,
    pub salt: String,
    #[serde(rename = "publicIdentity")]
    pub public_identity: String,
    #[serde(rename = "isEntranceKey")]
    pub is_entrance_key: bool,
}

/// Encrypt a secret scalar under a password.
///
/// Salt and nonce are freshly random on every call and never reused.
pub fn encrypt(
    secret: &DerivedSecret,
    password: &str,
    public_identity: &str,
    is_entrance_key: bool,
) -> Result<EncryptedVaultRecord, AuthError> {
    let salt: [u8; SALT_LEN] = random_bytes();
    let nonce: [u8; NONCE_LEN] = random_bytes();

    let mut key = derive_vault_key(password, &salt);
    let cipher = ChaCha20Poly1305::new(&Key::from(key));
    key.zeroize();

    let ciphertext = cipher
        .encrypt(&Nonce::from(nonce), secret.as_bytes().as_slice())
        .map_err(|_| AuthError::Crypto("failed to encrypt secret key".to_string()))?;

    Ok(EncryptedVaultRecord {
        ciphertext: BASE64.encode(&ciphertext),
        iv: BASE64.encode(nonce),
        salt: BASE64.encode(salt),
        public_identity: public_identity.to_string(),
        is_entrance_key,
    })
}

/// Decrypt a vault record with a password.
///
/// A wrong password and a tampered record are indistinguishable by design:
/// both surface as `AuthError::Decrypt`, never as altered plaintext.
pub fn decrypt(record: &EncryptedVaultRecord, password: &str) -> Result<DerivedSecret, AuthError> {
    let salt: [u8; SALT_LEN] = decode_field(&record.salt)?;
    let nonce: [u8; NONCE_LEN] = decode_field(&record.iv)?;
    let ciphertext = BASE64
        .decode(&record.ciphertext)
        .map_err(|_| AuthError::Decrypt)?;

    let mut key = derive_vault_key(password, &salt);
    let cipher = ChaCha20Poly1305::new(&Key::from(key));
    key.zeroize();

    let mut plaintext = cipher
        .decrypt(&Nonce::from(nonce), ciphertext.as_slice())
        .map_err(|_| AuthError::Decrypt)?;

    if plaintext.len() != 32 {
        plaintext.zeroize();
        return Err(AuthError::Decrypt);
    }

    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&plaintext);
    plaintext.zeroize();
    Ok(DerivedSecret::from_bytes(bytes))
}

fn derive_vault_key(password: &str, salt: &[u8]) -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key);
    key
}

fn decode_field<const N: usize>(encoded: &str) -> Result<[u8; N], AuthError> {
    let raw = BASE64.decode(encoded).map_err(|_| AuthError::Decrypt)?;
    raw.try_into().map_err(|_| AuthError::Decrypt)
}

/// Generate cryptographically secure random bytes
fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Durable face of the vault: one record per device profile, stored under a
/// dedicated settings key and replaced wholesale on every write.
pub struct KeyVault {
    settings: SettingsManager,
}

impl KeyVault {
    /// Create a new vault over the settings store
    pub fn new(settings: SettingsManager) -> Self {
        Self { settings }
    }

    /// Persist a record, replacing any prior one
    pub async fn store(&self, record: &EncryptedVaultRecord) -> Result<(), AuthError> {
        let raw = serde_json::to_string(record)
            .map_err(|e| AuthError::Internal(format!("failed to serialize vault record: {e}")))?;
        self.settings.set(VAULT_KEY, &raw).await?;
        info!("Vault record stored for {}", record.public_identity);
        Ok(())
    }

    /// Load the stored record.
    ///
    /// A missing record and an unreadable one both come back as `None`;
    /// neither is an error condition for callers.
    pub async fn load(&self) -> Result<Option<EncryptedVaultRecord>, AuthError> {
        let Some(raw) = self.settings.get(VAULT_KEY).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!("Discarding unreadable vault record: {}", e);
                Ok(None)
            }
        }
    }

    /// Check whether a readable record exists
    pub async fn has_record(&self) -> Result<bool, AuthError> {
        Ok(self.load().await?.is_some())
    }

    /// Read the stored public identity without decrypting anything
    pub async fn peek_public_identity(&self) -> Result<Option<String>, AuthError> {
        Ok(self.load().await?.map(|record| record.public_identity))
    }

    /// Irreversibly delete the record
    pub async fn clear(&self) -> Result<(), AuthError> {
        self.settings.remove(VAULT_KEY).await?;
        info!("Vault record cleared");
        Ok(())
    }
}
