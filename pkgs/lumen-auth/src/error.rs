//! Error types for the authentication subsystem

/// Errors surfaced by the identity and key-custody operations.
///
/// `Decrypt` deliberately carries a single message for both wrong-password
/// and corrupted-record failures so callers cannot turn it into an oracle.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid credentials: {0}")]
    Validation(String),

    #[error("invalid password or no saved account")]
    Decrypt,

    #[error("malformed key encoding: {0}")]
    Decode(String),

    #[error("not authorized to sign")]
    NotAuthorized,

    #[error("external signer unavailable: {0}")]
    ExternalSigner(String),

    #[error("storage error")]
    Storage(#[from] sea_orm::DbErr),

    #[error("cryptographic failure: {0}")]
    Crypto(String),

    #[error("derivation cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}
