//! Deterministic derivation of the account signing key
//!
//! The signing key is never chosen at random: it is recomputed from the
//! account name, password and extra secret, so the same credentials restore
//! the same identity on any device. The derivation is fixed bit-for-bit —
//! salt construction, Argon2id parameters and the scalar reduction formula
//! must not change, or existing accounts become unreachable.

use argon2::{Algorithm, Argon2, Params, Version};
use num_bigint::BigUint;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::AuthError;
use crate::normalize;

/// Protocol version tag mixed into the salt and input key material.
pub const DERIVATION_CONTEXT: &str = "nostr-login-v1";

/// Argon2id memory cost in KiB (64 MiB)
pub const ARGON2_MEMORY_KIB: u32 = 65536;

/// Argon2id iteration count
pub const ARGON2_ITERATIONS: u32 = 2;

/// Argon2id lanes
pub const ARGON2_PARALLELISM: u32 = 1;

/// Minimum password length in Unicode scalar values
pub const MIN_PASSWORD_CHARS: usize = 8;

/// Minimum extra-secret length in Unicode scalar values
pub const MIN_EXTRA_SECRET_CHARS: usize = 4;

/// secp256k1 group order `n`, big-endian
const CURVE_ORDER: [u8; 32] = [
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xfe, 0xba, 0xae, 0xdc, 0xe6, 0xaf, 0x48, 0xa0, 0x3b, 0xbf, 0xd2, 0x5e, 0x8c, 0xd0, 0x36,
    0x41, 0x41,
];

/// The three secrets a user types to create or restore an account.
///
/// Never persisted and never logged. Wiped from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    pub account_name: String,
    pub password: String,
    pub extra_secret: String,
}

/// A 32-byte secp256k1 secret scalar in `[1, n-1]`, big-endian.
///
/// Wiped from memory on drop. Owned by the operation that produced it;
/// must not be aliased into long-lived state.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct DerivedSecret([u8; 32]);

impl DerivedSecret {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for DerivedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material
        f.write_str("DerivedSecret(..)")
    }
}

/// Check credential shape before any expensive work.
///
/// Lengths are measured in Unicode scalar values, not bytes.
pub fn validate(credentials: &Credentials) -> Result<(), AuthError> {
    if normalize::normalize_account_name(&credentials.account_name).is_empty() {
        return Err(AuthError::Validation(
            "account name must not be empty".to_string(),
        ));
    }
    if credentials.password.chars().count() < MIN_PASSWORD_CHARS {
        return Err(AuthError::Validation(format!(
            "password must be at least {MIN_PASSWORD_CHARS} characters"
        )));
    }
    if credentials.extra_secret.chars().count() < MIN_EXTRA_SECRET_CHARS {
        return Err(AuthError::Validation(format!(
            "extra secret must be at least {MIN_EXTRA_SECRET_CHARS} characters"
        )));
    }
    Ok(())
}

/// Derive the account secret scalar from credentials.
///
/// Synchronous and CPU/memory-heavy (Argon2id with a 64 MiB working set);
/// callers on an async runtime should go through [`derive`] instead. The
/// progress callback receives coarse, monotonically increasing values and
/// is advisory only.
pub fn derive_secret(
    credentials: &Credentials,
    mut progress: impl FnMut(u8),
) -> Result<DerivedSecret, AuthError> {
    validate(credentials)?;
    progress(10);

    let name = normalize::normalize_account_name(&credentials.account_name);
    let extra = normalize::normalize_extra_secret(&credentials.extra_secret);

    let salt = Sha256::digest(format!("salt:{DERIVATION_CONTEXT}:{name}"));
    progress(20);

    let mut ikm = format!(
        "ikm:{DERIVATION_CONTEXT}:{name}:{}:{extra}",
        credentials.password
    );
    progress(30);

    let params = Params::new(
        ARGON2_MEMORY_KIB,
        ARGON2_ITERATIONS,
        ARGON2_PARALLELISM,
        Some(32),
    )
    .map_err(|e| AuthError::Crypto(format!("invalid Argon2 params: {e}")))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut k0 = [0u8; 32];
    argon2
        .hash_password_into(ikm.as_bytes(), salt.as_slice(), &mut k0)
        .map_err(|e| AuthError::Crypto(format!("key derivation failed: {e}")))?;
    ikm.zeroize();
    progress(80);

    let secret = reduce_to_scalar(&k0);
    k0.zeroize();
    progress(100);

    Ok(secret)
}

/// Derive the account secret scalar without blocking the async runtime.
///
/// The Argon2id step runs on the blocking thread pool. Cancellation is
/// cooperative: once hashing has started it runs to completion, but the
/// result is discarded and `AuthError::Cancelled` returned.
pub async fn derive(
    credentials: Credentials,
    progress: impl Fn(u8) + Send + 'static,
    cancel: CancellationToken,
) -> Result<DerivedSecret, AuthError> {
    validate(&credentials)?;

    let handle = tokio::task::spawn_blocking(move || derive_secret(&credentials, progress));

    tokio::select! {
        _ = cancel.cancelled() => Err(AuthError::Cancelled),
        joined = handle => {
            joined.map_err(|e| AuthError::Internal(format!("derivation task failed: {e}")))?
        }
    }
}

/// Map a uniform 256-bit hash into the valid scalar range `[1, n-1]`.
///
/// The formula `(k0 mod (n - 1)) + 1` is part of the derivation contract:
/// previously derived identities depend on it, so it must not be replaced
/// with rejection sampling even though the modulo introduces a negligible
/// bias.
fn reduce_to_scalar(k0: &[u8; 32]) -> DerivedSecret {
    let n_minus_1 = BigUint::from_bytes_be(&CURVE_ORDER) - 1u8;
    let k = BigUint::from_bytes_be(k0) % &n_minus_1 + 1u8;

    let bytes = k.to_bytes_be();
    let mut out = [0u8; 32];
    out[32 - bytes.len()..].copy_from_slice(&bytes);
    DerivedSecret(out)
}
