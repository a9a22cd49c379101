//! Textual encodings for keys
//!
//! Public identities travel as bech32 `npub1…` strings and secret keys as
//! `nsec1…`, the formats the wider network expects. Both are checksummed and
//! reversible; decoding rejects anything that is not exactly a 32-byte
//! payload under the expected prefix.

use bech32::{Bech32, Hrp};
use secp256k1::{PublicKey, Secp256k1, SecretKey, Signing, XOnlyPublicKey};

use crate::error::AuthError;
use crate::key_derivation::DerivedSecret;

/// Human-readable part for public identities
pub const PUBLIC_HRP: &str = "npub";

/// Human-readable part for secret keys
pub const SECRET_HRP: &str = "nsec";

/// Compute the public identity for a secret scalar.
///
/// Returns the `npub` display handle (the x-only public key of
/// `secret · G`) and the reversible `nsec` encoding of the scalar itself.
pub fn scalar_to_public_identity<C: Signing>(
    secp: &Secp256k1<C>,
    secret: &DerivedSecret,
) -> Result<(String, String), AuthError> {
    let secret_key = SecretKey::from_byte_array(*secret.as_bytes())
        .map_err(|e| AuthError::Crypto(format!("invalid secret scalar: {e}")))?;
    let public_key = PublicKey::from_secret_key(secp, &secret_key);
    let (x_only, _parity) = public_key.x_only_public_key();

    let npub = encode(PUBLIC_HRP, &x_only.serialize())?;
    let nsec = encode(SECRET_HRP, secret.as_bytes())?;
    Ok((npub, nsec))
}

/// Decode an `nsec` string back into the secret scalar.
pub fn decode_secret(encoded: &str) -> Result<DerivedSecret, AuthError> {
    let bytes = decode(SECRET_HRP, encoded)?;
    SecretKey::from_byte_array(bytes)
        .map_err(|e| AuthError::Decode(format!("not a valid secret key: {e}")))?;
    Ok(DerivedSecret::from_bytes(bytes))
}

/// Decode an `npub` string into the 32-byte x-only public key.
pub fn decode_public_identity(encoded: &str) -> Result<[u8; 32], AuthError> {
    let bytes = decode(PUBLIC_HRP, encoded)?;
    XOnlyPublicKey::from_byte_array(bytes)
        .map_err(|e| AuthError::Decode(format!("not a valid public key: {e}")))?;
    Ok(bytes)
}

/// Parse a secret key from its 64-character hex form.
///
/// Accepted alongside `nsec` on the import path.
pub fn secret_from_hex(encoded: &str) -> Result<DerivedSecret, AuthError> {
    let bytes = bytes_from_hex(encoded)?;
    SecretKey::from_byte_array(bytes)
        .map_err(|e| AuthError::Decode(format!("not a valid secret key: {e}")))?;
    Ok(DerivedSecret::from_bytes(bytes))
}

/// Normalize a caller-supplied public identity to its `npub` form.
///
/// Accepts an `npub1…` string or the 64-character hex x-only key.
pub fn to_npub(input: &str) -> Result<String, AuthError> {
    if input.starts_with("npub1") {
        decode_public_identity(input)?;
        return Ok(input.to_string());
    }
    let bytes = bytes_from_hex(input)?;
    XOnlyPublicKey::from_byte_array(bytes)
        .map_err(|e| AuthError::Decode(format!("not a valid public key: {e}")))?;
    encode(PUBLIC_HRP, &bytes)
}

fn encode(hrp: &str, data: &[u8; 32]) -> Result<String, AuthError> {
    let hrp = Hrp::parse(hrp).map_err(|e| AuthError::Decode(e.to_string()))?;
    bech32::encode::<Bech32>(hrp, data).map_err(|e| AuthError::Decode(e.to_string()))
}

fn decode(expected_hrp: &str, encoded: &str) -> Result<[u8; 32], AuthError> {
    let (hrp, data) = bech32::decode(encoded)
        .map_err(|e| AuthError::Decode(format!("invalid bech32: {e}")))?;
    if hrp.as_str() != expected_hrp {
        return Err(AuthError::Decode(format!(
            "unexpected prefix '{hrp}', expected '{expected_hrp}'"
        )));
    }
    let bytes: [u8; 32] = data
        .try_into()
        .map_err(|_| AuthError::Decode("payload must be exactly 32 bytes".to_string()))?;
    Ok(bytes)
}

fn bytes_from_hex(encoded: &str) -> Result<[u8; 32], AuthError> {
    let raw = hex::decode(encoded).map_err(|e| AuthError::Decode(format!("invalid hex: {e}")))?;
    raw.try_into()
        .map_err(|_| AuthError::Decode("key must be exactly 32 bytes".to_string()))
}
