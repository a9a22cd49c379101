//! Event signing and the external signer capability
//!
//! Events are signed either with the locally decrypted key or by an
//! external signer (a browser extension or platform keystore). The
//! capability is opaque: its absence or refusal is a normal, recoverable
//! condition.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::OsRng;
use rand::RngCore;
use secp256k1::schnorr;
use secp256k1::{Keypair, Secp256k1, SecretKey, Signing, Verification, XOnlyPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::AuthError;
use crate::key_derivation::DerivedSecret;

/// An unsigned event, as produced by the application
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventTemplate {
    pub kind: u32,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub created_at: i64,
}

impl EventTemplate {
    /// Convenience constructor stamping the current time
    pub fn new(kind: u32, content: impl Into<String>) -> Self {
        Self {
            kind,
            tags: Vec::new(),
            content: content.into(),
            created_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// A signed event ready for publication
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedEvent {
    pub id: String,
    pub pubkey: String,
    pub created_at: i64,
    pub kind: u32,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub sig: String,
}

/// External signer capability (e.g. a browser extension).
///
/// Treated as opaque: callers only see the two operations and a typed
/// error when the capability is missing or declines.
#[async_trait::async_trait]
pub trait ExtensionSigner: Send + Sync {
    /// The public identity the signer will sign as (npub or hex)
    async fn get_public_key(&self) -> Result<String, AuthError>;

    /// Sign an event template
    async fn sign_event(&self, template: EventTemplate) -> Result<SignedEvent, AuthError>;
}

/// Compute the canonical event id: SHA-256 over the serialized
/// `[0, pubkey, created_at, kind, tags, content]` array.
pub fn event_id(pubkey: &str, template: &EventTemplate) -> [u8; 32] {
    let canonical = serde_json::json!([
        0,
        pubkey,
        template.created_at,
        template.kind,
        template.tags,
        template.content
    ]);
    Sha256::digest(canonical.to_string().as_bytes()).into()
}

/// Sign an event with a secret scalar.
///
/// The scalar is borrowed only for the duration of the call; the caller
/// remains responsible for dropping it promptly.
pub fn sign_event<C: Signing>(
    secp: &Secp256k1<C>,
    secret: &DerivedSecret,
    template: &EventTemplate,
) -> Result<SignedEvent, AuthError> {
    let secret_key = SecretKey::from_byte_array(*secret.as_bytes())
        .map_err(|e| AuthError::Crypto(format!("invalid secret scalar: {e}")))?;
    let keypair = Keypair::from_secret_key(secp, &secret_key);
    let (x_only, _parity) = keypair.x_only_public_key();
    let pubkey = hex::encode(x_only.serialize());

    let id = event_id(&pubkey, template);
    let mut aux_rand = [0u8; 32];
    OsRng.fill_bytes(&mut aux_rand);
    let sig = secp.sign_schnorr_with_aux_rand(&id, &keypair, &aux_rand);

    Ok(SignedEvent {
        id: hex::encode(id),
        pubkey,
        created_at: template.created_at,
        kind: template.kind,
        tags: template.tags.clone(),
        content: template.content.clone(),
        sig: sig.to_string(),
    })
}

/// Verify a signed event's id and signature
pub fn verify_event<C: Verification>(
    secp: &Secp256k1<C>,
    event: &SignedEvent,
) -> Result<(), AuthError> {
    let template = EventTemplate {
        kind: event.kind,
        tags: event.tags.clone(),
        content: event.content.clone(),
        created_at: event.created_at,
    };
    let id = event_id(&event.pubkey, &template);
    if hex::encode(id) != event.id {
        return Err(AuthError::Decode("event id mismatch".to_string()));
    }

    let pubkey_bytes: [u8; 32] = hex::decode(&event.pubkey)
        .map_err(|e| AuthError::Decode(format!("invalid pubkey hex: {e}")))?
        .try_into()
        .map_err(|_| AuthError::Decode("pubkey must be 32 bytes".to_string()))?;
    let x_only = XOnlyPublicKey::from_byte_array(pubkey_bytes)
        .map_err(|e| AuthError::Decode(format!("invalid pubkey: {e}")))?;

    let sig_bytes: [u8; 64] = hex::decode(&event.sig)
        .map_err(|e| AuthError::Decode(format!("invalid signature hex: {e}")))?
        .try_into()
        .map_err(|_| AuthError::Decode("signature must be 64 bytes".to_string()))?;
    let sig = schnorr::Signature::from_byte_array(sig_bytes);

    secp.verify_schnorr(&sig, &id, &x_only)
        .map_err(|_| AuthError::Decode("signature verification failed".to_string()))
}

/// Wait for a late-injected signer capability.
///
/// Polls `probe` at increasing delays until it yields a signer, the
/// maximum wait elapses, or `cancel` fires. One resolved/not-found
/// outcome; the caller decides what absence means.
pub async fn await_signer<F>(
    probe: F,
    max_wait: Duration,
    cancel: &CancellationToken,
) -> Option<Arc<dyn ExtensionSigner>>
where
    F: Fn() -> Option<Arc<dyn ExtensionSigner>>,
{
    let start = Instant::now();
    let mut delay = Duration::from_millis(50);

    loop {
        if let Some(signer) = probe() {
            debug!("External signer available after {:?}", start.elapsed());
            return Some(signer);
        }
        if cancel.is_cancelled() || start.elapsed() + delay > max_wait {
            return None;
        }
        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(delay) => {}
        }
        delay = (delay * 2).min(Duration::from_secs(1));
    }
}
