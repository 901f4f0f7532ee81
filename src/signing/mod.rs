//! Signing-and-provenance layer (spec §4.4).
//!
//! Binds a memory envelope to a stable agent DID via an Ed25519 signature
//! over a canonical payload. The keypair itself lives behind
//! [`crate::secrets`]; this module only ever sees it through the `Signer`
//! trait, so the HTTP/worker layers never touch key material directly.

mod didkey;

pub use didkey::did_from_verifying_key;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier, VerifyingKey};
use tokio::sync::RwLock;

use crate::error::SigningError;

/// Collaborator seam for attaching/verifying signatures. A null
/// implementation (no keypair configured) is the default; `Ed25519Signer`
/// is substituted once a keypair is loaded from `.secrets/secrets.enc`.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Sign `canonical` and return `(base64_signature, signer_did)`.
    async fn sign(&self, canonical: &str) -> Result<(String, String), SigningError>;

    /// The signer's own DID, if a keypair is configured.
    async fn did(&self) -> Option<String>;
}

/// No keypair configured: every `remember` call proceeds unsigned.
pub struct NullSigner;

#[async_trait]
impl Signer for NullSigner {
    async fn sign(&self, _canonical: &str) -> Result<(String, String), SigningError> {
        Err(SigningError::NoKeypair)
    }

    async fn did(&self) -> Option<String> {
        None
    }
}

/// Caches the signing key's presence and derived DID for the process
/// lifetime (spec §9: "caches ... carry explicit TTLs"); the keypair itself
/// never changes once loaded, so only the initial load is ever retried.
pub struct Ed25519Signer {
    signing_key: SigningKey,
    did: String,
    presence_cache: RwLock<Option<(bool, Instant)>>,
}

const PRESENCE_CACHE_TTL: Duration = Duration::from_secs(60);

impl Ed25519Signer {
    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        let did = did_from_verifying_key(&signing_key.verifying_key());
        Self {
            signing_key,
            did,
            presence_cache: RwLock::new(None),
        }
    }

    async fn is_present(&self) -> bool {
        {
            let cache = self.presence_cache.read().await;
            if let Some((present, at)) = *cache {
                if at.elapsed() < PRESENCE_CACHE_TTL {
                    return present;
                }
            }
        }
        let mut cache = self.presence_cache.write().await;
        *cache = Some((true, Instant::now()));
        true
    }
}

#[async_trait]
impl Signer for Ed25519Signer {
    async fn sign(&self, canonical: &str) -> Result<(String, String), SigningError> {
        if !self.is_present().await {
            return Err(SigningError::NoKeypair);
        }
        let signature: Signature = self.signing_key.sign(canonical.as_bytes());
        let encoded = base64::engine::general_purpose::STANDARD.encode(signature.to_bytes());
        Ok((encoded, self.did.clone()))
    }

    async fn did(&self) -> Option<String> {
        Some(self.did.clone())
    }
}

/// Build the v2 canonical payload (spec §4.4): `id|content_hash|created_at|signer_did`.
/// Rejects any field containing the `|` separator.
pub fn canonical_payload_v2(id: &str, content_hash: &str, created_at: &str, signer_did: &str) -> Result<String, SigningError> {
    reject_pipe("id", id)?;
    reject_pipe("content_hash", content_hash)?;
    reject_pipe("created_at", created_at)?;
    reject_pipe("signer_did", signer_did)?;
    Ok(format!("{id}|{content_hash}|{created_at}|{signer_did}"))
}

/// Build the deprecated v1 canonical payload, kept only for verifying
/// records signed before v2 existed (spec §4.4).
pub fn canonical_payload_v1(content_hash: &str, created_at: &str, signer_did: &str) -> Result<String, SigningError> {
    reject_pipe("content_hash", content_hash)?;
    reject_pipe("created_at", created_at)?;
    reject_pipe("signer_did", signer_did)?;
    Ok(format!("{content_hash}|{created_at}|{signer_did}"))
}

fn reject_pipe(field: &'static str, value: &str) -> Result<(), SigningError> {
    if value.contains('|') {
        Err(SigningError::InvalidField { field })
    } else {
        Ok(())
    }
}

/// Attempt v2 verification, falling back to v1 (spec §4.4). Failure is
/// non-fatal to reads: callers treat it as "unverified", never as an error
/// that blocks the response.
pub fn verify(
    signer_did: &str,
    signature_b64: &str,
    id: &str,
    content_hash: &str,
    created_at: &str,
) -> bool {
    let Some(verifying_key) = didkey::verifying_key_from_did(signer_did) else {
        return false;
    };
    let Ok(sig_bytes) = base64::engine::general_purpose::STANDARD.decode(signature_b64) else {
        return false;
    };
    let Ok(sig_array) = <[u8; 64]>::try_from(sig_bytes.as_slice()) else {
        return false;
    };
    let signature = Signature::from_bytes(&sig_array);

    if let Ok(payload) = canonical_payload_v2(id, content_hash, created_at, signer_did) {
        if verifying_key.verify(payload.as_bytes(), &signature).is_ok() {
            return true;
        }
    }
    if let Ok(payload) = canonical_payload_v1(content_hash, created_at, signer_did) {
        if verifying_key.verify(payload.as_bytes(), &signature).is_ok() {
            return true;
        }
    }
    false
}

pub type SharedSigner = Arc<dyn Signer>;

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[tokio::test]
    async fn sign_and_verify_round_trip() {
        let key = SigningKey::generate(&mut OsRng);
        let signer = Ed25519Signer::from_signing_key(key);
        let did = signer.did().await.unwrap();

        let payload = canonical_payload_v2("m1", "abc123", "2026-01-01T00:00:00Z", &did).unwrap();
        let (sig, signer_did) = signer.sign(&payload).await.unwrap();
        assert_eq!(signer_did, did);

        assert!(verify(&signer_did, &sig, "m1", "abc123", "2026-01-01T00:00:00Z"));
        assert!(!verify(&signer_did, &sig, "m1", "different", "2026-01-01T00:00:00Z"));
    }

    #[test]
    fn rejects_pipe_in_fields() {
        let err = canonical_payload_v2("m|1", "hash", "now", "did").unwrap_err();
        assert!(matches!(err, SigningError::InvalidField { field: "id" }));
    }
}
