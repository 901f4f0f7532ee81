//! Encrypted at-rest storage for the signing keypair (spec §6
//! `.secrets/secrets.enc`, SPEC_FULL.md §2 supplement).
//!
//! The keypair is encrypted with AES-256-GCM under a key derived via
//! HKDF-SHA256 from a machine-local seed generated on first run and kept
//! alongside the ciphertext. Losing the seed file loses access to the
//! stored key just as surely as losing a password.

use std::io;
use std::path::{Path, PathBuf};

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use ed25519_dalek::SigningKey;
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;

const HKDF_INFO: &[u8] = b"signet-secrets-v1";
const NONCE_LEN: usize = 12;

pub struct SecretsStore {
    blob_path: PathBuf,
    seed_path: PathBuf,
}

impl SecretsStore {
    pub fn new(secrets_dir: impl Into<PathBuf>) -> Self {
        let secrets_dir = secrets_dir.into();
        Self { blob_path: secrets_dir.join("secrets.enc"), seed_path: secrets_dir.join("seed") }
    }

    /// Load the stored signing keypair, or generate and persist a new one
    /// if this is the first run.
    pub fn load_or_create_signing_key(&self) -> io::Result<SigningKey> {
        if let Some(parent) = self.blob_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if self.blob_path.exists() {
            self.load_signing_key()
        } else {
            let key = SigningKey::generate(&mut OsRng);
            self.store_signing_key(&key)?;
            Ok(key)
        }
    }

    fn derive_cipher_key(&self) -> io::Result<[u8; 32]> {
        let seed = self.load_or_create_seed()?;
        let hk = Hkdf::<Sha256>::new(None, &seed);
        let mut okm = [0u8; 32];
        hk.expand(HKDF_INFO, &mut okm).map_err(|_| io::Error::other("hkdf expand failed (unreachable for a 32-byte output)"))?;
        Ok(okm)
    }

    fn load_or_create_seed(&self) -> io::Result<[u8; 32]> {
        if let Ok(bytes) = std::fs::read(&self.seed_path) {
            if bytes.len() == 32 {
                let mut seed = [0u8; 32];
                seed.copy_from_slice(&bytes);
                return Ok(seed);
            }
        }
        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        write_restricted(&self.seed_path, &seed)?;
        Ok(seed)
    }

    fn store_signing_key(&self, key: &SigningKey) -> io::Result<()> {
        let cipher_key = self.derive_cipher_key()?;
        let cipher = Aes256Gcm::new_from_slice(&cipher_key).expect("derived key is exactly 32 bytes");
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = cipher
            .encrypt(nonce, key.to_bytes().as_slice())
            .map_err(|_| io::Error::other("failed to encrypt signing key"))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        write_restricted(&self.blob_path, &blob)
    }

    fn load_signing_key(&self) -> io::Result<SigningKey> {
        let cipher_key = self.derive_cipher_key()?;
        let blob = std::fs::read(&self.blob_path)?;
        if blob.len() <= NONCE_LEN {
            return Err(io::Error::other("secrets.enc is truncated"));
        }
        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new_from_slice(&cipher_key).expect("derived key is exactly 32 bytes");
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext =
            cipher.decrypt(nonce, ciphertext).map_err(|_| io::Error::other("failed to decrypt secrets.enc (wrong seed or corrupted file)"))?;
        let key_bytes: [u8; 32] =
            plaintext.try_into().map_err(|_| io::Error::other("decrypted signing key has the wrong length"))?;
        Ok(SigningKey::from_bytes(&key_bytes))
    }
}

#[cfg(unix)]
fn write_restricted(path: &Path, contents: &[u8]) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::write(path, contents)?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn write_restricted(path: &Path, contents: &[u8]) -> io::Result<()> {
    std::fs::write(path, contents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_signing_key_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let store = SecretsStore::new(dir.path());
        let key = store.load_or_create_signing_key().unwrap();

        let reopened = SecretsStore::new(dir.path());
        let loaded = reopened.load_or_create_signing_key().unwrap();
        assert_eq!(key.to_bytes(), loaded.to_bytes());
    }

    #[test]
    fn blob_is_not_plaintext_key_material() {
        let dir = tempfile::tempdir().unwrap();
        let store = SecretsStore::new(dir.path());
        let key = store.load_or_create_signing_key().unwrap();
        let blob = std::fs::read(dir.path().join("secrets.enc")).unwrap();
        assert!(!blob.windows(32).any(|w| w == key.to_bytes()));
    }
}
