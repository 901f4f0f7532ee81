//! `did:key` multibase encoding for Ed25519 public keys.
//!
//! Format: multicodec prefix `0xed01` + raw 32-byte public key, base58btc
//! encoded with a leading `z`, prefixed `did:key:`.

use ed25519_dalek::VerifyingKey;

const ED25519_MULTICODEC_PREFIX: [u8; 2] = [0xed, 0x01];

pub fn did_from_verifying_key(key: &VerifyingKey) -> String {
    let mut bytes = Vec::with_capacity(2 + 32);
    bytes.extend_from_slice(&ED25519_MULTICODEC_PREFIX);
    bytes.extend_from_slice(key.as_bytes());
    format!("did:key:z{}", bs58::encode(bytes).into_string())
}

pub fn verifying_key_from_did(did: &str) -> Option<VerifyingKey> {
    let encoded = did.strip_prefix("did:key:z")?;
    let bytes = bs58::decode(encoded).into_vec().ok()?;
    if bytes.len() != 34 || bytes[0..2] != ED25519_MULTICODEC_PREFIX {
        return None;
    }
    let key_bytes: [u8; 32] = bytes[2..].try_into().ok()?;
    VerifyingKey::from_bytes(&key_bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    #[test]
    fn round_trips_through_did_string() {
        let key = SigningKey::generate(&mut OsRng);
        let verifying = key.verifying_key();
        let did = did_from_verifying_key(&verifying);
        assert!(did.starts_with("did:key:z"));
        let recovered = verifying_key_from_did(&did).unwrap();
        assert_eq!(recovered, verifying);
    }

    #[test]
    fn rejects_garbage_did() {
        assert!(verifying_key_from_did("did:key:znotbase58!!!").is_none());
        assert!(verifying_key_from_did("not-a-did").is_none());
    }
}
