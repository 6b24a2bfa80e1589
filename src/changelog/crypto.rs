use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use chrono::{DateTime, SecondsFormat, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::app::{DigestError, Result};

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 12;

const KDF_ROUNDS: u32 = 100_000;
const KDF_SALT: &[u8] = b"rssdigest-sync-v1";
const AAD_VERSION: &str = "v1";

/// Keys derived from the user's seed phrase.
///
/// Every device holding the same phrase derives the same keys, so envelopes
/// written by one device open on any other.
#[derive(Clone)]
pub struct KeyMaterial {
    enc_key: [u8; KEY_SIZE],
    auth_key: [u8; KEY_SIZE],
    key_id: String,
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

impl KeyMaterial {
    pub fn derive(seed_phrase: &str) -> Result<Self> {
        let seed = seed_phrase.trim();
        if seed.is_empty() {
            return Err(DigestError::NotConfigured("seed phrase is empty".into()));
        }

        let mut hasher = Sha256::new();
        hasher.update(KDF_SALT);
        hasher.update(seed.as_bytes());
        let mut state = [0u8; KEY_SIZE];
        state.copy_from_slice(&hasher.finalize()[..]);

        for _ in 0..KDF_ROUNDS {
            let mut hasher = Sha256::new();
            hasher.update(state);
            hasher.update(seed.as_bytes());
            state.copy_from_slice(&hasher.finalize()[..]);
        }

        let enc_key = expand(&state, b"enc");
        let auth_key = expand(&state, b"auth");
        let key_id = hex::encode(&Sha256::digest(auth_key)[..8]);

        Ok(Self {
            enc_key,
            auth_key,
            key_id,
        })
    }

    /// Short public fingerprint of the key material.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn auth_key(&self) -> &[u8; KEY_SIZE] {
        &self.auth_key
    }

    pub fn seal(&self, plaintext: &[u8], aad: &[u8]) -> Result<Envelope> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        self.seal_with_nonce(plaintext, aad, nonce_bytes)
    }

    fn seal_with_nonce(
        &self,
        plaintext: &[u8],
        aad: &[u8],
        nonce_bytes: [u8; NONCE_SIZE],
    ) -> Result<Envelope> {
        let aead = ChaCha20Poly1305::new(Key::from_slice(&self.enc_key));
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = aead
            .encrypt(nonce, Payload { msg: plaintext, aad })
            .map_err(|_| DigestError::Crypto("encryption failed".into()))?;

        Ok(Envelope {
            key_id: self.key_id.clone(),
            nonce: BASE64.encode(nonce_bytes),
            ciphertext: BASE64.encode(ciphertext),
            aad: BASE64.encode(aad),
        })
    }

    /// Decrypt an envelope, checking that it was sealed with these keys and
    /// bound to `expected_aad`.
    pub fn open(&self, envelope: &Envelope, expected_aad: &[u8]) -> Result<Vec<u8>> {
        if envelope.key_id != self.key_id {
            return Err(DigestError::Crypto(format!(
                "envelope sealed with key {}, expected {}",
                envelope.key_id, self.key_id
            )));
        }

        let aad = decode(&envelope.aad, "aad")?;
        if aad != expected_aad {
            return Err(DigestError::Crypto("associated data mismatch".into()));
        }

        let nonce_bytes = decode(&envelope.nonce, "nonce")?;
        if nonce_bytes.len() != NONCE_SIZE {
            return Err(DigestError::Crypto("nonce must be 12 bytes".into()));
        }
        let ciphertext = decode(&envelope.ciphertext, "ciphertext")?;

        let aead = ChaCha20Poly1305::new(Key::from_slice(&self.enc_key));
        aead.decrypt(
            Nonce::from_slice(&nonce_bytes),
            Payload {
                msg: &ciphertext,
                aad: &aad,
            },
        )
        .map_err(|_| DigestError::Crypto("decryption failed".into()))
    }
}

fn expand(state: &[u8; KEY_SIZE], label: &[u8]) -> [u8; KEY_SIZE] {
    let mut hasher = Sha256::new();
    hasher.update(state);
    hasher.update(label);
    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(&hasher.finalize()[..]);
    key
}

fn decode(value: &str, field: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(value)
        .map_err(|e| DigestError::Crypto(format!("invalid {field} encoding: {e}")))
}

/// Ciphertext of one change as stored in the queue and sent to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub key_id: String,
    pub nonce: String,
    pub ciphertext: String,
    pub aad: String,
}

impl Envelope {
    /// The associated data the envelope claims to be bound to.
    pub fn associated_data(&self) -> Result<Vec<u8>> {
        decode(&self.aad, "aad")
    }
}

/// Associated data binding an envelope to its sender and target.
#[derive(Debug, Clone, Copy)]
pub struct AssociatedData<'a> {
    pub user_id: &'a str,
    pub device_id: &'a str,
    pub entity: &'a str,
    pub entity_id: &'a str,
    pub op: &'a str,
    pub ts: DateTime<Utc>,
}

impl AssociatedData<'_> {
    pub fn to_bytes(&self) -> Vec<u8> {
        let ts = self.ts.to_rfc3339_opts(SecondsFormat::Micros, true);
        let fields = [
            AAD_VERSION,
            self.user_id,
            self.device_id,
            self.entity,
            self.entity_id,
            self.op,
            ts.as_str(),
        ];
        // A JSON array keeps field boundaries unambiguous.
        serde_json::to_vec(&fields).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aad(entity_id: &str) -> Vec<u8> {
        AssociatedData {
            user_id: "user-1",
            device_id: "laptop",
            entity: "feed",
            entity_id,
            op: "upsert",
            ts: DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        }
        .to_bytes()
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let a = KeyMaterial::derive("correct horse battery staple").unwrap();
        let b = KeyMaterial::derive("  correct horse battery staple ").unwrap();
        let c = KeyMaterial::derive("another phrase").unwrap();

        assert_eq!(a.key_id(), b.key_id());
        assert_eq!(a.key_id().len(), 16);
        assert_ne!(a.key_id(), c.key_id());
        assert_ne!(a.enc_key, a.auth_key);
    }

    #[test]
    fn test_empty_seed_is_not_configured() {
        let err = KeyMaterial::derive("   ").unwrap_err();
        assert!(matches!(err, DigestError::NotConfigured(_)));
    }

    #[test]
    fn test_seal_and_open() {
        let keys = KeyMaterial::derive("seed").unwrap();
        let binding = aad("https://example.com/feed");
        let envelope = keys.seal(b"{\"hello\":1}", &binding).unwrap();

        assert_eq!(envelope.key_id, keys.key_id());
        let plain = keys.open(&envelope, &binding).unwrap();
        assert_eq!(plain, b"{\"hello\":1}");
    }

    #[test]
    fn test_nonces_differ() {
        let keys = KeyMaterial::derive("seed").unwrap();
        let binding = aad("x");
        let a = keys.seal(b"same", &binding).unwrap();
        let b = keys.seal(b"same", &binding).unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_aad_mismatch_is_rejected() {
        let keys = KeyMaterial::derive("seed").unwrap();
        let envelope = keys.seal(b"payload", &aad("a")).unwrap();
        let err = keys.open(&envelope, &aad("b")).unwrap_err();
        assert!(matches!(err, DigestError::Crypto(_)));
    }

    #[test]
    fn test_tampered_aad_fails_authentication() {
        let keys = KeyMaterial::derive("seed").unwrap();
        let mut envelope = keys.seal(b"payload", &aad("a")).unwrap();
        let forged = aad("b");
        envelope.aad = BASE64.encode(&forged);

        let err = keys.open(&envelope, &forged).unwrap_err();
        assert_eq!(err.to_string(), "Crypto error: decryption failed");
    }

    #[test]
    fn test_foreign_key_is_rejected() {
        let ours = KeyMaterial::derive("seed").unwrap();
        let theirs = KeyMaterial::derive("other seed").unwrap();
        let envelope = theirs.seal(b"payload", &aad("a")).unwrap();
        assert!(matches!(
            ours.open(&envelope, &aad("a")),
            Err(DigestError::Crypto(_))
        ));
    }

    #[test]
    fn test_fixed_nonce_is_reproducible() {
        let keys = KeyMaterial::derive("seed").unwrap();
        let a = keys.seal_with_nonce(b"payload", b"ad", [7u8; NONCE_SIZE]).unwrap();
        let b = keys.seal_with_nonce(b"payload", b"ad", [7u8; NONCE_SIZE]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_aad_fields_are_unambiguous() {
        let joined = AssociatedData {
            user_id: "a|b",
            device_id: "c",
            entity: "feed",
            entity_id: "x",
            op: "upsert",
            ts: Utc::now(),
        };
        let split = AssociatedData {
            user_id: "a",
            device_id: "b|c",
            ..joined
        };
        assert_ne!(joined.to_bytes(), split.to_bytes());
    }
}
