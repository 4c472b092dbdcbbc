//! Credential Vault (C1): authenticated symmetric encryption of provider tokens
//! and webhook secrets at rest.
//!
//! Decrypted material must never cross a serialization boundary. `Vault` never
//! logs key bytes or plaintext; callers are responsible for not doing so either.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const NONCE_LEN: usize = 12;

/// Ciphertext plus the key identifier that produced it, enabling future key rotation
/// without invalidating previously-encrypted records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ciphertext {
    pub key_id: String,
    #[serde(with = "base64_bytes")]
    pub nonce: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub bytes: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("encryption key is missing or malformed: {0}")]
    InvalidKey(String),
    #[error("encryption failed")]
    EncryptFailed,
    #[error("decryption failed: ciphertext unreadable or key_id unknown ({key_id})")]
    DecryptFailed { key_id: String },
}

/// Process-wide authenticated-encryption capability. A missing/invalid key at
/// construction time is fatal (propagated to the caller, typically aborting startup).
#[derive(Clone)]
pub struct Vault {
    key_id: String,
    cipher: Aes256Gcm,
}

impl Vault {
    /// Build a vault from a configured key. The key must decode (as base64, or be used
    /// raw if already 32 bytes) to exactly 32 bytes; anything else is `InvalidKey`.
    pub fn new(key_id: impl Into<String>, key_material: &str) -> Result<Self, VaultError> {
        let raw = decode_key(key_material)
            .ok_or_else(|| VaultError::InvalidKey("key must decode to 32 bytes".to_string()))?;
        let key = Key::<Aes256Gcm>::from_slice(&raw);
        Ok(Self {
            key_id: key_id.into(),
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Encrypt `plaintext`. Each call uses a fresh random nonce, so distinct encryptions
    /// of the same plaintext yield distinct ciphertexts (testable property 7).
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Ciphertext, VaultError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let bytes = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| VaultError::EncryptFailed)?;

        Ok(Ciphertext {
            key_id: self.key_id.clone(),
            nonce: nonce_bytes.to_vec(),
            bytes,
        })
    }

    /// Decrypt a [`Ciphertext`] previously produced by this (or a key-id-matching) vault.
    pub fn decrypt(&self, ciphertext: &Ciphertext) -> Result<Vec<u8>, VaultError> {
        if ciphertext.key_id != self.key_id {
            return Err(VaultError::DecryptFailed {
                key_id: ciphertext.key_id.clone(),
            });
        }
        if ciphertext.nonce.len() != NONCE_LEN {
            return Err(VaultError::DecryptFailed {
                key_id: ciphertext.key_id.clone(),
            });
        }
        let nonce = Nonce::from_slice(&ciphertext.nonce);
        self.cipher
            .decrypt(nonce, ciphertext.bytes.as_slice())
            .map_err(|_| VaultError::DecryptFailed {
                key_id: ciphertext.key_id.clone(),
            })
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }
}

fn decode_key(material: &str) -> Option<[u8; 32]> {
    use base64::Engine;
    let bytes = if material.len() == 32 {
        material.as_bytes().to_vec()
    } else {
        base64::engine::general_purpose::STANDARD
            .decode(material.trim())
            .ok()?
    };
    if bytes.len() != 32 {
        return None;
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Some(out)
}

mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Vec<u8>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        base64::engine::general_purpose::STANDARD
            .decode(s)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_vault() -> Vault {
        Vault::new("k1", "01234567890123456789012345678901").expect("valid 32-byte key")
    }

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let vault = test_vault();
        for plaintext in [b"".as_slice(), b"short", b"a longer provider access token value"] {
            let ct = vault.encrypt(plaintext).unwrap();
            let pt = vault.decrypt(&ct).unwrap();
            assert_eq!(pt, plaintext);
        }
    }

    #[test]
    fn test_distinct_encryptions_yield_distinct_ciphertext() {
        let vault = test_vault();
        let a = vault.encrypt(b"same plaintext").unwrap();
        let b = vault.encrypt(b"same plaintext").unwrap();
        assert_ne!(a.bytes, b.bytes);
        assert_ne!(a.nonce, b.nonce);
    }

    #[test]
    fn test_decrypt_rejects_wrong_key_id() {
        let vault = test_vault();
        let mut ct = vault.encrypt(b"secret").unwrap();
        ct.key_id = "other-key".to_string();
        assert!(vault.decrypt(&ct).is_err());
    }

    #[test]
    fn test_invalid_key_material_rejected() {
        let result = Vault::new("k1", "too-short");
        assert!(result.is_err());
    }

    #[test]
    fn test_ciphertext_never_equals_plaintext() {
        let vault = test_vault();
        let plaintext = b"gho_abcdefghijklmnopqrstuvwxyz";
        let ct = vault.encrypt(plaintext).unwrap();
        assert_ne!(ct.bytes.as_slice(), plaintext);
    }
}
