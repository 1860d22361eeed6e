//! Tenant-scoped secret decryption.
//!
//! Stored connector credentials are encrypted with a per-tenant key. The
//! registry hands each connector a [`SecretContext`](crate::SecretContext)
//! whose decryptor turns ciphertext plus tenant key back into a
//! [`SecureString`].
//!
//! Ciphertext format for [`AesGcmSecretDecryptor`]: `base64(nonce || ciphertext || tag)`
//! with a 12-byte nonce and 16-byte tag.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::Rng;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::secure_string::SecureString;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;

/// Errors that can occur during cryptographic operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// The tenant key is not a base64-encoded 32-byte key.
    #[error("Invalid encryption key: {0}")]
    InvalidKey(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// Wrong key, or corrupted or tampered ciphertext.
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),
}

/// Decrypts stored credentials with a tenant's key.
#[async_trait]
pub trait SecretDecryptor: Send + Sync {
    async fn decrypt(
        &self,
        ciphertext: &str,
        tenant_key: &SecureString,
    ) -> Result<SecureString, CryptoError>;
}

fn cipher_for(tenant_key: &SecureString) -> Result<Aes256Gcm, CryptoError> {
    let key_bytes = Zeroizing::new(
        BASE64
            .decode(tenant_key.expose_secret().trim())
            .map_err(|e| CryptoError::InvalidKey(format!("Invalid base64: {}", e)))?,
    );

    if key_bytes.len() != KEY_LEN {
        return Err(CryptoError::InvalidKey(format!(
            "Key must be {} bytes, got {} bytes",
            KEY_LEN,
            key_bytes.len()
        )));
    }

    Aes256Gcm::new_from_slice(&key_bytes).map_err(|e| CryptoError::InvalidKey(e.to_string()))
}

/// AES-256-GCM decryptor keyed per call by the tenant key.
#[derive(Debug, Clone, Copy, Default)]
pub struct AesGcmSecretDecryptor;

impl AesGcmSecretDecryptor {
    /// Encrypts `plaintext` for `tenant_key`. Used to seed stored credentials.
    pub fn encrypt(plaintext: &str, tenant_key: &SecureString) -> Result<String, CryptoError> {
        let cipher = cipher_for(tenant_key)?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);

        Ok(BASE64.encode(&combined))
    }

    fn decrypt_sync(
        ciphertext_base64: &str,
        tenant_key: &SecureString,
    ) -> Result<SecureString, CryptoError> {
        let cipher = cipher_for(tenant_key)?;

        let combined = BASE64
            .decode(ciphertext_base64.trim())
            .map_err(|e| CryptoError::DecryptionFailed(format!("Invalid base64: {}", e)))?;

        if combined.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::DecryptionFailed(
                "Ciphertext too short".to_string(),
            ));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| {
                CryptoError::DecryptionFailed("Key does not match ciphertext".to_string())
            })?;

        String::from_utf8(plaintext)
            .map(SecureString::new)
            .map_err(|e| CryptoError::DecryptionFailed(format!("Invalid UTF-8: {}", e)))
    }
}

#[async_trait]
impl SecretDecryptor for AesGcmSecretDecryptor {
    async fn decrypt(
        &self,
        ciphertext: &str,
        tenant_key: &SecureString,
    ) -> Result<SecureString, CryptoError> {
        Self::decrypt_sync(ciphertext, tenant_key)
    }
}

/// Treats stored credentials as plaintext. Development and tests only.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaintextDecryptor;

#[async_trait]
impl SecretDecryptor for PlaintextDecryptor {
    async fn decrypt(
        &self,
        ciphertext: &str,
        _tenant_key: &SecureString,
    ) -> Result<SecureString, CryptoError> {
        Ok(SecureString::from(ciphertext))
    }
}

/// Generates a random 32-byte tenant key, base64 encoded.
pub fn generate_encryption_key() -> SecureString {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    rand::thread_rng().fill(&mut key[..]);
    SecureString::new(BASE64.encode(&key[..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_encrypt_decrypt_roundtrip() {
        let key = generate_encryption_key();
        let ciphertext = AesGcmSecretDecryptor::encrypt("my-secret-api-key-12345", &key).unwrap();

        let decrypted = AesGcmSecretDecryptor
            .decrypt(&ciphertext, &key)
            .await
            .unwrap();
        assert_eq!(decrypted.expose_secret(), "my-secret-api-key-12345");
    }

    #[tokio::test]
    async fn test_wrong_tenant_key_fails() {
        let key = generate_encryption_key();
        let other = generate_encryption_key();
        let ciphertext = AesGcmSecretDecryptor::encrypt("token", &key).unwrap();

        let result = AesGcmSecretDecryptor.decrypt(&ciphertext, &other).await;
        assert!(matches!(result, Err(CryptoError::DecryptionFailed(_))));
    }

    #[tokio::test]
    async fn test_invalid_key_rejected() {
        let result = AesGcmSecretDecryptor
            .decrypt("abc", &SecureString::from("not-a-key"))
            .await;
        assert!(matches!(result, Err(CryptoError::InvalidKey(_))));

        let short = SecureString::new(BASE64.encode([1u8; 16]));
        assert!(matches!(
            AesGcmSecretDecryptor::encrypt("x", &short),
            Err(CryptoError::InvalidKey(_))
        ));
    }

    #[tokio::test]
    async fn test_truncated_ciphertext_rejected() {
        let key = generate_encryption_key();
        let result = AesGcmSecretDecryptor
            .decrypt(&BASE64.encode([0u8; 10]), &key)
            .await;
        assert!(matches!(result, Err(CryptoError::DecryptionFailed(_))));
    }

    #[test]
    fn test_nonce_is_random() {
        let key = generate_encryption_key();
        let a = AesGcmSecretDecryptor::encrypt("same", &key).unwrap();
        let b = AesGcmSecretDecryptor::encrypt("same", &key).unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_plaintext_decryptor() {
        let decrypted = PlaintextDecryptor
            .decrypt("raw-token", &SecureString::default())
            .await
            .unwrap();
        assert_eq!(decrypted.expose_secret(), "raw-token");
    }
}
