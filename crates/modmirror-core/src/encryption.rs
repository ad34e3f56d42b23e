//! Encryption service for login artifacts kept at rest

use crate::AppError;
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose, Engine as _};

const NONCE_LEN: usize = 12;

/// Encryption service for vault entries.
/// Uses AES-256-GCM for authenticated encryption; the stored form is
/// base64(nonce || ciphertext).
#[derive(Clone)]
pub struct EncryptionService {
    cipher: Aes256Gcm,
}

impl EncryptionService {
    /// Create a new encryption service from a raw 32-byte key.
    pub fn from_key_bytes(key_bytes: &[u8]) -> Result<Self, AppError> {
        if key_bytes.len() != 32 {
            return Err(AppError::Encryption(
                "Encryption key must be 32 bytes (256 bits)".to_string(),
            ));
        }
        let key = Key::<Aes256Gcm>::from_slice(key_bytes);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Create a new encryption service from a base64-encoded 32-byte key.
    pub fn from_base64_key(key_str: &str) -> Result<Self, AppError> {
        let key_bytes = general_purpose::STANDARD
            .decode(key_str.trim())
            .map_err(|e| AppError::Encryption(format!("Failed to decode encryption key: {}", e)))?;

        Self::from_key_bytes(&key_bytes)
    }

    /// Encrypt raw bytes
    pub fn encrypt_bytes(&self, plaintext: &[u8]) -> Result<String, AppError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| AppError::Encryption(format!("Encryption failed: {}", e)))?;

        let mut combined = nonce.to_vec();
        combined.extend_from_slice(&ciphertext);
        Ok(general_purpose::STANDARD.encode(&combined))
    }

    /// Decrypt a value produced by [`encrypt_bytes`](Self::encrypt_bytes)
    pub fn decrypt_bytes(&self, encrypted: &str) -> Result<Vec<u8>, AppError> {
        let combined = general_purpose::STANDARD
            .decode(encrypted.trim())
            .map_err(|e| AppError::Encryption(format!("Failed to decode encrypted data: {}", e)))?;

        if combined.len() < NONCE_LEN {
            return Err(AppError::Encryption("Encrypted data too short".to_string()));
        }

        let nonce = Nonce::from_slice(&combined[..NONCE_LEN]);
        let ciphertext = &combined[NONCE_LEN..];

        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| AppError::Encryption(format!("Decryption failed: {}", e)))
    }

    /// Encrypt a plaintext string
    pub fn encrypt(&self, plaintext: &str) -> Result<String, AppError> {
        self.encrypt_bytes(plaintext.as_bytes())
    }

    /// Decrypt an encrypted string
    pub fn decrypt(&self, encrypted: &str) -> Result<String, AppError> {
        let plaintext = self.decrypt_bytes(encrypted)?;
        String::from_utf8(plaintext)
            .map_err(|e| AppError::Encryption(format!("Invalid UTF-8 in decrypted data: {}", e)))
    }

    /// Serialize a value to JSON and encrypt it.
    pub fn encrypt_json<T: serde::Serialize>(&self, value: &T) -> Result<String, AppError> {
        let json = serde_json::to_vec(value)?;
        self.encrypt_bytes(&json)
    }

    /// Decrypt a value and deserialize it from JSON.
    pub fn decrypt_json<T: serde::de::DeserializeOwned>(
        &self,
        encrypted: &str,
    ) -> Result<T, AppError> {
        let json = self.decrypt_bytes(encrypted)?;
        Ok(serde_json::from_slice(&json)?)
    }
}
