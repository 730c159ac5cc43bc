use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use thiserror::Error;
use tracing::warn;

const NONCE_SIZE: usize = 12; // AES-GCM standard nonce size

#[derive(Error, Debug)]
pub enum EncryptionError {
    #[error("Invalid key: {0}")]
    InvalidKey(String),
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),
}

/// Symmetric encryption for stored SSH secrets (AES-256-GCM).
///
/// Ciphertexts are hex strings of `nonce || ciphertext`, so they can live in
/// a TOML/JSON file or a VARCHAR column unchanged.
pub struct EncryptionService {
    cipher: Aes256Gcm,
}

impl EncryptionService {
    /// Creates the service from a 32-byte key.
    pub fn new(key: &[u8]) -> Result<Self, EncryptionError> {
        if key.len() != 32 {
            return Err(EncryptionError::InvalidKey(
                "key must be 32 bytes (256 bits) long".to_string(),
            ));
        }
        Ok(Self {
            cipher: Aes256Gcm::new_from_slice(key)
                .map_err(|_e| EncryptionError::InvalidKey("rejected by cipher".to_string()))?,
        })
    }

    /// Creates the service from a hex-encoded 32-byte key, as found in config.
    pub fn from_hex_key(key_hex: &str) -> Result<Self, EncryptionError> {
        let key_bytes = hex::decode(key_hex.trim())
            .map_err(|e| EncryptionError::InvalidKey(format!("invalid hex key: {e}")))?;
        Self::new(&key_bytes)
    }

    pub fn encrypt(&self, plain_text: &str) -> Result<String, EncryptionError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng); // 96-bits; unique per encryption
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plain_text.as_bytes())
            .map_err(|e| EncryptionError::EncryptionFailed(e.to_string()))?;

        let mut result = nonce.to_vec();
        result.extend_from_slice(&ciphertext);
        Ok(hex::encode(result))
    }

    pub fn decrypt(&self, cipher_hex: &str) -> Result<String, EncryptionError> {
        let encrypted_data = hex::decode(cipher_hex.trim())
            .map_err(|e| EncryptionError::DecryptionFailed(format!("invalid hex ciphertext: {e}")))?;
        if encrypted_data.len() < NONCE_SIZE {
            return Err(EncryptionError::DecryptionFailed(
                "ciphertext is too short to contain a nonce".to_string(),
            ));
        }

        let (nonce_bytes, ciphertext) = encrypted_data.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let decrypted_bytes = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| EncryptionError::DecryptionFailed(e.to_string()))?;

        String::from_utf8(decrypted_bytes)
            .map_err(|e| EncryptionError::DecryptionFailed(format!("invalid UTF-8 sequence: {e}")))
    }

    /// Decrypts a stored secret, degrading to an empty credential when the
    /// value cannot be decoded. The remote host then rejects the login
    /// instead of the caller failing locally.
    pub fn decrypt_or_empty(&self, cipher_hex: &str) -> String {
        if cipher_hex.is_empty() {
            return String::new();
        }
        match self.decrypt(cipher_hex) {
            Ok(secret) => secret,
            Err(e) => {
                warn!(error = %e, "Stored secret could not be decrypted; using an empty credential.");
                String::new()
            }
        }
    }
}
