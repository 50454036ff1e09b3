//! Encryption-at-rest for mailbox app passwords.
//!
//! AES-256-GCM with a key derived from a service passphrase via
//! Argon2id. Ciphertexts are stored as base64(nonce || ciphertext),
//! so every encryption of the same password yields a different string.

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use argon2::{Argon2, ParamsBuilder};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use thiserror::Error;
use tracing::debug;

/// Service-specific salt for key derivation.
const VAULT_SALT: &[u8] = b"kindling.v1.vault.salt";

/// Nonce size for AES-GCM (96 bits).
const NONCE_SIZE: usize = 12;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("Failed to derive vault key: {0}")]
    KeyDerivation(String),

    #[error("Encryption failed: {0}")]
    Encrypt(String),

    #[error("Decryption failed: {0}")]
    Decrypt(String),

    #[error("Invalid ciphertext format: {0}")]
    InvalidFormat(String),
}

/// Symmetric vault over one derived key.
pub struct Vault {
    cipher: Aes256Gcm,
}

impl Vault {
    /// Derive the vault key from `passphrase` and build the cipher.
    ///
    /// # Errors
    ///
    /// Fails if key derivation fails or the passphrase is empty.
    pub fn new(passphrase: &str) -> Result<Self, VaultError> {
        if passphrase.is_empty() {
            return Err(VaultError::KeyDerivation(
                "Vault passphrase must not be empty".to_string(),
            ));
        }

        let key = Self::derive_key(passphrase.as_bytes())?;
        let cipher = Aes256Gcm::new(&key.into());
        debug!("Initialised credential vault");
        Ok(Self { cipher })
    }

    fn derive_key(passphrase: &[u8]) -> Result<[u8; 32], VaultError> {
        let mut output_key = [0u8; 32];

        let params = ParamsBuilder::new()
            .m_cost(65536)
            .t_cost(3)
            .p_cost(4)
            .build()
            .map_err(|err| {
                VaultError::KeyDerivation(format!("Failed to build Argon2 params: {err}"))
            })?;

        let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);

        argon2
            .hash_password_into(passphrase, VAULT_SALT, &mut output_key)
            .map_err(|err| {
                VaultError::KeyDerivation(format!("Argon2 key derivation failed: {err}"))
            })?;

        Ok(output_key)
    }

    /// Encrypt a plaintext app password.
    ///
    /// Returns base64(nonce || ciphertext).
    ///
    /// # Errors
    ///
    /// Fails on empty plaintext or cipher failure.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, VaultError> {
        if plaintext.is_empty() {
            return Err(VaultError::Encrypt(
                "Cannot encrypt empty plaintext".to_string(),
            ));
        }

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        use aes_gcm::aead::rand_core::RngCore;
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|err| VaultError::Encrypt(format!("AES-GCM encryption failed: {err}")))?;

        let mut combined = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);

        Ok(BASE64.encode(&combined))
    }

    /// Decrypt a base64(nonce || ciphertext) string back to the app
    /// password.
    ///
    /// # Errors
    ///
    /// Fails on malformed input, or when the ciphertext was produced
    /// under a different key.
    pub fn decrypt(&self, encrypted: &str) -> Result<String, VaultError> {
        if encrypted.is_empty() {
            return Err(VaultError::InvalidFormat(
                "Cannot decrypt empty string".to_string(),
            ));
        }

        let combined = BASE64
            .decode(encrypted)
            .map_err(|err| VaultError::InvalidFormat(format!("Invalid base64: {err}")))?;

        if combined.len() < NONCE_SIZE {
            return Err(VaultError::InvalidFormat(format!(
                "Ciphertext too short: {} bytes",
                combined.len()
            )));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext_bytes = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|err| VaultError::Decrypt(format!("AES-GCM decryption failed: {err}")))?;

        String::from_utf8(plaintext_bytes)
            .map_err(|err| VaultError::Decrypt(format!("Decrypted data is not UTF-8: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let vault = Vault::new("test passphrase").unwrap();

        let plaintext = "abcd efgh ijkl mnop";
        let encrypted = vault.encrypt(plaintext).unwrap();

        assert_ne!(encrypted, plaintext);
        assert!(BASE64.decode(&encrypted).is_ok());
        assert_eq!(vault.decrypt(&encrypted).unwrap(), plaintext);
    }

    #[test]
    fn same_plaintext_yields_different_ciphertexts() {
        let vault = Vault::new("test passphrase").unwrap();

        let first = vault.encrypt("app password").unwrap();
        let second = vault.encrypt("app password").unwrap();

        assert_ne!(first, second);
        assert_eq!(vault.decrypt(&first).unwrap(), "app password");
        assert_eq!(vault.decrypt(&second).unwrap(), "app password");
    }

    #[test]
    fn empty_plaintext_is_rejected() {
        let vault = Vault::new("test passphrase").unwrap();
        assert!(vault.encrypt("").is_err());
    }

    #[test]
    fn malformed_ciphertext_is_rejected() {
        let vault = Vault::new("test passphrase").unwrap();

        assert!(vault.decrypt("not_base64!@#$%").is_err());
        assert!(vault.decrypt(&BASE64.encode("short")).is_err());
        assert!(vault.decrypt(&BASE64.encode([0u8; 32])).is_err());
    }

    #[test]
    fn wrong_passphrase_fails_decryption() {
        let vault = Vault::new("correct passphrase").unwrap();
        let other = Vault::new("different passphrase").unwrap();

        let encrypted = vault.encrypt("app password").unwrap();
        assert!(other.decrypt(&encrypted).is_err());
    }
}
