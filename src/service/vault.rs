use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Authenticated at-rest encryption for provider API keys.
///
/// Blob layout: 12-byte random nonce followed by the AES-256-GCM ciphertext
/// with its 16-byte tag. A fresh nonce is drawn per encryption, so sealing
/// the same plaintext twice never yields identical blobs. Decryption fails
/// closed on a wrong secret or any tampering; the vault never logs plaintext
/// and never hands ciphertext back to API callers.
pub struct CredentialVault {
    key: [u8; 32],
}

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("credential encryption failed")]
    Encrypt,
    #[error("credential blob is malformed")]
    Malformed,
    #[error("credential decryption failed: wrong secret or tampered data")]
    Integrity,
}

impl CredentialVault {
    /// Derives the AEAD key from the configured vault secret.
    pub fn new(secret: &str) -> Self {
        let digest = Sha256::digest(secret.as_bytes());
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        Self { key }
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<Vec<u8>, VaultError> {
        let unbound = UnboundKey::new(&AES_256_GCM, &self.key).map_err(|_| VaultError::Encrypt)?;
        let sealing = LessSafeKey::new(unbound);

        let mut nonce_bytes = [0u8; NONCE_LEN];
        SystemRandom::new()
            .fill(&mut nonce_bytes)
            .map_err(|_| VaultError::Encrypt)?;
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut in_out = plaintext.as_bytes().to_vec();
        sealing
            .seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| VaultError::Encrypt)?;

        let mut blob = Vec::with_capacity(NONCE_LEN + in_out.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&in_out);
        Ok(blob)
    }

    pub fn decrypt(&self, blob: &[u8]) -> Result<String, VaultError> {
        if blob.len() <= NONCE_LEN {
            return Err(VaultError::Malformed);
        }
        let unbound = UnboundKey::new(&AES_256_GCM, &self.key).map_err(|_| VaultError::Integrity)?;
        let opening = LessSafeKey::new(unbound);

        let mut nonce_bytes = [0u8; NONCE_LEN];
        nonce_bytes.copy_from_slice(&blob[..NONCE_LEN]);
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut in_out = blob[NONCE_LEN..].to_vec();
        let plaintext = opening
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| VaultError::Integrity)?;

        String::from_utf8(plaintext.to_vec()).map_err(|_| VaultError::Integrity)
    }
}
