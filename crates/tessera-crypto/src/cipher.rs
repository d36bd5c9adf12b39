//! Symmetric AES-256-GCM keys for message content.
//!
//! One key exists per ordered (sender, receiver) pair. Broadcast receivers
//! share the non-secret plain key, which passes data through untouched.

use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// AES-256-GCM authentication tag size.
pub const GCM_TAG_SIZE: usize = 16;

/// Random nonce prepended to every ciphertext.
pub const NONCE_SIZE: usize = 12;

/// Total encryption overhead per payload.
pub const ENCRYPTION_OVERHEAD: usize = NONCE_SIZE + GCM_TAG_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CipherAlgorithm {
    #[serde(rename = "AES")]
    Aes256Gcm,
    Plain,
}

/// A symmetric content key. Zeroized on drop.
#[derive(Clone, Serialize, Deserialize)]
pub struct CipherKey {
    pub algorithm: CipherAlgorithm,
    #[serde(with = "crate::serde_helpers::hex_secret")]
    data: Zeroizing<Vec<u8>>,
}

impl CipherKey {
    /// Generate a fresh random 256-bit key.
    pub fn generate() -> Result<Self, CryptoError> {
        let rng = SystemRandom::new();
        let mut data = Zeroizing::new(vec![0u8; 32]);
        rng.fill(&mut data[..]).map_err(|_| CryptoError::Rng)?;
        Ok(Self {
            algorithm: CipherAlgorithm::Aes256Gcm,
            data,
        })
    }

    /// The shared marker key for broadcast traffic.
    pub fn plain() -> Self {
        Self {
            algorithm: CipherAlgorithm::Plain,
            data: Zeroizing::new(Vec::new()),
        }
    }

    pub fn is_plain(&self) -> bool {
        self.algorithm == CipherAlgorithm::Plain
    }

    fn to_aead_key(&self) -> Result<LessSafeKey, CryptoError> {
        let unbound = UnboundKey::new(&AES_256_GCM, &self.data)
            .map_err(|_| CryptoError::InvalidKey("AES-256-GCM needs 32 bytes".into()))?;
        Ok(LessSafeKey::new(unbound))
    }

    /// Encrypt `plaintext`, binding `aad` to the ciphertext.
    ///
    /// Output: nonce(12) || ciphertext || tag(16). The plain key returns the
    /// input unchanged.
    pub fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if self.is_plain() {
            return Ok(plaintext.to_vec());
        }
        let aead_key = self.to_aead_key()?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        SystemRandom::new()
            .fill(&mut nonce_bytes)
            .map_err(|_| CryptoError::Rng)?;

        let mut in_out = plaintext.to_vec();
        aead_key
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::from(aad),
                &mut in_out,
            )
            .map_err(|_| CryptoError::Encrypt)?;

        let mut output = Vec::with_capacity(NONCE_SIZE + in_out.len());
        output.extend_from_slice(&nonce_bytes);
        output.extend_from_slice(&in_out);
        Ok(output)
    }

    /// Decrypt data produced by [`CipherKey::encrypt`].
    pub fn decrypt(&self, ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if self.is_plain() {
            return Ok(ciphertext.to_vec());
        }
        if ciphertext.len() < ENCRYPTION_OVERHEAD {
            return Err(CryptoError::Malformed("ciphertext too short"));
        }
        let aead_key = self.to_aead_key()?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        nonce_bytes.copy_from_slice(&ciphertext[..NONCE_SIZE]);

        let mut in_out = ciphertext[NONCE_SIZE..].to_vec();
        let plaintext = aead_key
            .open_in_place(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::from(aad),
                &mut in_out,
            )
            .map_err(|_| CryptoError::Decrypt)?;
        Ok(plaintext.to_vec())
    }
}

impl PartialEq for CipherKey {
    fn eq(&self, other: &Self) -> bool {
        self.algorithm == other.algorithm && bool::from(self.data.as_slice().ct_eq(other.data.as_slice()))
    }
}

impl Eq for CipherKey {}

impl std::fmt::Debug for CipherKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherKey")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}
