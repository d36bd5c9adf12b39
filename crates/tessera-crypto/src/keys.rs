//! Asymmetric key generation, signing and verification.
//!
//! Every local user owns one long-term Ed25519 identity key (paired with the
//! public key in its genesis record) and a short history of X25519
//! communication keys used for decryption.

use std::fmt;

use ring::rand::{SecureRandom, SystemRandom};
use ring::signature::{Ed25519KeyPair, KeyPair, UnparsedPublicKey, ED25519};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// Which primitive a key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyAlgorithm {
    /// Signing key; cannot decrypt.
    Ed25519,
    /// Key-agreement key; usable for decryption, cannot sign.
    X25519,
}

impl KeyAlgorithm {
    pub fn name(self) -> &'static str {
        match self {
            Self::Ed25519 => "ed25519",
            Self::X25519 => "x25519",
        }
    }

    pub fn can_sign(self) -> bool {
        matches!(self, Self::Ed25519)
    }

    pub fn can_decrypt(self) -> bool {
        matches!(self, Self::X25519)
    }
}

/// A private key. Ed25519 keys hold a PKCS#8 document, X25519 keys the raw
/// 32-byte scalar. Zeroized on drop.
#[derive(Clone, Serialize, Deserialize)]
pub struct PrivateKey {
    pub algorithm: KeyAlgorithm,
    #[serde(with = "crate::serde_helpers::hex_secret")]
    data: Zeroizing<Vec<u8>>,
}

impl PrivateKey {
    /// Generate a fresh random key.
    pub fn generate(algorithm: KeyAlgorithm) -> Result<Self, CryptoError> {
        let rng = SystemRandom::new();
        let data = match algorithm {
            KeyAlgorithm::Ed25519 => {
                let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).map_err(|_| CryptoError::Rng)?;
                Zeroizing::new(pkcs8.as_ref().to_vec())
            }
            KeyAlgorithm::X25519 => {
                let mut scalar = Zeroizing::new(vec![0u8; 32]);
                rng.fill(&mut scalar[..]).map_err(|_| CryptoError::Rng)?;
                scalar
            }
        };
        Ok(Self { algorithm, data })
    }

    /// Rebuild a key from stored bytes, checking the bytes are usable.
    pub fn from_bytes(algorithm: KeyAlgorithm, data: &[u8]) -> Result<Self, CryptoError> {
        let key = Self {
            algorithm,
            data: Zeroizing::new(data.to_vec()),
        };
        key.public_key()?;
        Ok(key)
    }

    pub fn can_sign(&self) -> bool {
        self.algorithm.can_sign()
    }

    pub fn can_decrypt(&self) -> bool {
        self.algorithm.can_decrypt()
    }

    /// Derive the matching public key.
    pub fn public_key(&self) -> Result<PublicKey, CryptoError> {
        let data = match self.algorithm {
            KeyAlgorithm::Ed25519 => self.ed25519_pair()?.public_key().as_ref().to_vec(),
            KeyAlgorithm::X25519 => {
                let secret = x25519_dalek::StaticSecret::from(self.x25519_scalar()?);
                x25519_dalek::PublicKey::from(&secret).as_bytes().to_vec()
            }
        };
        Ok(PublicKey {
            algorithm: self.algorithm,
            data,
        })
    }

    /// Sign `message`. Only Ed25519 keys can sign.
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if !self.can_sign() {
            return Err(CryptoError::Unsupported {
                algorithm: self.algorithm.name(),
                operation: "sign",
            });
        }
        Ok(self.ed25519_pair()?.sign(message).as_ref().to_vec())
    }

    fn ed25519_pair(&self) -> Result<Ed25519KeyPair, CryptoError> {
        Ed25519KeyPair::from_pkcs8(self.data.as_slice())
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))
    }

    fn x25519_scalar(&self) -> Result<[u8; 32], CryptoError> {
        <[u8; 32]>::try_from(self.data.as_slice())
            .map_err(|_| CryptoError::InvalidKey(format!("expected 32 bytes, got {}", self.data.len())))
    }
}

impl PartialEq for PrivateKey {
    fn eq(&self, other: &Self) -> bool {
        self.algorithm == other.algorithm && bool::from(self.data.as_slice().ct_eq(other.data.as_slice()))
    }
}

impl Eq for PrivateKey {}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// A public key as published in genesis records and documents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey {
    pub algorithm: KeyAlgorithm,
    #[serde(with = "crate::serde_helpers::hex_bytes")]
    pub data: Vec<u8>,
}

impl PublicKey {
    /// Verify an Ed25519 signature. Keys that cannot sign never verify.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        if !self.algorithm.can_sign() {
            return false;
        }
        UnparsedPublicKey::new(&ED25519, &self.data)
            .verify(message, signature)
            .is_ok()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}
