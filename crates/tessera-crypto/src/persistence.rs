//! Password sealing for private key files at rest.
//!
//! The sealing key is derived once per process with PBKDF2 from the server
//! password and a per-installation salt, then reused for every file. Without
//! a password, files are written as plaintext and sealed files stay locked.

use std::num::NonZeroU32;

use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};

use crate::error::CryptoError;

const MAGIC: &[u8; 4] = b"TSEC";
const VERSION: u8 = 0x01;
pub const SALT_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const HEADER_LEN: usize = 4 + 1 + NONCE_LEN + 4; // 21 bytes
pub const PBKDF2_ITERATIONS: u32 = 600_000;

/// Seals and opens secret files with a password-derived AES-256-GCM key.
pub struct SecretBox {
    key: Option<LessSafeKey>,
}

impl SecretBox {
    /// Derive the sealing key. `None` disables sealing.
    pub fn new(password: Option<&str>, salt: &[u8; SALT_LEN]) -> Result<Self, CryptoError> {
        Self::with_iterations(password, salt, PBKDF2_ITERATIONS)
    }

    /// Same as [`SecretBox::new`] with an explicit PBKDF2 round count.
    pub fn with_iterations(
        password: Option<&str>,
        salt: &[u8; SALT_LEN],
        iterations: u32,
    ) -> Result<Self, CryptoError> {
        let Some(password) = password.filter(|p| !p.is_empty()) else {
            return Ok(Self::disabled());
        };
        let rounds = NonZeroU32::new(iterations)
            .ok_or(CryptoError::InvalidKey("PBKDF2 needs at least one round".into()))?;
        let mut key_bytes = zeroize::Zeroizing::new([0u8; 32]);
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            rounds,
            salt,
            password.as_bytes(),
            &mut key_bytes[..],
        );
        let unbound = UnboundKey::new(&AES_256_GCM, &key_bytes[..])
            .map_err(|_| CryptoError::InvalidKey("derived key length".into()))?;
        Ok(Self {
            key: Some(LessSafeKey::new(unbound)),
        })
    }

    /// A box that writes plaintext and cannot open sealed data.
    pub fn disabled() -> Self {
        Self { key: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.key.is_some()
    }

    /// Seal `plaintext` for disk.
    ///
    /// Format: [TSEC(4)] [version(1)] [nonce(12)] [length(4)] [ciphertext + tag(16)]
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let Some(key) = &self.key else {
            return Ok(plaintext.to_vec());
        };

        let mut nonce_bytes = [0u8; NONCE_LEN];
        SystemRandom::new()
            .fill(&mut nonce_bytes)
            .map_err(|_| CryptoError::Rng)?;

        let mut in_out = plaintext.to_vec();
        key.seal_in_place_append_tag(
            Nonce::assume_unique_for_key(nonce_bytes),
            Aad::from(header_aad()),
            &mut in_out,
        )
        .map_err(|_| CryptoError::Encrypt)?;

        let payload_len = u32::try_from(in_out.len()).map_err(|_| CryptoError::Encrypt)?;
        let mut file_data = Vec::with_capacity(HEADER_LEN + in_out.len());
        file_data.extend_from_slice(MAGIC);
        file_data.push(VERSION);
        file_data.extend_from_slice(&nonce_bytes);
        file_data.extend_from_slice(&payload_len.to_be_bytes());
        file_data.extend_from_slice(&in_out);
        Ok(file_data)
    }

    /// Open data written by [`SecretBox::seal`]. Data without a header is
    /// returned as-is, so plaintext files from an unsealed run still load.
    pub fn open(&self, file_data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if !has_valid_header(file_data) {
            return Ok(file_data.to_vec());
        }
        let Some(key) = &self.key else {
            return Err(CryptoError::Locked);
        };

        let mut nonce_bytes = [0u8; NONCE_LEN];
        nonce_bytes.copy_from_slice(&file_data[5..5 + NONCE_LEN]);

        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&file_data[17..HEADER_LEN]);
        let payload_len = u32::from_be_bytes(len_bytes) as usize;

        if file_data.len() < HEADER_LEN + payload_len {
            return Err(CryptoError::Malformed("file truncated"));
        }

        let mut ciphertext = file_data[HEADER_LEN..HEADER_LEN + payload_len].to_vec();
        let plaintext = key
            .open_in_place(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::from(header_aad()),
                &mut ciphertext,
            )
            .map_err(|_| CryptoError::Decrypt)?;
        Ok(plaintext.to_vec())
    }
}

impl std::fmt::Debug for SecretBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretBox")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

fn header_aad() -> [u8; 5] {
    let mut aad = [0u8; 5];
    aad[..4].copy_from_slice(MAGIC);
    aad[4] = VERSION;
    aad
}

/// Check if file data starts with a valid TSEC header.
pub fn has_valid_header(file_data: &[u8]) -> bool {
    file_data.len() >= HEADER_LEN && &file_data[0..4] == MAGIC && file_data[4] == VERSION
}

/// Fresh random salt for a new installation.
pub fn generate_salt() -> Result<[u8; SALT_LEN], CryptoError> {
    let mut salt = [0u8; SALT_LEN];
    SystemRandom::new()
        .fill(&mut salt)
        .map_err(|_| CryptoError::Rng)?;
    Ok(salt)
}
