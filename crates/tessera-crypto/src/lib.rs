//! Tessera key material: signing and decryption keys, symmetric cipher keys,
//! and sealed storage for the private-key area.
//!
//! This crate provides:
//! - Ed25519 identity keys and X25519 communication keys
//! - Public-key signature verification
//! - AES-256-GCM cipher keys plus the shared plain marker key used for broadcasts
//! - Password-sealed secret files (PBKDF2 + AES-256-GCM)

pub mod cipher;
pub mod error;
pub mod keys;
pub mod persistence;
pub mod serde_helpers;

pub use cipher::{CipherAlgorithm, CipherKey};
pub use error::CryptoError;
pub use keys::{KeyAlgorithm, PrivateKey, PublicKey};
pub use persistence::SecretBox;
