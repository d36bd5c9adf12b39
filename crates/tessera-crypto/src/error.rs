use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("RNG failed")]
    Rng,

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("{algorithm} keys cannot {operation}")]
    Unsupported {
        algorithm: &'static str,
        operation: &'static str,
    },

    #[error("encryption failed")]
    Encrypt,

    #[error("decryption failed: invalid key or tampered data")]
    Decrypt,

    #[error("malformed sealed data: {0}")]
    Malformed(&'static str),

    #[error("sealed secret requires a password")]
    Locked,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_display() {
        let e = CryptoError::Unsupported {
            algorithm: "x25519",
            operation: "sign",
        };
        assert_eq!(e.to_string(), "x25519 keys cannot sign");
    }

    #[test]
    fn malformed_display() {
        let e = CryptoError::Malformed("file too short");
        assert!(e.to_string().contains("file too short"));
    }
}
