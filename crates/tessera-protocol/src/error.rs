use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("message too large: {0} bytes (max 1048576)")]
    MessageTooLarge(usize),

    #[error("serialization error: {0}")]
    Serialization(#[from] postcard::Error),

    #[error("invalid address: {0:?}")]
    InvalidAddress(String),

    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("crypto error: {0}")]
    Crypto(#[from] tessera_crypto::CryptoError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_too_large_display() {
        let e = ProtocolError::MessageTooLarge(2_000_000);
        assert!(e.to_string().contains("2000000"));
    }

    #[test]
    fn invalid_identifier_display() {
        let e = ProtocolError::InvalidIdentifier("@@".into());
        assert!(e.to_string().contains("\"@@\""));
    }

    #[test]
    fn from_crypto_error() {
        let e: ProtocolError = tessera_crypto::CryptoError::Rng.into();
        assert!(e.to_string().contains("RNG"));
    }
}
