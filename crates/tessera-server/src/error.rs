use thiserror::Error;

use tessera_protocol::{Identifier, ProtocolError};
use tessera_storage::StorageError;

#[derive(Debug, Error)]
pub enum MessengerError {
    #[error("no cipher key for {sender} -> {receiver}")]
    KeyNotFound {
        sender: Identifier,
        receiver: Identifier,
    },

    #[error("no signing key for {0}")]
    SigningKeyMissing(Identifier),

    #[error("signature from {0} does not verify")]
    InvalidSignature(Identifier),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("delivery failed after {attempts} attempts")]
    DeliveryFailed { attempts: u32 },

    #[error("send cancelled")]
    Cancelled,

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}
