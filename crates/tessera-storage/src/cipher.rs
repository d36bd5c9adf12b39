use std::path::PathBuf;
use std::sync::Arc;

use tessera_crypto::{CipherKey, SecretBox};
use tessera_protocol::Identifier;
use tracing::debug;

use crate::error::StorageError;
use crate::fs::{self, Layout};

/// Durable tier of the cipher key vault, keyed by (sender, receiver).
pub trait CipherKeyTable: Send + Sync {
    fn load_cipher_key(
        &self,
        sender: &Identifier,
        receiver: &Identifier,
    ) -> Result<Option<CipherKey>, StorageError>;

    fn save_cipher_key(
        &self,
        sender: &Identifier,
        receiver: &Identifier,
        key: &CipherKey,
    ) -> Result<(), StorageError>;
}

/// Keys under `private/{sender}/cipher_keys/{receiver}.js`, sealed like the
/// other private files.
pub struct FileCipherKeyTable {
    layout: Layout,
    secret_box: Arc<SecretBox>,
}

impl FileCipherKeyTable {
    pub fn new(layout: Layout, secret_box: Arc<SecretBox>) -> Self {
        Self { layout, secret_box }
    }

    fn path(&self, sender: &Identifier, receiver: &Identifier) -> PathBuf {
        self.layout
            .private_dir(sender)
            .join("cipher_keys")
            .join(format!("{}.js", receiver.address()))
    }
}

impl CipherKeyTable for FileCipherKeyTable {
    fn load_cipher_key(
        &self,
        sender: &Identifier,
        receiver: &Identifier,
    ) -> Result<Option<CipherKey>, StorageError> {
        let path = self.path(sender, receiver);
        let Some(sealed) = fs::read_file(&path)? else {
            return Ok(None);
        };
        let plain = zeroize::Zeroizing::new(self.secret_box.open(&sealed)?);
        Ok(fs::parse_json(&path, &plain))
    }

    fn save_cipher_key(
        &self,
        sender: &Identifier,
        receiver: &Identifier,
        key: &CipherKey,
    ) -> Result<(), StorageError> {
        let path = self.path(sender, receiver);
        let plain = zeroize::Zeroizing::new(serde_json::to_vec(key)?);
        let sealed = self.secret_box.seal(&plain)?;
        fs::write_private_file(&path, &sealed)?;
        debug!(sender = %sender, receiver = %receiver, "cipher key persisted");
        Ok(())
    }
}
