//! Private keys of local users.
//!
//! Each user has one identity key (`secret`, first write wins) and a
//! most-recent-first history of communication keys (`secret_keys`, at most
//! [`MAX_COMMUNICATION_KEYS`] entries). Files are sealed by the store's
//! [`SecretBox`] when a password is configured.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tessera_crypto::{PrivateKey, SecretBox};
use tessera_protocol::Identifier;
use tracing::{info, warn};

use crate::cache::CacheTable;
use crate::error::StorageError;
use crate::fs::{self, Layout};

pub const MAX_COMMUNICATION_KEYS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivateKeyType {
    /// Long-term key paired with the genesis record.
    Identity,
    /// Rotating key published in the visa, used for decryption.
    Communication,
}

pub struct PrivateKeyTable {
    layout: Layout,
    secret_box: Arc<SecretBox>,
    identity: CacheTable<Identifier, PrivateKey>,
    communication: CacheTable<Identifier, Vec<PrivateKey>>,
    decryption: DashMap<Identifier, Vec<PrivateKey>>,
}

impl PrivateKeyTable {
    pub fn new(layout: Layout, secret_box: Arc<SecretBox>) -> Self {
        Self {
            layout,
            secret_box,
            identity: CacheTable::new(),
            communication: CacheTable::new(),
            decryption: DashMap::new(),
        }
    }

    fn identity_path(&self, user: &Identifier) -> PathBuf {
        self.layout.private_dir(user).join("secret")
    }

    fn communication_path(&self, user: &Identifier) -> PathBuf {
        self.layout.private_dir(user).join("secret_keys")
    }

    fn read_sealed<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>, StorageError> {
        let Some(sealed) = fs::read_file(path)? else {
            return Ok(None);
        };
        let plain = self.secret_box.open(&sealed)?;
        Ok(fs::parse_json(path, &plain))
    }

    fn write_sealed<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), StorageError> {
        let plain = zeroize::Zeroizing::new(serde_json::to_vec(value)?);
        let sealed = self.secret_box.seal(&plain)?;
        fs::write_private_file(path, &sealed)
    }

    fn load_communication(&self, user: &Identifier) -> Result<Option<Vec<PrivateKey>>, StorageError> {
        let keys: Option<Vec<PrivateKey>> = self.read_sealed(&self.communication_path(user))?;
        Ok(keys.map(|mut keys| {
            if keys.len() > MAX_COMMUNICATION_KEYS {
                warn!(user = %user, count = keys.len(), "truncating oversized key history");
                keys.truncate(MAX_COMMUNICATION_KEYS);
            }
            keys
        }))
    }

    /// Returns `Ok(false)` when nothing changed: an identity key already
    /// exists, or the communication key is already the newest.
    pub fn save_private_key(
        &self,
        user: &Identifier,
        key: &PrivateKey,
        key_type: PrivateKeyType,
    ) -> Result<bool, StorageError> {
        let user = user.without_terminal();
        let changed = match key_type {
            PrivateKeyType::Identity => self.identity.update(
                &user,
                || self.read_sealed(&self.identity_path(&user)),
                |slot| {
                    if slot.is_some() {
                        warn!(user = %user, "identity key already set, ignoring");
                        return Ok(false);
                    }
                    self.write_sealed(&self.identity_path(&user), key)?;
                    *slot = Some(key.clone());
                    Ok(true)
                },
            )?,
            PrivateKeyType::Communication => self.communication.update(
                &user,
                || self.load_communication(&user),
                |slot| {
                    let mut keys = slot.clone().unwrap_or_default();
                    match keys.iter().position(|k| k == key) {
                        Some(0) => return Ok(false),
                        Some(index) => {
                            let existing = keys.remove(index);
                            keys.insert(0, existing);
                        }
                        None => {
                            keys.truncate(MAX_COMMUNICATION_KEYS - 1);
                            keys.insert(0, key.clone());
                        }
                    }
                    self.write_sealed(&self.communication_path(&user), &keys)?;
                    *slot = Some(keys);
                    Ok(true)
                },
            )?,
        };
        if changed {
            self.decryption.remove(&user);
            info!(user = %user, ?key_type, "private key saved");
        }
        Ok(changed)
    }

    pub fn identity_key(&self, user: &Identifier) -> Result<Option<PrivateKey>, StorageError> {
        let user = user.without_terminal();
        self.identity
            .get_or_load(&user, || self.read_sealed(&self.identity_path(&user)))
    }

    pub fn communication_keys(&self, user: &Identifier) -> Result<Vec<PrivateKey>, StorageError> {
        let user = user.without_terminal();
        Ok(self
            .communication
            .get_or_load(&user, || self.load_communication(&user))?
            .unwrap_or_default())
    }

    /// Newest communication key that can sign, else the identity key.
    pub fn private_key_for_signature(&self, user: &Identifier) -> Result<Option<PrivateKey>, StorageError> {
        if let Some(key) = self
            .communication_keys(user)?
            .into_iter()
            .find(PrivateKey::can_sign)
        {
            return Ok(Some(key));
        }
        self.identity_key(user)
    }

    /// Visas are always signed with the identity key.
    pub fn private_key_for_visa_signature(&self, user: &Identifier) -> Result<Option<PrivateKey>, StorageError> {
        self.identity_key(user)
    }

    /// Decrypt-capable communication keys, then the identity key if it can
    /// decrypt and is not already listed.
    pub fn private_keys_for_decryption(&self, user: &Identifier) -> Result<Vec<PrivateKey>, StorageError> {
        let user = user.without_terminal();
        // The list is built under the entry lock: a save that commits while
        // it is being built blocks on its invalidation until the insert lands.
        let keys = self
            .decryption
            .entry(user.clone())
            .or_try_insert_with(|| self.collect_decryption_keys(&user))?;
        Ok(keys.clone())
    }

    fn collect_decryption_keys(&self, user: &Identifier) -> Result<Vec<PrivateKey>, StorageError> {
        let mut keys: Vec<PrivateKey> = self
            .communication_keys(user)?
            .into_iter()
            .filter(PrivateKey::can_decrypt)
            .collect();
        if let Some(identity) = self.identity_key(user)? {
            if identity.can_decrypt() && !keys.contains(&identity) {
                keys.push(identity);
            }
        }
        Ok(keys)
    }
}
