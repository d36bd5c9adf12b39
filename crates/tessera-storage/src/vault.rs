//! Per-conversation symmetric keys.
//!
//! Keys live in memory per sender and fall back to a [`CipherKeyTable`].
//! All work for one sender happens under that sender's map entry, so two
//! callers racing to create the same pair's key end up with one key.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tessera_crypto::CipherKey;
use tessera_protocol::Identifier;
use tracing::{debug, info};

use crate::cipher::CipherKeyTable;
use crate::error::StorageError;

pub struct CipherKeyVault {
    table: Arc<dyn CipherKeyTable>,
    keys: DashMap<Identifier, HashMap<Identifier, CipherKey>>,
}

impl CipherKeyVault {
    pub fn new(table: Arc<dyn CipherKeyTable>) -> Self {
        Self {
            table,
            keys: DashMap::new(),
        }
    }

    /// Key for `sender -> receiver`. Broadcast receivers get the plain key.
    /// Otherwise memory, then the table, then (if `generate`) a new key that
    /// is persisted before it is returned.
    pub fn get_cipher_key(
        &self,
        sender: &Identifier,
        receiver: &Identifier,
        generate: bool,
    ) -> Result<Option<CipherKey>, StorageError> {
        if receiver.is_broadcast() {
            return Ok(Some(CipherKey::plain()));
        }
        let receiver = receiver.without_terminal();
        let mut table = self.keys.entry(sender.without_terminal()).or_default();
        if let Some(key) = table.get(&receiver) {
            return Ok(Some(key.clone()));
        }
        if let Some(key) = self.table.load_cipher_key(sender, &receiver)? {
            table.insert(receiver, key.clone());
            return Ok(Some(key));
        }
        if !generate {
            return Ok(None);
        }
        let key = CipherKey::generate()?;
        self.table.save_cipher_key(sender, &receiver, &key)?;
        info!(sender = %sender, receiver = %receiver, "cipher key generated");
        table.insert(receiver, key.clone());
        Ok(Some(key))
    }

    /// Remember a key received from the network. Persisted first; memory is
    /// only updated once the write succeeded.
    pub fn cache_cipher_key(
        &self,
        sender: &Identifier,
        receiver: &Identifier,
        key: &CipherKey,
    ) -> Result<(), StorageError> {
        if receiver.is_broadcast() {
            return Ok(());
        }
        let receiver = receiver.without_terminal();
        let mut table = self.keys.entry(sender.without_terminal()).or_default();
        self.table.save_cipher_key(sender, &receiver, key)?;
        debug!(sender = %sender, receiver = %receiver, "cipher key cached");
        table.insert(receiver, key.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;
    use tessera_protocol::{Address, EntityType};

    #[derive(Default)]
    struct CountingTable {
        stored: Mutex<HashMap<(Identifier, Identifier), CipherKey>>,
        saves: AtomicUsize,
        loads: AtomicUsize,
        fail_saves: bool,
    }

    impl CipherKeyTable for CountingTable {
        fn load_cipher_key(
            &self,
            sender: &Identifier,
            receiver: &Identifier,
        ) -> Result<Option<CipherKey>, StorageError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            let stored = self.stored.lock().unwrap();
            Ok(stored.get(&(sender.clone(), receiver.clone())).cloned())
        }

        fn save_cipher_key(
            &self,
            sender: &Identifier,
            receiver: &Identifier,
            key: &CipherKey,
        ) -> Result<(), StorageError> {
            if self.fail_saves {
                return Err(StorageError::io("cipher_keys", std::io::Error::other("read-only")));
            }
            self.saves.fetch_add(1, Ordering::SeqCst);
            self.stored
                .lock()
                .unwrap()
                .insert((sender.clone(), receiver.clone()), key.clone());
            Ok(())
        }
    }

    fn id(seed: &str) -> Identifier {
        Identifier::new(Some(seed), Address::derive(seed.as_bytes(), EntityType::User), None)
    }

    #[test]
    fn generated_once_then_reused() {
        let table = Arc::new(CountingTable::default());
        let vault = CipherKeyVault::new(table.clone());
        let (alice, bob) = (id("alice"), id("bob"));

        assert_eq!(vault.get_cipher_key(&alice, &bob, false).unwrap(), None);
        let first = vault.get_cipher_key(&alice, &bob, true).unwrap().unwrap();
        let second = vault.get_cipher_key(&alice, &bob, true).unwrap().unwrap();
        let third = vault.get_cipher_key(&alice, &bob, false).unwrap().unwrap();
        assert_eq!(first, second);
        assert_eq!(first, third);
        assert_eq!(table.saves.load(Ordering::SeqCst), 1);

        let other_direction = vault.get_cipher_key(&bob, &alice, true).unwrap().unwrap();
        assert_ne!(other_direction, first);
    }

    #[test]
    fn broadcast_never_touches_storage() {
        let table = Arc::new(CountingTable::default());
        let vault = CipherKeyVault::new(table.clone());
        let key = vault
            .get_cipher_key(&id("alice"), &Identifier::everyone(), true)
            .unwrap()
            .unwrap();
        assert!(key.is_plain());
        vault
            .cache_cipher_key(&id("alice"), &Identifier::anyone(), &CipherKey::generate().unwrap())
            .unwrap();
        assert_eq!(table.saves.load(Ordering::SeqCst), 0);
        assert_eq!(table.loads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn loaded_from_table_after_restart() {
        let table = Arc::new(CountingTable::default());
        let key = CipherKeyVault::new(table.clone())
            .get_cipher_key(&id("alice"), &id("bob"), true)
            .unwrap()
            .unwrap();
        let restarted = CipherKeyVault::new(table.clone());
        assert_eq!(
            restarted.get_cipher_key(&id("alice"), &id("bob"), false).unwrap(),
            Some(key)
        );
    }

    #[test]
    fn cache_replaces_existing_key() {
        let table = Arc::new(CountingTable::default());
        let vault = CipherKeyVault::new(table.clone());
        let (alice, bob) = (id("alice"), id("bob"));
        vault.get_cipher_key(&alice, &bob, true).unwrap();
        let learned = CipherKey::generate().unwrap();
        vault.cache_cipher_key(&alice, &bob, &learned).unwrap();
        assert_eq!(vault.get_cipher_key(&alice, &bob, true).unwrap(), Some(learned));
    }

    #[test]
    fn failed_persist_leaves_memory_untouched() {
        let table = Arc::new(CountingTable {
            fail_saves: true,
            ..Default::default()
        });
        let vault = CipherKeyVault::new(table);
        let (alice, bob) = (id("alice"), id("bob"));
        assert!(vault
            .cache_cipher_key(&alice, &bob, &CipherKey::generate().unwrap())
            .is_err());
        assert_eq!(vault.get_cipher_key(&alice, &bob, false).unwrap(), None);
        assert!(vault.get_cipher_key(&alice, &bob, true).is_err());
    }

    #[test]
    fn racing_generators_share_one_key() {
        let table = Arc::new(CountingTable::default());
        let vault = CipherKeyVault::new(table.clone());
        let (alice, bob) = (id("alice"), id("bob"));
        let keys: Vec<CipherKey> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| vault.get_cipher_key(&alice, &bob, true).unwrap().unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(keys.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(table.saves.load(Ordering::SeqCst), 1);
    }
}
