//! Memory tier of the two-tier tables.
//!
//! Every key is in one of three states: never looked up (no map entry),
//! confirmed absent on disk, or present. Absent entries stop repeated misses
//! from going back to disk. Loads and read-modify-write updates run under
//! the key's shard lock, so two callers never load or mutate the same key
//! at once.

use std::hash::Hash;

use dashmap::DashMap;

use crate::error::StorageError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cached<V> {
    Absent,
    Present(V),
}

impl<V> From<Option<V>> for Cached<V> {
    fn from(value: Option<V>) -> Self {
        match value {
            Some(v) => Self::Present(v),
            None => Self::Absent,
        }
    }
}

impl<V: Clone> Cached<V> {
    fn to_option(&self) -> Option<V> {
        match self {
            Self::Absent => None,
            Self::Present(v) => Some(v.clone()),
        }
    }
}

/// State of a key as seen by the memory tier.
#[cfg(test)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<V> {
    NotLoaded,
    Absent,
    Present(V),
}

pub struct CacheTable<K, V> {
    map: DashMap<K, Cached<V>>,
}

impl<K, V> Default for CacheTable<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            map: DashMap::new(),
        }
    }
}

impl<K, V> CacheTable<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn lookup(&self, key: &K) -> Lookup<V> {
        match self.map.get(key).as_deref() {
            None => Lookup::NotLoaded,
            Some(Cached::Absent) => Lookup::Absent,
            Some(Cached::Present(v)) => Lookup::Present(v.clone()),
        }
    }

    /// Return the cached value, calling `load` on the first lookup only.
    /// A failed load leaves the key not loaded.
    pub fn get_or_load<F>(&self, key: &K, load: F) -> Result<Option<V>, StorageError>
    where
        F: FnOnce() -> Result<Option<V>, StorageError>,
    {
        if let Some(cached) = self.map.get(key) {
            return Ok(cached.to_option());
        }
        let entry = self
            .map
            .entry(key.clone())
            .or_try_insert_with(|| load().map(Cached::from))?;
        Ok(entry.to_option())
    }

    /// Read-modify-write under the key's lock. `apply` sees the current
    /// value (loading it first if needed) and may replace it; the cache
    /// only changes when `apply` succeeds.
    pub fn update<F, L, R>(&self, key: &K, load: L, apply: F) -> Result<R, StorageError>
    where
        L: FnOnce() -> Result<Option<V>, StorageError>,
        F: FnOnce(&mut Option<V>) -> Result<R, StorageError>,
    {
        let mut entry = self
            .map
            .entry(key.clone())
            .or_try_insert_with(|| load().map(Cached::from))?;
        let mut slot = entry.to_option();
        let result = apply(&mut slot)?;
        *entry = Cached::from(slot);
        Ok(result)
    }

    /// Modify a cached value in place. Keys not present in memory are left
    /// alone.
    pub fn modify_present<F>(&self, key: &K, modify: F)
    where
        F: FnOnce(&mut V),
    {
        if let Some(mut entry) = self.map.get_mut(key) {
            if let Cached::Present(value) = entry.value_mut() {
                modify(value);
            }
        }
    }

    pub fn put(&self, key: K, value: V) {
        self.map.insert(key, Cached::Present(value));
    }

    /// Forget the key so the next lookup reads disk again.
    pub fn invalidate(&self, key: &K) {
        self.map.remove(key);
    }
}
