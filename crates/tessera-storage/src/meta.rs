use std::path::PathBuf;

use tessera_protocol::{Identifier, Meta};
use tracing::{info, warn};

use crate::cache::CacheTable;
use crate::error::StorageError;
use crate::fs::{self, Layout};

/// Genesis records, `meta.js` per entity. Write-once.
pub struct MetaTable {
    layout: Layout,
    cache: CacheTable<Identifier, Meta>,
}

impl MetaTable {
    pub fn new(layout: Layout) -> Self {
        Self {
            layout,
            cache: CacheTable::new(),
        }
    }

    fn path(&self, identifier: &Identifier) -> PathBuf {
        self.layout.entity_dir(identifier).join("meta.js")
    }

    fn load(&self, identifier: &Identifier) -> Result<Option<Meta>, StorageError> {
        let path = self.path(identifier);
        let meta: Option<Meta> = fs::read_json(&path)?;
        Ok(meta.filter(|m| {
            let ok = m.match_identifier(identifier);
            if !ok {
                warn!(identifier = %identifier, path = %path.display(), "stored meta does not match identifier");
            }
            ok
        }))
    }

    /// Accept `meta` for `identifier` when it derives that identifier.
    /// Returns `Ok(false)` on mismatch. A record already on file is kept.
    pub fn save_meta(&self, meta: &Meta, identifier: &Identifier) -> Result<bool, StorageError> {
        if !meta.match_identifier(identifier) {
            warn!(identifier = %identifier, "meta does not match identifier, rejected");
            return Ok(false);
        }
        let identifier = identifier.without_terminal();
        self.cache.update(
            &identifier,
            || self.load(&identifier),
            |slot| {
                if slot.is_some() {
                    return Ok(true);
                }
                fs::write_json(&self.path(&identifier), meta)?;
                info!(identifier = %identifier, "meta saved");
                *slot = Some(meta.clone());
                Ok(true)
            },
        )
    }

    /// Broadcast identifiers never have a genesis record.
    pub fn get_meta(&self, identifier: &Identifier) -> Result<Option<Meta>, StorageError> {
        if identifier.is_broadcast() {
            return Ok(None);
        }
        let identifier = identifier.without_terminal();
        self.cache.get_or_load(&identifier, || self.load(&identifier))
    }
}
