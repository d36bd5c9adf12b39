use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tessera_protocol::account::{ANY_DOCUMENT, BULLETIN, PROFILE, VISA};
use tessera_protocol::{Document, Identifier};
use tracing::info;

use crate::cache::CacheTable;
use crate::error::StorageError;
use crate::fs::{self, Layout};

/// Default soft-expiry window for cached documents.
pub const DOCUMENT_EXPIRES: Duration = Duration::from_secs(1800);

pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Pick the concrete document kind for a wildcard request: users carry a
/// visa, groups a bulletin, everything else a plain profile.
pub fn resolve_doc_type(identifier: &Identifier, doc_type: &str) -> String {
    if !doc_type.is_empty() && doc_type != ANY_DOCUMENT {
        return doc_type.to_string();
    }
    if identifier.is_user() {
        VISA.to_string()
    } else if identifier.is_group() {
        BULLETIN.to_string()
    } else {
        PROFILE.to_string()
    }
}

/// Profile documents: `visa.js` for visas, `doc.js` for other kinds.
pub struct DocumentTable {
    layout: Layout,
    cache: CacheTable<(Identifier, String), Document>,
    expires: Duration,
}

impl DocumentTable {
    pub fn new(layout: Layout, expires: Duration) -> Self {
        Self {
            layout,
            cache: CacheTable::new(),
            expires,
        }
    }

    fn path(&self, identifier: &Identifier, doc_type: &str) -> PathBuf {
        let file = if doc_type == VISA { "visa.js" } else { "doc.js" };
        self.layout.entity_dir(identifier).join(file)
    }

    fn load(&self, identifier: &Identifier, doc_type: &str) -> Result<Option<Document>, StorageError> {
        let doc: Option<Document> = fs::read_json(&self.path(identifier, doc_type))?;
        // visa.js and doc.js may hold a different kind than asked for
        Ok(doc.filter(|d| d.doc_type == doc_type && d.identifier == *identifier))
    }

    /// Store an already verified document, dropping any expiry stamp so the
    /// fresh copy gets a new window on its next expiry check.
    pub fn save_document(&self, doc: &Document) -> Result<(), StorageError> {
        let mut doc = doc.clone();
        doc.expires = None;
        doc.identifier = doc.identifier.without_terminal();
        let key = (doc.identifier.clone(), doc.doc_type.clone());
        fs::write_json(&self.path(&key.0, &key.1), &doc)?;
        info!(identifier = %key.0, doc_type = %key.1, "document saved");
        self.cache.put(key, doc);
        Ok(())
    }

    pub fn get_document(&self, identifier: &Identifier, doc_type: &str) -> Result<Option<Document>, StorageError> {
        let identifier = identifier.without_terminal();
        let doc_type = resolve_doc_type(&identifier, doc_type);
        let key = (identifier, doc_type);
        self.cache.get_or_load(&key, || self.load(&key.0, &key.1))
    }

    /// Stamp a first-seen expiry on `doc` if it has none, then report
    /// whether the stamp has passed. With `reset`, an expired document gets a
    /// fresh window. The cached copy receives the same stamp.
    pub fn is_expired_document(&self, doc: &mut Document, reset: bool) -> bool {
        self.is_expired_at(doc, reset, unix_now())
    }

    fn is_expired_at(&self, doc: &mut Document, reset: bool, now: i64) -> bool {
        let next = now + self.expires.as_secs() as i64;
        let expired = match doc.expires {
            None => {
                doc.expires = Some(next);
                false
            }
            Some(stamp) if now > stamp => {
                if reset {
                    doc.expires = Some(next);
                }
                true
            }
            Some(_) => false,
        };
        let key = (doc.identifier.without_terminal(), doc.doc_type.clone());
        let stamp = doc.expires;
        self.cache.modify_present(&key, |cached| {
            if cached.signature == doc.signature {
                cached.expires = stamp;
            }
        });
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_crypto::{KeyAlgorithm, PrivateKey};
    use tessera_protocol::{EntityType, Meta};

    fn signed_doc(doc_type: &str, network: EntityType) -> Document {
        let key = PrivateKey::generate(KeyAlgorithm::Ed25519).unwrap();
        let meta = Meta::generate(&key, Some("alice")).unwrap();
        let mut doc = Document::new(meta.generate_identifier(network, None), doc_type);
        doc.set_property("name", "Alice");
        doc.sign(&key).unwrap();
        doc
    }

    #[test]
    fn wildcard_type_resolution() {
        let user = signed_doc(VISA, EntityType::User).identifier;
        let group = signed_doc(BULLETIN, EntityType::Group).identifier;
        let station = signed_doc(PROFILE, EntityType::Station).identifier;
        assert_eq!(resolve_doc_type(&user, ANY_DOCUMENT), VISA);
        assert_eq!(resolve_doc_type(&user, ""), VISA);
        assert_eq!(resolve_doc_type(&group, "*"), BULLETIN);
        assert_eq!(resolve_doc_type(&station, "*"), PROFILE);
        assert_eq!(resolve_doc_type(&user, PROFILE), PROFILE);
    }

    #[test]
    fn save_clears_expiry_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let table = DocumentTable::new(Layout::new(dir.path()), DOCUMENT_EXPIRES);
        let mut doc = signed_doc(VISA, EntityType::User);
        doc.expires = Some(123);
        table.save_document(&doc).unwrap();

        let fresh = DocumentTable::new(Layout::new(dir.path()), DOCUMENT_EXPIRES);
        let loaded = fresh.get_document(&doc.identifier, "*").unwrap().unwrap();
        assert_eq!(loaded.expires, None);
        assert_eq!(loaded.name(), Some("Alice"));
        assert!(dir.path().join("mkm").exists());
        assert!(fresh.path(&doc.identifier, VISA).ends_with("visa.js"));
    }

    #[test]
    fn other_kind_in_file_not_returned() {
        let dir = tempfile::tempdir().unwrap();
        let table = DocumentTable::new(Layout::new(dir.path()), DOCUMENT_EXPIRES);
        let doc = signed_doc(PROFILE, EntityType::User);
        table.save_document(&doc).unwrap();
        let fresh = DocumentTable::new(Layout::new(dir.path()), DOCUMENT_EXPIRES);
        assert!(fresh.get_document(&doc.identifier, BULLETIN).unwrap().is_none());
        assert!(fresh.get_document(&doc.identifier, PROFILE).unwrap().is_some());
    }

    #[test]
    fn expiry_stamped_lazily() {
        let dir = tempfile::tempdir().unwrap();
        let table = DocumentTable::new(Layout::new(dir.path()), DOCUMENT_EXPIRES);
        let doc = signed_doc(VISA, EntityType::User);
        table.save_document(&doc).unwrap();

        let mut copy = table.get_document(&doc.identifier, VISA).unwrap().unwrap();
        assert!(!table.is_expired_at(&mut copy, false, 1_000));
        assert_eq!(copy.expires, Some(2_800));
        let cached = table.get_document(&doc.identifier, VISA).unwrap().unwrap();
        assert_eq!(cached.expires, Some(2_800));

        assert!(!table.is_expired_at(&mut copy, false, 2_800));
        assert!(table.is_expired_at(&mut copy, false, 2_801));
        assert_eq!(copy.expires, Some(2_800));
    }

    #[test]
    fn reset_restamps_expired_document() {
        let dir = tempfile::tempdir().unwrap();
        let table = DocumentTable::new(Layout::new(dir.path()), DOCUMENT_EXPIRES);
        let mut doc = signed_doc(VISA, EntityType::User);
        doc.expires = Some(100);
        assert!(table.is_expired_at(&mut doc, true, 200));
        assert_eq!(doc.expires, Some(2_000));
        assert!(!table.is_expired_at(&mut doc, true, 300));
    }
}
