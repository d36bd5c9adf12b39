//! The entity store: all account tables behind one explicitly constructed
//! service object.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tessera_crypto::persistence::{self, SALT_LEN};
use tessera_crypto::{PrivateKey, SecretBox};
use tessera_protocol::account::ANY_DOCUMENT;
use tessera_protocol::{Document, Identifier, LoginCommand, Meta, ReliableMessage};
use tracing::{info, warn};

use crate::ans::AnsTable;
use crate::cipher::FileCipherKeyTable;
use crate::document::{DocumentTable, DOCUMENT_EXPIRES};
use crate::error::StorageError;
use crate::fs::{self, Layout};
use crate::group::GroupTable;
use crate::login::LoginTable;
use crate::meta::MetaTable;
use crate::private::{PrivateKeyTable, PrivateKeyType};

/// ANS alias consulted when a group has no assistants file.
pub const ASSISTANT_ALIAS: &str = "assistant";

#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub root: PathBuf,
    /// Seals the private area when set.
    pub password: Option<String>,
    pub document_expires: Duration,
}

impl StoreOptions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            password: None,
            document_expires: DOCUMENT_EXPIRES,
        }
    }
}

pub struct EntityStore {
    layout: Layout,
    meta: MetaTable,
    documents: DocumentTable,
    private_keys: PrivateKeyTable,
    groups: GroupTable,
    logins: LoginTable,
    ans: AnsTable,
    cipher_keys: Arc<FileCipherKeyTable>,
}

impl EntityStore {
    /// Open (or create) the store under `options.root`.
    pub fn open(options: StoreOptions) -> Result<Self, StorageError> {
        let layout = Layout::new(options.root.clone());
        let secret_box = Arc::new(match options.password.as_deref() {
            Some(password) if !password.is_empty() => {
                let salt = load_or_create_salt(&layout)?;
                SecretBox::new(Some(password), &salt)?
            }
            _ => SecretBox::disabled(),
        });
        Self::with_secret_box(layout, secret_box, options.document_expires)
    }

    /// Open with a ready-made sealing box.
    pub fn with_secret_box(
        layout: Layout,
        secret_box: Arc<SecretBox>,
        document_expires: Duration,
    ) -> Result<Self, StorageError> {
        let ans = AnsTable::open(&layout)?;
        info!(
            root = %layout.root().display(),
            sealed = secret_box.is_enabled(),
            "entity store opened"
        );
        Ok(Self {
            meta: MetaTable::new(layout.clone()),
            documents: DocumentTable::new(layout.clone(), document_expires),
            private_keys: PrivateKeyTable::new(layout.clone(), secret_box.clone()),
            groups: GroupTable::new(layout.clone()),
            logins: LoginTable::new(layout.clone()),
            cipher_keys: Arc::new(FileCipherKeyTable::new(layout.clone(), secret_box)),
            ans,
            layout,
        })
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Durable tier for a [`crate::CipherKeyVault`].
    pub fn cipher_key_table(&self) -> Arc<FileCipherKeyTable> {
        self.cipher_keys.clone()
    }

    // ── Meta ──────────────────────────────────────────────────────────

    pub fn save_meta(&self, meta: &Meta, identifier: &Identifier) -> Result<bool, StorageError> {
        self.meta.save_meta(meta, identifier)
    }

    pub fn get_meta(&self, identifier: &Identifier) -> Result<Option<Meta>, StorageError> {
        self.meta.get_meta(identifier)
    }

    // ── Documents ─────────────────────────────────────────────────────

    /// Accept `doc` only if it verifies against the entity's genesis key.
    pub fn save_document(&self, doc: &Document) -> Result<bool, StorageError> {
        let Some(meta) = self.meta.get_meta(&doc.identifier)? else {
            warn!(identifier = %doc.identifier, "document without meta, rejected");
            return Ok(false);
        };
        if !doc.verify(&meta.public_key) {
            warn!(identifier = %doc.identifier, doc_type = %doc.doc_type, "document signature invalid, rejected");
            return Ok(false);
        }
        self.documents.save_document(doc)?;
        Ok(true)
    }

    /// `doc_type` may be `*` or empty for the entity's default kind.
    pub fn get_document(&self, identifier: &Identifier, doc_type: &str) -> Result<Option<Document>, StorageError> {
        self.documents.get_document(identifier, doc_type)
    }

    pub fn is_expired_document(&self, doc: &mut Document, reset: bool) -> bool {
        self.documents.is_expired_document(doc, reset)
    }

    // ── Private keys ──────────────────────────────────────────────────

    pub fn save_private_key(
        &self,
        user: &Identifier,
        key: &PrivateKey,
        key_type: PrivateKeyType,
    ) -> Result<bool, StorageError> {
        self.private_keys.save_private_key(user, key, key_type)
    }

    pub fn get_private_key_for_signature(&self, user: &Identifier) -> Result<Option<PrivateKey>, StorageError> {
        self.private_keys.private_key_for_signature(user)
    }

    pub fn get_private_key_for_visa_signature(&self, user: &Identifier) -> Result<Option<PrivateKey>, StorageError> {
        self.private_keys.private_key_for_visa_signature(user)
    }

    pub fn get_private_keys_for_decryption(&self, user: &Identifier) -> Result<Vec<PrivateKey>, StorageError> {
        self.private_keys.private_keys_for_decryption(user)
    }

    // ── Groups ────────────────────────────────────────────────────────

    pub fn get_members(&self, group: &Identifier) -> Result<Vec<Identifier>, StorageError> {
        self.groups.get_members(group)
    }

    pub fn save_members(&self, members: &[Identifier], group: &Identifier) -> Result<(), StorageError> {
        self.groups.save_members(members, group)
    }

    pub fn add_member(&self, member: &Identifier, group: &Identifier) -> Result<bool, StorageError> {
        self.groups.add_member(member, group)
    }

    pub fn remove_member(&self, member: &Identifier, group: &Identifier) -> Result<bool, StorageError> {
        self.groups.remove_member(member, group)
    }

    pub fn contain_member(&self, member: &Identifier, group: &Identifier) -> Result<bool, StorageError> {
        Ok(self.get_members(group)?.contains(member))
    }

    /// The member whose genesis key is the group's genesis key.
    pub fn get_founder(&self, group: &Identifier) -> Result<Option<Identifier>, StorageError> {
        let Some(group_meta) = self.get_meta(group)? else {
            return Ok(None);
        };
        for member in self.get_members(group)? {
            if let Some(meta) = self.get_meta(&member)? {
                if group_meta.match_public_key(&meta.public_key) {
                    return Ok(Some(member));
                }
            }
        }
        Ok(None)
    }

    pub fn get_owner(&self, group: &Identifier) -> Result<Option<Identifier>, StorageError> {
        if group.is_broadcast() {
            return Ok(Some(Identifier::anyone()));
        }
        self.get_founder(group)
    }

    pub fn is_owner(&self, member: &Identifier, group: &Identifier) -> Result<bool, StorageError> {
        Ok(self.get_owner(group)?.as_ref() == Some(member))
    }

    /// The group's assistants file, else the ANS `assistant` record.
    pub fn get_assistants(&self, group: &Identifier) -> Result<Vec<Identifier>, StorageError> {
        if let Some(list) = self.groups.get_assistants(group)? {
            return Ok(list);
        }
        Ok(self.ans.get_identifier(ASSISTANT_ALIAS).into_iter().collect())
    }

    pub fn save_assistants(&self, assistants: &[Identifier], group: &Identifier) -> Result<(), StorageError> {
        self.groups.save_assistants(assistants, group)
    }

    pub fn contain_assistant(&self, user: &Identifier, group: &Identifier) -> Result<bool, StorageError> {
        Ok(self.get_assistants(group)?.contains(user))
    }

    // ── Login ─────────────────────────────────────────────────────────

    pub fn save_login_command_message(
        &self,
        cmd: &LoginCommand,
        msg: &ReliableMessage,
    ) -> Result<bool, StorageError> {
        self.logins.save_login_command_message(cmd, msg)
    }

    pub fn get_login_command(&self, user: &Identifier) -> Result<Option<LoginCommand>, StorageError> {
        self.logins.get_login_command(user)
    }

    pub fn get_login_message(&self, user: &Identifier) -> Result<Option<ReliableMessage>, StorageError> {
        self.logins.get_login_message(user)
    }

    // ── ANS ───────────────────────────────────────────────────────────

    pub fn ans(&self) -> &AnsTable {
        &self.ans
    }

    /// Alias first, then the `name@address/terminal` grammar.
    pub fn parse_identifier(&self, text: &str) -> Option<Identifier> {
        self.ans
            .get_identifier(text)
            .or_else(|| text.parse().ok())
    }

    /// Display name: document `name`, else the identifier's name, else the
    /// address.
    pub fn get_name(&self, identifier: &Identifier) -> Result<String, StorageError> {
        if let Some(doc) = self.get_document(identifier, ANY_DOCUMENT)? {
            if let Some(name) = doc.name() {
                return Ok(name.to_string());
            }
        }
        Ok(identifier
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| identifier.address().to_string()))
    }
}

fn load_or_create_salt(layout: &Layout) -> Result<[u8; SALT_LEN], StorageError> {
    let path = layout.salt_path();
    if let Some(data) = fs::read_file(&path)? {
        let text = String::from_utf8_lossy(&data);
        return hex::decode(text.trim())
            .ok()
            .and_then(|raw| <[u8; SALT_LEN]>::try_from(raw).ok())
            .ok_or_else(|| {
                StorageError::io(
                    &path,
                    std::io::Error::new(std::io::ErrorKind::InvalidData, "corrupt salt file"),
                )
            });
    }
    let salt = persistence::generate_salt()?;
    fs::write_private_file(&path, hex::encode(salt).as_bytes())?;
    info!(path = %path.display(), "created private-area salt");
    Ok(salt)
}
