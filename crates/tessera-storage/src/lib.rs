//! Tessera entity storage.
//!
//! Two-tier (memory + file) tables for genesis records, documents, private
//! keys, group membership, login records and the alias table, plus the
//! per-conversation cipher key vault layered on its own key table.

pub mod ans;
pub mod cache;
pub mod cipher;
pub mod document;
pub mod error;
pub mod fs;
pub mod group;
pub mod login;
pub mod meta;
pub mod private;
pub mod store;
pub mod vault;

pub use cipher::{CipherKeyTable, FileCipherKeyTable};
pub use error::StorageError;
pub use private::PrivateKeyType;
pub use store::{EntityStore, StoreOptions};
pub use vault::CipherKeyVault;
