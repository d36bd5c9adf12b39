//! Address name service: alias to identifier records in `ans.txt`.
//!
//! The file holds one `alias<TAB>identifier` record per line. It is read
//! once when the table opens; reserved aliases are applied afterwards and
//! always win.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::RwLock;

use tessera_protocol::Identifier;
use tracing::{info, warn};

use crate::error::StorageError;
use crate::fs::{self, Layout};

/// Aliases that always resolve to the well-known identifiers.
pub fn reserved_records() -> [(&'static str, Identifier); 5] {
    [
        ("all", Identifier::everyone()),
        ("everyone", Identifier::everyone()),
        ("anyone", Identifier::anyone()),
        ("owner", Identifier::anyone()),
        ("founder", Identifier::founder()),
    ]
}

pub fn is_reserved(alias: &str) -> bool {
    reserved_records().iter().any(|(name, _)| *name == alias)
}

pub struct AnsTable {
    path: PathBuf,
    records: RwLock<BTreeMap<String, Identifier>>,
}

impl AnsTable {
    /// Load `ans.txt`. Bad lines are logged and skipped.
    pub fn open(layout: &Layout) -> Result<Self, StorageError> {
        let path = layout.ans_path();
        let mut records = BTreeMap::new();
        if let Some(data) = fs::read_file(&path)? {
            let text = String::from_utf8_lossy(&data);
            for (number, line) in text.lines().enumerate() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let Some((alias, value)) = line.split_once('\t') else {
                    warn!(path = %path.display(), line = number + 1, "ANS record without tab, skipped");
                    continue;
                };
                match value.trim().parse::<Identifier>() {
                    Ok(id) if !alias.trim().is_empty() => {
                        records.insert(alias.trim().to_string(), id);
                    }
                    Ok(_) => warn!(path = %path.display(), line = number + 1, "ANS record with empty alias, skipped"),
                    Err(e) => warn!(path = %path.display(), line = number + 1, "invalid ANS record: {}", e),
                }
            }
        }
        for (alias, id) in reserved_records() {
            records.insert(alias.to_string(), id);
        }
        info!(path = %path.display(), count = records.len(), "ANS records loaded");
        Ok(Self {
            path,
            records: RwLock::new(records),
        })
    }

    pub fn get_identifier(&self, alias: &str) -> Option<Identifier> {
        let records = self.records.read().unwrap_or_else(|p| p.into_inner());
        records.get(alias).cloned()
    }

    /// All aliases pointing at `identifier`.
    pub fn get_names(&self, identifier: &Identifier) -> Vec<String> {
        let records = self.records.read().unwrap_or_else(|p| p.into_inner());
        records
            .iter()
            .filter(|(_, id)| *id == identifier)
            .map(|(alias, _)| alias.clone())
            .collect()
    }

    /// Empty and reserved aliases are rejected with `Ok(false)`.
    pub fn add_record(&self, alias: &str, identifier: &Identifier) -> Result<bool, StorageError> {
        let alias = alias.trim();
        if alias.is_empty() || alias.contains('\t') || is_reserved(alias) {
            warn!(alias, "ANS alias rejected");
            return Ok(false);
        }
        let mut records = self.records.write().unwrap_or_else(|p| p.into_inner());
        let previous = records.insert(alias.to_string(), identifier.clone());
        if let Err(e) = self.write_all(&records) {
            match previous {
                Some(old) => records.insert(alias.to_string(), old),
                None => records.remove(alias),
            };
            return Err(e);
        }
        info!(alias, identifier = %identifier, "ANS record added");
        Ok(true)
    }

    /// `Ok(false)` if `alias` is unknown or reserved.
    pub fn remove_record(&self, alias: &str) -> Result<bool, StorageError> {
        if is_reserved(alias) {
            return Ok(false);
        }
        let mut records = self.records.write().unwrap_or_else(|p| p.into_inner());
        let Some(old) = records.remove(alias) else {
            return Ok(false);
        };
        if let Err(e) = self.write_all(&records) {
            records.insert(alias.to_string(), old);
            return Err(e);
        }
        info!(alias, "ANS record removed");
        Ok(true)
    }

    /// Rewrite the whole file. Reserved aliases are not persisted.
    fn write_all(&self, records: &BTreeMap<String, Identifier>) -> Result<(), StorageError> {
        let mut text = String::new();
        for (alias, id) in records.iter().filter(|(alias, _)| !is_reserved(alias)) {
            text.push_str(alias);
            text.push('\t');
            text.push_str(&id.to_string());
            text.push('\n');
        }
        fs::write_file(&self.path, text.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_protocol::{Address, EntityType};

    fn bot() -> Identifier {
        Identifier::new(Some("assistant"), Address::derive(b"bot", EntityType::User), None)
    }

    #[test]
    fn reserved_names_resolve() {
        let dir = tempfile::tempdir().unwrap();
        let ans = AnsTable::open(&Layout::new(dir.path())).unwrap();
        assert_eq!(ans.get_identifier("all"), Some(Identifier::everyone()));
        assert_eq!(ans.get_identifier("everyone"), Some(Identifier::everyone()));
        assert_eq!(ans.get_identifier("anyone"), Some(Identifier::anyone()));
        assert_eq!(ans.get_identifier("owner"), Some(Identifier::anyone()));
        assert_eq!(ans.get_identifier("founder"), Some(Identifier::founder()));
        assert_eq!(ans.get_identifier("nobody"), None);
    }

    #[test]
    fn reserved_names_win_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        let text = format!("everyone\t{}\nassistant\t{}\nbroken line\nx\tnot-an-id\n", bot(), bot());
        fs::write_file(&layout.ans_path(), text.as_bytes()).unwrap();
        let ans = AnsTable::open(&layout).unwrap();
        assert_eq!(ans.get_identifier("everyone"), Some(Identifier::everyone()));
        assert_eq!(ans.get_identifier("assistant"), Some(bot()));
        assert_eq!(ans.get_identifier("x"), None);
    }

    #[test]
    fn add_and_remove_rewrite_file() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        let ans = AnsTable::open(&layout).unwrap();
        assert!(!ans.add_record("", &bot()).unwrap());
        assert!(!ans.add_record("founder", &bot()).unwrap());
        assert!(ans.add_record("assistant", &bot()).unwrap());
        assert!(ans.add_record("helper", &bot()).unwrap());
        assert_eq!(ans.get_names(&bot()), vec!["assistant".to_string(), "helper".to_string()]);

        let text = std::fs::read_to_string(layout.ans_path()).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(!text.contains("founder"));

        assert!(ans.remove_record("helper").unwrap());
        assert!(!ans.remove_record("helper").unwrap());
        assert!(!ans.remove_record("anyone").unwrap());

        let reopened = AnsTable::open(&layout).unwrap();
        assert_eq!(reopened.get_identifier("assistant"), Some(bot()));
        assert_eq!(reopened.get_identifier("helper"), None);
    }
}
