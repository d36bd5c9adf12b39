//! On-disk layout and file helpers.
//!
//! ```text
//! {root}/mkm/{z}/{y}/{x}/{w}/{address}/   per-entity records, sharded by
//!                                         the last four address characters
//! {root}/private/{address}/               restricted key area
//! {root}/ans.txt                          alias table
//! ```

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tessera_protocol::Identifier;
use tracing::{debug, warn};

use crate::error::StorageError;

#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `{root}/mkm/{z}/{y}/{x}/{w}/{address}` where `wxyz` are the last four
    /// characters of the address.
    pub fn entity_dir(&self, identifier: &Identifier) -> PathBuf {
        let address = identifier.address().as_str();
        let mut dir = self.root.join("mkm");
        for ch in address.chars().rev().take(4) {
            dir.push(ch.to_string());
        }
        dir.join(address)
    }

    pub fn private_dir(&self, identifier: &Identifier) -> PathBuf {
        self.root
            .join("private")
            .join(identifier.address().as_str())
    }

    pub fn ans_path(&self) -> PathBuf {
        self.root.join("ans.txt")
    }

    pub fn salt_path(&self) -> PathBuf {
        self.root.join("private").join("salt")
    }
}

/// Read a whole file. A missing file is `Ok(None)`.
pub fn read_file(path: &Path) -> Result<Option<Vec<u8>>, StorageError> {
    match fs::read(path) {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StorageError::io(path, e)),
    }
}

/// Write a whole file, creating parent directories.
pub fn write_file(path: &Path, data: &[u8]) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
    }
    fs::write(path, data).map_err(|e| StorageError::io(path, e))?;
    debug!(path = %path.display(), bytes = data.len(), "file written");
    Ok(())
}

/// Write into the private area: owner-only permissions where supported.
/// The directory and file are restricted before any data lands.
#[cfg(unix)]
pub fn write_private_file(path: &Path, data: &[u8]) -> Result<(), StorageError> {
    use std::io::Write;
    use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt};

    if let Some(parent) = path.parent() {
        fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(parent)
            .map_err(|e| StorageError::io(parent, e))?;
        fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
            .map_err(|e| StorageError::io(parent, e))?;
    }
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .map_err(|e| StorageError::io(path, e))?;
    // `mode` only applies on creation
    file.set_permissions(fs::Permissions::from_mode(0o600))
        .map_err(|e| StorageError::io(path, e))?;
    file.write_all(data).map_err(|e| StorageError::io(path, e))?;
    debug!(path = %path.display(), bytes = data.len(), "private file written");
    Ok(())
}

#[cfg(not(unix))]
pub fn write_private_file(path: &Path, data: &[u8]) -> Result<(), StorageError> {
    write_file(path, data)
}

pub fn remove_file(path: &Path) -> Result<(), StorageError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StorageError::io(path, e)),
    }
}

/// Parse JSON bytes read from `path`. Corrupt records are skipped.
pub fn parse_json<T: DeserializeOwned>(path: &Path, data: &[u8]) -> Option<T> {
    match serde_json::from_slice(data) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(path = %path.display(), "skipping corrupt record: {}", e);
            None
        }
    }
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StorageError> {
    Ok(read_file(path)?.and_then(|data| parse_json(path, &data)))
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    let data = serde_json::to_vec_pretty(value)?;
    write_file(path, &data)
}

/// Newline-delimited identifiers. Blank lines are ignored, unparsable ones
/// are skipped.
pub fn read_identifiers(path: &Path) -> Result<Option<Vec<Identifier>>, StorageError> {
    let Some(data) = read_file(path)? else {
        return Ok(None);
    };
    let text = String::from_utf8_lossy(&data);
    let mut list = Vec::new();
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        match line.parse::<Identifier>() {
            Ok(id) => list.push(id),
            Err(e) => warn!(path = %path.display(), "skipping bad identifier line: {}", e),
        }
    }
    Ok(Some(list))
}

pub fn write_identifiers(path: &Path, list: &[Identifier]) -> Result<(), StorageError> {
    let mut text = String::new();
    for id in list {
        text.push_str(&id.to_string());
        text.push('\n');
    }
    write_file(path, text.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_protocol::{Address, EntityType};

    fn sample_id() -> Identifier {
        Identifier::new(Some("alice"), Address::derive(b"pk", EntityType::User), None)
    }

    #[test]
    fn entity_dir_is_sharded_by_address_tail() {
        let layout = Layout::new("/data");
        let id = sample_id();
        let address = id.address().as_str().to_string();
        let tail: Vec<char> = address.chars().rev().take(4).collect();
        let expected = PathBuf::from(format!(
            "/data/mkm/{}/{}/{}/{}/{}",
            tail[0], tail[1], tail[2], tail[3], address
        ));
        assert_eq!(layout.entity_dir(&id), expected);
        assert_eq!(
            layout.private_dir(&id),
            PathBuf::from(format!("/data/private/{address}"))
        );
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_file(&dir.path().join("nope")).unwrap().is_none());
    }

    #[test]
    fn write_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/c.js");
        write_json(&path, &vec![1, 2, 3]).unwrap();
        let back: Vec<u32> = read_json(&path).unwrap().unwrap();
        assert_eq!(back, vec![1, 2, 3]);
    }

    #[cfg(unix)]
    #[test]
    fn private_files_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("private/abc/secret");
        write_private_file(&path, b"first").unwrap();
        let mode = |p: &Path| std::fs::metadata(p).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode(&path), 0o600);
        assert_eq!(mode(path.parent().unwrap()), 0o700);

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
        write_private_file(&path, b"second").unwrap();
        assert_eq!(mode(&path), 0o600);
        assert_eq!(std::fs::read(&path).unwrap(), b"second");
    }

    #[test]
    fn corrupt_json_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.js");
        write_file(&path, b"{not json").unwrap();
        let value: Option<Vec<u32>> = read_json(&path).unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn identifier_lines_skip_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("members.txt");
        let text = format!("{}\n\nnot an id\n{}\n", sample_id(), Identifier::anyone());
        write_file(&path, text.as_bytes()).unwrap();
        let list = read_identifiers(&path).unwrap().unwrap();
        assert_eq!(list, vec![sample_id(), Identifier::anyone()]);
    }
}
