use std::path::PathBuf;

use tessera_protocol::Identifier;
use tracing::info;

use crate::cache::CacheTable;
use crate::error::StorageError;
use crate::fs::{self, Layout};

/// Member and assistant lists, one identifier per line. Every mutation
/// rewrites the whole file.
pub struct GroupTable {
    layout: Layout,
    members: CacheTable<Identifier, Vec<Identifier>>,
    assistants: CacheTable<Identifier, Vec<Identifier>>,
}

impl GroupTable {
    pub fn new(layout: Layout) -> Self {
        Self {
            layout,
            members: CacheTable::new(),
            assistants: CacheTable::new(),
        }
    }

    fn members_path(&self, group: &Identifier) -> PathBuf {
        self.layout.entity_dir(group).join("members.txt")
    }

    fn assistants_path(&self, group: &Identifier) -> PathBuf {
        self.layout.entity_dir(group).join("assistants.txt")
    }

    pub fn get_members(&self, group: &Identifier) -> Result<Vec<Identifier>, StorageError> {
        let group = group.without_terminal();
        Ok(self
            .members
            .get_or_load(&group, || fs::read_identifiers(&self.members_path(&group)))?
            .unwrap_or_default())
    }

    /// Replace the member list. Duplicates are dropped, first position wins.
    pub fn save_members(&self, members: &[Identifier], group: &Identifier) -> Result<(), StorageError> {
        let group = group.without_terminal();
        let list = dedup(members);
        self.members.update(
            &group,
            || Ok(None),
            |slot| {
                fs::write_identifiers(&self.members_path(&group), &list)?;
                *slot = Some(list.clone());
                Ok(())
            },
        )?;
        info!(group = %group, count = list.len(), "members saved");
        Ok(())
    }

    /// `Ok(false)` if `member` is already listed.
    pub fn add_member(&self, member: &Identifier, group: &Identifier) -> Result<bool, StorageError> {
        self.mutate_members(group, |list| {
            if list.contains(member) {
                return false;
            }
            list.push(member.without_terminal());
            true
        })
    }

    /// `Ok(false)` if `member` is not listed.
    pub fn remove_member(&self, member: &Identifier, group: &Identifier) -> Result<bool, StorageError> {
        self.mutate_members(group, |list| {
            let before = list.len();
            list.retain(|m| m != member);
            list.len() != before
        })
    }

    fn mutate_members<F>(&self, group: &Identifier, mutate: F) -> Result<bool, StorageError>
    where
        F: FnOnce(&mut Vec<Identifier>) -> bool,
    {
        let group = group.without_terminal();
        self.members.update(
            &group,
            || fs::read_identifiers(&self.members_path(&group)),
            |slot| {
                let mut list = slot.clone().unwrap_or_default();
                if !mutate(&mut list) {
                    return Ok(false);
                }
                fs::write_identifiers(&self.members_path(&group), &list)?;
                info!(group = %group, count = list.len(), "members updated");
                *slot = Some(list);
                Ok(true)
            },
        )
    }

    /// Assistants recorded on file; `None` if the group has no list.
    pub fn get_assistants(&self, group: &Identifier) -> Result<Option<Vec<Identifier>>, StorageError> {
        let group = group.without_terminal();
        self.assistants
            .get_or_load(&group, || fs::read_identifiers(&self.assistants_path(&group)))
    }

    pub fn save_assistants(&self, assistants: &[Identifier], group: &Identifier) -> Result<(), StorageError> {
        let group = group.without_terminal();
        let list = dedup(assistants);
        fs::write_identifiers(&self.assistants_path(&group), &list)?;
        self.assistants.put(group, list);
        Ok(())
    }
}

fn dedup(list: &[Identifier]) -> Vec<Identifier> {
    let mut out: Vec<Identifier> = Vec::with_capacity(list.len());
    for id in list {
        if !out.contains(id) {
            out.push(id.without_terminal());
        }
    }
    out
}
