use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tessera_protocol::{Identifier, LoginCommand, ReliableMessage};
use tracing::{debug, info, warn};

use crate::cache::CacheTable;
use crate::error::StorageError;
use crate::fs::{self, Layout};

/// Last accepted login claim with the message that carried it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRecord {
    pub cmd: LoginCommand,
    pub msg: ReliableMessage,
}

/// `login.js` per user.
pub struct LoginTable {
    layout: Layout,
    cache: CacheTable<Identifier, LoginRecord>,
}

impl LoginTable {
    pub fn new(layout: Layout) -> Self {
        Self {
            layout,
            cache: CacheTable::new(),
        }
    }

    fn path(&self, user: &Identifier) -> PathBuf {
        self.layout.entity_dir(user).join("login.js")
    }

    fn load(&self, user: &Identifier) -> Result<Option<LoginRecord>, StorageError> {
        let record: Option<LoginRecord> = fs::read_json(&self.path(user))?;
        Ok(record.filter(|r| r.cmd.identifier == *user))
    }

    /// Accept `cmd` only if `msg` was sent by the identifier it claims and
    /// it is strictly newer than the record on file.
    pub fn save_login_command_message(
        &self,
        cmd: &LoginCommand,
        msg: &ReliableMessage,
    ) -> Result<bool, StorageError> {
        let user = cmd.identifier.without_terminal();
        if *msg.sender() != user {
            warn!(user = %user, sender = %msg.sender(), "login sender mismatch, rejected");
            return Ok(false);
        }
        self.cache.update(
            &user,
            || self.load(&user),
            |slot| {
                if let Some(old) = slot.as_ref() {
                    if cmd.time <= old.cmd.time {
                        debug!(user = %user, new = cmd.time, old = old.cmd.time, "stale login ignored");
                        return Ok(false);
                    }
                }
                let record = LoginRecord {
                    cmd: cmd.clone(),
                    msg: msg.clone(),
                };
                fs::write_json(&self.path(&user), &record)?;
                info!(user = %user, time = cmd.time, "login saved");
                *slot = Some(record);
                Ok(true)
            },
        )
    }

    pub fn get_login_record(&self, user: &Identifier) -> Result<Option<LoginRecord>, StorageError> {
        let user = user.without_terminal();
        self.cache.get_or_load(&user, || self.load(&user))
    }

    pub fn get_login_command(&self, user: &Identifier) -> Result<Option<LoginCommand>, StorageError> {
        Ok(self.get_login_record(user)?.map(|r| r.cmd))
    }

    pub fn get_login_message(&self, user: &Identifier) -> Result<Option<ReliableMessage>, StorageError> {
        Ok(self.get_login_record(user)?.map(|r| r.msg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_protocol::{Address, EntityType, Envelope};

    fn id(seed: &str) -> Identifier {
        Identifier::new(Some(seed), Address::derive(seed.as_bytes(), EntityType::User), None)
    }

    fn login(user: &Identifier, sender: &Identifier, time: i64) -> (LoginCommand, ReliableMessage) {
        let cmd = LoginCommand {
            identifier: user.clone(),
            time,
            agent: Some("test".into()),
            station: None,
        };
        let msg = ReliableMessage {
            envelope: Envelope {
                sender: sender.clone(),
                receiver: Identifier::anyone(),
                time,
                group: None,
            },
            data: vec![1],
            signature: vec![2],
            waiting: None,
        };
        (cmd, msg)
    }

    #[test]
    fn newer_login_replaces_older() {
        let dir = tempfile::tempdir().unwrap();
        let table = LoginTable::new(Layout::new(dir.path()));
        let alice = id("alice");

        let (c1, m1) = login(&alice, &alice, 100);
        assert!(table.save_login_command_message(&c1, &m1).unwrap());
        let (c2, m2) = login(&alice, &alice, 100);
        assert!(!table.save_login_command_message(&c2, &m2).unwrap());
        let (c3, m3) = login(&alice, &alice, 99);
        assert!(!table.save_login_command_message(&c3, &m3).unwrap());
        let (c4, m4) = login(&alice, &alice, 101);
        assert!(table.save_login_command_message(&c4, &m4).unwrap());

        let reopened = LoginTable::new(Layout::new(dir.path()));
        assert_eq!(reopened.get_login_command(&alice).unwrap().unwrap().time, 101);
        assert_eq!(reopened.get_login_message(&alice).unwrap(), Some(m4));
    }

    #[test]
    fn sender_must_match_claim() {
        let dir = tempfile::tempdir().unwrap();
        let table = LoginTable::new(Layout::new(dir.path()));
        let (alice, mallory) = (id("alice"), id("mallory"));
        let (cmd, msg) = login(&alice, &mallory, 1_000);
        assert!(!table.save_login_command_message(&cmd, &msg).unwrap());
        assert_eq!(table.get_login_command(&alice).unwrap(), None);
    }

    #[test]
    fn terminal_does_not_split_records() {
        let dir = tempfile::tempdir().unwrap();
        let table = LoginTable::new(Layout::new(dir.path()));
        let alice = id("alice");
        let phone = Identifier::new(Some("alice"), alice.address().clone(), Some("phone"));
        let (cmd, msg) = login(&phone, &alice, 5);
        assert!(table.save_login_command_message(&cmd, &msg).unwrap());
        assert!(table.get_login_command(&alice).unwrap().is_some());
    }
}
