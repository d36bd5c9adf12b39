//! Decides whether a group message can be processed now or has to wait for
//! group metadata.

use std::sync::Arc;

use serde::Deserialize;
use tessera_protocol::{Content, Identifier};
use tessera_storage::{EntityStore, StorageError};
use tracing::debug;

/// Requests for missing metadata. Implementations send the queries; a
/// `true` return means the query went out.
pub trait MetadataQuery: Send + Sync {
    fn query_meta(&self, identifier: &Identifier) -> bool;

    fn query_document(&self, identifier: &Identifier, doc_type: &str) -> bool;

    fn query_group_info(&self, group: &Identifier, members: &[Identifier]) -> bool;
}

/// Used when no query layer is attached: logs the request and reports that
/// nothing was sent, so the gate lets messages through.
pub struct LoggingQuery;

impl MetadataQuery for LoggingQuery {
    fn query_meta(&self, identifier: &Identifier) -> bool {
        debug!(identifier = %identifier, "meta query dropped, no query layer");
        false
    }

    fn query_document(&self, identifier: &Identifier, doc_type: &str) -> bool {
        debug!(identifier = %identifier, doc_type, "document query dropped, no query layer");
        false
    }

    fn query_group_info(&self, group: &Identifier, members: &[Identifier]) -> bool {
        debug!(group = %group, asked = members.len(), "group query dropped, no query layer");
        false
    }
}

/// Which group-info queries must succeed before a message from a sender
/// outside the group is deferred.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MembershipQuery {
    /// Both the assistants query and the owner query.
    #[default]
    All,
    /// Either one.
    Any,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Process,
    /// Hold the message until metadata for `waiting` arrives.
    Defer { waiting: Identifier },
}

pub struct GroupGate {
    store: Arc<EntityStore>,
    query: Arc<dyn MetadataQuery>,
    policy: MembershipQuery,
}

impl GroupGate {
    pub fn new(store: Arc<EntityStore>, query: Arc<dyn MetadataQuery>, policy: MembershipQuery) -> Self {
        Self {
            store,
            query,
            policy,
        }
    }

    pub fn check(&self, content: &Content, sender: &Identifier) -> Result<GateDecision, StorageError> {
        let Some(group) = content.group.as_ref().filter(|g| !g.is_broadcast()) else {
            return Ok(GateDecision::Process);
        };
        let defer = GateDecision::Defer {
            waiting: group.clone(),
        };

        if self.store.get_meta(group)?.is_none() {
            let queried = self.query.query_meta(group);
            debug!(group = %group, queried, "group meta missing, deferring");
            return Ok(defer);
        }

        if self.is_empty_group(group)? {
            if content.is_group_bootstrap() {
                return Ok(GateDecision::Process);
            }
            let queried = self
                .query
                .query_group_info(group, std::slice::from_ref(sender));
            debug!(group = %group, sender = %sender, queried, "group not set up");
            return Ok(if queried { defer } else { GateDecision::Process });
        }

        if self.store.contain_member(sender, group)?
            || self.store.contain_assistant(sender, group)?
            || self.store.is_owner(sender, group)?
        {
            return Ok(GateDecision::Process);
        }

        let assistants = self.store.get_assistants(group)?;
        let asked_assistants = !assistants.is_empty() && self.query.query_group_info(group, &assistants);
        let asked_owner = match self.store.get_owner(group)? {
            Some(owner) => self.query.query_group_info(group, std::slice::from_ref(&owner)),
            None => false,
        };
        let queried = match self.policy {
            MembershipQuery::All => asked_assistants && asked_owner,
            MembershipQuery::Any => asked_assistants || asked_owner,
        };
        debug!(
            group = %group,
            sender = %sender,
            asked_assistants,
            asked_owner,
            deferred = queried,
            "sender not in group"
        );
        Ok(if queried { defer } else { GateDecision::Process })
    }

    /// No members, or members but no owner.
    fn is_empty_group(&self, group: &Identifier) -> Result<bool, StorageError> {
        if self.store.get_members(group)?.is_empty() {
            return Ok(true);
        }
        Ok(self.store.get_owner(group)?.is_none())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use tessera_crypto::{KeyAlgorithm, PrivateKey};
    use tessera_protocol::messages::{INVITE, RESET};
    use tessera_protocol::{EntityType, Meta};
    use tessera_storage::StoreOptions;

    #[derive(Default)]
    struct RecordingQuery {
        accept: bool,
        metas: Mutex<Vec<Identifier>>,
        group_infos: Mutex<Vec<Vec<Identifier>>>,
    }

    impl RecordingQuery {
        fn accepting() -> Self {
            Self {
                accept: true,
                ..Default::default()
            }
        }
    }

    impl MetadataQuery for RecordingQuery {
        fn query_meta(&self, identifier: &Identifier) -> bool {
            self.metas.lock().unwrap().push(identifier.clone());
            self.accept
        }

        fn query_document(&self, _identifier: &Identifier, _doc_type: &str) -> bool {
            self.accept
        }

        fn query_group_info(&self, _group: &Identifier, members: &[Identifier]) -> bool {
            self.group_infos.lock().unwrap().push(members.to_vec());
            self.accept
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<EntityStore>,
        founder: Identifier,
        group: Identifier,
        group_meta: Meta,
    }

    fn user(store: &EntityStore, seed: &str) -> (PrivateKey, Identifier) {
        let key = PrivateKey::generate(KeyAlgorithm::Ed25519).unwrap();
        let meta = Meta::generate(&key, Some(seed)).unwrap();
        let id = meta.generate_identifier(EntityType::User, None);
        store.save_meta(&meta, &id).unwrap();
        (key, id)
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(EntityStore::open(StoreOptions::new(dir.path())).unwrap());
        let (key, founder) = user(&store, "founder");
        let group_meta = Meta::generate(&key, Some("chat")).unwrap();
        let group = group_meta.generate_identifier(EntityType::Group, None);
        Fixture {
            _dir: dir,
            store,
            founder,
            group,
            group_meta,
        }
    }

    fn populate(f: &Fixture) {
        f.store.save_meta(&f.group_meta, &f.group).unwrap();
        f.store.save_members(&[f.founder.clone()], &f.group).unwrap();
    }

    fn gate(f: &Fixture, query: Arc<RecordingQuery>, policy: MembershipQuery) -> GroupGate {
        GroupGate::new(f.store.clone(), query, policy)
    }

    fn text_in(group: &Identifier) -> Content {
        Content::text("hello", 1).with_group(group.clone())
    }

    #[test]
    fn personal_and_broadcast_messages_pass() {
        let f = fixture();
        let gate = gate(&f, Arc::new(RecordingQuery::default()), MembershipQuery::All);
        let (_, stranger) = user(&f.store, "stranger");
        assert_eq!(gate.check(&Content::text("hi", 1), &stranger).unwrap(), GateDecision::Process);
        let broadcast = text_in(&Identifier::everyone());
        assert_eq!(gate.check(&broadcast, &stranger).unwrap(), GateDecision::Process);
    }

    #[test]
    fn unknown_group_meta_always_defers() {
        let f = fixture();
        let query = Arc::new(RecordingQuery::default());
        let gate = gate(&f, query.clone(), MembershipQuery::Any);
        let decision = gate.check(&text_in(&f.group), &f.founder).unwrap();
        assert_eq!(decision, GateDecision::Defer { waiting: f.group.clone() });
        assert_eq!(query.metas.lock().unwrap().as_slice(), &[f.group.clone()]);
    }

    #[test]
    fn bootstrap_commands_pass_uninitialized_group() {
        let f = fixture();
        f.store.save_meta(&f.group_meta, &f.group).unwrap();
        let query = Arc::new(RecordingQuery::accepting());
        let gate = gate(&f, query.clone(), MembershipQuery::All);
        let (_, stranger) = user(&f.store, "stranger");
        for name in [INVITE, RESET] {
            let content = Content::command(name, 1).with_group(f.group.clone());
            assert_eq!(gate.check(&content, &stranger).unwrap(), GateDecision::Process);
        }
        assert!(query.group_infos.lock().unwrap().is_empty());
    }

    #[test]
    fn uninitialized_group_asks_sender() {
        let f = fixture();
        f.store.save_meta(&f.group_meta, &f.group).unwrap();
        let (_, stranger) = user(&f.store, "stranger");

        let query = Arc::new(RecordingQuery::accepting());
        let decision = gate(&f, query.clone(), MembershipQuery::All)
            .check(&text_in(&f.group), &stranger)
            .unwrap();
        assert_eq!(decision, GateDecision::Defer { waiting: f.group.clone() });
        assert_eq!(query.group_infos.lock().unwrap().as_slice(), &[vec![stranger.clone()]]);

        let refusing = Arc::new(RecordingQuery::default());
        let decision = gate(&f, refusing, MembershipQuery::All)
            .check(&text_in(&f.group), &stranger)
            .unwrap();
        assert_eq!(decision, GateDecision::Process);
    }

    #[test]
    fn members_assistants_and_owner_pass() {
        let f = fixture();
        populate(&f);
        let (_, member) = user(&f.store, "member");
        let (_, bot) = user(&f.store, "bot");
        f.store.add_member(&member, &f.group).unwrap();
        f.store.save_assistants(&[bot.clone()], &f.group).unwrap();

        let query = Arc::new(RecordingQuery::accepting());
        let gate = gate(&f, query.clone(), MembershipQuery::All);
        for sender in [&member, &bot, &f.founder] {
            assert_eq!(gate.check(&text_in(&f.group), sender).unwrap(), GateDecision::Process);
        }
        assert!(query.group_infos.lock().unwrap().is_empty());
    }

    #[test]
    fn stranger_deferred_only_when_both_queries_sent() {
        let f = fixture();
        populate(&f);
        let (_, stranger) = user(&f.store, "stranger");

        // No assistants: only the owner can be asked, so AND does not defer.
        let query = Arc::new(RecordingQuery::accepting());
        let decision = gate(&f, query.clone(), MembershipQuery::All)
            .check(&text_in(&f.group), &stranger)
            .unwrap();
        assert_eq!(decision, GateDecision::Process);
        assert_eq!(query.group_infos.lock().unwrap().as_slice(), &[vec![f.founder.clone()]]);

        let (_, bot) = user(&f.store, "bot");
        f.store.save_assistants(&[bot.clone()], &f.group).unwrap();
        let query = Arc::new(RecordingQuery::accepting());
        let decision = gate(&f, query.clone(), MembershipQuery::All)
            .check(&text_in(&f.group), &stranger)
            .unwrap();
        assert_eq!(decision, GateDecision::Defer { waiting: f.group.clone() });
        assert_eq!(
            query.group_infos.lock().unwrap().as_slice(),
            &[vec![bot], vec![f.founder.clone()]]
        );
    }

    #[test]
    fn stranger_deferred_when_either_query_sent_under_any() {
        let f = fixture();
        populate(&f);
        let (_, stranger) = user(&f.store, "stranger");

        let query = Arc::new(RecordingQuery::accepting());
        let decision = gate(&f, query, MembershipQuery::Any)
            .check(&text_in(&f.group), &stranger)
            .unwrap();
        assert_eq!(decision, GateDecision::Defer { waiting: f.group.clone() });

        let refusing = Arc::new(RecordingQuery::default());
        let decision = gate(&f, refusing, MembershipQuery::Any)
            .check(&text_in(&f.group), &stranger)
            .unwrap();
        assert_eq!(decision, GateDecision::Process);
    }

    #[test]
    fn without_query_layer_only_missing_meta_defers() {
        let f = fixture();
        populate(&f);
        let (_, stranger) = user(&f.store, "stranger");
        let gate = GroupGate::new(f.store.clone(), Arc::new(LoggingQuery), MembershipQuery::Any);
        assert_eq!(gate.check(&text_in(&f.group), &stranger).unwrap(), GateDecision::Process);
    }

    #[test]
    fn members_without_owner_count_as_uninitialized() {
        let f = fixture();
        f.store.save_meta(&f.group_meta, &f.group).unwrap();
        let (_, member) = user(&f.store, "member");
        f.store.add_member(&member, &f.group).unwrap();

        let query = Arc::new(RecordingQuery::accepting());
        let decision = gate(&f, query.clone(), MembershipQuery::All)
            .check(&text_in(&f.group), &member)
            .unwrap();
        assert_eq!(decision, GateDecision::Defer { waiting: f.group.clone() });
        assert_eq!(query.group_infos.lock().unwrap().as_slice(), &[vec![member]]);
    }
}
