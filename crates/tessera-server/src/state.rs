use std::sync::{Arc, Weak};
use std::time::Duration;

use tessera_protocol::account::VISA;
use tessera_protocol::messages::Body;
use tessera_protocol::{Content, Identifier, InstantMessage, Meta, ReliableMessage};
use tessera_storage::{CipherKeyVault, EntityStore, StorageError, StoreOptions};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::MessengerError;
use crate::gate::{GateDecision, GroupGate, MetadataQuery};
use crate::session::SessionRegistry;
use crate::settings::ServerSettings;
use crate::suspend::SuspendedQueue;
use crate::transmitter::{SendHandle, SendPolicy, SessionTransport, Transmitter, Transport};

/// Everything the server shares between connections.
pub struct ServerState {
    pub config: ServerConfig,
    pub settings: ServerSettings,
    pub store: Arc<EntityStore>,
    pub vault: Arc<CipherKeyVault>,
    pub sessions: Arc<SessionRegistry>,
    pub gate: GroupGate,
    pub suspended: SuspendedQueue,
    pub transmitter: Transmitter,
    query: Arc<dyn MetadataQuery>,
}

impl ServerState {
    /// Outbound messages go to local sessions.
    pub fn new(
        config: ServerConfig,
        settings: ServerSettings,
        query: Arc<dyn MetadataQuery>,
    ) -> Result<Self, StorageError> {
        let sessions = Arc::new(SessionRegistry::new());
        let transport = Arc::new(SessionTransport::new(sessions.clone()));
        Self::build(config, settings, query, transport, sessions)
    }

    pub fn with_transport(
        config: ServerConfig,
        settings: ServerSettings,
        query: Arc<dyn MetadataQuery>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, StorageError> {
        Self::build(config, settings, query, transport, Arc::new(SessionRegistry::new()))
    }

    fn build(
        config: ServerConfig,
        settings: ServerSettings,
        query: Arc<dyn MetadataQuery>,
        transport: Arc<dyn Transport>,
        sessions: Arc<SessionRegistry>,
    ) -> Result<Self, StorageError> {
        let store = Arc::new(EntityStore::open(StoreOptions {
            root: config.data_dir.clone(),
            password: config.secret_password.clone(),
            document_expires: settings.document_expires(),
        })?);
        let vault = Arc::new(CipherKeyVault::new(store.cipher_key_table()));
        let gate = GroupGate::new(store.clone(), query.clone(), config.membership_query);
        let suspended = SuspendedQueue::new(settings.suspend_ttl(), settings.max_suspended_per_entity);
        let transmitter = Transmitter::new(
            store.clone(),
            vault.clone(),
            transport,
            SendPolicy::from_settings(&settings),
        );
        info!(data_dir = %config.data_dir.display(), policy = ?config.membership_query, "server state ready");
        Ok(Self {
            config,
            settings,
            store,
            vault,
            sessions,
            gate,
            suspended,
            transmitter,
            query,
        })
    }

    /// `true` when `content` can be handled now. Otherwise `msg` is parked
    /// until the awaited entity's metadata arrives.
    pub fn process_content(&self, content: &Content, msg: &ReliableMessage) -> Result<bool, StorageError> {
        match self.gate.check(content, msg.sender())? {
            GateDecision::Process => Ok(true),
            GateDecision::Defer { waiting } => {
                self.suspended.suspend(msg.clone(), waiting);
                Ok(false)
            }
        }
    }

    /// Verify, decrypt and gate an inbound message. `None` means it was
    /// suspended.
    pub fn receive_message(&self, msg: &ReliableMessage) -> Result<Option<InstantMessage>, MessengerError> {
        if !self.verify_sender(msg)? {
            return Ok(None);
        }
        let instant = self.transmitter.decrypt_message(msg)?;
        if !self.process_content(&instant.content, msg)? {
            return Ok(None);
        }
        if let Body::Login(cmd) = &instant.content.body {
            if !self.store.save_login_command_message(cmd, msg)? {
                debug!(sender = %msg.sender(), "stale login command ignored");
            }
        }
        Ok(Some(instant))
    }

    /// Checks the signature against the sender's meta key, then the signing
    /// key of its visa. `Ok(false)` when the sender's meta is unknown: the
    /// message waits for it.
    fn verify_sender(&self, msg: &ReliableMessage) -> Result<bool, MessengerError> {
        let sender = msg.sender();
        let Some(meta) = self.store.get_meta(sender)? else {
            self.query.query_meta(sender);
            self.suspended.suspend(msg.clone(), sender.clone());
            return Ok(false);
        };
        if msg.verify(&meta.public_key) {
            return Ok(true);
        }
        let visa_key = self
            .store
            .get_document(sender, VISA)?
            .and_then(|visa| visa.signing_key());
        if visa_key.is_some_and(|key| msg.verify(&key)) {
            return Ok(true);
        }
        warn!(sender = %sender, "rejecting message with bad signature");
        Err(MessengerError::InvalidSignature(sender.clone()))
    }

    /// Store a genesis record learned from the network and hand back the
    /// messages that were waiting on it.
    pub fn accept_meta(&self, meta: &Meta, identifier: &Identifier) -> Result<Vec<ReliableMessage>, StorageError> {
        if !self.store.save_meta(meta, identifier)? {
            return Ok(Vec::new());
        }
        Ok(self.resume_waiting(identifier))
    }

    /// Messages suspended on `identifier`, for reprocessing.
    pub fn resume_waiting(&self, identifier: &Identifier) -> Vec<ReliableMessage> {
        let resumed = self.suspended.resume(identifier);
        if !resumed.is_empty() {
            info!(identifier = %identifier, count = resumed.len(), "resuming suspended messages");
        }
        resumed
    }

    pub fn deliver(&self, msg: InstantMessage) -> SendHandle {
        self.transmitter.send_instant_message(msg)
    }

    /// Periodically drop expired suspended messages and unanswered
    /// receipts. Stops once the state is dropped.
    pub fn spawn_purge_task(self: &Arc<Self>) -> JoinHandle<()> {
        let state: Weak<Self> = Arc::downgrade(self);
        let ttl = self.settings.suspend_ttl().min(self.settings.receipt_ttl());
        let period = (ttl / 2).max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(state) = state.upgrade() else {
                    break;
                };
                state.suspended.purge_expired();
                state.transmitter.purge_expired_receipts();
            }
        })
    }

    pub fn shutdown(&self) {
        self.transmitter.abort_all();
        let dropped = self.suspended.len();
        if dropped > 0 {
            warn!(dropped, "suspended messages discarded at shutdown");
        }
        info!("server state shut down");
    }
}
