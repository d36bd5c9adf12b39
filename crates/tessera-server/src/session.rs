//! Live client sessions.
//!
//! A session binds one client endpoint to the identifier it logged in as.
//! One identifier can hold many endpoints (one per device).

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use rand::RngCore;
use tessera_protocol::codec::encode_reliable_msg;
use tessera_protocol::{Identifier, ReliableMessage};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Hands a message to the connection behind a session.
pub trait SessionHandler: Send + Sync {
    fn push_message(&self, msg: &ReliableMessage) -> bool;
}

/// Frames the message and queues it for the connection's writer task.
/// A full queue drops the message.
impl SessionHandler for mpsc::Sender<Vec<u8>> {
    fn push_message(&self, msg: &ReliableMessage) -> bool {
        match encode_reliable_msg(msg) {
            Ok(frame) => self.try_send(frame).is_ok(),
            Err(e) => {
                warn!("failed to encode pushed message: {}", e);
                false
            }
        }
    }
}

fn generate_session_key() -> String {
    let mut key = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut key);
    hex::encode(key)
}

pub struct Session {
    endpoint: SocketAddr,
    key: String,
    identifier: Mutex<Option<Identifier>>,
    active: AtomicBool,
    handler: Arc<dyn SessionHandler>,
}

impl Session {
    fn new(endpoint: SocketAddr, handler: Arc<dyn SessionHandler>) -> Self {
        Self {
            endpoint,
            key: generate_session_key(),
            identifier: Mutex::new(None),
            active: AtomicBool::new(true),
            handler,
        }
    }

    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    /// Random 32-byte session key, hex-encoded.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn identifier(&self) -> Option<Identifier> {
        self.identifier
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Clients going to the background mark their session inactive.
    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    /// Deliver only while active. No retry, no queueing.
    pub fn push_message(&self, msg: &ReliableMessage) -> bool {
        if !self.is_active() {
            return false;
        }
        self.handler.push_message(msg)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("endpoint", &self.endpoint)
            .field("identifier", &self.identifier())
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

/// endpoint -> session, and identifier -> endpoints.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<SocketAddr, Arc<Session>>,
    endpoints: DashMap<Identifier, HashSet<SocketAddr>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Existing session for `endpoint`, or a new one when a handler is given.
    pub fn get_session(
        &self,
        endpoint: SocketAddr,
        handler: Option<Arc<dyn SessionHandler>>,
    ) -> Option<Arc<Session>> {
        if let Some(session) = self.sessions.get(&endpoint) {
            return Some(session.clone());
        }
        let handler = handler?;
        let session = self
            .sessions
            .entry(endpoint)
            .or_insert_with(|| {
                debug!(endpoint = %endpoint, "session created");
                Arc::new(Session::new(endpoint, handler))
            })
            .clone();
        Some(session)
    }

    /// Bind `session` to `identifier`, detaching it from any previous one.
    pub fn update_session(&self, session: &Session, identifier: &Identifier) {
        let identifier = identifier.without_terminal();
        let mut bound = session
            .identifier
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        if let Some(old) = bound.as_ref() {
            self.detach(session.endpoint, old);
        }
        self.endpoints
            .entry(identifier.clone())
            .or_default()
            .insert(session.endpoint);
        info!(endpoint = %session.endpoint, identifier = %identifier, "session bound");
        *bound = Some(identifier);
    }

    /// Unregister `session`. A newer session on the same endpoint is left
    /// alone.
    pub fn remove_session(&self, session: &Session) {
        let bound = session
            .identifier
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        session.set_active(false);
        let removed = self
            .sessions
            .remove_if(&session.endpoint, |_, current| {
                std::ptr::eq(Arc::as_ptr(current), session)
            })
            .is_some();
        if !removed {
            debug!(endpoint = %session.endpoint, "stale session, already replaced");
            return;
        }
        if let Some(identifier) = bound.as_ref() {
            self.detach(session.endpoint, identifier);
        }
        info!(endpoint = %session.endpoint, "session removed");
    }

    fn detach(&self, endpoint: SocketAddr, identifier: &Identifier) {
        self.endpoints
            .remove_if_mut(identifier, |_, set| {
                set.remove(&endpoint);
                set.is_empty()
            });
    }

    /// Every known session of `identifier`.
    pub fn all_sessions(&self, identifier: &Identifier) -> Vec<Arc<Session>> {
        let endpoints: Vec<SocketAddr> = match self.endpoints.get(identifier) {
            Some(set) => set.iter().copied().collect(),
            None => return Vec::new(),
        };
        endpoints
            .iter()
            .filter_map(|endpoint| self.sessions.get(endpoint).map(|s| s.clone()))
            .collect()
    }

    pub fn active_sessions(&self, identifier: &Identifier) -> Vec<Arc<Session>> {
        self.all_sessions(identifier)
            .into_iter()
            .filter(|s| s.is_active())
            .collect()
    }

    /// Identifiers with at least one known endpoint.
    pub fn all_users(&self) -> Vec<Identifier> {
        self.endpoints.iter().map(|e| e.key().clone()).collect()
    }

    pub fn is_active(&self, identifier: &Identifier) -> bool {
        self.all_sessions(identifier).iter().any(|s| s.is_active())
    }

    pub fn active_users(&self) -> Vec<Identifier> {
        self.all_users()
            .into_iter()
            .filter(|id| self.is_active(id))
            .collect()
    }

    /// Push to every active session of `identifier`; returns how many took it.
    pub fn push_message(&self, identifier: &Identifier, msg: &ReliableMessage) -> usize {
        self.active_sessions(identifier)
            .iter()
            .filter(|s| s.push_message(msg))
            .count()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
