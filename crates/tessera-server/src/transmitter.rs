//! Outbound message pipeline: encrypt, sign, hand off, remember.
//!
//! Each send runs as its own tokio task. The caller gets a [`SendHandle`]
//! back immediately and may abort it or await the outcome; transport
//! attempts are bounded in number and in time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tessera_protocol::{Identifier, InstantMessage, ReliableMessage};
use tessera_storage::{CipherKeyVault, EntityStore};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

use crate::error::MessengerError;
use crate::session::SessionRegistry;
use crate::settings::ServerSettings;

/// Hands a signed message to the network.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, msg: &ReliableMessage) -> Result<(), MessengerError>;
}

#[derive(Debug, Clone, Copy)]
pub struct SendPolicy {
    pub attempts: u32,
    pub timeout: Duration,
    pub retry_delay: Duration,
    /// How long a sent message waits for its receipt.
    pub receipt_ttl: Duration,
    pub max_pending_receipts: usize,
}

impl SendPolicy {
    pub fn from_settings(settings: &ServerSettings) -> Self {
        Self {
            attempts: settings.send_attempts.max(1),
            timeout: Duration::from_secs(settings.send_timeout_secs),
            retry_delay: Duration::from_millis(settings.send_retry_delay_ms),
            receipt_ttl: settings.receipt_ttl(),
            max_pending_receipts: settings.max_pending_receipts.max(1),
        }
    }
}

/// A send in flight.
pub struct SendHandle {
    abort: AbortHandle,
    join: JoinHandle<Result<ReliableMessage, MessengerError>>,
}

impl SendHandle {
    pub fn abort(&self) {
        self.abort.abort();
    }

    /// Wait for the send to finish. Returns the message as it went out.
    pub async fn wait(self) -> Result<ReliableMessage, MessengerError> {
        match self.join.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(MessengerError::Cancelled),
            Err(e) => Err(MessengerError::Transport(format!("send task failed: {e}"))),
        }
    }
}

struct Inner {
    store: Arc<EntityStore>,
    vault: Arc<CipherKeyVault>,
    transport: Arc<dyn Transport>,
    policy: SendPolicy,
    /// Sent messages by hex signature, until their receipt arrives or they
    /// expire.
    sent: DashMap<String, (ReliableMessage, Instant)>,
    inflight: DashMap<u64, AbortHandle>,
    next_id: AtomicU64,
}

#[derive(Clone)]
pub struct Transmitter {
    inner: Arc<Inner>,
}

/// Group messages are keyed by the group, personal ones by the receiver.
fn conversation(msg_group: Option<&Identifier>, receiver: &Identifier) -> Identifier {
    msg_group.unwrap_or(receiver).clone()
}

impl Transmitter {
    pub fn new(
        store: Arc<EntityStore>,
        vault: Arc<CipherKeyVault>,
        transport: Arc<dyn Transport>,
        policy: SendPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                vault,
                transport,
                policy,
                sent: DashMap::new(),
                inflight: DashMap::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Queue `msg` for delivery and return at once. Must be called from
    /// within a tokio runtime.
    pub fn send_instant_message(&self, msg: InstantMessage) -> SendHandle {
        let inner = self.inner.clone();
        let join = tokio::spawn(async move { inner.transmit(msg).await });
        let abort = join.abort_handle();

        self.inner.inflight.retain(|_, handle| !handle.is_finished());
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.inflight.insert(id, abort.clone());

        SendHandle { abort, join }
    }

    /// Take the sent message a receipt refers to.
    pub fn match_receipt(&self, signature: &[u8]) -> Option<ReliableMessage> {
        self.inner
            .sent
            .remove(&hex::encode(signature))
            .map(|(_, (msg, _))| msg)
    }

    /// Sent messages still waiting for a receipt.
    pub fn pending_receipts(&self) -> usize {
        self.inner.sent.len()
    }

    /// Forget sent messages whose receipt never came. Returns how many.
    pub fn purge_expired_receipts(&self) -> usize {
        let ttl = self.inner.policy.receipt_ttl;
        let before = self.inner.sent.len();
        self.inner.sent.retain(|_, (_, sent_at)| sent_at.elapsed() < ttl);
        let purged = before.saturating_sub(self.inner.sent.len());
        if purged > 0 {
            debug!(purged, "expired receipts purged");
        }
        purged
    }

    /// Sends not yet finished.
    pub fn inflight(&self) -> usize {
        self.inner.inflight.retain(|_, handle| !handle.is_finished());
        self.inner.inflight.len()
    }

    pub fn abort_all(&self) {
        let count = self.inner.inflight.len();
        self.inner.inflight.retain(|_, handle| {
            handle.abort();
            false
        });
        if count > 0 {
            info!(count, "aborted in-flight sends");
        }
    }

    /// Decrypt an inbound message with the existing conversation key.
    /// Never generates a key.
    pub fn decrypt_message(&self, msg: &ReliableMessage) -> Result<InstantMessage, MessengerError> {
        let sender = msg.sender();
        let target = conversation(msg.envelope.group.as_ref(), msg.receiver());
        let key = self
            .inner
            .vault
            .get_cipher_key(sender, &target, false)?
            .ok_or_else(|| MessengerError::KeyNotFound {
                sender: sender.clone(),
                receiver: target.clone(),
            })?;
        Ok(msg.to_secure().decrypt(&key)?)
    }
}

impl Inner {
    async fn transmit(&self, msg: InstantMessage) -> Result<ReliableMessage, MessengerError> {
        let sender = msg.envelope.sender.clone();
        let target = conversation(msg.envelope.group.as_ref(), &msg.envelope.receiver);

        let key = self
            .vault
            .get_cipher_key(&sender, &target, true)?
            .ok_or_else(|| MessengerError::KeyNotFound {
                sender: sender.clone(),
                receiver: target.clone(),
            })?;
        let secure = msg.encrypt(&key)?;
        let signing_key = self
            .store
            .get_private_key_for_signature(&sender)?
            .ok_or_else(|| MessengerError::SigningKeyMissing(sender.clone()))?;
        let reliable = secure.sign(&signing_key)?;

        self.deliver(&reliable).await?;
        self.remember(&reliable);
        debug!(sender = %sender, receiver = %reliable.envelope.receiver, "message sent");
        Ok(reliable)
    }

    /// Record a sent message for receipt matching, evicting the oldest when
    /// full.
    fn remember(&self, msg: &ReliableMessage) {
        while self.sent.len() >= self.policy.max_pending_receipts {
            let oldest = self
                .sent
                .iter()
                .min_by_key(|entry| entry.value().1)
                .map(|entry| entry.key().clone());
            let Some(oldest) = oldest else {
                break;
            };
            self.sent.remove(&oldest);
            debug!(signature = %oldest, "pending receipt evicted");
        }
        self.sent
            .insert(hex::encode(&msg.signature), (msg.clone(), Instant::now()));
    }

    async fn deliver(&self, msg: &ReliableMessage) -> Result<(), MessengerError> {
        let attempts = self.policy.attempts.max(1);
        for attempt in 1..=attempts {
            match tokio::time::timeout(self.policy.timeout, self.transport.send(msg)).await {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(e)) => warn!(attempt, receiver = %msg.envelope.receiver, "send failed: {}", e),
                Err(_) => warn!(attempt, receiver = %msg.envelope.receiver, "send timed out"),
            }
            if attempt < attempts {
                tokio::time::sleep(self.policy.retry_delay).await;
            }
        }
        Err(MessengerError::DeliveryFailed { attempts })
    }
}

/// Delivers to the receiver's active local sessions.
pub struct SessionTransport {
    sessions: Arc<SessionRegistry>,
}

impl SessionTransport {
    pub fn new(sessions: Arc<SessionRegistry>) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl Transport for SessionTransport {
    async fn send(&self, msg: &ReliableMessage) -> Result<(), MessengerError> {
        let receiver = msg.receiver();
        match self.sessions.push_message(receiver, msg) {
            0 => Err(MessengerError::Transport(format!(
                "no active session for {receiver}"
            ))),
            _ => Ok(()),
        }
    }
}
