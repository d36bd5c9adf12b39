//! Messages held back until metadata for some entity arrives.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tessera_protocol::{Identifier, ReliableMessage};
use tracing::{debug, warn};

pub struct SuspendedQueue {
    waiting: DashMap<Identifier, VecDeque<(ReliableMessage, Instant)>>,
    ttl: Duration,
    capacity: usize,
}

impl SuspendedQueue {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            waiting: DashMap::new(),
            ttl,
            capacity: capacity.max(1),
        }
    }

    /// Park `msg` until `waiting` resolves. The oldest message for the same
    /// entity is dropped when its queue is full.
    pub fn suspend(&self, mut msg: ReliableMessage, waiting: Identifier) {
        msg.waiting = Some(waiting.clone());
        let mut queue = self.waiting.entry(waiting.without_terminal()).or_default();
        if queue.len() >= self.capacity {
            queue.pop_front();
            warn!(waiting = %waiting, "suspend queue full, dropped oldest message");
        }
        debug!(waiting = %waiting, sender = %msg.envelope.sender, "message suspended");
        queue.push_back((msg, Instant::now()));
    }

    /// Take every unexpired message waiting on `identifier`.
    pub fn resume(&self, identifier: &Identifier) -> Vec<ReliableMessage> {
        let Some((_, queue)) = self.waiting.remove(&identifier.without_terminal()) else {
            return Vec::new();
        };
        let ttl = self.ttl;
        queue
            .into_iter()
            .filter(|(_, at)| at.elapsed() < ttl)
            .map(|(mut msg, _)| {
                msg.waiting = None;
                msg
            })
            .collect()
    }

    /// Drop expired messages; returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let ttl = self.ttl;
        let mut dropped = 0;
        self.waiting.retain(|_, queue| {
            let before = queue.len();
            queue.retain(|(_, at)| at.elapsed() < ttl);
            dropped += before - queue.len();
            !queue.is_empty()
        });
        if dropped > 0 {
            debug!(dropped, "expired suspended messages purged");
        }
        dropped
    }

    /// Total suspended messages.
    pub fn len(&self) -> usize {
        self.waiting.iter().map(|q| q.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
