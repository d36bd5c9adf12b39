use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Runtime server settings, loaded from a JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Soft-expiry window stamped on cached documents.
    #[serde(default = "default_document_expires")]
    pub document_expires_secs: u64,

    /// Transport attempts per outbound message.
    #[serde(default = "default_send_attempts")]
    pub send_attempts: u32,

    /// Timeout for a single transport attempt.
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,

    /// Pause between failed attempts.
    #[serde(default = "default_send_retry_delay")]
    pub send_retry_delay_ms: u64,

    /// How long a deferred message waits for its metadata.
    #[serde(default = "default_suspend_ttl")]
    pub suspend_ttl_secs: u64,

    /// Deferred messages kept per awaited entity; the oldest is dropped.
    #[serde(default = "default_max_suspended")]
    pub max_suspended_per_entity: usize,

    /// How long a sent message is kept for receipt matching.
    #[serde(default = "default_receipt_ttl")]
    pub receipt_ttl_secs: u64,

    /// Sent messages awaiting a receipt; the oldest is dropped.
    #[serde(default = "default_max_pending_receipts")]
    pub max_pending_receipts: usize,
}

fn default_document_expires() -> u64 {
    1800
}
fn default_send_attempts() -> u32 {
    3
}
fn default_send_timeout() -> u64 {
    10
}
fn default_send_retry_delay() -> u64 {
    500
}
fn default_suspend_ttl() -> u64 {
    600
}
fn default_max_suspended() -> usize {
    64
}
fn default_receipt_ttl() -> u64 {
    600
}
fn default_max_pending_receipts() -> usize {
    1024
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            document_expires_secs: default_document_expires(),
            send_attempts: default_send_attempts(),
            send_timeout_secs: default_send_timeout(),
            send_retry_delay_ms: default_send_retry_delay(),
            suspend_ttl_secs: default_suspend_ttl(),
            max_suspended_per_entity: default_max_suspended(),
            receipt_ttl_secs: default_receipt_ttl(),
            max_pending_receipts: default_max_pending_receipts(),
        }
    }
}

impl ServerSettings {
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn document_expires(&self) -> Duration {
        Duration::from_secs(self.document_expires_secs)
    }

    pub fn suspend_ttl(&self) -> Duration {
        Duration::from_secs(self.suspend_ttl_secs)
    }

    pub fn receipt_ttl(&self) -> Duration {
        Duration::from_secs(self.receipt_ttl_secs)
    }
}
