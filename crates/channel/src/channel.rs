//! Contract of the shared key-value store every peer talks through.
//!
//! Guarantees callers may rely on:
//! - `set` notifies subscribers of that key in *other* peers. Whether the
//!   writer is notified of its own write is up to the implementation.
//! - Delivery is asynchronous and at-least-once; order is preserved per key,
//!   never across keys.
//! - Writes are last-write-wins with no revisions and no transactions.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use splitlink_core::Result;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeNotification {
    pub subscription: SubscriptionId,
    pub key: String,
    pub old_value: Option<Value>,
    /// `None` when the key was deleted.
    pub new_value: Option<Value>,
    /// False only for self-delivered writes.
    pub remote: bool,
}

pub type ChangeSink = mpsc::UnboundedSender<ChangeNotification>;

#[async_trait]
pub trait SharedChannel: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn set(&self, key: &str, value: Value) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Unordered.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>>;

    async fn subscribe(&self, key: &str, sink: ChangeSink) -> Result<SubscriptionId>;

    async fn unsubscribe(&self, subscription: SubscriptionId) -> Result<()>;
}

/// Read and decode a value. Values that fail to decode are treated as absent:
/// anything may write into a shared store.
pub async fn read_json<T: DeserializeOwned>(
    channel: &dyn SharedChannel,
    key: &str,
) -> Result<Option<T>> {
    let Some(value) = channel.get(key).await? else {
        return Ok(None);
    };
    Ok(decode(key, value))
}

pub async fn write_json<T: Serialize + Sync>(
    channel: &dyn SharedChannel,
    key: &str,
    value: &T,
) -> Result<()> {
    channel.set(key, serde_json::to_value(value)?).await
}

/// Decode a notification payload with the same leniency as [`read_json`].
pub fn decode<T: DeserializeOwned>(key: &str, value: Value) -> Option<T> {
    match serde_json::from_value(value) {
        Ok(v) => Some(v),
        Err(e) => {
            debug!(key = %key, error = %e, "Ignoring undecodable channel value");
            None
        }
    }
}
