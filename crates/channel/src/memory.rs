//! In-process shared channel. One [`MemoryChannel`] is the store; each peer
//! talks to it through its own [`MemoryChannelClient`] so writes can be told
//! apart from their echo.

use async_trait::async_trait;
use serde_json::Value;
use splitlink_core::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, trace};

use crate::channel::{ChangeNotification, ChangeSink, SharedChannel, SubscriptionId};

struct Subscriber {
    id: SubscriptionId,
    client: u64,
    sink: ChangeSink,
}

#[derive(Default)]
struct Inner {
    values: HashMap<String, Value>,
    subscribers: HashMap<String, Vec<Subscriber>>,
    next_subscription: u64,
    next_client: u64,
}

impl Inner {
    /// Fan a change out to the key's subscribers, dropping ones whose
    /// receiver has gone away.
    fn notify(
        &mut self,
        key: &str,
        writer: u64,
        deliver_to_self: bool,
        old_value: Option<Value>,
        new_value: Option<Value>,
    ) {
        let Some(subs) = self.subscribers.get_mut(key) else {
            return;
        };
        subs.retain(|sub| {
            let remote = sub.client != writer;
            if !remote && !deliver_to_self {
                return true;
            }
            let notification = ChangeNotification {
                subscription: sub.id,
                key: key.to_string(),
                old_value: old_value.clone(),
                new_value: new_value.clone(),
                remote,
            };
            match sub.sink.send(notification) {
                Ok(()) => true,
                Err(_) => {
                    trace!(subscription = %sub.id, key = %key, "Pruning closed subscriber");
                    false
                }
            }
        });
    }
}

#[derive(Clone, Default)]
pub struct MemoryChannel {
    inner: Arc<Mutex<Inner>>,
    deliver_to_self: bool,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also notify the writer's own subscriptions.
    pub fn with_self_delivery(mut self, enabled: bool) -> Self {
        self.deliver_to_self = enabled;
        self
    }

    /// Open a client handle for one peer.
    pub fn connect(&self) -> MemoryChannelClient {
        let client_id = match self.lock() {
            Ok(mut inner) => {
                inner.next_client += 1;
                inner.next_client
            }
            Err(_) => 0,
        };
        MemoryChannelClient {
            channel: self.clone(),
            client_id,
        }
    }

    /// Copy of every stored entry.
    pub fn entries(&self) -> Result<HashMap<String, Value>> {
        Ok(self.lock()?.values.clone())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| Error::Channel("memory channel lock poisoned".into()))
    }
}

#[derive(Clone)]
pub struct MemoryChannelClient {
    channel: MemoryChannel,
    client_id: u64,
}

impl MemoryChannelClient {
    pub fn client_id(&self) -> u64 {
        self.client_id
    }
}

#[async_trait]
impl SharedChannel for MemoryChannelClient {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.channel.lock()?.values.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let deliver_to_self = self.channel.deliver_to_self;
        let mut inner = self.channel.lock()?;
        let old = inner.values.insert(key.to_string(), value.clone());
        inner.notify(key, self.client_id, deliver_to_self, old, Some(value));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let deliver_to_self = self.channel.deliver_to_self;
        let mut inner = self.channel.lock()?;
        if let Some(old) = inner.values.remove(key) {
            inner.notify(key, self.client_id, deliver_to_self, Some(old), None);
        }
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .channel
            .lock()?
            .values
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn subscribe(&self, key: &str, sink: ChangeSink) -> Result<SubscriptionId> {
        let mut inner = self.channel.lock()?;
        inner.next_subscription += 1;
        let id = SubscriptionId(inner.next_subscription);
        inner
            .subscribers
            .entry(key.to_string())
            .or_default()
            .push(Subscriber {
                id,
                client: self.client_id,
                sink,
            });
        debug!(subscription = %id, key = %key, client = self.client_id, "Subscribed");
        Ok(id)
    }

    async fn unsubscribe(&self, subscription: SubscriptionId) -> Result<()> {
        let mut inner = self.channel.lock()?;
        for subs in inner.subscribers.values_mut() {
            subs.retain(|s| s.id != subscription);
        }
        inner.subscribers.retain(|_, subs| !subs.is_empty());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_remote_only_delivery_by_default() {
        let channel = MemoryChannel::new();
        let a = channel.connect();
        let b = channel.connect();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        a.subscribe("k", tx_a).await.unwrap();
        b.subscribe("k", tx_b).await.unwrap();

        a.set("k", json!(1)).await.unwrap();

        assert!(rx_a.try_recv().is_err());
        let n = rx_b.try_recv().unwrap();
        assert_eq!(n.key, "k");
        assert_eq!(n.new_value, Some(json!(1)));
        assert_eq!(n.old_value, None);
        assert!(n.remote);
    }

    #[tokio::test]
    async fn test_self_delivery_when_enabled() {
        let channel = MemoryChannel::new().with_self_delivery(true);
        let a = channel.connect();
        let (tx, mut rx) = mpsc::unbounded_channel();
        a.subscribe("k", tx).await.unwrap();
        a.set("k", json!("v")).await.unwrap();
        let n = rx.try_recv().unwrap();
        assert!(!n.remote);
    }

    #[tokio::test]
    async fn test_per_key_order_preserved() {
        let channel = MemoryChannel::new();
        let writer = channel.connect();
        let reader = channel.connect();
        let (tx, mut rx) = mpsc::unbounded_channel();
        reader.subscribe("ts", tx).await.unwrap();
        for i in 1..=5 {
            writer.set("ts", json!(i)).await.unwrap();
        }
        let mut seen = Vec::new();
        while let Ok(n) = rx.try_recv() {
            seen.push(n.new_value.unwrap().as_i64().unwrap());
        }
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_delete_notifies_with_none() {
        let channel = MemoryChannel::new();
        let writer = channel.connect();
        let reader = channel.connect();
        writer.set("k", json!(true)).await.unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        reader.subscribe("k", tx).await.unwrap();
        writer.delete("k").await.unwrap();
        let n = rx.try_recv().unwrap();
        assert_eq!(n.new_value, None);
        assert_eq!(n.old_value, Some(json!(true)));
        assert_eq!(reader.get("k").await.unwrap(), None);

        // Deleting a missing key is silent.
        writer.delete("k").await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let channel = MemoryChannel::new();
        let writer = channel.connect();
        let reader = channel.connect();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = reader.subscribe("k", tx).await.unwrap();
        reader.unsubscribe(id).await.unwrap();
        writer.set("k", json!(1)).await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_list_keys_by_prefix() {
        let channel = MemoryChannel::new();
        let c = channel.connect();
        c.set("p_a", json!(1)).await.unwrap();
        c.set("p_b", json!(2)).await.unwrap();
        c.set("q_c", json!(3)).await.unwrap();
        let mut keys = c.list_keys("p_").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["p_a".to_string(), "p_b".to_string()]);
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_pruned() {
        let channel = MemoryChannel::new();
        let writer = channel.connect();
        let reader = channel.connect();
        let (tx, rx) = mpsc::unbounded_channel();
        reader.subscribe("k", tx).await.unwrap();
        drop(rx);
        writer.set("k", json!(1)).await.unwrap();
        writer.set("k", json!(2)).await.unwrap();
        assert_eq!(writer.get("k").await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn test_read_write_json_helpers() {
        let channel = MemoryChannel::new();
        let c = channel.connect();
        crate::write_json(&c, "list", &vec!["a".to_string()]).await.unwrap();
        let list: Option<Vec<String>> = crate::read_json(&c, "list").await.unwrap();
        assert_eq!(list, Some(vec!["a".to_string()]));

        c.set("list", json!({"not": "a list"})).await.unwrap();
        let list: Option<Vec<String>> = crate::read_json(&c, "list").await.unwrap();
        assert_eq!(list, None);
    }
}
