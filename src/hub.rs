//! Subscriber registry and broadcast engine.
//!
//! The two channel maps are the only state touched by more than one task
//! (the discoverer adds dynamic instance slots while broadcasts may be in
//! flight), so they sit behind their own locks; everything else here is
//! single-purpose bookkeeping local to a call.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use crate::event::{ChannelId, Event};

/// Outbound frames are buffered per subscriber; a subscriber that can't
/// keep up is disconnected rather than allowed to slow down the hub.
const OUTBOUND_CAPACITY: usize = 256;

struct SubscriberEntry {
    outbound: mpsc::Sender<String>,
    channel: Option<ChannelId>,
}

pub struct Hub {
    next_id: AtomicU64,
    subscribers: RwLock<HashMap<u64, SubscriberEntry>>,
    classic: RwLock<HashMap<String, Vec<u64>>>,
    dynamic: RwLock<HashMap<String, HashMap<String, Vec<u64>>>>,
}

impl Hub {
    pub fn new(classic_tags: impl IntoIterator<Item = String>, dynamic_tags: impl IntoIterator<Item = String>) -> Self {
        let classic = classic_tags.into_iter().map(|tag| (tag, Vec::new())).collect();
        let dynamic = dynamic_tags
            .into_iter()
            .map(|tag| (tag, HashMap::new()))
            .collect();
        Hub {
            next_id: AtomicU64::new(1),
            subscribers: RwLock::new(HashMap::new()),
            classic: RwLock::new(classic),
            dynamic: RwLock::new(dynamic),
        }
    }

    /// Registers a new, as-yet-unsubscribed connection and returns its id
    /// plus the receiving half of its outbound queue.
    pub async fn register(&self) -> (u64, mpsc::Receiver<String>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        self.subscribers.write().await.insert(
            id,
            SubscriberEntry {
                outbound: tx,
                channel: None,
            },
        );
        (id, rx)
    }

    /// Removes a subscriber from its channel (if any) and drops its outbound
    /// sender, which closes the queue and signals its writer task to exit.
    /// Idempotent.
    pub async fn unregister(&self, id: u64) {
        let channel = {
            let mut subs = self.subscribers.write().await;
            subs.remove(&id).and_then(|entry| entry.channel)
        };
        let Some(channel) = channel else { return };
        match channel {
            ChannelId::Classic(tag) => {
                if let Some(list) = self.classic.write().await.get_mut(&tag) {
                    list.retain(|&sid| sid != id);
                }
            }
            ChannelId::Dynamic { tag, instance } => {
                if let Some(instances) = self.dynamic.write().await.get_mut(&tag)
                    && let Some(list) = instances.get_mut(&instance)
                {
                    list.retain(|&sid| sid != id);
                }
            }
        }
    }

    /// Attempts to subscribe `id` to the named channel. On success returns
    /// the resolved [`ChannelId`]; on failure the caller should send an
    /// error event to this subscriber directly (it remains unsubscribed).
    pub async fn subscribe(&self, id: u64, wire_name: &str) -> Result<ChannelId, ()> {
        let channel = ChannelId::parse(wire_name);
        let known = match &channel {
            ChannelId::Classic(tag) => {
                let mut classic = self.classic.write().await;
                match classic.get_mut(tag) {
                    Some(list) => {
                        list.push(id);
                        true
                    }
                    None => false,
                }
            }
            ChannelId::Dynamic { tag, instance } => {
                let mut dynamic = self.dynamic.write().await;
                match dynamic.get_mut(tag).and_then(|instances| instances.get_mut(instance)) {
                    Some(list) => {
                        list.push(id);
                        true
                    }
                    None => false,
                }
            }
        };

        if !known {
            return Err(());
        }

        if let Some(entry) = self.subscribers.write().await.get_mut(&id) {
            entry.channel = Some(channel.clone());
        }
        Ok(channel)
    }

    /// Sends a one-off event directly to a single subscriber (used for the
    /// "unknown channel" error reply, which bypasses channel routing).
    pub async fn send_to(&self, id: u64, evt: &Event) {
        if let Some(entry) = self.subscribers.read().await.get(&id) {
            let _ = entry.outbound.try_send(evt.to_framed());
        }
    }

    /// Ensures a dynamic instance slot exists, creating it empty if absent.
    /// Returns `true` if the slot already existed (an instance restart that
    /// should preserve its subscribers and receive a [`Event::reset`]).
    pub async fn ensure_dynamic_instance(&self, tag: &str, instance: &str) -> bool {
        let mut dynamic = self.dynamic.write().await;
        let instances = dynamic.entry(tag.to_string()).or_default();
        if instances.contains_key(instance) {
            true
        } else {
            instances.insert(instance.to_string(), Vec::new());
            false
        }
    }

    /// Broadcasts `evt` to every subscriber of `channel`. Subscribers whose
    /// outbound queue is full are evicted; this never blocks.
    pub async fn broadcast(&self, channel: &ChannelId, evt: &Event) {
        let recipients = self.recipients(channel).await;
        if recipients.is_empty() {
            return;
        }

        let framed = evt.to_framed();
        let mut to_evict = Vec::new();

        {
            let subs = self.subscribers.read().await;
            for id in &recipients {
                let Some(entry) = subs.get(id) else { continue };
                match entry.outbound.try_send(framed.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        debug!(id, "hub: outbound queue full, evicting slow subscriber");
                        to_evict.push(*id);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => to_evict.push(*id),
                }
            }
        }

        for id in to_evict {
            self.unregister(id).await;
        }
    }

    /// Lists the instance ids currently known for a dynamic server tag.
    pub async fn dynamic_instances(&self, tag: &str) -> Vec<String> {
        self.dynamic
            .read()
            .await
            .get(tag)
            .map(|instances| instances.keys().cloned().collect())
            .unwrap_or_default()
    }

    async fn recipients(&self, channel: &ChannelId) -> Vec<u64> {
        match channel {
            ChannelId::Classic(tag) => self
                .classic
                .read()
                .await
                .get(tag)
                .cloned()
                .unwrap_or_default(),
            ChannelId::Dynamic { tag, instance } => self
                .dynamic
                .read()
                .await
                .get(tag)
                .and_then(|instances| instances.get(instance))
                .cloned()
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_to_known_classic_channel_receives_broadcast() {
        let hub = Hub::new(["app".to_string()], []);
        let (id, mut rx) = hub.register().await;
        let channel = hub.subscribe(id, "app").await.unwrap();

        hub.broadcast(&channel, &Event::add(&channel, "hello")).await;

        let frame = rx.recv().await.unwrap();
        assert!(frame.contains("\"content\":\"hello\""));
    }

    #[tokio::test]
    async fn subscribe_to_unknown_channel_fails() {
        let hub = Hub::new(["app".to_string()], []);
        let (id, _rx) = hub.register().await;
        assert!(hub.subscribe(id, "bogus").await.is_err());
    }

    #[tokio::test]
    async fn unregister_removes_from_channel_and_closes_queue() {
        let hub = Hub::new(["app".to_string()], []);
        let (id, mut rx) = hub.register().await;
        let channel = hub.subscribe(id, "app").await.unwrap();

        hub.unregister(id).await;
        assert!(rx.recv().await.is_none());

        hub.broadcast(&channel, &Event::add(&channel, "after-unregister")).await;
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn unregister_is_idempotent() {
        let hub = Hub::new(["app".to_string()], []);
        let (id, _rx) = hub.register().await;
        hub.unregister(id).await;
        hub.unregister(id).await;
    }

    #[tokio::test]
    async fn slow_subscriber_is_evicted_without_blocking_others() {
        let hub = Hub::new(["app".to_string()], []);
        let (slow_id, slow_rx) = hub.register().await;
        let (fast_id, mut fast_rx) = hub.register().await;
        let channel = hub.subscribe(slow_id, "app").await.unwrap();
        hub.subscribe(fast_id, "app").await.unwrap();

        // Never drained, so its queue fills up.
        std::mem::forget(slow_rx);

        for i in 0..300 {
            hub.broadcast(&channel, &Event::add(&channel, format!("line-{i}"))).await;
        }

        // The fast subscriber received events throughout, unaffected by the slow one.
        let mut count = 0;
        while fast_rx.try_recv().is_ok() {
            count += 1;
        }
        assert!(count > 0);
    }

    #[tokio::test]
    async fn ensure_dynamic_instance_reports_restart() {
        let hub = Hub::new([], ["lobby".to_string()]);
        assert!(!hub.ensure_dynamic_instance("lobby", "1").await);
        assert!(hub.ensure_dynamic_instance("lobby", "1").await);
    }

    #[tokio::test]
    async fn dynamic_subscribe_requires_known_instance() {
        let hub = Hub::new([], ["lobby".to_string()]);
        let (id, _rx) = hub.register().await;
        assert!(hub.subscribe(id, "lobby=>1").await.is_err());

        hub.ensure_dynamic_instance("lobby", "1").await;
        assert!(hub.subscribe(id, "lobby=>1").await.is_ok());
    }
}
