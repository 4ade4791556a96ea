//! In-memory channel backend for single-process deployments and testing

use crate::{
    ChannelBackend, ChannelError, ChannelResult, ConsumerRegistry, MemoryConfig, Message,
};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use std::collections::{HashMap, VecDeque};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

/// Alias used when a backend is built outside a layers config
pub const DEFAULT_ALIAS: &str = "default";

#[derive(Debug)]
struct QueuedMessage {
    message: Message,
    expires_at: Instant,
}

/// In-memory channel backend.
///
/// All channel queues sit under one lock so a pop is atomic across every
/// caller of `receive_many`. Blocked receivers wait on a `Notify` that every
/// send signals.
pub struct MemoryBackend {
    alias: String,
    config: MemoryConfig,
    channels: Mutex<HashMap<String, VecDeque<QueuedMessage>>>,
    groups: DashMap<String, HashMap<String, Instant>>,
    notify: Notify,
    registry: ConsumerRegistry,
}

impl MemoryBackend {
    /// Create a new memory backend
    pub fn new(config: MemoryConfig) -> Self {
        Self::with_alias(DEFAULT_ALIAS, config)
    }

    /// Create a memory backend registered under a specific alias
    pub fn with_alias<A: Into<String>>(alias: A, config: MemoryConfig) -> Self {
        Self {
            alias: alias.into(),
            config,
            channels: Mutex::new(HashMap::new()),
            groups: DashMap::new(),
            notify: Notify::new(),
            registry: ConsumerRegistry::new(),
        }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Number of unexpired messages waiting on a channel
    pub fn queued(&self, channel: &str) -> usize {
        let now = Instant::now();
        self.channels
            .lock()
            .get(channel)
            .map(|queue| queue.iter().filter(|m| m.expires_at > now).count())
            .unwrap_or(0)
    }

    /// Drop every queued message and group
    pub fn flush(&self) {
        self.channels.lock().clear();
        self.groups.clear();
    }

    /// Pop the first unexpired message from a random ordering of `channels`
    fn try_receive(&self, channels: &[String]) -> Option<(String, Message)> {
        let mut order: Vec<&String> = channels.iter().collect();
        order.shuffle(&mut rand::thread_rng());

        let now = Instant::now();
        let mut queues = self.channels.lock();

        for name in order {
            let Some(queue) = queues.get_mut(name) else {
                continue;
            };

            let mut found = None;
            while let Some(queued) = queue.pop_front() {
                if queued.expires_at > now {
                    found = Some(queued.message);
                    break;
                }
                debug!(channel = %name, "Discarding expired message");
            }

            if queue.is_empty() {
                queues.remove(name);
            }
            if let Some(message) = found {
                return Some((name.clone(), message));
            }
        }

        None
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(MemoryConfig::default())
    }
}

#[async_trait]
impl ChannelBackend for MemoryBackend {
    fn alias(&self) -> &str {
        &self.alias
    }

    fn local_only(&self) -> bool {
        true
    }

    fn registry(&self) -> &ConsumerRegistry {
        &self.registry
    }

    async fn send(&self, channel: &str, message: Message) -> ChannelResult<()> {
        let now = Instant::now();
        {
            let mut queues = self.channels.lock();
            let queue = queues.entry(channel.to_string()).or_default();

            while queue.front().is_some_and(|m| m.expires_at <= now) {
                queue.pop_front();
            }

            let capacity = *self.config.get_capacity();
            if capacity > 0 && queue.len() >= capacity {
                return Err(ChannelError::ChannelFull(channel.to_string()));
            }

            queue.push_back(QueuedMessage {
                message,
                expires_at: now + *self.config.get_message_expiry(),
            });
        }

        self.notify.notify_waiters();
        Ok(())
    }

    async fn receive_many(
        &self,
        channels: &[String],
        block: bool,
    ) -> ChannelResult<Option<(String, Message)>> {
        if channels.is_empty() {
            return Ok(None);
        }

        let deadline = Instant::now() + *self.config.get_receive_timeout();

        loop {
            // Register interest before looking so a send between the check
            // and the wait still wakes us.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(found) = self.try_receive(channels) {
                return Ok(Some(found));
            }
            if !block {
                return Ok(None);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(self.try_receive(channels));
            }
        }
    }

    async fn group_add(&self, group: &str, channel: &str) -> ChannelResult<()> {
        let expires_at = Instant::now() + *self.config.get_group_expiry();
        self.groups
            .entry(group.to_string())
            .or_default()
            .insert(channel.to_string(), expires_at);
        Ok(())
    }

    async fn group_discard(&self, group: &str, channel: &str) -> ChannelResult<()> {
        if let Some(mut members) = self.groups.get_mut(group) {
            members.remove(channel);
        }
        self.groups.remove_if(group, |_, members| members.is_empty());
        Ok(())
    }

    async fn group_channels(&self, group: &str) -> ChannelResult<Vec<String>> {
        let now = Instant::now();
        let mut members = match self.groups.get_mut(group) {
            Some(mut members) => {
                members.retain(|_, expires_at| *expires_at > now);
                members.keys().cloned().collect::<Vec<_>>()
            }
            None => Vec::new(),
        };
        self.groups.remove_if(group, |_, members| members.is_empty());

        members.sort();
        Ok(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfigBuilder;
    use std::sync::Arc;
    use std::time::Duration;

    fn testing_backend() -> MemoryBackend {
        MemoryBackend::new(
            MemoryConfigBuilder::testing()
                .build()
                .expect("Failed to build config"),
        )
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_fifo_per_channel() {
        let backend = testing_backend();
        for i in 0..5 {
            backend
                .send("numbers", Message::new().with("n", i))
                .await
                .unwrap();
        }

        for i in 0..5 {
            let (channel, message) = backend
                .receive_many(&names(&["numbers"]), false)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(channel, "numbers");
            assert_eq!(message.get("n").and_then(|v| v.as_i64()), Some(i));
        }
        assert!(backend
            .receive_many(&names(&["numbers"]), false)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_receive_many_across_channels() {
        let backend = testing_backend();
        backend.send("b", Message::new().with("from", "b")).await.unwrap();

        let (channel, message) = backend
            .receive_many(&names(&["a", "b", "c"]), false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(channel, "b");
        assert_eq!(message.get_str("from"), Some("b"));
    }

    #[tokio::test]
    async fn test_empty_channel_set_returns_none() {
        let backend = testing_backend();
        assert!(backend.receive_many(&[], true).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_blocking_receive_times_out() {
        let backend = testing_backend();
        let started = std::time::Instant::now();
        let result = backend
            .receive_many(&names(&["nothing"]), true)
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_blocking_receive_wakes_on_send() {
        let backend = Arc::new(MemoryBackend::new(
            MemoryConfigBuilder::new()
                .receive_timeout(Duration::from_secs(5))
                .build()
                .expect("Failed to build config"),
        ));

        let receiver = {
            let backend = backend.clone();
            tokio::spawn(async move { backend.receive_many(&names(&["wake"]), true).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        backend.send("wake", Message::new().with("up", true)).await.unwrap();

        let started = std::time::Instant::now();
        let (channel, _) = receiver.await.unwrap().unwrap().unwrap();
        assert_eq!(channel, "wake");
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_at_most_one_delivery_under_contention() {
        let backend = Arc::new(testing_backend());
        for i in 0..200 {
            backend
                .send("work", Message::new().with("n", i))
                .await
                .unwrap();
        }

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let backend = backend.clone();
            tasks.push(tokio::spawn(async move {
                let mut seen = Vec::new();
                while let Some((_, message)) =
                    backend.receive_many(&names(&["work"]), false).await.unwrap()
                {
                    seen.push(message.get("n").and_then(|v| v.as_i64()).unwrap());
                }
                seen
            }));
        }

        let mut all = Vec::new();
        for task in tasks {
            all.extend(task.await.unwrap());
        }
        all.sort();
        assert_eq!(all, (0..200).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn test_capacity_limit() {
        let backend = MemoryBackend::new(
            MemoryConfigBuilder::new()
                .capacity(2)
                .build()
                .expect("Failed to build config"),
        );

        backend.send("small", Message::new()).await.unwrap();
        backend.send("small", Message::new()).await.unwrap();
        let result = backend.send("small", Message::new()).await;
        assert!(matches!(result, Err(ChannelError::ChannelFull(_))));

        backend
            .receive_many(&names(&["small"]), false)
            .await
            .unwrap()
            .unwrap();
        backend.send("small", Message::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_expired_messages_are_discarded() {
        let backend = MemoryBackend::new(
            MemoryConfigBuilder::testing()
                .message_expiry(Duration::from_millis(20))
                .build()
                .expect("Failed to build config"),
        );

        backend.send("old", Message::new()).await.unwrap();
        assert_eq!(backend.queued("old"), 1);
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(backend.queued("old"), 0);
        assert!(backend
            .receive_many(&names(&["old"]), false)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_group_send_skips_stale_member() {
        let backend = MemoryBackend::new(
            MemoryConfigBuilder::testing()
                .group_expiry(Duration::from_millis(30))
                .build()
                .expect("Failed to build config"),
        );

        backend.group_add("room", "stale").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        backend.group_add("room", "live").await.unwrap();

        let delivered = backend
            .group_send("room", Message::new().with("text", "hello"))
            .await
            .unwrap();
        assert_eq!(delivered, 1);

        assert_eq!(backend.queued("live"), 1);
        assert_eq!(backend.queued("stale"), 0);
        assert_eq!(
            backend.group_channels("room").await.unwrap(),
            vec!["live".to_string()]
        );
    }

    #[tokio::test]
    async fn test_group_send_tolerates_full_member() {
        let backend = MemoryBackend::new(
            MemoryConfigBuilder::new()
                .capacity(1)
                .build()
                .expect("Failed to build config"),
        );

        backend.send("full", Message::new()).await.unwrap();
        backend.group_add("room", "full").await.unwrap();
        backend.group_add("room", "open").await.unwrap();

        let delivered = backend.group_send("room", Message::new()).await.unwrap();
        assert_eq!(delivered, 1);
        assert_eq!(backend.queued("open"), 1);
    }

    #[tokio::test]
    async fn test_group_discard_and_empty_group() {
        let backend = testing_backend();
        backend.group_add("room", "a").await.unwrap();
        backend.group_discard("room", "a").await.unwrap();
        backend.group_discard("missing", "a").await.unwrap();

        assert!(backend.group_channels("room").await.unwrap().is_empty());
        assert_eq!(backend.group_send("room", Message::new()).await.unwrap(), 0);
    }

    #[test]
    fn test_alias_and_locality() {
        let backend = MemoryBackend::with_alias("local", MemoryConfig::default());
        assert_eq!(backend.alias(), "local");
        assert!(backend.local_only());
        assert!(backend.registry().is_empty());
    }
}
