//! Consumer registry: exact channel name to handler

use crate::{Channel, ChannelBackend, ChannelError, ChannelResult, ConsumerResult, Group, Message};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::info;

/// A handler bound to one or more channel names
#[async_trait]
pub trait Consumer: Send + Sync {
    /// Handle one message
    async fn consume(&self, message: Message, ctx: ConsumerContext) -> ConsumerResult;

    /// Human-readable name used in logs
    fn name(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }
}

/// Convenience implementation for closure-based consumers
#[async_trait]
impl<F, Fut> Consumer for F
where
    F: Fn(Message, ConsumerContext) -> Fut + Send + Sync,
    Fut: Future<Output = ConsumerResult> + Send + 'static,
{
    async fn consume(&self, message: Message, ctx: ConsumerContext) -> ConsumerResult {
        self(message, ctx).await
    }
}

/// What a consumer gets alongside the message: where it came from and
/// a handle on the backend to reply through.
#[derive(Clone)]
pub struct ConsumerContext {
    channel: String,
    backend: Arc<dyn ChannelBackend>,
}

impl ConsumerContext {
    pub fn new<N: Into<String>>(channel: N, backend: Arc<dyn ChannelBackend>) -> Self {
        Self {
            channel: channel.into(),
            backend,
        }
    }

    /// Channel the message was received on
    pub fn channel_name(&self) -> &str {
        &self.channel
    }

    pub fn backend(&self) -> &Arc<dyn ChannelBackend> {
        &self.backend
    }

    /// Address another channel on the same backend
    pub fn channel<N: Into<String>>(&self, name: N) -> Channel {
        Channel::new(name, self.backend.clone())
    }

    /// Address a group on the same backend
    pub fn group<N: Into<String>>(&self, name: N) -> Group {
        Group::new(name, self.backend.clone())
    }
}

impl fmt::Debug for ConsumerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerContext")
            .field("channel", &self.channel)
            .field("backend", &self.backend.alias())
            .finish()
    }
}

/// Registry mapping channel names to consumers.
///
/// A pure lookup table, it holds no queues. Each name has at most one consumer.
pub struct ConsumerRegistry {
    consumers: RwLock<HashMap<String, Arc<dyn Consumer>>>,
}

impl ConsumerRegistry {
    pub fn new() -> Self {
        Self {
            consumers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a consumer for every given channel name
    pub fn add_consumer<C, I, N>(&self, consumer: C, channels: I) -> ChannelResult<()>
    where
        C: Consumer + 'static,
        I: IntoIterator<Item = N>,
        N: Into<String>,
    {
        self.add_shared(Arc::new(consumer), channels)
    }

    /// Register an already shared consumer.
    ///
    /// Either every name is registered or none is: a name that already has
    /// a consumer fails the whole call with `DuplicateConsumer`.
    pub fn add_shared<I, N>(&self, consumer: Arc<dyn Consumer>, channels: I) -> ChannelResult<()>
    where
        I: IntoIterator<Item = N>,
        N: Into<String>,
    {
        let names: Vec<String> = channels.into_iter().map(Into::into).collect();
        if names.is_empty() {
            return Err(ChannelError::Configuration(format!(
                "consumer {} registered without any channel",
                consumer.name()
            )));
        }

        let mut consumers = self.consumers.write();
        for (i, name) in names.iter().enumerate() {
            if consumers.contains_key(name) || names[..i].contains(name) {
                return Err(ChannelError::DuplicateConsumer(name.clone()));
            }
        }

        let consumer_name = consumer.name();
        for name in names {
            info!("Registered consumer {} for channel {}", consumer_name, name);
            consumers.insert(name, consumer.clone());
        }
        Ok(())
    }

    /// Consumer bound to a channel name, if any
    pub fn consumer_for_channel(&self, channel: &str) -> Option<Arc<dyn Consumer>> {
        self.consumers.read().get(channel).cloned()
    }

    /// Every channel name with a consumer, sorted
    pub fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.consumers.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.consumers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.consumers.read().is_empty()
    }
}

impl Default for ConsumerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConsumerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerRegistry")
            .field("channels", &self.channel_names())
            .finish()
    }
}
