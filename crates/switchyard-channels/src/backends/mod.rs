//! Channel backend implementations

use crate::{ChannelResult, ConsumerRegistry, Message};
use async_trait::async_trait;
use tracing::warn;

pub mod memory;

#[cfg(feature = "redis-backend")]
pub mod redis;

pub use memory::{MemoryBackend, DEFAULT_ALIAS};

#[cfg(feature = "redis-backend")]
pub use redis::RedisBackend;

/// Core backend trait that all channel stores must implement.
///
/// FIFO order holds per channel name only. A message handed out by
/// `receive_many` is never handed to a second caller.
#[async_trait]
pub trait ChannelBackend: Send + Sync {
    /// Alias this backend was configured under
    fn alias(&self) -> &str;

    /// True if messages cannot leave this process
    fn local_only(&self) -> bool;

    /// Consumers bound to channels on this backend
    fn registry(&self) -> &ConsumerRegistry;

    /// Enqueue a message on a channel
    async fn send(&self, channel: &str, message: Message) -> ChannelResult<()>;

    /// Dequeue one message from any of the given channels.
    ///
    /// Returns `None` when nothing is available: immediately if `block` is
    /// false, otherwise once the backend's receive timeout elapses.
    async fn receive_many(
        &self,
        channels: &[String],
        block: bool,
    ) -> ChannelResult<Option<(String, Message)>>;

    /// Add a channel to a group, refreshing its membership expiry
    async fn group_add(&self, group: &str, channel: &str) -> ChannelResult<()>;

    /// Remove a channel from a group
    async fn group_discard(&self, group: &str, channel: &str) -> ChannelResult<()>;

    /// Live (unexpired) members of a group
    async fn group_channels(&self, group: &str) -> ChannelResult<Vec<String>>;

    /// Send a message to every live member of a group.
    ///
    /// Delivery is best-effort per member: failures are logged and skipped.
    /// Returns the number of members the message reached.
    async fn group_send(&self, group: &str, message: Message) -> ChannelResult<usize> {
        let members = self.group_channels(group).await?;
        let mut delivered = 0;

        for channel in members {
            match self.send(&channel, message.clone()).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(group = %group, channel = %channel, "Group delivery failed: {}", e);
                }
            }
        }

        Ok(delivered)
    }
}
