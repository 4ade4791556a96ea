//! Redis channel backend for multi-process deployments

use crate::{
    ChannelBackend, ChannelError, ChannelResult, ConsumerRegistry, Message, RedisConfig,
};
use async_trait::async_trait;
use chrono::Utc;
use rand::seq::SliceRandom;
use redis::{aio::ConnectionManager, Client, ErrorKind, RedisError};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Redis channel backend.
///
/// Each channel is a list (`RPUSH` to send, `LPOP`/`BLPOP` to receive), so
/// Redis itself guarantees a message is popped by one client only. Groups are
/// sorted sets scored by the time a member was last added.
pub struct RedisBackend {
    alias: String,
    config: RedisConfig,
    client: Client,
    connection_pool: RwLock<Option<ConnectionManager>>,
    registry: ConsumerRegistry,
}

impl RedisBackend {
    /// Create a new Redis backend and connect eagerly
    pub async fn new<A: Into<String>>(alias: A, config: RedisConfig) -> ChannelResult<Self> {
        let client = Client::open(config.get_url().as_str())
            .map_err(|e| ChannelError::Configuration(format!("Invalid Redis URL: {}", e)))?;

        let backend = Self {
            alias: alias.into(),
            config,
            client,
            connection_pool: RwLock::new(None),
            registry: ConsumerRegistry::new(),
        };

        backend.ensure_connection().await?;

        Ok(backend)
    }

    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    /// Ensure we have a valid connection
    async fn ensure_connection(&self) -> ChannelResult<()> {
        let mut pool = self.connection_pool.write().await;

        if pool.is_none() {
            let manager = self
                .client
                .get_tokio_connection_manager()
                .await
                .map_err(map_redis_error)?;

            *pool = Some(manager);
        }

        Ok(())
    }

    /// Get a handle on the shared multiplexed connection
    async fn get_connection(&self) -> ChannelResult<ConnectionManager> {
        self.ensure_connection().await?;
        let pool = self.connection_pool.read().await;
        pool.as_ref().cloned().ok_or_else(|| {
            ChannelError::BackendUnavailable("Redis connection not initialised".to_string())
        })
    }

    /// Build a namespaced key
    pub fn format_key(prefix: &str, kind: &str, name: &str) -> String {
        format!("{}:{}:{}", prefix, kind, name)
    }

    fn channel_key(&self, channel: &str) -> String {
        Self::format_key(self.config.get_key_prefix(), "channel", channel)
    }

    fn group_key(&self, group: &str) -> String {
        Self::format_key(self.config.get_key_prefix(), "group", group)
    }

    fn now_score() -> f64 {
        Utc::now().timestamp_millis() as f64
    }

    fn decode_popped(&self, channel: String, payload: &str) -> Option<(String, Message)> {
        match Message::from_json(payload) {
            Ok(message) => Some((channel, message)),
            Err(e) => {
                warn!(channel = %channel, "Dropping malformed message from Redis: {}", e);
                None
            }
        }
    }
}

fn map_redis_error(err: RedisError) -> ChannelError {
    match err.kind() {
        ErrorKind::TypeError => ChannelError::MalformedMessage(err.to_string()),
        _ => ChannelError::BackendUnavailable(err.to_string()),
    }
}

#[async_trait]
impl ChannelBackend for RedisBackend {
    fn alias(&self) -> &str {
        &self.alias
    }

    fn local_only(&self) -> bool {
        false
    }

    fn registry(&self) -> &ConsumerRegistry {
        &self.registry
    }

    async fn send(&self, channel: &str, message: Message) -> ChannelResult<()> {
        let mut conn = self.get_connection().await?;
        let key = self.channel_key(channel);
        let payload = message.to_json()?;

        if *self.config.get_capacity() > 0 {
            let queued: usize = redis::cmd("LLEN")
                .arg(&key)
                .query_async(&mut conn)
                .await
                .map_err(map_redis_error)?;
            if queued >= *self.config.get_capacity() {
                return Err(ChannelError::ChannelFull(channel.to_string()));
            }
        }

        let _: () = redis::pipe()
            .atomic()
            .cmd("RPUSH")
            .arg(&key)
            .arg(payload)
            .ignore()
            .cmd("EXPIRE")
            .arg(&key)
            .arg(self.config.get_message_expiry().as_secs().max(1))
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;

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

        let mut keys: HashMap<String, String> = channels
            .iter()
            .map(|channel| (self.channel_key(channel), channel.clone()))
            .collect();
        let mut order: Vec<String> = keys.keys().cloned().collect();
        order.shuffle(&mut rand::thread_rng());

        if block {
            // BLPOP stalls its connection, so it gets one of its own rather
            // than the shared multiplexed one.
            let mut conn = self
                .client
                .get_async_connection()
                .await
                .map_err(map_redis_error)?;
            let popped: Option<(String, String)> = redis::cmd("BLPOP")
                .arg(&order)
                .arg(self.config.get_receive_timeout().as_secs().max(1))
                .query_async(&mut conn)
                .await
                .map_err(map_redis_error)?;

            return Ok(popped.and_then(|(key, payload)| {
                let channel = keys.remove(&key)?;
                self.decode_popped(channel, &payload)
            }));
        }

        let mut conn = self.get_connection().await?;
        for key in order {
            let popped: Option<String> = redis::cmd("LPOP")
                .arg(&key)
                .query_async(&mut conn)
                .await
                .map_err(map_redis_error)?;

            if let Some(payload) = popped {
                if let Some(channel) = keys.remove(&key) {
                    return Ok(self.decode_popped(channel, &payload));
                }
            }
        }

        Ok(None)
    }

    async fn group_add(&self, group: &str, channel: &str) -> ChannelResult<()> {
        let mut conn = self.get_connection().await?;
        let key = self.group_key(group);

        let _: () = redis::pipe()
            .atomic()
            .cmd("ZADD")
            .arg(&key)
            .arg(Self::now_score())
            .arg(channel)
            .ignore()
            .cmd("EXPIRE")
            .arg(&key)
            .arg(self.config.get_group_expiry().as_secs().max(1))
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;

        debug!(group = %group, channel = %channel, "Added channel to group");
        Ok(())
    }

    async fn group_discard(&self, group: &str, channel: &str) -> ChannelResult<()> {
        let mut conn = self.get_connection().await?;
        let _: () = redis::cmd("ZREM")
            .arg(self.group_key(group))
            .arg(channel)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(())
    }

    async fn group_channels(&self, group: &str) -> ChannelResult<Vec<String>> {
        let mut conn = self.get_connection().await?;
        let key = self.group_key(group);
        let cutoff = Self::now_score() - self.config.get_group_expiry().as_millis() as f64;

        let (members,): (Vec<String>,) = redis::pipe()
            .atomic()
            .cmd("ZREMRANGEBYSCORE")
            .arg(&key)
            .arg("-inf")
            .arg(cutoff)
            .ignore()
            .cmd("ZRANGE")
            .arg(&key)
            .arg(0)
            .arg(-1)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;

        Ok(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RedisConfigBuilder;

    #[test]
    fn test_key_format() {
        assert_eq!(
            RedisBackend::format_key("switchyard", "channel", "http.request"),
            "switchyard:channel:http.request"
        );
        assert_eq!(
            RedisBackend::format_key("app", "group", "room-1"),
            "app:group:room-1"
        );
    }

    #[test]
    fn test_error_mapping() {
        let err = RedisError::from((ErrorKind::IoError, "connection refused"));
        assert!(matches!(
            map_redis_error(err),
            ChannelError::BackendUnavailable(_)
        ));

        let err = RedisError::from((ErrorKind::TypeError, "bad type"));
        assert!(matches!(
            map_redis_error(err),
            ChannelError::MalformedMessage(_)
        ));
    }

    #[tokio::test]
    #[ignore = "requires a running Redis server"]
    async fn test_redis_send_receive_and_groups() {
        let config = RedisConfigBuilder::testing()
            .build()
            .expect("Failed to build config");
        let backend = RedisBackend::new("redis", config).await.unwrap();

        backend
            .send("test.channel", Message::new().with("n", 1))
            .await
            .unwrap();
        let (channel, message) = backend
            .receive_many(&["test.channel".to_string()], true)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(channel, "test.channel");
        assert_eq!(message.get("n").and_then(|v| v.as_i64()), Some(1));

        backend.group_add("test.group", "member").await.unwrap();
        assert_eq!(
            backend.group_channels("test.group").await.unwrap(),
            vec!["member".to_string()]
        );
        assert_eq!(backend.group_send("test.group", Message::new()).await.unwrap(), 1);
        backend.group_discard("test.group", "member").await.unwrap();
        assert!(!backend.local_only());
    }
}
