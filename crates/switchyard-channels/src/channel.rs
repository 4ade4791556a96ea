//! Channel and group address objects

use crate::{ChannelBackend, ChannelResult, Message};
use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};
use std::fmt;
use std::sync::Arc;

/// Separator between a reply channel's prefix and its random suffix
pub const REPLY_SEPARATOR: char = '!';

/// Length of the random suffix of generated channel names
pub const REPLY_SUFFIX_LEN: usize = 24;

/// Address of a single named channel on a backend
#[derive(Clone)]
pub struct Channel {
    name: String,
    backend: Arc<dyn ChannelBackend>,
}

impl Channel {
    pub fn new<N: Into<String>>(name: N, backend: Arc<dyn ChannelBackend>) -> Self {
        Self {
            name: name.into(),
            backend,
        }
    }

    /// Channel name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backend this channel sends through
    pub fn backend(&self) -> &Arc<dyn ChannelBackend> {
        &self.backend
    }

    /// Send a message to this channel
    pub async fn send(&self, message: Message) -> ChannelResult<()> {
        self.backend.send(&self.name, message).await
    }

    /// Generate a fresh reply channel name: `prefix!<random suffix>`.
    ///
    /// The suffix is drawn from the operating system's CSPRNG. The name is
    /// usable immediately; nothing needs to be registered first.
    pub fn new_name(prefix: &str) -> String {
        let suffix: String = OsRng
            .sample_iter(&Alphanumeric)
            .take(REPLY_SUFFIX_LEN)
            .map(char::from)
            .collect();
        format!("{}{}{}", prefix, REPLY_SEPARATOR, suffix)
    }

    /// Split a generated name back into its prefix, if it has one
    pub fn prefix_of(name: &str) -> Option<&str> {
        let (prefix, suffix) = name.rsplit_once(REPLY_SEPARATOR)?;
        (suffix.len() == REPLY_SUFFIX_LEN).then_some(prefix)
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("backend", &self.backend.alias())
            .finish()
    }
}

/// A backend-persisted set of channel names supporting fan-out.
///
/// Membership is never cached locally; every call goes to the backend.
#[derive(Clone)]
pub struct Group {
    name: String,
    backend: Arc<dyn ChannelBackend>,
}

impl Group {
    pub fn new<N: Into<String>>(name: N, backend: Arc<dyn ChannelBackend>) -> Self {
        Self {
            name: name.into(),
            backend,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a channel to the group
    pub async fn add(&self, channel: &str) -> ChannelResult<()> {
        self.backend.group_add(&self.name, channel).await
    }

    /// Remove a channel from the group
    pub async fn discard(&self, channel: &str) -> ChannelResult<()> {
        self.backend.group_discard(&self.name, channel).await
    }

    /// Send a message to every live member, returning how many received it
    pub async fn send(&self, message: Message) -> ChannelResult<usize> {
        self.backend.group_send(&self.name, message).await
    }

    /// Current live members
    pub async fn channels(&self) -> ChannelResult<Vec<String>> {
        self.backend.group_channels(&self.name).await
    }
}

impl fmt::Debug for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Group")
            .field("name", &self.name)
            .field("backend", &self.backend.alias())
            .finish()
    }
}
