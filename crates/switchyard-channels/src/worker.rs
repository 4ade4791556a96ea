//! Worker loop dispatching channel messages to registered consumers

use crate::{ChannelBackend, ChannelError, ConsumerContext, Message, WorkerConfig};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Outcome of a single worker iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStep {
    /// No message was available
    Idle,
    /// A consumer handled the message
    Processed,
    /// The consumer returned an error or panicked
    Failed,
    /// No consumer was bound to the channel
    Dropped,
}

/// Polls the backend for every channel that has a consumer and dispatches
/// each message to it, one at a time.
pub struct Worker {
    id: Uuid,
    backend: Arc<dyn ChannelBackend>,
    config: WorkerConfig,
    counters: Arc<WorkerCounters>,
}

#[derive(Debug, Default)]
struct WorkerCounters {
    received: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

impl Worker {
    /// Create a new worker
    pub fn new(backend: Arc<dyn ChannelBackend>, config: WorkerConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            backend,
            config,
            counters: Arc::new(WorkerCounters::default()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// Shutdown is checked between messages; a consumer that is running
    /// when the token fires finishes first.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            worker = %self.id,
            backend = %self.backend.alias(),
            "Worker started on channels: {:?}",
            self.backend.registry().channel_names()
        );

        while !shutdown.is_cancelled() {
            match self.run_once().await {
                Ok(WorkerStep::Idle)
                    if !*self.config.get_block() || self.backend.registry().is_empty() =>
                {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(*self.config.get_idle_interval()) => {}
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(worker = %self.id, "Failed to receive from backend: {}", e);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(*self.config.get_error_backoff()) => {}
                    }
                }
            }
        }

        info!(worker = %self.id, "Worker shutdown complete");
    }

    /// Spawn the loop onto the tokio runtime
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    /// Receive and dispatch at most one message
    pub async fn run_once(&self) -> Result<WorkerStep, ChannelError> {
        let channels = self.backend.registry().channel_names();
        if channels.is_empty() {
            return Ok(WorkerStep::Idle);
        }

        let Some((channel, message)) = self
            .backend
            .receive_many(&channels, *self.config.get_block())
            .await?
        else {
            return Ok(WorkerStep::Idle);
        };
        self.counters.received.fetch_add(1, Ordering::Relaxed);

        Ok(self.dispatch(channel, message).await)
    }

    /// Hand one message to the consumer bound to `channel`.
    ///
    /// Never fails: a missing consumer drops the message, a failing or
    /// panicking consumer is logged.
    pub async fn dispatch(&self, channel: String, message: Message) -> WorkerStep {
        let Some(consumer) = self.backend.registry().consumer_for_channel(&channel) else {
            warn!(worker = %self.id, channel = %channel, "No consumer for channel, dropping message");
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return WorkerStep::Dropped;
        };

        debug!(worker = %self.id, channel = %channel, consumer = %consumer.name(), "Dispatching message");
        let ctx = ConsumerContext::new(channel.clone(), self.backend.clone());
        let outcome = AssertUnwindSafe(consumer.consume(message, ctx))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => {
                self.counters.processed.fetch_add(1, Ordering::Relaxed);
                WorkerStep::Processed
            }
            Ok(Err(e)) => {
                if let Some(ChannelError::MalformedMessage(reason)) = e.downcast_ref::<ChannelError>() {
                    warn!(worker = %self.id, channel = %channel, "Dropping malformed message: {}", reason);
                } else {
                    error!(
                        worker = %self.id,
                        channel = %channel,
                        consumer = %consumer.name(),
                        error = ?e,
                        "Consumer failed: {}",
                        e
                    );
                }
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                WorkerStep::Failed
            }
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(
                    worker = %self.id,
                    channel = %channel,
                    consumer = %consumer.name(),
                    "Consumer panicked: {}",
                    reason
                );
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                WorkerStep::Failed
            }
        }
    }

    /// Get worker statistics
    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            received: self.counters.received.load(Ordering::Relaxed),
            processed: self.counters.processed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            registered_channels: self.backend.registry().channel_names(),
        }
    }
}

/// Worker statistics
#[derive(Debug, Clone)]
pub struct WorkerStats {
    pub received: u64,
    pub processed: u64,
    pub failed: u64,
    pub dropped: u64,
    pub registered_channels: Vec<String>,
}
