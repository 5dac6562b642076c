//! In-memory [`PublishChannel`]s for unit tests.
use crate::publishers::{MessageEnvelope, PublishChannel};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Keeps every message it is asked to publish.
#[derive(Default)]
pub(crate) struct RecordingChannel {
    published: Mutex<Vec<MessageEnvelope>>,
    closed: AtomicBool,
}

impl RecordingChannel {
    pub(crate) fn published(&self) -> Vec<MessageEnvelope> {
        self.published.lock().unwrap().clone()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Wait for detached publishes to land, up to a second.
    pub(crate) async fn wait_for(&self, count: usize) -> Vec<MessageEnvelope> {
        for _ in 0..100 {
            if self.published.lock().unwrap().len() >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.published()
    }
}

#[async_trait::async_trait]
impl PublishChannel for RecordingChannel {
    async fn publish(&self, envelope: &MessageEnvelope) -> Result<(), anyhow::Error> {
        self.published.lock().unwrap().push(envelope.clone());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.is_closed()
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Never accepts a message.
#[derive(Default)]
pub(crate) struct StalledChannel {
    attempts: AtomicUsize,
}

impl StalledChannel {
    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl PublishChannel for StalledChannel {
    async fn publish(&self, _envelope: &MessageEnvelope) -> Result<(), anyhow::Error> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        futures_util::future::pending::<()>().await;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }

    async fn close(&self) {}
}

/// Fails every publish.
pub(crate) struct BrokenChannel;

#[async_trait::async_trait]
impl PublishChannel for BrokenChannel {
    async fn publish(&self, _envelope: &MessageEnvelope) -> Result<(), anyhow::Error> {
        Err(anyhow::anyhow!("channel closed by the broker"))
    }

    fn is_connected(&self) -> bool {
        false
    }

    async fn close(&self) {}
}
