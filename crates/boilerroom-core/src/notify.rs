//! Outbound notification channel.
//!
//! The health aggregator hands a finished message to a [`Notifier`] and moves
//! on. Delivery is fire-and-forget: implementations log their own failures
//! and never report them back to the caller.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::info;

/// Sink for operator notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `text` to every recipient.
    async fn notify(&self, text: &str);
}

/// Writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, text: &str) {
        info!(target: "boilerroom::notify", "{}", text);
    }
}

/// Keeps notifications in memory. Useful in tests and for a "last message" view.
#[derive(Debug, Clone, Default)]
pub struct MemoryNotifier {
    messages: Arc<Mutex<Vec<String>>>,
}

impl MemoryNotifier {
    /// Create an empty notifier.
    pub fn new() -> Self {
        Self::default()
    }

    /// All messages delivered so far.
    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    /// Most recent message.
    pub fn last(&self) -> Option<String> {
        self.messages.lock().ok().and_then(|m| m.last().cloned())
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn notify(&self, text: &str) {
        if let Ok(mut messages) = self.messages.lock() {
            messages.push(text.to_string());
        }
    }
}

#[async_trait]
impl<N: Notifier + ?Sized> Notifier for Arc<N> {
    async fn notify(&self, text: &str) {
        (**self).notify(text).await
    }
}
