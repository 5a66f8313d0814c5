//! Inbound message bus
//!
//! The default [`PublishMode::LatestValue`] keeps a single slot holding the
//! most recently published message. Every publish overwrites it, so a slow
//! subscriber can silently miss messages when producers race. Existing
//! consumers may depend on that drop behaviour, which is why it stays the
//! default.
//!
//! [`PublishMode::Broadcast`] adds a bounded fan-out channel where every
//! subscriber sees every message until it lags more than `capacity` behind.
//! The latest-value slot is maintained in both modes.
//!
//! All publishes go through an emit fence. Background tasks publish with
//! [`MessageBus::publish_unless_cancelled`], which checks their token inside
//! the fence. Anything cancelled inside [`MessageBus::fenced`] therefore can
//! no longer land a message once `fenced` returns.

use crate::message::Message;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

// ----------------------------------------------------------------------------
// Publish Mode
// ----------------------------------------------------------------------------

/// How published messages reach subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PublishMode {
    /// Single latest-value slot; last writer wins
    #[default]
    LatestValue,
    /// Bounded fan-out; each subscriber gets every message up to `capacity` behind
    Broadcast { capacity: usize },
}

// ----------------------------------------------------------------------------
// Subscription Errors
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscriptionError {
    /// Every publisher handle is gone
    #[error("Message bus closed")]
    Closed,
    /// Broadcast subscriber fell behind and lost messages
    #[error("Subscriber lagged, {skipped} messages skipped")]
    Lagged { skipped: u64 },
}

// ----------------------------------------------------------------------------
// Message Bus
// ----------------------------------------------------------------------------

struct BusInner {
    mode: PublishMode,
    latest: watch::Sender<Option<Message>>,
    fanout: Option<broadcast::Sender<Message>>,
    emit_fence: Mutex<()>,
    published: AtomicU64,
}

/// Shared publisher for inbound messages. Cloning shares the same bus.
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

impl MessageBus {
    pub fn new(mode: PublishMode) -> Self {
        let (latest, _) = watch::channel(None);
        let fanout = match mode {
            PublishMode::LatestValue => None,
            PublishMode::Broadcast { capacity } => Some(broadcast::channel(capacity.max(1)).0),
        };

        Self {
            inner: Arc::new(BusInner {
                mode,
                latest,
                fanout,
                emit_fence: Mutex::new(()),
                published: AtomicU64::new(0),
            }),
        }
    }

    /// Publish unconditionally
    pub fn publish(&self, message: Message) {
        let _fence = self.lock_fence();
        self.publish_locked(message);
    }

    /// Publish only if `token` has not been cancelled. Returns whether the
    /// message was published.
    pub fn publish_unless_cancelled(&self, token: &CancellationToken, message: Message) -> bool {
        let _fence = self.lock_fence();
        if token.is_cancelled() {
            return false;
        }
        self.publish_locked(message);
        true
    }

    /// Run `f` while holding the emit fence. No publish can interleave with it.
    pub fn fenced<R>(&self, f: impl FnOnce() -> R) -> R {
        let _fence = self.lock_fence();
        f()
    }

    /// Most recently published message
    pub fn latest(&self) -> Option<Message> {
        self.inner.latest.borrow().clone()
    }

    /// Total messages published since the bus was created
    pub fn published_count(&self) -> u64 {
        self.inner.published.load(Ordering::Acquire)
    }

    /// Subscribe using the bus's configured mode
    pub fn subscribe(&self) -> MessageSubscription {
        match &self.inner.fanout {
            Some(fanout) => MessageSubscription::Broadcast(fanout.subscribe()),
            None => self.subscribe_latest(),
        }
    }

    /// Subscribe to the latest-value slot regardless of mode
    pub fn subscribe_latest(&self) -> MessageSubscription {
        MessageSubscription::Latest(self.inner.latest.subscribe())
    }

    fn lock_fence(&self) -> std::sync::MutexGuard<'_, ()> {
        self.inner
            .emit_fence
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn publish_locked(&self, message: Message) {
        self.inner.published.fetch_add(1, Ordering::AcqRel);
        if let Some(fanout) = &self.inner.fanout {
            // No subscribers is not an error for a fire-and-forget bus
            let _ = fanout.send(message.clone());
        }
        self.inner.latest.send_replace(Some(message));
    }
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("mode", &self.inner.mode)
            .field("published", &self.published_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Subscriptions
// ----------------------------------------------------------------------------

/// Receiving side of the message bus
#[derive(Debug)]
pub enum MessageSubscription {
    Latest(watch::Receiver<Option<Message>>),
    Broadcast(broadcast::Receiver<Message>),
}

impl MessageSubscription {
    /// Wait for the next message.
    ///
    /// In latest-value mode this yields whatever occupies the slot when the
    /// subscriber wakes up; intermediate messages may have been overwritten.
    pub async fn recv(&mut self) -> Result<Message, SubscriptionError> {
        match self {
            MessageSubscription::Latest(receiver) => loop {
                receiver
                    .changed()
                    .await
                    .map_err(|_| SubscriptionError::Closed)?;
                if let Some(message) = receiver.borrow_and_update().clone() {
                    return Ok(message);
                }
            },
            MessageSubscription::Broadcast(receiver) => {
                receiver.recv().await.map_err(|err| match err {
                    broadcast::error::RecvError::Closed => SubscriptionError::Closed,
                    broadcast::error::RecvError::Lagged(skipped) => {
                        SubscriptionError::Lagged { skipped }
                    }
                })
            }
        }
    }

    /// Non-blocking receive; `None` when nothing new is available
    pub fn try_recv(&mut self) -> Option<Message> {
        match self {
            MessageSubscription::Latest(receiver) => match receiver.has_changed() {
                Ok(true) => receiver.borrow_and_update().clone(),
                _ => None,
            },
            MessageSubscription::Broadcast(receiver) => loop {
                match receiver.try_recv() {
                    Ok(message) => return Some(message),
                    Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                    Err(_) => return None,
                }
            },
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
