//! # Subscriptions
//!
//! The consuming side of the bus. A `Subscription` is a lazy, unbounded
//! sequence of the messages published on its pattern after it was created.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use shared_types::{Message, SubsystemId, TopicPattern};
use thiserror::Error;
use tokio::sync::mpsc::error::TryRecvError;
use tokio_stream::Stream;
use tracing::debug;

use crate::mailbox::MailboxReceiver;
use crate::publisher::SubscriberTable;

/// Errors from subscription operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    /// The subscription was released or the bus stopped, and the mailbox is
    /// empty.
    #[error("Subscription closed")]
    Closed,
}

/// Identifier of one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub(crate) u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// A subscription handle.
///
/// When dropped, the subscription is removed from the bus.
pub struct Subscription {
    id: SubscriptionId,
    pattern: TopicPattern,
    owner: SubsystemId,
    receiver: MailboxReceiver,
    subscribers: SubscriberTable,
}

impl Subscription {
    pub(crate) fn new(
        id: SubscriptionId,
        pattern: TopicPattern,
        owner: SubsystemId,
        receiver: MailboxReceiver,
        subscribers: SubscriberTable,
    ) -> Self {
        Self {
            id,
            pattern,
            owner,
            receiver,
            subscribers,
        }
    }

    /// Receive the next message.
    ///
    /// # Returns
    ///
    /// - `Some(message)` - The next message on this subscription's pattern
    /// - `None` - End of sequence (unsubscribed or bus stopped, mailbox drained)
    pub async fn recv(&mut self) -> Option<Message> {
        self.receiver.recv().await
    }

    /// Receive the next message without waiting.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(message))` - A message was queued
    /// - `Ok(None)` - Nothing queued yet
    /// - `Err(SubscriptionError::Closed)` - End of sequence
    pub fn try_recv(&mut self) -> Result<Option<Message>, SubscriptionError> {
        match self.receiver.try_recv() {
            Ok(message) => Ok(Some(message)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(SubscriptionError::Closed),
        }
    }

    /// Release the subscription. No further messages are queued for it.
    pub fn unsubscribe(self) {
        // Drop does the work.
    }

    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    #[must_use]
    pub fn pattern(&self) -> &TopicPattern {
        &self.pattern
    }

    #[must_use]
    pub fn owner(&self) -> SubsystemId {
        self.owner
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.subscribers.write().remove(&self.id).is_some() {
            debug!(subscription = %self.id, pattern = %self.pattern, "Subscription dropped");
        }
    }
}

impl Stream for Subscription {
    type Item = Message;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::ServiceBus;
    use shared_types::Payload;
    use std::time::Duration;
    use tokio::time::timeout;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn test_subscription_recv() {
        let bus = ServiceBus::new();
        bus.start();
        let mut sub = bus.subscribe(SubsystemId::Logging, "log:*");

        bus.publish_from(
            SubsystemId::Application,
            "log:info",
            Payload::Value(serde_json::json!("hello")),
        );

        let received = timeout(Duration::from_millis(100), sub.recv())
            .await
            .expect("timeout")
            .expect("message");
        assert_eq!(received.topic, "log:info");
        assert_eq!(received.sender, SubsystemId::Application);
    }

    #[tokio::test]
    async fn test_subscription_drop_cleanup() {
        let bus = ServiceBus::new();
        {
            let _sub1 = bus.subscribe(SubsystemId::Logging, "*");
            let _sub2 = bus.subscribe(SubsystemId::Event, "*");
            assert_eq!(bus.subscriber_count(), 2);
        }
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let bus = ServiceBus::new();
        bus.start();
        let sub = bus.subscribe(SubsystemId::Logging, "t");
        let id = sub.id();
        sub.unsubscribe();
        assert!(!bus.unsubscribe(id));
        assert_eq!(bus.subscribers_for("t"), 0);
    }

    #[tokio::test]
    async fn test_try_recv_empty_then_closed() {
        let bus = ServiceBus::new();
        bus.start();
        let mut sub = bus.subscribe(SubsystemId::Logging, "t");
        assert!(matches!(sub.try_recv(), Ok(None)));

        bus.stop();
        assert_eq!(sub.try_recv(), Err(SubscriptionError::Closed));
    }

    #[tokio::test]
    async fn test_stream_ends_on_stop() {
        let bus = ServiceBus::new();
        bus.start();
        let mut sub = bus.subscribe(SubsystemId::Logging, "t");
        bus.publish_from(SubsystemId::Application, "t", Payload::Value(1.into()));
        bus.stop();

        let first = sub.next().await.expect("accepted message survives stop");
        assert_eq!(first.payload, Payload::Value(1.into()));
        assert!(sub.next().await.is_none());
    }
}
