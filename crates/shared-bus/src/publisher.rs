//! # Service Bus
//!
//! The publishing side of the bus and its lifecycle.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use shared_types::{Message, Payload, SubsystemId, TopicPattern};
use tracing::{debug, info, warn};

use crate::mailbox::{mailbox, Delivery, MailboxPolicy, MailboxSender};
use crate::subscriber::{Subscription, SubscriptionId};

/// Lifecycle state of the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusState {
    /// Constructed; publishes are held in a backlog until `start()`.
    Idle,
    /// Delivering.
    Running,
    /// Closed; publishes are discarded.
    Stopped,
}

pub(crate) struct SubscriberEntry {
    pub(crate) pattern: TopicPattern,
    pub(crate) owner: SubsystemId,
    pub(crate) mailbox: MailboxSender,
}

pub(crate) type SubscriberTable = Arc<RwLock<BTreeMap<SubscriptionId, SubscriberEntry>>>;

/// A message published while idle, with the first subscription id that
/// did not exist yet at publish time.
struct Pending {
    message: Message,
    watermark: u64,
}

struct Lifecycle {
    state: BusState,
    backlog: VecDeque<Pending>,
}

/// In-memory publish/subscribe router.
///
/// Owned by the application (behind `Arc`) and outlives every subsystem.
pub struct ServiceBus {
    /// Lifecycle state and pre-start backlog. Held for the duration of a
    /// publish so per-publisher order survives the backlog flush.
    lifecycle: Mutex<Lifecycle>,

    /// Active subscriptions.
    subscribers: SubscriberTable,

    /// Next subscription id.
    next_id: AtomicU64,

    /// Mailbox policy for new subscriptions.
    policy: MailboxPolicy,

    /// Trace every publish when set.
    debug: AtomicBool,

    /// Total messages accepted by `publish`.
    messages_published: AtomicU64,

    /// Messages dropped because a bounded mailbox was full.
    messages_dropped: AtomicU64,
}

impl ServiceBus {
    /// Create a bus with unbounded subscriber mailboxes.
    #[must_use]
    pub fn new() -> Self {
        Self::with_policy(MailboxPolicy::Unbounded)
    }

    /// Create a bus with the given mailbox policy.
    #[must_use]
    pub fn with_policy(policy: MailboxPolicy) -> Self {
        Self {
            lifecycle: Mutex::new(Lifecycle {
                state: BusState::Idle,
                backlog: VecDeque::new(),
            }),
            subscribers: Arc::new(RwLock::new(BTreeMap::new())),
            next_id: AtomicU64::new(1),
            policy,
            debug: AtomicBool::new(false),
            messages_published: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
        }
    }

    /// Enable or disable per-message tracing. Delivery is unaffected.
    pub fn set_debug(&self, enabled: bool) {
        self.debug.store(enabled, Ordering::Relaxed);
        info!(enabled, "Service bus debug tracing toggled");
    }

    /// Whether per-message tracing is on.
    #[must_use]
    pub fn is_debug(&self) -> bool {
        self.debug.load(Ordering::Relaxed)
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> BusState {
        self.lifecycle.lock().state
    }

    /// Start delivering. Messages published while idle are fanned out now,
    /// in publish order, to the subscribers that existed when each was
    /// published.
    pub fn start(&self) {
        let mut lifecycle = self.lifecycle.lock();
        match lifecycle.state {
            BusState::Running => return,
            BusState::Stopped => {
                warn!("Service bus start requested after stop, ignoring");
                return;
            }
            BusState::Idle => {}
        }

        lifecycle.state = BusState::Running;
        let backlog = std::mem::take(&mut lifecycle.backlog);
        if !backlog.is_empty() {
            debug!(count = backlog.len(), "Flushing pre-start backlog");
        }
        self.flush(backlog);
        info!("Service bus started");
    }

    /// Stop the bus. Every mailbox is closed: subscribers receive what was
    /// already accepted and then end-of-sequence. Safe to call repeatedly.
    pub fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state == BusState::Stopped {
            debug!("Service bus already stopped");
            return;
        }

        if !lifecycle.backlog.is_empty() {
            // Never started: hand the backlog out so nothing accepted is lost.
            let backlog = std::mem::take(&mut lifecycle.backlog);
            self.flush(backlog);
        }
        lifecycle.state = BusState::Stopped;

        let closed = {
            let mut subs = self.subscribers.write();
            let count = subs.len();
            subs.clear();
            count
        };
        info!(closed_subscriptions = closed, "Service bus stopped");
    }

    /// Publish a message. Never blocks on subscribers and never fails; with no
    /// matching subscriber the message is discarded.
    pub fn publish(&self, message: Message) {
        let mut lifecycle = self.lifecycle.lock();
        self.messages_published.fetch_add(1, Ordering::Relaxed);

        if self.is_debug() {
            info!(
                topic = %message.topic,
                sender = %message.sender,
                payload = %message.payload.summary(),
                "bus publish"
            );
        }

        match lifecycle.state {
            BusState::Idle => {
                let watermark = self.next_id.load(Ordering::Relaxed);
                lifecycle.backlog.push_back(Pending { message, watermark });
            }
            BusState::Running => {
                self.route(message);
            }
            BusState::Stopped => {
                debug!(topic = %message.topic, "Message discarded (bus stopped)");
            }
        }
    }

    /// Convenience wrapper around [`ServiceBus::publish`].
    pub fn publish_from(&self, sender: SubsystemId, topic: impl Into<String>, payload: Payload) {
        self.publish(Message::new(sender, topic, payload));
    }

    /// Subscribe `owner` to `pattern`. Only messages published after this
    /// call are delivered.
    pub fn subscribe(&self, owner: SubsystemId, pattern: impl Into<TopicPattern>) -> Subscription {
        let pattern = pattern.into();
        let (sender, receiver) = mailbox(self.policy);

        // Hold the lifecycle lock so a subscription cannot race a stop() or
        // land between an idle publish and its watermark.
        let lifecycle = self.lifecycle.lock();
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        if lifecycle.state == BusState::Stopped {
            debug!(%pattern, owner = %owner, "Subscribe on stopped bus, handle is already closed");
            drop(sender);
        } else {
            self.subscribers.write().insert(
                id,
                SubscriberEntry {
                    pattern: pattern.clone(),
                    owner,
                    mailbox: sender,
                },
            );
            debug!(subscription = %id, %pattern, owner = %owner, "New subscription created");
        }
        drop(lifecycle);

        Subscription::new(id, pattern, owner, receiver, Arc::clone(&self.subscribers))
    }

    /// Remove one subscription by id. Returns false if it was not active.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.write().remove(&id).is_some()
    }

    /// Release every subscription held by `owner`. Returns how many were
    /// removed.
    pub fn unsubscribe_owner(&self, owner: SubsystemId) -> usize {
        let mut subs = self.subscribers.write();
        let before = subs.len();
        subs.retain(|_, entry| entry.owner != owner);
        let removed = before - subs.len();
        if removed > 0 {
            debug!(owner = %owner, removed, "Released owner subscriptions");
        }
        removed
    }

    /// Number of active subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Number of active subscriptions matching `topic`.
    #[must_use]
    pub fn subscribers_for(&self, topic: &str) -> usize {
        self.subscribers
            .read()
            .values()
            .filter(|entry| entry.pattern.matches(topic))
            .count()
    }

    /// Total messages accepted by `publish`.
    #[must_use]
    pub fn messages_published(&self) -> u64 {
        self.messages_published.load(Ordering::Relaxed)
    }

    /// Messages dropped by full bounded mailboxes.
    #[must_use]
    pub fn messages_dropped(&self) -> u64 {
        self.messages_dropped.load(Ordering::Relaxed)
    }

    /// Deliver an idle backlog in publish order. Each message only reaches
    /// subscriptions created before it was published.
    fn flush(&self, backlog: VecDeque<Pending>) {
        for pending in backlog {
            self.route_below(pending.message, pending.watermark);
        }
    }

    /// Fan a message out to every matching mailbox. Returns the number of
    /// mailboxes that accepted it.
    fn route(&self, message: Message) -> usize {
        self.route_below(message, u64::MAX)
    }

    /// Like [`ServiceBus::route`], restricted to subscription ids below
    /// `watermark`.
    fn route_below(&self, message: Message, watermark: u64) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();

        {
            let subs = self.subscribers.read();
            for (id, entry) in subs.range(..SubscriptionId(watermark)) {
                if !entry.pattern.matches(&message.topic) {
                    continue;
                }
                match entry.mailbox.deliver(message.clone()) {
                    Delivery::Delivered => delivered += 1,
                    Delivery::Full => {
                        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            subscription = %id,
                            owner = %entry.owner,
                            topic = %message.topic,
                            "Subscriber mailbox full, message dropped for this subscriber"
                        );
                    }
                    Delivery::Closed => closed.push(*id),
                }
            }
        }

        if !closed.is_empty() {
            let mut subs = self.subscribers.write();
            for id in closed {
                subs.remove(&id);
            }
        }

        if delivered == 0 {
            debug!(topic = %message.topic, "Message dropped (no subscribers)");
        }
        delivered
    }
}

impl Default for ServiceBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::timeout;

    fn value(n: i64) -> Payload {
        Payload::Value(json!(n))
    }

    fn running_bus() -> ServiceBus {
        let bus = ServiceBus::new();
        bus.start();
        bus
    }

    #[tokio::test]
    async fn test_publish_no_subscribers() {
        let bus = running_bus();
        bus.publish_from(SubsystemId::Application, "nobody:listens", value(1));
        assert_eq!(bus.messages_published(), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_every_subscriber_receives() {
        let bus = running_bus();
        let mut a = bus.subscribe(SubsystemId::Logging, "log:*");
        let mut b = bus.subscribe(SubsystemId::Dispatcher, "log:info");
        let mut c = bus.subscribe(SubsystemId::Event, "event:*");

        bus.publish_from(SubsystemId::Application, "log:info", value(7));

        assert_eq!(a.recv().await.unwrap().payload, value(7));
        assert_eq!(b.recv().await.unwrap().payload, value(7));
        assert!(matches!(c.try_recv(), Ok(None)));
    }

    #[tokio::test]
    async fn test_per_publisher_order_is_preserved() {
        let bus = running_bus();
        let mut first = bus.subscribe(SubsystemId::Logging, "seq");
        let mut second = bus.subscribe(SubsystemId::Event, "seq");

        for n in 0..100 {
            bus.publish_from(SubsystemId::Application, "seq", value(n));
        }

        for sub in [&mut first, &mut second] {
            for n in 0..100 {
                assert_eq!(sub.recv().await.unwrap().payload, value(n));
            }
        }
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_only_future_messages() {
        let bus = running_bus();
        bus.publish_from(SubsystemId::Application, "t", value(1));
        let mut late = bus.subscribe(SubsystemId::Call, "t");
        bus.publish_from(SubsystemId::Application, "t", value(2));

        assert_eq!(late.recv().await.unwrap().payload, value(2));
        assert!(matches!(late.try_recv(), Ok(None)));
    }

    #[tokio::test]
    async fn test_idle_backlog_is_flushed_on_start() {
        let bus = ServiceBus::new();
        let mut sub = bus.subscribe(SubsystemId::Logging, "t");
        bus.publish_from(SubsystemId::Runtime, "t", value(1));
        assert!(matches!(sub.try_recv(), Ok(None)));

        bus.start();
        assert_eq!(sub.recv().await.unwrap().payload, value(1));
    }

    #[tokio::test]
    async fn test_backlog_skips_subscribers_created_after_publish() {
        // Arrange
        let bus = ServiceBus::new();
        let mut early = bus.subscribe(SubsystemId::Logging, "t");
        bus.publish_from(SubsystemId::Runtime, "t", value(1));
        let mut late = bus.subscribe(SubsystemId::Event, "t");
        bus.publish_from(SubsystemId::Runtime, "t", value(2));

        // Act
        bus.start();

        // Assert
        assert_eq!(early.recv().await.unwrap().payload, value(1));
        assert_eq!(early.recv().await.unwrap().payload, value(2));
        assert_eq!(late.recv().await.unwrap().payload, value(2));
        assert!(matches!(late.try_recv(), Ok(None)));
    }

    #[tokio::test]
    async fn test_stop_before_start_respects_subscription_time() {
        let bus = ServiceBus::new();
        bus.publish_from(SubsystemId::Runtime, "t", value(1));
        let mut late = bus.subscribe(SubsystemId::Logging, "t");

        bus.stop();

        assert!(late.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_stop_drains_then_ends() {
        let bus = running_bus();
        let mut sub = bus.subscribe(SubsystemId::Logging, "t");
        bus.publish_from(SubsystemId::Application, "t", value(1));
        bus.publish_from(SubsystemId::Application, "t", value(2));

        bus.stop();
        bus.stop();

        assert_eq!(sub.recv().await.unwrap().payload, value(1));
        assert_eq!(sub.recv().await.unwrap().payload, value(2));
        assert!(sub.recv().await.is_none());
        assert_eq!(bus.state(), BusState::Stopped);
    }

    #[tokio::test]
    async fn test_publish_after_stop_is_discarded() {
        let bus = running_bus();
        bus.stop();
        let mut sub = bus.subscribe(SubsystemId::Logging, "t");
        bus.publish_from(SubsystemId::Application, "t", value(1));
        let next = timeout(Duration::from_millis(100), sub.recv())
            .await
            .expect("closed handle resolves immediately");
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn test_unsubscribe_owner() {
        let bus = running_bus();
        let _a = bus.subscribe(SubsystemId::Event, "event:in");
        let _b = bus.subscribe(SubsystemId::Event, "event:emit");
        let _c = bus.subscribe(SubsystemId::Call, "call:result");

        assert_eq!(bus.unsubscribe_owner(SubsystemId::Event), 2);
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(bus.subscribers_for("call:result"), 1);
    }

    #[tokio::test]
    async fn test_bounded_mailbox_drops_only_for_slow_subscriber() {
        let bus = ServiceBus::with_policy(MailboxPolicy::Bounded(2));
        bus.start();
        let mut slow = bus.subscribe(SubsystemId::Logging, "t");
        let mut fast = bus.subscribe(SubsystemId::Event, "t");

        for n in 0..3 {
            bus.publish_from(SubsystemId::Application, "t", value(n));
            if n < 2 {
                assert_eq!(fast.recv().await.unwrap().payload, value(n));
            }
        }

        assert_eq!(fast.recv().await.unwrap().payload, value(2));
        assert_eq!(slow.recv().await.unwrap().payload, value(0));
        assert_eq!(slow.recv().await.unwrap().payload, value(1));
        assert!(matches!(slow.try_recv(), Ok(None)));
        assert_eq!(bus.messages_dropped(), 1);
    }

    #[tokio::test]
    async fn test_debug_mode_keeps_delivery() {
        let bus = running_bus();
        bus.set_debug(true);
        let mut sub = bus.subscribe(SubsystemId::Logging, "*");
        bus.publish_from(SubsystemId::Application, "anything", value(3));
        assert_eq!(sub.recv().await.unwrap().topic, "anything");
        assert!(bus.is_debug());
    }
}
