//! # Subscriber Mailboxes
//!
//! Each subscription is backed by its own queue. The policy decides what
//! happens when a subscriber falls behind.

use shared_types::Message;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Queueing policy for subscriber mailboxes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MailboxPolicy {
    /// Never drops; memory grows with the slowest subscriber's backlog.
    #[default]
    Unbounded,
    /// Holds at most `n` messages; when full, the newest message is dropped
    /// for that subscriber only.
    Bounded(usize),
}

/// Result of handing a message to one mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Delivered,
    Full,
    Closed,
}

pub(crate) enum MailboxSender {
    Unbounded(mpsc::UnboundedSender<Message>),
    Bounded(mpsc::Sender<Message>),
}

pub(crate) enum MailboxReceiver {
    Unbounded(mpsc::UnboundedReceiver<Message>),
    Bounded(mpsc::Receiver<Message>),
}

pub(crate) fn mailbox(policy: MailboxPolicy) -> (MailboxSender, MailboxReceiver) {
    match policy {
        MailboxPolicy::Unbounded => {
            let (tx, rx) = mpsc::unbounded_channel();
            (MailboxSender::Unbounded(tx), MailboxReceiver::Unbounded(rx))
        }
        MailboxPolicy::Bounded(capacity) => {
            let (tx, rx) = mpsc::channel(capacity.max(1));
            (MailboxSender::Bounded(tx), MailboxReceiver::Bounded(rx))
        }
    }
}

impl MailboxSender {
    /// Enqueue without waiting.
    pub(crate) fn deliver(&self, message: Message) -> Delivery {
        match self {
            Self::Unbounded(tx) => match tx.send(message) {
                Ok(()) => Delivery::Delivered,
                Err(_) => Delivery::Closed,
            },
            Self::Bounded(tx) => match tx.try_send(message) {
                Ok(()) => Delivery::Delivered,
                Err(mpsc::error::TrySendError::Full(_)) => Delivery::Full,
                Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
            },
        }
    }
}

impl MailboxReceiver {
    pub(crate) async fn recv(&mut self) -> Option<Message> {
        match self {
            Self::Unbounded(rx) => rx.recv().await,
            Self::Bounded(rx) => rx.recv().await,
        }
    }

    pub(crate) fn try_recv(&mut self) -> Result<Message, mpsc::error::TryRecvError> {
        match self {
            Self::Unbounded(rx) => rx.try_recv(),
            Self::Bounded(rx) => rx.try_recv(),
        }
    }

    pub(crate) fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Option<Message>> {
        match self {
            Self::Unbounded(rx) => rx.poll_recv(cx),
            Self::Bounded(rx) => rx.poll_recv(cx),
        }
    }
}
