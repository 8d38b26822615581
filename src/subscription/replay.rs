//! Replay-latest buffer shared by the consumers of a subscription.

use crate::messages::{Message, MessageEntry};
use crate::types::FeedValue;
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::{Arc, OnceLock};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// One produced message, linked to the next one once it exists. The node a
/// buffer starts with carries no message.
struct Node<T> {
    message: Option<Message<T>>,
    next: OnceLock<Arc<Node<T>>>,
}

impl<T> Node<T> {
    fn sentinel() -> Arc<Self> {
        Arc::new(Self {
            message: None,
            next: OnceLock::new(),
        })
    }
}

impl<T> Drop for Node<T> {
    // Unlink iteratively so long chains don't overflow the stack
    fn drop(&mut self) {
        let mut next = self.next.take();
        while let Some(node) = next {
            match Arc::try_unwrap(node) {
                Ok(mut node) => next = node.next.take(),
                Err(_) => break,
            }
        }
    }
}

struct Head<T> {
    node: Arc<Node<T>>,
    completed: bool,
}

/// Append-only chain of messages where the buffer only retains the latest
/// node. Consumers start from the latest message and then follow the chain,
/// so each of them observes messages in production order.
pub struct ReplayBuffer<T> {
    head: watch::Sender<Head<T>>,
}

impl<T: FeedValue> ReplayBuffer<T> {
    pub fn new() -> Self {
        let (head, _) = watch::channel(Head {
            node: Node::sentinel(),
            completed: false,
        });
        Self { head }
    }

    /// Append a message. Ignored once completed.
    pub fn push(&self, message: Message<T>) {
        self.head.send_modify(|head| {
            if head.completed {
                return;
            }
            let node = Arc::new(Node {
                message: Some(message),
                next: OnceLock::new(),
            });
            let _ = head.node.next.set(Arc::clone(&node));
            head.node = node;
        });
    }

    /// End every consumer stream once it has read the remaining messages.
    pub fn complete(&self) {
        self.head.send_if_modified(|head| !std::mem::replace(&mut head.completed, true));
    }

    pub fn is_completed(&self) -> bool {
        self.head.borrow().completed
    }

    pub fn latest(&self) -> Option<Message<T>> {
        self.head.borrow().node.message.clone()
    }

    pub fn consumer_count(&self) -> usize {
        self.head.receiver_count()
    }

    /// Stream the latest message and everything produced after it. On an
    /// empty buffer the stream starts with the first message pushed.
    ///
    /// The first message is rebased on an empty entry so it reports every
    /// set axis as changed; later ones are rebased on the last delivered
    /// entry.
    pub fn subscribe(&self, ct: CancellationToken) -> BoxStream<'static, Message<T>> {
        let attached = Arc::clone(&self.head.borrow().node);
        let cursor = Cursor {
            rx: self.head.subscribe(),
            replay: attached.message.is_some(),
            last: attached,
            seen: Arc::new(MessageEntry::empty()),
            ct,
        };

        stream::unfold(cursor, |mut cursor| async move {
            let message = cursor.next().await?;
            Some((message, cursor))
        })
        .boxed()
    }
}

impl<T: FeedValue> Default for ReplayBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

struct Cursor<T> {
    rx: watch::Receiver<Head<T>>,
    /// Last delivered node, or the node the cursor attached at.
    last: Arc<Node<T>>,
    /// Whether `last` is the attach point and still has to be delivered.
    replay: bool,
    /// Entry the consumer currently knows.
    seen: Arc<MessageEntry<T>>,
    ct: CancellationToken,
}

impl<T: FeedValue> Cursor<T> {
    async fn next(&mut self) -> Option<Message<T>> {
        loop {
            if self.ct.is_cancelled() {
                return None;
            }

            if std::mem::take(&mut self.replay) {
                let node = Arc::clone(&self.last);
                if let Some(message) = self.deliver(node) {
                    return Some(message);
                }
            }

            // Mark the head as seen before looking for a node, so a push
            // racing with this check wakes `changed` below.
            let completed = self.rx.borrow_and_update().completed;

            if let Some(node) = self.last.next.get().cloned() {
                if let Some(message) = self.deliver(node) {
                    return Some(message);
                }
                continue;
            }
            if completed {
                return None;
            }

            tokio::select! {
                changed = self.rx.changed() => {
                    if changed.is_err() {
                        let node = self.last.next.get().cloned()?;
                        return self.deliver(node);
                    }
                }
                _ = self.ct.cancelled() => return None,
            }
        }
    }

    fn deliver(&mut self, node: Arc<Node<T>>) -> Option<Message<T>> {
        let message = node.message.as_ref().map(|m| {
            let rebased = m.rebase(&self.seen);
            self.seen = Arc::clone(m.current_arc());
            rebased
        });
        self.last = node;
        message
    }
}
