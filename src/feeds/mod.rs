//! Feeds: cold sources of messages.
//!
//! A feed is subscribed through a `SourceContext`, which enumerates
//! `get_source` once per context and fans the messages out to consumers.

mod async_feed;
mod operators;
mod paginated;

pub use async_feed::AsyncFeed;
pub use operators::{FeedExt, FilterFeed, SelectFeed};
pub use paginated::{PageInfo, PaginatedFeed};

use crate::context::SourceContext;
use crate::messages::Message;
use crate::types::FeedValue;
use futures::stream::{self, BoxStream, StreamExt};
use std::future::Future;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Messages of one enumeration of a feed.
pub type MessageStream<T> = BoxStream<'static, Message<T>>;

/// A source of messages.
pub trait Feed<T: FeedValue>: Send + Sync + 'static {
    /// Start a new enumeration within `context`.
    ///
    /// The returned stream must not do any work until polled and must end
    /// once `ct` is cancelled. It must not hold `context` strongly (use
    /// `SourceContext::downgrade`).
    fn get_source(&self, context: &SourceContext, ct: CancellationToken) -> MessageStream<T>;
}

/// Stream the messages sent on `rx` while `driver` runs. The stream ends
/// once the driver is done and every sender is dropped.
pub(crate) fn drive<T, D>(rx: mpsc::UnboundedReceiver<Message<T>>, driver: D) -> MessageStream<T>
where
    T: FeedValue,
    D: Future<Output = ()> + Send + 'static,
{
    let messages = stream::unfold(rx, |mut rx| async move {
        let message = rx.recv().await?;
        Some((message, rx))
    });
    let driver = stream::once(driver).filter_map(|()| async { None });

    stream::select(messages, driver).boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_drive_ends_with_driver_and_senders() {
        let (tx, rx) = mpsc::unbounded_channel();
        let stream = drive(rx, async move {
            let mut message = Message::initial();
            for i in 0..3 {
                message = message.with().data(Some(i)).build();
                let _ = tx.send(message.clone());
                tokio::task::yield_now().await;
            }
        });

        let messages: Vec<Message<i32>> = stream.collect().await;
        assert_eq!(messages.len(), 3);
    }
}
