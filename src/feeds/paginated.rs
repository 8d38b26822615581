//! Feed that accumulates pages of items.

use super::{drive, Feed, MessageStream};
use crate::axes::MessageAxis;
use crate::context::SourceContext;
use crate::error::FeedFault;
use crate::messages::MessageManager;
use crate::requests::{PageRequest, RequestManager, SequentialRequestManager};
use crate::types::{FeedValue, SourceId};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Describes the page to load.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageInfo {
    /// Zero-based index of the page.
    pub index: u32,
    pub desired_size: u32,
    /// Items loaded so far.
    pub loaded: usize,
}

type PageLoader<T> =
    Arc<dyn Fn(PageInfo, CancellationToken) -> BoxFuture<'static, Result<Vec<T>, FeedFault>> + Send + Sync>;

/// Loads pages of items on page requests and publishes the accumulated list.
///
/// The first page loads on subscription. Page requests are served one at a
/// time in the order they were sent. A page shorter than requested marks
/// the end of the list: later requests are acknowledged without loading.
pub struct PaginatedFeed<T> {
    source: SourceId,
    page_size: Option<u32>,
    loader: PageLoader<T>,
}

impl<T: FeedValue> PaginatedFeed<T> {
    pub fn new<F, Fut>(loader: F) -> Arc<Self>
    where
        F: Fn(PageInfo, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<T>, FeedFault>> + Send + 'static,
    {
        Self::build(None, loader)
    }

    /// Feed with its own default page size, used when a request doesn't
    /// specify one.
    pub fn with_page_size<F, Fut>(page_size: u32, loader: F) -> Arc<Self>
    where
        F: Fn(PageInfo, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<T>, FeedFault>> + Send + 'static,
    {
        Self::build(Some(page_size.max(1)), loader)
    }

    fn build<F, Fut>(page_size: Option<u32>, loader: F) -> Arc<Self>
    where
        F: Fn(PageInfo, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<T>, FeedFault>> + Send + 'static,
    {
        Arc::new(Self {
            source: SourceId::next(),
            page_size,
            loader: Arc::new(move |page, ct| loader(page, ct).boxed()),
        })
    }

    pub fn source_id(&self) -> SourceId {
        self.source
    }
}

impl<T: FeedValue> Feed<Vec<T>> for PaginatedFeed<T> {
    fn get_source(&self, context: &SourceContext, ct: CancellationToken) -> MessageStream<Vec<T>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let manager = MessageManager::<(), Vec<T>>::new(move |message| {
            let _ = tx.send(message);
        });
        let requests = SequentialRequestManager::<PageRequest>::new(
            context.requests(),
            self.source,
            context.root_id(),
            context.config(),
        );
        let loader = Arc::clone(&self.loader);
        let default_size = self.page_size.unwrap_or_else(|| context.config().page_size());

        drive(rx, async move {
            let mut items: Vec<T> = Vec::new();
            let mut index = 0u32;
            let mut reached_end = false;

            while let Some((token, request)) = requests.next_request(&ct).await {
                if reached_end {
                    tracing::trace!(token = ?token, "no more pages");
                    if let Err(e) = manager.update(|c| c.with().paged(token), &ct) {
                        tracing::warn!(error = %e, "failed to acknowledge page request");
                    }
                    continue;
                }

                let desired_size = request
                    .and_then(|r| r.desired_page_size())
                    .unwrap_or(default_size)
                    .max(1);
                let page = PageInfo {
                    index,
                    desired_size,
                    loaded: items.len(),
                };
                tracing::debug!(token = ?token, index, desired_size, "loading page");

                let update = manager.begin_update(&ct, &[MessageAxis::Progress]);
                if let Err(e) = update.transient_update(|c| c.with().progress(true)) {
                    tracing::warn!(error = %e, "failed to flag page load in progress");
                }

                let result = tokio::select! {
                    result = loader(page, ct.clone()) => result,
                    _ = ct.cancelled() => break,
                };

                let committed = match result {
                    Ok(loaded) => {
                        reached_end = loaded.len() < desired_size as usize;
                        items.extend(loaded);
                        index += 1;
                        let data = items.clone();
                        update.commit(|c| c.with().data(Some(data)).clear_error().paged(token))
                    }
                    Err(fault) => update.commit(|c| c.with().error(fault).paged(token)),
                };
                if let Err(e) = committed {
                    tracing::warn!(error = %e, "failed to publish page");
                }
            }
            requests.dispose();
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::tokens::Token;
    use crate::types::DataValue;
    use futures::StreamExt;

    /// Items `0..total`, served in pages.
    fn numbers(total: u32) -> Arc<PaginatedFeed<u32>> {
        PaginatedFeed::with_page_size(2, move |page: PageInfo, _| async move {
            let start = page.loaded as u32;
            let end = (start + page.desired_size).min(total);
            Ok((start..end).collect())
        })
    }

    async fn settled(source: &mut MessageStream<Vec<u32>>) -> crate::messages::Message<Vec<u32>> {
        loop {
            let message = source.next().await.unwrap();
            if !message.current().is_transient() {
                return message;
            }
        }
    }

    #[tokio::test]
    async fn test_pages_accumulate() {
        let context = SourceContext::new_root("test", EngineConfig::default());
        let feed = numbers(5);
        let mut source = feed.get_source(&context, CancellationToken::new());

        let first = settled(&mut source).await;
        assert_eq!(first.current().data(), DataValue::Value(&vec![0, 1]));

        let requested = context.request_page(None).unwrap();
        assert_eq!(requested.tokens()[0].sequence_id(), 1);
        let second = settled(&mut source).await;
        assert_eq!(second.current().data(), DataValue::Value(&vec![0, 1, 2, 3]));
        assert!(second.current().page_tokens().is_greater_or_equals(&requested));
    }

    #[tokio::test]
    async fn test_short_page_marks_end() {
        let context = SourceContext::new_root("test", EngineConfig::default());
        let feed = numbers(3);
        let mut source = feed.get_source(&context, CancellationToken::new());
        settled(&mut source).await;

        context.request_page(None).unwrap();
        let last = settled(&mut source).await;
        assert_eq!(last.current().data(), DataValue::Value(&vec![0, 1, 2]));

        // Acknowledged with its token, nothing loaded
        let requested = context.request_page(Some(10)).unwrap();
        let ack = source.next().await.unwrap();
        assert_eq!(ack.changes(), crate::axes::AxisSet::from([MessageAxis::Pagination]));
        assert!(ack.current().page_tokens().is_greater_or_equals(&requested));
        assert_eq!(ack.current().data(), DataValue::Value(&vec![0, 1, 2]));
    }

    #[tokio::test]
    async fn test_requested_page_size_wins() {
        let context = SourceContext::new_root("test", EngineConfig::default());
        let feed = numbers(100);
        let mut source = feed.get_source(&context, CancellationToken::new());
        settled(&mut source).await;

        context.request_page(Some(5)).unwrap();
        let message = settled(&mut source).await;
        assert_eq!(message.current().data().map(Vec::len), DataValue::Value(7));
    }
}
