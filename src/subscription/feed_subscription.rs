//! Warm, multi-consumer view over a single enumeration of a feed.

use super::replay::ReplayBuffer;
use crate::context::{CachedChild, SourceContext};
use crate::error::{FeedError, Result};
use crate::feeds::{Feed, MessageStream};
use crate::messages::Message;
use crate::tokens::{PageToken, RefreshToken, TokenSet, TokenSetAwaiter, TokenWait, WaitOutcome};
use crate::types::FeedValue;
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use parking_lot::Mutex;
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Enumerates a feed's source once and replays it to every consumer.
///
/// The source is started by the first `get_messages` call and runs until
/// it ends or the subscription is cancelled. Consumers attaching later
/// start from the latest message. A source that ends without producing
/// anything yields one initial message.
pub struct FeedSubscription<T: FeedValue> {
    /// Source not yet started.
    source: Mutex<Option<MessageStream<T>>>,
    buffer: Arc<ReplayBuffer<T>>,
    /// Child of the owning context's token.
    ct: CancellationToken,
    pump: Mutex<Option<JoinHandle<()>>>,
    refresh: Arc<TokenSetAwaiter<RefreshToken>>,
    page: Arc<TokenSetAwaiter<PageToken>>,
    disposed: AtomicBool,
}

impl<T: FeedValue> FeedSubscription<T> {
    /// Subscribe to `feed` within `context`. Nothing runs until the first
    /// consumer attaches.
    pub fn new<F>(feed: &Arc<F>, context: &SourceContext) -> Self
    where
        F: Feed<T> + ?Sized,
    {
        let ct = context.cancellation().child_token();
        let source = feed.get_source(context, ct.clone());
        Self {
            source: Mutex::new(Some(source)),
            buffer: Arc::new(ReplayBuffer::new()),
            ct,
            pump: Mutex::new(None),
            refresh: Arc::new(TokenSetAwaiter::new()),
            page: Arc::new(TokenSetAwaiter::new()),
            disposed: AtomicBool::new(false),
        }
    }

    /// Stream of messages for one consumer, starting from the latest one.
    ///
    /// `ct` only ends this consumer's stream. Must be called within a Tokio
    /// runtime the first time, since it starts the source.
    pub fn get_messages(&self, ct: CancellationToken) -> Result<MessageStream<T>> {
        if self.is_disposed() {
            return Err(FeedError::SubscriptionDisposed);
        }
        self.ensure_started()?;
        Ok(self.buffer.subscribe(ct))
    }

    fn ensure_started(&self) -> Result<()> {
        let mut pump = self.pump.lock();
        if pump.is_some() {
            return Ok(());
        }

        let handle = tokio::runtime::Handle::try_current()
            .map_err(|_| FeedError::NoRuntime("FeedSubscription::get_messages"))?;
        let Some(source) = self.source.lock().take() else {
            return Ok(());
        };
        *pump = Some(handle.spawn(Self::run(
            source,
            Arc::clone(&self.buffer),
            Arc::clone(&self.refresh),
            Arc::clone(&self.page),
            self.ct.clone(),
        )));
        Ok(())
    }

    async fn run(
        mut source: MessageStream<T>,
        buffer: Arc<ReplayBuffer<T>>,
        refresh: Arc<TokenSetAwaiter<RefreshToken>>,
        page: Arc<TokenSetAwaiter<PageToken>>,
        ct: CancellationToken,
    ) {
        tracing::debug!("subscription started");
        let mut produced = 0usize;
        loop {
            let message = tokio::select! {
                biased;
                _ = ct.cancelled() => break,
                message = source.next() => message,
            };
            let Some(message) = message else {
                break;
            };

            produced += 1;
            let refreshed = message.current().refresh_tokens();
            let paged = message.current().page_tokens();
            // Waiters released below must find the message already buffered
            buffer.push(message);
            refresh.received(&refreshed);
            page.received(&paged);
        }

        if produced == 0 && !ct.is_cancelled() {
            buffer.push(Message::initial());
        }
        buffer.complete();
        tracing::debug!(produced, cancelled = ct.is_cancelled(), "subscription ended");
    }

    /// Latest produced message, if any.
    pub fn latest(&self) -> Option<Message<T>> {
        self.buffer.latest()
    }

    /// Wait until a message carries refresh tokens greater or equal to
    /// `tokens`. Completes with `WaitOutcome::Disposed` if the subscription
    /// goes away first.
    pub fn wait_for_refresh(&self, tokens: TokenSet<RefreshToken>) -> TokenWait {
        self.refresh.wait(tokens)
    }

    pub fn wait_for_page(&self, tokens: TokenSet<PageToken>) -> TokenWait {
        self.page.wait(tokens)
    }

    /// Like `wait_for_refresh`, but fails with `FeedError::Cancelled` when
    /// `ct` fires and `FeedError::SubscriptionDisposed` when the
    /// subscription goes away first.
    pub async fn refreshed(&self, tokens: TokenSet<RefreshToken>, ct: &CancellationToken) -> Result<()> {
        Self::settle(self.wait_for_refresh(tokens), ct).await
    }

    pub async fn paged(&self, tokens: TokenSet<PageToken>, ct: &CancellationToken) -> Result<()> {
        Self::settle(self.wait_for_page(tokens), ct).await
    }

    async fn settle(wait: TokenWait, ct: &CancellationToken) -> Result<()> {
        tokio::select! {
            outcome = wait => match outcome {
                WaitOutcome::Observed => Ok(()),
                WaitOutcome::Disposed => Err(FeedError::SubscriptionDisposed),
            },
            _ = ct.cancelled() => Err(FeedError::Cancelled),
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub fn cancel(&self) {
        self.ct.cancel();
    }

    /// Cancel the source, wait for it to stop and end every consumer
    /// stream. Idempotent.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.ct.cancel();
        self.source.lock().take();
        let pump = self.pump.lock().take();
        if let Some(pump) = pump {
            if let Err(e) = pump.await {
                tracing::warn!(error = %e, "subscription task failed");
            }
        }

        self.buffer.complete();
        self.refresh.dispose();
        self.page.dispose();
    }
}

impl<T: FeedValue> Drop for FeedSubscription<T> {
    fn drop(&mut self) {
        self.ct.cancel();
        self.buffer.complete();
        self.refresh.dispose();
        self.page.dispose();
    }
}

impl<T: FeedValue> CachedChild for FeedSubscription<T> {
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn dispose(self: Arc<Self>) -> BoxFuture<'static, ()> {
        async move { FeedSubscription::dispose(&*self).await }.boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::tokens::{Token, WaitOutcome};
    use crate::types::DataValue;
    use futures::stream;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Emits `values` one by one, counting how often it is enumerated.
    struct CountingFeed {
        values: Vec<i32>,
        delay: Duration,
        enumerations: AtomicUsize,
    }

    impl Feed<i32> for CountingFeed {
        fn get_source(&self, _context: &SourceContext, _ct: CancellationToken) -> MessageStream<i32> {
            self.enumerations.fetch_add(1, Ordering::SeqCst);
            let delay = self.delay;
            stream::iter(self.values.clone())
                .scan(Message::initial(), |last, value| {
                    *last = last.with().data(Some(value)).build();
                    futures::future::ready(Some(last.clone()))
                })
                .then(move |message| async move {
                    tokio::time::sleep(delay).await;
                    message
                })
                .boxed()
        }
    }

    fn feed(values: Vec<i32>, delay: Duration) -> Arc<CountingFeed> {
        Arc::new(CountingFeed {
            values,
            delay,
            enumerations: AtomicUsize::new(0),
        })
    }

    fn context() -> SourceContext {
        SourceContext::new_root("test", EngineConfig::default())
    }

    #[tokio::test]
    async fn test_empty_source_yields_initial_message() {
        let context = context();
        let subscription = FeedSubscription::new(&feed(vec![], Duration::ZERO), &context);

        let messages: Vec<_> = subscription
            .get_messages(CancellationToken::new())
            .unwrap()
            .collect()
            .await;
        assert_eq!(messages.len(), 1);
        assert!(messages[0].current().data().is_undefined());
    }

    #[tokio::test]
    async fn test_source_enumerated_once() {
        let context = context();
        let feed = feed(vec![1, 2], Duration::from_millis(5));
        let subscription = FeedSubscription::new(&feed, &context);

        let a = subscription.get_messages(CancellationToken::new()).unwrap();
        let b = subscription.get_messages(CancellationToken::new()).unwrap();
        let (a, b): (Vec<_>, Vec<_>) = futures::join!(a.collect(), b.collect());

        assert_eq!(feed.enumerations.load(Ordering::SeqCst), 1);
        assert_eq!(a.last().unwrap().current().data(), DataValue::Value(&2));
        assert_eq!(b.last().unwrap().current().data(), DataValue::Value(&2));
    }

    #[tokio::test]
    async fn test_disposed_subscription_rejects_consumers() {
        let context = context();
        let subscription = FeedSubscription::new(&feed(vec![1], Duration::ZERO), &context);
        let wait = subscription.wait_for_refresh(TokenSet::from(RefreshToken::initial(
            crate::types::SourceId::next(),
            context.root_id(),
        )));

        subscription.dispose().await;
        assert!(matches!(
            subscription.get_messages(CancellationToken::new()),
            Err(FeedError::SubscriptionDisposed)
        ));
        assert_eq!(wait.await, WaitOutcome::Disposed);
    }

    #[tokio::test]
    async fn test_checked_wait_reports_cancellation() {
        let context = context();
        let subscription = FeedSubscription::new(&feed(vec![1], Duration::ZERO), &context);
        let tokens = TokenSet::from(RefreshToken::initial(crate::types::SourceId::next(), context.root_id()));

        let ct = CancellationToken::new();
        ct.cancel();
        assert!(matches!(subscription.refreshed(tokens.clone(), &ct).await, Err(FeedError::Cancelled)));

        subscription.dispose().await;
        let result = subscription.refreshed(tokens, &CancellationToken::new()).await;
        assert!(matches!(result, Err(FeedError::SubscriptionDisposed)));
        assert!(subscription.paged(TokenSet::empty(), &CancellationToken::new()).await.is_err());
    }

    #[test]
    fn test_get_messages_requires_runtime() {
        let context = context();
        let subscription = FeedSubscription::new(&feed(vec![1], Duration::ZERO), &context);
        assert!(matches!(
            subscription.get_messages(CancellationToken::new()),
            Err(FeedError::NoRuntime(_))
        ));
    }
}
