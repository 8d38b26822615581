//! Request managers: turn incoming requests into tokens.

use super::request::TokenRequest;
use super::sequence::{SequenceCell, SequenceState};
use super::source::{RequestSource, RequestSubscription};
use crate::config::EngineConfig;
use crate::tokens::Token;
use crate::types::{ContextId, SourceId};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

/// Hands out the tokens a feed should satisfy next.
#[async_trait]
pub trait RequestManager<K: Token>: Send + Sync {
    /// Last minted token.
    fn current_token(&self) -> K;

    /// Wait for the next token to satisfy. `None` once cancelled or
    /// disposed.
    async fn next(&self, ct: &CancellationToken) -> Option<K>;

    /// Stop listening for requests and release `next` waiters.
    fn dispose(&self);
}

fn initial_state(config: &EngineConfig) -> SequenceState {
    SequenceState {
        sequence: 0,
        pending: config.auto_publish_initial_request,
    }
}

struct CoercingInner<K> {
    source: SourceId,
    root: ContextId,
    cell: SequenceCell,
    notify: Notify,
    disposed: CancellationToken,
    _token: PhantomData<fn() -> K>,
}

impl<K: Token> CoercingInner<K> {
    fn on_request<R: TokenRequest<Token = K>>(&self, request: &R) {
        let (previous, next) = self.cell.update(|s| {
            if s.pending {
                s
            } else {
                s.minted()
            }
        });

        let token = K::new(self.source, self.root, next.sequence);
        request.register(token);
        if !previous.pending {
            tracing::trace!(token = ?token, "minted coerced token");
            self.notify.notify_one();
        }
    }
}

/// Collapses every request received before the pending token is taken into
/// that same token, so at most one load runs per generation.
pub struct CoercingRequestManager<R: TokenRequest> {
    inner: Arc<CoercingInner<R::Token>>,
    subscription: Mutex<Option<RequestSubscription>>,
}

impl<R: TokenRequest> CoercingRequestManager<R> {
    pub fn new(requests: &RequestSource, source: SourceId, root: ContextId, config: &EngineConfig) -> Self {
        let inner = Arc::new(CoercingInner {
            source,
            root,
            cell: SequenceCell::new(initial_state(config)),
            notify: Notify::new(),
            disposed: CancellationToken::new(),
            _token: PhantomData,
        });

        let listener = Arc::clone(&inner);
        let subscription = requests.subscribe(move |request| {
            if let Some(request) = R::from_context_request(request) {
                listener.on_request(request.as_ref());
            }
        });

        Self {
            inner,
            subscription: Mutex::new(Some(subscription)),
        }
    }
}

#[async_trait]
impl<R: TokenRequest> RequestManager<R::Token> for CoercingRequestManager<R> {
    fn current_token(&self) -> R::Token {
        R::Token::new(self.inner.source, self.inner.root, self.inner.cell.get().sequence)
    }

    async fn next(&self, ct: &CancellationToken) -> Option<R::Token> {
        loop {
            if self.inner.disposed.is_cancelled() {
                return None;
            }

            let (previous, _) = self.inner.cell.update(|s| SequenceState { pending: false, ..s });
            if previous.pending {
                return Some(R::Token::new(self.inner.source, self.inner.root, previous.sequence));
            }

            tokio::select! {
                _ = self.inner.notify.notified() => {}
                _ = ct.cancelled() => return None,
                _ = self.inner.disposed.cancelled() => return None,
            }
        }
    }

    fn dispose(&self) {
        self.inner.disposed.cancel();
        self.subscription.lock().take();
    }
}

type Queued<R> = (<R as TokenRequest>::Token, Option<Arc<R>>);

struct SequentialInner<R: TokenRequest> {
    source: SourceId,
    root: ContextId,
    cell: SequenceCell,
    /// Held while minting so tokens are queued in sequence order.
    queue: Mutex<mpsc::UnboundedSender<Queued<R>>>,
}

impl<R: TokenRequest> SequentialInner<R> {
    fn on_request(&self, request: Arc<R>) {
        let queue = self.queue.lock();
        let (_, next) = self.cell.update(SequenceState::minted);

        let token = R::Token::new(self.source, self.root, next.sequence);
        request.register(token);
        tracing::trace!(token = ?token, "queued sequential token");
        let _ = queue.send((token, Some(request)));
    }
}

/// Gives every request its own strictly increasing token and hands them
/// out in order.
pub struct SequentialRequestManager<R: TokenRequest> {
    inner: Arc<SequentialInner<R>>,
    pending: tokio::sync::Mutex<mpsc::UnboundedReceiver<Queued<R>>>,
    subscription: Mutex<Option<RequestSubscription>>,
    disposed: CancellationToken,
}

impl<R: TokenRequest> SequentialRequestManager<R> {
    pub fn new(requests: &RequestSource, source: SourceId, root: ContextId, config: &EngineConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        if config.auto_publish_initial_request {
            let _ = tx.send((R::Token::initial(source, root), None));
        }

        let inner = Arc::new(SequentialInner {
            source,
            root,
            cell: SequenceCell::new(SequenceState::default()),
            queue: Mutex::new(tx),
        });

        let listener = Arc::clone(&inner);
        let subscription = requests.subscribe(move |request| {
            if let Some(request) = R::from_context_request(request) {
                listener.on_request(request);
            }
        });

        Self {
            inner,
            pending: tokio::sync::Mutex::new(rx),
            subscription: Mutex::new(Some(subscription)),
            disposed: CancellationToken::new(),
        }
    }

    /// Next queued token with the request that minted it (`None` for the
    /// initial token).
    pub async fn next_request(&self, ct: &CancellationToken) -> Option<Queued<R>> {
        let mut pending = tokio::select! {
            guard = self.pending.lock() => guard,
            _ = ct.cancelled() => return None,
            _ = self.disposed.cancelled() => return None,
        };

        tokio::select! {
            item = pending.recv() => item,
            _ = ct.cancelled() => None,
            _ = self.disposed.cancelled() => None,
        }
    }
}

#[async_trait]
impl<R: TokenRequest> RequestManager<R::Token> for SequentialRequestManager<R> {
    fn current_token(&self) -> R::Token {
        R::Token::new(self.inner.source, self.inner.root, self.inner.cell.get().sequence)
    }

    async fn next(&self, ct: &CancellationToken) -> Option<R::Token> {
        self.next_request(ct).await.map(|(token, _)| token)
    }

    fn dispose(&self) {
        self.disposed.cancel();
        self.subscription.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::requests::{ContextRequest, PageRequest, RefreshRequest};
    use crate::tokens::{PageToken, TokenSet};
    use std::time::Duration;

    fn refresh(source: &RequestSource) -> Arc<RefreshRequest> {
        let request = Arc::new(RefreshRequest::new());
        source.send(&ContextRequest::Refresh(Arc::clone(&request)));
        request
    }

    fn page(source: &RequestSource) -> Arc<PageRequest> {
        let request = Arc::new(PageRequest::new(None));
        source.send(&ContextRequest::Page(Arc::clone(&request)));
        request
    }

    fn seq(request: &RefreshRequest) -> Vec<u32> {
        request.tokens().tokens().iter().map(|t| t.sequence_id()).collect()
    }

    #[tokio::test]
    async fn test_coercing_collapses_pending_requests() {
        let requests = RequestSource::new();
        let config = EngineConfig {
            auto_publish_initial_request: false,
            ..Default::default()
        };
        let manager =
            CoercingRequestManager::<RefreshRequest>::new(&requests, SourceId::next(), ContextId(1), &config);
        let ct = CancellationToken::new();

        let a = refresh(&requests);
        let b = refresh(&requests);
        assert_eq!(seq(&a), vec![1]);
        assert_eq!(a.tokens(), b.tokens());

        let token = manager.next(&ct).await.unwrap();
        assert_eq!(token.sequence_id(), 1);

        // Once taken, the next request mints a new generation
        let c = refresh(&requests);
        assert_eq!(seq(&c), vec![2]);
    }

    #[tokio::test]
    async fn test_coercing_initial_token_is_pending() {
        let requests = RequestSource::new();
        let manager = CoercingRequestManager::<RefreshRequest>::new(
            &requests,
            SourceId::next(),
            ContextId(1),
            &EngineConfig::default(),
        );
        let ct = CancellationToken::new();

        let token = tokio::time::timeout(Duration::from_secs(1), manager.next(&ct))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(token.sequence_id(), 0);
    }

    #[tokio::test]
    async fn test_coercing_next_waits_for_request() {
        let requests = RequestSource::new();
        let config = EngineConfig {
            auto_publish_initial_request: false,
            ..Default::default()
        };
        let manager = Arc::new(CoercingRequestManager::<RefreshRequest>::new(
            &requests,
            SourceId::next(),
            ContextId(1),
            &config,
        ));
        let ct = CancellationToken::new();

        let waiting = {
            let manager = Arc::clone(&manager);
            let ct = ct.clone();
            tokio::spawn(async move { manager.next(&ct).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        refresh(&requests);

        let token = tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(token.map(|t| t.sequence_id()), Some(1));
    }

    #[tokio::test]
    async fn test_sequential_mints_distinct_tokens() {
        let requests = RequestSource::new();
        let source = SourceId::next();
        let manager =
            SequentialRequestManager::<PageRequest>::new(&requests, source, ContextId(3), &EngineConfig::default());
        let ct = CancellationToken::new();

        let first = page(&requests);
        let second = page(&requests);
        let third = page(&requests);
        assert_eq!(first.tokens(), TokenSet::from(PageToken::new(source, ContextId(3), 1)));
        assert_eq!(second.tokens(), TokenSet::from(PageToken::new(source, ContextId(3), 2)));
        assert_eq!(third.tokens(), TokenSet::from(PageToken::new(source, ContextId(3), 3)));

        let mut seen = Vec::new();
        for _ in 0..4 {
            let (token, _) = manager.next_request(&ct).await.unwrap();
            seen.push(token.sequence_id());
        }
        assert_eq!(seen, vec![0, 1, 2, 3]);
        assert_eq!(manager.current_token().sequence_id(), 3);
    }

    #[tokio::test]
    async fn test_managers_ignore_other_request_kinds() {
        let requests = RequestSource::new();
        let _manager = SequentialRequestManager::<PageRequest>::new(
            &requests,
            SourceId::next(),
            ContextId(1),
            &EngineConfig::default(),
        );

        let request = refresh(&requests);
        assert!(request.tokens().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_and_dispose_release_next() {
        let requests = RequestSource::new();
        let config = EngineConfig {
            auto_publish_initial_request: false,
            ..Default::default()
        };
        let manager = CoercingRequestManager::<RefreshRequest>::new(&requests, SourceId::next(), ContextId(1), &config);

        let ct = CancellationToken::new();
        ct.cancel();
        assert!(manager.next(&ct).await.is_none());

        manager.dispose();
        assert!(manager.next(&CancellationToken::new()).await.is_none());
        assert_eq!(requests.listener_count(), 0);
    }
}
