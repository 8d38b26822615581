//! Owner-scoped contexts.

use super::cache::{CachedChild, ChildCache, ChildKind, FeedKey};
use crate::config::{DetachedContextPolicy, EngineConfig};
use crate::error::{FeedError, Result};
use crate::feeds::Feed;
use crate::requests::{ContextRequest, PageRequest, RefreshRequest, RequestSource};
use crate::state::State;
use crate::subscription::FeedSubscription;
use crate::tokens::{PageToken, RefreshToken, TokenSet};
use crate::types::{ContextId, FeedValue};
use futures::future::{self, BoxFuture};
use futures::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;

struct ContextInner {
    id: ContextId,
    root_id: ContextId,
    owner: String,
    parent: Option<SourceContext>,
    config: Arc<EngineConfig>,
    /// Cancelled on disposal; child of the parent's token.
    token: CancellationToken,
    requests: RequestSource,
    /// `None` once disposed.
    cache: Mutex<Option<ChildCache>>,
    children: Mutex<Vec<Weak<ContextInner>>>,
    detached: bool,
    disposed: AtomicBool,
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        self.token.cancel();
        self.requests.complete();
    }
}

/// Scope in which feeds are subscribed.
///
/// A context caches at most one `FeedSubscription` per feed instance and
/// owns the cancellation scope of everything it caches. Disposing it
/// cancels that scope and disposes every cached child and child context.
///
/// The detached context (`SourceContext::none`) caches nothing: each
/// lookup subscribes from scratch.
#[derive(Clone)]
pub struct SourceContext {
    inner: Arc<ContextInner>,
}

impl SourceContext {
    /// Create the root of a context tree.
    pub fn new_root(owner: impl Into<String>, config: EngineConfig) -> Self {
        let id = ContextId::next();
        let owner = owner.into();
        tracing::debug!(context = %id, owner = %owner, "created root context");

        Self::build(id, id, owner, None, Arc::new(config), CancellationToken::new(), RequestSource::new(), false)
    }

    /// A detached context with the default configuration.
    pub fn none() -> Self {
        Self::none_with(EngineConfig::default())
    }

    pub fn none_with(config: EngineConfig) -> Self {
        Self::build(
            ContextId::DETACHED,
            ContextId::DETACHED,
            "none".to_string(),
            None,
            Arc::new(config),
            CancellationToken::new(),
            RequestSource::new(),
            true,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        id: ContextId,
        root_id: ContextId,
        owner: String,
        parent: Option<SourceContext>,
        config: Arc<EngineConfig>,
        token: CancellationToken,
        requests: RequestSource,
        detached: bool,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                id,
                root_id,
                owner,
                parent,
                config,
                token,
                requests,
                cache: Mutex::new(Some(ChildCache::default())),
                children: Mutex::new(Vec::new()),
                detached,
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Create a child context. Requests sent on the child also reach this
    /// context, and disposing this context disposes the child.
    pub fn create_child(&self, owner: impl Into<String>) -> Result<SourceContext> {
        self.ensure_alive()?;
        let owner = owner.into();

        if self.inner.detached {
            return Ok(Self::none_with(EngineConfig::clone(&self.inner.config)));
        }

        let child = Self::build(
            ContextId::next(),
            self.inner.root_id,
            owner,
            Some(self.clone()),
            Arc::clone(&self.inner.config),
            self.inner.token.child_token(),
            self.inner.requests.child(),
            false,
        );

        let mut children = self.inner.children.lock();
        children.retain(|c| c.strong_count() > 0);
        children.push(Arc::downgrade(&child.inner));
        tracing::debug!(
            context = %child.inner.id,
            parent = %self.inner.id,
            owner = %child.inner.owner,
            "created child context"
        );
        Ok(child)
    }

    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    /// Id of the root of this context's tree; tokens minted for requests of
    /// this tree carry it.
    pub fn root_id(&self) -> ContextId {
        self.inner.root_id
    }

    pub fn owner(&self) -> &str {
        &self.inner.owner
    }

    pub fn parent(&self) -> Option<&SourceContext> {
        self.inner.parent.as_ref()
    }

    pub fn config(&self) -> &Arc<EngineConfig> {
        &self.inner.config
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.inner.token
    }

    pub fn requests(&self) -> &RequestSource {
        &self.inner.requests
    }

    pub fn is_detached(&self) -> bool {
        self.inner.detached
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Number of cached subscriptions and states.
    pub fn cached_count(&self) -> usize {
        self.inner.cache.lock().as_ref().map_or(0, ChildCache::len)
    }

    pub fn downgrade(&self) -> WeakSourceContext {
        // Nothing caches through a detached context, so holding it strongly
        // cannot form a cycle.
        let inner = if self.inner.detached {
            WeakInner::Detached(Arc::clone(&self.inner))
        } else {
            WeakInner::Weak(Arc::downgrade(&self.inner))
        };
        WeakSourceContext { inner }
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(FeedError::ContextDisposed {
                owner: self.inner.owner.clone(),
            });
        }
        Ok(())
    }

    fn check_detached(&self, operation: &'static str) -> Result<()> {
        match self.inner.config.detached_context {
            DetachedContextPolicy::Silent => Ok(()),
            DetachedContextPolicy::Warn => {
                tracing::warn!(operation, "feed used through the detached context; nothing is cached");
                Ok(())
            }
            DetachedContextPolicy::Reject => Err(FeedError::DetachedContext { operation }),
        }
    }

    fn lookup<C: CachedChild>(&self, key: &FeedKey) -> Result<Option<Arc<C>>> {
        let cache = self.inner.cache.lock();
        match cache.as_ref() {
            Some(cache) => Ok(cache.get::<C>(key)),
            None => Err(FeedError::ContextDisposed {
                owner: self.inner.owner.clone(),
            }),
        }
    }

    /// Cache `child` unless another child was cached for `key` meanwhile.
    pub(crate) fn attach<C: CachedChild>(
        &self,
        key: FeedKey,
        child: Arc<C>,
        keep_alive: Box<dyn Any + Send + Sync>,
    ) -> Result<Arc<C>> {
        let mut cache = self.inner.cache.lock();
        match cache.as_mut() {
            Some(cache) => Ok(cache.get_or_insert(key, child, keep_alive)),
            None => Err(FeedError::ContextDisposed {
                owner: self.inner.owner.clone(),
            }),
        }
    }

    /// Make this context own `child`, disposing it with the context.
    /// A detached context owns nothing.
    pub(crate) fn adopt<C: CachedChild>(&self, child: &Arc<C>, operation: &'static str) -> Result<()> {
        self.ensure_alive()?;
        if self.inner.detached {
            return self.check_detached(operation);
        }

        let key = FeedKey::of::<C, C>(ChildKind::State, child);
        self.attach(key, Arc::clone(child), Box::new(()))?;
        Ok(())
    }

    /// The subscription to `feed` cached in this context, created on first
    /// use. It lives until the context is disposed, independently of the
    /// consumers reading it.
    pub fn get_or_create_subscription<T, F>(&self, feed: &Arc<F>) -> Result<Arc<FeedSubscription<T>>>
    where
        T: FeedValue,
        F: Feed<T> + ?Sized,
    {
        self.ensure_alive()?;
        if self.inner.detached {
            self.check_detached("get_or_create_subscription")?;
            return Ok(Arc::new(FeedSubscription::new(feed, self)));
        }

        let key = FeedKey::of::<T, F>(ChildKind::Subscription, feed);
        if let Some(existing) = self.lookup::<FeedSubscription<T>>(&key)? {
            return Ok(existing);
        }

        // Built outside the cache lock: sources may look up other feeds
        let created = Arc::new(FeedSubscription::new(feed, self));
        let subscription = self.attach(key, created, Box::new(Arc::clone(feed)))?;
        tracing::debug!(context = %self.inner.id, "cached feed subscription");
        Ok(subscription)
    }

    /// The state following `feed` cached in this context, created on first
    /// use. Local updates to the state override the feed's values.
    pub fn get_or_create_state<T, F>(&self, feed: &Arc<F>) -> Result<Arc<State<T>>>
    where
        T: FeedValue,
        F: Feed<T> + ?Sized,
    {
        self.ensure_alive()?;
        if self.inner.detached {
            self.check_detached("get_or_create_state")?;
            return State::following(self, feed);
        }

        let key = FeedKey::of::<T, F>(ChildKind::State, feed);
        if let Some(existing) = self.lookup::<State<T>>(&key)? {
            return Ok(existing);
        }

        let created = State::following(self, feed)?;
        self.attach(key, created, Box::new(Arc::clone(feed)))
    }

    /// Ask every feed subscribed in this context or its ancestors to
    /// reload. Returns the tokens the reloads will carry.
    pub fn request_refresh(&self) -> Result<TokenSet<RefreshToken>> {
        self.ensure_alive()?;
        let request = Arc::new(RefreshRequest::new());
        self.inner
            .requests
            .send(&ContextRequest::Refresh(Arc::clone(&request)));
        Ok(request.tokens())
    }

    /// Ask every paginated feed subscribed in this context or its ancestors
    /// to load one more page.
    pub fn request_page(&self, desired_page_size: Option<u32>) -> Result<TokenSet<PageToken>> {
        self.ensure_alive()?;
        let request = Arc::new(PageRequest::new(desired_page_size));
        self.inner.requests.send(&ContextRequest::Page(Arc::clone(&request)));
        Ok(request.tokens())
    }

    /// Cancel this context and dispose every cached child and child
    /// context. Later lookups fail with `FeedError::ContextDisposed`.
    /// Idempotent.
    pub fn dispose(&self) -> BoxFuture<'static, ()> {
        let context = self.clone();
        async move {
            let inner = &context.inner;
            if inner.disposed.swap(true, Ordering::AcqRel) {
                return;
            }

            tracing::debug!(context = %inner.id, owner = %inner.owner, "disposing context");
            inner.token.cancel();
            inner.requests.complete();

            let children: Vec<SourceContext> = std::mem::take(&mut *inner.children.lock())
                .into_iter()
                .filter_map(|c| c.upgrade())
                .map(|inner| SourceContext { inner })
                .collect();
            let cached = inner.cache.lock().take();

            let mut pending: Vec<BoxFuture<'static, ()>> = children.iter().map(SourceContext::dispose).collect();
            if let Some(cache) = cached {
                pending.extend(cache.into_children().map(|child| child.dispose()));
            }
            future::join_all(pending).await;
        }
        .boxed()
    }
}

impl fmt::Debug for SourceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceContext")
            .field("id", &self.inner.id)
            .field("root_id", &self.inner.root_id)
            .field("owner", &self.inner.owner)
            .field("detached", &self.inner.detached)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

enum WeakInner {
    Weak(Weak<ContextInner>),
    Detached(Arc<ContextInner>),
}

/// Handle captured by feed sources so they don't keep their context alive.
pub struct WeakSourceContext {
    inner: WeakInner,
}

impl WeakSourceContext {
    pub fn upgrade(&self) -> Option<SourceContext> {
        match &self.inner {
            WeakInner::Weak(weak) => weak.upgrade().map(|inner| SourceContext { inner }),
            WeakInner::Detached(inner) => Some(SourceContext {
                inner: Arc::clone(inner),
            }),
        }
    }
}
