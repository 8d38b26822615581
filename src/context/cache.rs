//! Per-context cache of subscriptions and states.

use futures::future::BoxFuture;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

/// Something a context owns and disposes with itself.
pub(crate) trait CachedChild: Send + Sync + 'static {
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    fn dispose(self: Arc<Self>) -> BoxFuture<'static, ()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum ChildKind {
    Subscription,
    State,
}

/// Identity of a cached child: the feed instance it was created for, its
/// kind and its data type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct FeedKey {
    kind: ChildKind,
    feed: usize,
    data: TypeId,
}

impl FeedKey {
    pub(crate) fn of<T: 'static, F: ?Sized>(kind: ChildKind, feed: &Arc<F>) -> Self {
        Self {
            kind,
            feed: Arc::as_ptr(feed) as *const () as usize,
            data: TypeId::of::<T>(),
        }
    }
}

struct CacheEntry {
    child: Arc<dyn CachedChild>,
    /// Keeps the feed alive so its address is not reused while cached.
    _feed: Box<dyn Any + Send + Sync>,
}

#[derive(Default)]
pub(crate) struct ChildCache {
    entries: HashMap<FeedKey, CacheEntry>,
}

impl ChildCache {
    pub(crate) fn get<C: CachedChild>(&self, key: &FeedKey) -> Option<Arc<C>> {
        let entry = self.entries.get(key)?;
        Arc::clone(&entry.child).as_any().downcast::<C>().ok()
    }

    /// Insert `child` unless an entry already exists for `key`, and return
    /// whichever is cached.
    pub(crate) fn get_or_insert<C: CachedChild>(
        &mut self,
        key: FeedKey,
        child: Arc<C>,
        feed: Box<dyn Any + Send + Sync>,
    ) -> Arc<C> {
        if let Some(existing) = self.get::<C>(&key) {
            return existing;
        }

        self.entries.insert(
            key,
            CacheEntry {
                child: Arc::clone(&child) as Arc<dyn CachedChild>,
                _feed: feed,
            },
        );
        child
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn into_children(self) -> impl Iterator<Item = Arc<dyn CachedChild>> {
        self.entries.into_values().map(|entry| entry.child)
    }
}
