//! Request fan-out through the context tree.

use super::request::ContextRequest;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

type Listener = Arc<dyn Fn(&ContextRequest) + Send + Sync>;

struct SourceInner {
    /// Registered listeners by id.
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_id: AtomicU64,
    /// Source of the parent context; requests are forwarded to it.
    parent: Option<RequestSource>,
    completed: AtomicBool,
}

/// Delivers requests to the request managers listening on a context and on
/// every ancestor context.
#[derive(Clone)]
pub struct RequestSource {
    inner: Arc<SourceInner>,
}

impl RequestSource {
    pub fn new() -> Self {
        Self::with_parent(None)
    }

    fn with_parent(parent: Option<RequestSource>) -> Self {
        Self {
            inner: Arc::new(SourceInner {
                listeners: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                parent,
                completed: AtomicBool::new(false),
            }),
        }
    }

    /// Source whose requests also reach this one.
    pub fn child(&self) -> Self {
        Self::with_parent(Some(self.clone()))
    }

    /// Deliver a request to local listeners, then to the ancestors.
    pub fn send(&self, request: &ContextRequest) {
        if self.is_completed() {
            return;
        }

        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(request);
        }

        if let Some(parent) = &self.inner.parent {
            parent.send(request);
        }
    }

    /// Register a listener until the returned guard is dropped.
    pub fn subscribe(
        &self,
        listener: impl Fn(&ContextRequest) + Send + Sync + 'static,
    ) -> RequestSubscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        if !self.is_completed() {
            self.inner.listeners.lock().push((id, Arc::new(listener)));
        }
        RequestSubscription {
            source: self.clone(),
            id,
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }

    /// Stop delivering requests and release every listener.
    pub fn complete(&self) {
        self.inner.completed.store(true, Ordering::Release);
        self.inner.listeners.lock().clear();
    }

    pub fn is_completed(&self) -> bool {
        self.inner.completed.load(Ordering::Acquire)
    }
}

impl Default for RequestSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Removes its listener from the source on drop.
pub struct RequestSubscription {
    source: RequestSource,
    id: u64,
}

impl Drop for RequestSubscription {
    fn drop(&mut self) {
        self.source
            .inner
            .listeners
            .lock()
            .retain(|(id, _)| *id != self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::requests::RefreshRequest;

    fn refresh() -> ContextRequest {
        ContextRequest::Refresh(Arc::new(RefreshRequest::new()))
    }

    #[test]
    fn test_send_reaches_listeners_and_parent() {
        let root = RequestSource::new();
        let child = root.child();
        let hits = Arc::new(AtomicU64::new(0));

        let h = Arc::clone(&hits);
        let _root_sub = root.subscribe(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        let h = Arc::clone(&hits);
        let _child_sub = child.subscribe(move |_| {
            h.fetch_add(10, Ordering::SeqCst);
        });

        child.send(&refresh());
        assert_eq!(hits.load(Ordering::SeqCst), 11);

        // Requests never travel to children
        root.send(&refresh());
        assert_eq!(hits.load(Ordering::SeqCst), 12);
    }

    #[test]
    fn test_dropping_subscription_unregisters() {
        let source = RequestSource::new();
        let sub = source.subscribe(|_| {});
        assert_eq!(source.listener_count(), 1);
        drop(sub);
        assert_eq!(source.listener_count(), 0);
    }

    #[test]
    fn test_completed_source_ignores_requests() {
        let source = RequestSource::new();
        let hits = Arc::new(AtomicU64::new(0));
        let h = Arc::clone(&hits);
        let _sub = source.subscribe(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        source.complete();
        source.send(&refresh());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(source.listener_count(), 0);
    }
}
