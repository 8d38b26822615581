//! Mutable feeds.

use super::operations::{apply_operation, ListOperation};
use crate::context::{CachedChild, SourceContext};
use crate::error::{FeedError, Result};
use crate::feeds::{Feed, MessageStream};
use crate::messages::{CurrentMessage, Message, MessageBuilder, MessageManager};
use crate::subscription::ReplayBuffer;
use crate::types::{DataValue, FeedValue};
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use parking_lot::Mutex;
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A feed whose value can be updated.
///
/// A state either holds its own value (`State::value`, `State::empty`) or
/// follows a feed (`SourceContext::get_or_create_state`). A followed feed's
/// messages replace the state's value; local updates apply until the feed
/// produces a new one. Every update is replayed to subscribers of the
/// state like any other feed.
pub struct State<T: FeedValue> {
    manager: Arc<MessageManager<T, T>>,
    buffer: Arc<ReplayBuffer<T>>,
    /// Child of the owning context's token.
    ct: CancellationToken,
    /// Task forwarding the followed feed.
    forward: Mutex<Option<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl<T: FeedValue> State<T> {
    fn create(context: &SourceContext) -> Self {
        let buffer = Arc::new(ReplayBuffer::new());
        let sink = Arc::clone(&buffer);
        Self {
            manager: Arc::new(MessageManager::following(move |message| sink.push(message))),
            buffer,
            ct: context.cancellation().child_token(),
            forward: Mutex::new(None),
            disposed: AtomicBool::new(false),
        }
    }

    /// State holding `value`, owned by `context`.
    pub fn value(context: &SourceContext, value: T) -> Result<Arc<Self>> {
        Self::init(context, Some(value), "State::value")
    }

    /// State with an explicitly empty value, owned by `context`.
    pub fn empty(context: &SourceContext) -> Result<Arc<Self>> {
        Self::init(context, None, "State::empty")
    }

    fn init(context: &SourceContext, data: Option<T>, operation: &'static str) -> Result<Arc<Self>> {
        let state = Arc::new(Self::create(context));
        context.adopt(&state, operation)?;
        state.manager.update(|c| c.with().data(data), &state.ct)?;
        Ok(state)
    }

    /// State following `feed`. The feed is subscribed through `context`;
    /// the caller decides who owns the state.
    pub(crate) fn following<F>(context: &SourceContext, feed: &Arc<F>) -> Result<Arc<Self>>
    where
        F: Feed<T> + ?Sized,
    {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| FeedError::NoRuntime("SourceContext::get_or_create_state"))?;
        let subscription = context.get_or_create_subscription::<T, F>(feed)?;
        let state = Arc::new(Self::create(context));
        let mut messages = subscription.get_messages(state.ct.clone())?;

        let manager = Arc::clone(&state.manager);
        let ct = state.ct.clone();
        let handle = runtime.spawn(async move {
            // Holds detached subscriptions, which nothing else owns
            let _subscription = subscription;
            while let Some(message) = messages.next().await {
                if let Err(e) = manager.update(|c| c.with_parent(message), &ct) {
                    tracing::warn!(error = %e, "failed to follow feed");
                }
            }
        });
        *state.forward.lock() = Some(handle);
        Ok(state)
    }

    /// Last message of the state.
    pub fn current(&self) -> Message<T> {
        self.manager.current()
    }

    pub fn current_data(&self) -> DataValue<T> {
        self.manager.current().current().data().cloned()
    }

    /// Update the state's message.
    ///
    /// Returns whether a message was published. Cancelled or disposed
    /// states ignore updates.
    pub fn update_message<F>(&self, updater: F, ct: &CancellationToken) -> Result<bool>
    where
        F: FnOnce(&CurrentMessage<'_, T, T>) -> MessageBuilder<T, T>,
    {
        if self.ct.is_cancelled() {
            return Ok(false);
        }
        self.manager.update(updater, ct)
    }

    /// Update the state's value from its current one.
    pub fn update_value<F>(&self, updater: F, ct: &CancellationToken) -> Result<bool>
    where
        F: FnOnce(Option<&T>) -> Option<T>,
    {
        self.update_message(
            |c| {
                let value = updater(c.local().current().data().into_option());
                c.with().data(value)
            },
            ct,
        )
    }

    pub fn set(&self, value: T, ct: &CancellationToken) -> Result<bool> {
        self.update_value(|_| Some(value), ct)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Stop following the feed and end every subscriber stream.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.ct.cancel();
        let forward = self.forward.lock().take();
        if let Some(forward) = forward {
            if let Err(e) = forward.await {
                tracing::warn!(error = %e, "state forwarding task failed");
            }
        }
        self.buffer.complete();
    }
}

impl<T: FeedValue> State<Vec<T>> {
    /// Apply a list operation; an absent value counts as an empty list.
    pub fn apply(&self, operation: ListOperation<T>, ct: &CancellationToken) -> Result<bool> {
        let mut failure = None;
        let published = self.update_message(
            |c| {
                let items = c.local().current().data().cloned().into_option().unwrap_or_default();
                match apply_operation(items, operation) {
                    Ok(items) => c.with().data(Some(items)),
                    Err(e) => {
                        failure = Some(e);
                        c.with()
                    }
                }
            },
            ct,
        )?;

        match failure {
            Some(e) => Err(e),
            None => Ok(published),
        }
    }
}

impl<T: FeedValue> Feed<T> for State<T> {
    fn get_source(&self, _context: &SourceContext, ct: CancellationToken) -> MessageStream<T> {
        self.buffer.subscribe(ct)
    }
}

impl<T: FeedValue> Drop for State<T> {
    fn drop(&mut self) {
        self.ct.cancel();
        if let Some(forward) = self.forward.get_mut().take() {
            forward.abort();
        }
        self.buffer.complete();
    }
}

impl<T: FeedValue> CachedChild for State<T> {
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn dispose(self: Arc<Self>) -> BoxFuture<'static, ()> {
        async move { State::dispose(&*self).await }.boxed()
    }
}
