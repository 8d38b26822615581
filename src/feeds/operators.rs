//! Derived feeds.

use super::{drive, Feed, MessageStream};
use crate::context::{SourceContext, WeakSourceContext};
use crate::messages::MessageManager;
use crate::types::{DataValue, FeedValue};
use futures::StreamExt;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Follow the parent feed's subscription in `context` and derive one local
/// message per parent message. Every axis except Data is inherited from
/// the parent.
fn derive_from_parent<P, T, F, D>(
    parent: Arc<F>,
    context: WeakSourceContext,
    ct: CancellationToken,
    derive_data: D,
) -> MessageStream<T>
where
    P: FeedValue,
    T: FeedValue,
    F: Feed<P> + ?Sized,
    D: Fn(DataValue<&P>) -> DataValue<T> + Send + Sync + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let manager = MessageManager::<P, T>::new(move |message| {
        let _ = tx.send(message);
    });

    drive(rx, async move {
        let subscription = {
            let Some(context) = context.upgrade() else {
                return;
            };
            match context.get_or_create_subscription::<P, F>(&parent) {
                Ok(subscription) => subscription,
                Err(e) => {
                    tracing::debug!(error = %e, "parent feed unavailable");
                    return;
                }
            }
        };

        let mut messages = match subscription.get_messages(ct.clone()) {
            Ok(messages) => messages,
            Err(e) => {
                tracing::debug!(error = %e, "parent subscription unavailable");
                return;
            }
        };

        while let Some(message) = messages.next().await {
            let data = derive_data(message.current().data());
            let updated = manager.update(|c| c.with_parent(message).data_value(data), &ct);
            if let Err(e) = updated {
                tracing::warn!(error = %e, "failed to derive message");
            }
        }
    })
}

/// Maps the parent's data.
pub struct SelectFeed<P, T, F: ?Sized, M> {
    parent: Arc<F>,
    map: Arc<M>,
    _types: PhantomData<fn(P) -> T>,
}

impl<P, T, F, M> Feed<T> for SelectFeed<P, T, F, M>
where
    P: FeedValue,
    T: FeedValue,
    F: Feed<P> + ?Sized,
    M: Fn(&P) -> T + Send + Sync + 'static,
{
    fn get_source(&self, context: &SourceContext, ct: CancellationToken) -> MessageStream<T> {
        let map = Arc::clone(&self.map);
        derive_from_parent(Arc::clone(&self.parent), context.downgrade(), ct, move |data| {
            data.map(|value| map(value))
        })
    }
}

/// Keeps the parent's data only when it matches a predicate; otherwise
/// the data is empty.
pub struct FilterFeed<T, F: ?Sized, P> {
    parent: Arc<F>,
    predicate: Arc<P>,
    _type: PhantomData<fn() -> T>,
}

impl<T, F, P> Feed<T> for FilterFeed<T, F, P>
where
    T: FeedValue,
    F: Feed<T> + ?Sized,
    P: Fn(&T) -> bool + Send + Sync + 'static,
{
    fn get_source(&self, context: &SourceContext, ct: CancellationToken) -> MessageStream<T> {
        let predicate = Arc::clone(&self.predicate);
        derive_from_parent(Arc::clone(&self.parent), context.downgrade(), ct, move |data| match data {
            DataValue::Value(value) if !predicate(value) => DataValue::Empty,
            other => other.cloned(),
        })
    }
}

/// Operators available on every feed.
pub trait FeedExt<T: FeedValue>: Feed<T> + Sized {
    fn select<U, M>(self: Arc<Self>, map: M) -> Arc<SelectFeed<T, U, Self, M>>
    where
        U: FeedValue,
        M: Fn(&T) -> U + Send + Sync + 'static,
    {
        Arc::new(SelectFeed {
            parent: self,
            map: Arc::new(map),
            _types: PhantomData,
        })
    }

    fn filter<P>(self: Arc<Self>, predicate: P) -> Arc<FilterFeed<T, Self, P>>
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Arc::new(FilterFeed {
            parent: self,
            predicate: Arc::new(predicate),
            _type: PhantomData,
        })
    }
}

impl<T: FeedValue, F: Feed<T>> FeedExt<T> for F {}
