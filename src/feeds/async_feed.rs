//! Feed backed by an async loader.

use super::{drive, Feed, MessageStream};
use crate::axes::MessageAxis;
use crate::context::SourceContext;
use crate::error::FeedFault;
use crate::messages::MessageManager;
use crate::requests::{CoercingRequestManager, RefreshRequest, RequestManager};
use crate::types::{FeedValue, SourceId};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

type Loader<T> = Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, Result<Option<T>, FeedFault>> + Send + Sync>;

/// Loads its value with an async loader, once on subscription and again on
/// every refresh request.
///
/// Each load runs in a transaction that marks the message as transient
/// while it is in flight, then commits the data (or the error) together
/// with the refresh token that triggered it. Refresh requests arriving
/// while a load is pending collapse into one reload.
pub struct AsyncFeed<T> {
    source: SourceId,
    loader: Loader<T>,
}

impl<T: FeedValue> AsyncFeed<T> {
    pub fn new<F, Fut>(loader: F) -> Arc<Self>
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<T>, FeedFault>> + Send + 'static,
    {
        Arc::new(Self {
            source: SourceId::next(),
            loader: Arc::new(move |ct| loader(ct).boxed()),
        })
    }

    /// Identity carried by the tokens of this feed.
    pub fn source_id(&self) -> SourceId {
        self.source
    }
}

impl<T: FeedValue> Feed<T> for AsyncFeed<T> {
    fn get_source(&self, context: &SourceContext, ct: CancellationToken) -> MessageStream<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let manager = MessageManager::<(), T>::new(move |message| {
            let _ = tx.send(message);
        });
        let requests = CoercingRequestManager::<RefreshRequest>::new(
            context.requests(),
            self.source,
            context.root_id(),
            context.config(),
        );
        let loader = Arc::clone(&self.loader);

        drive(rx, async move {
            while let Some(token) = requests.next(&ct).await {
                tracing::debug!(token = ?token, "loading");
                let update = manager.begin_update(&ct, &[MessageAxis::Progress]);
                if let Err(e) = update.transient_update(|c| c.with().progress(true)) {
                    tracing::warn!(error = %e, "failed to flag load in progress");
                }

                let result = tokio::select! {
                    result = loader(ct.clone()) => result,
                    _ = ct.cancelled() => break,
                };

                let committed = update.commit(|c| match result {
                    Ok(data) => c.with().data(data).clear_error().refreshed(token),
                    Err(fault) => c.with().error(fault).refreshed(token),
                });
                if let Err(e) = committed {
                    tracing::warn!(error = %e, "failed to publish loaded value");
                }
            }
            requests.dispose();
        })
    }
}
