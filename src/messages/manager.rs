//! Transactional merge of a parent message with local axis updates.

use super::builder::{AxisUpdates, BuilderParts, MessageBuilder};
use super::entry::MessageEntry;
use super::message::Message;
use crate::axes::{AxisSet, MessageAxis, MessageAxisValue};
use crate::error::{FeedError, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Maps the parent's Data axis into the local data type.
type DataProjection<P, T> = fn(&MessageAxisValue<P>) -> MessageAxisValue<T>;

/// Updates of a transaction that has been started and not yet ended.
struct PendingTransaction<T> {
    id: u64,
    updates: AxisUpdates<T>,
}

/// How the updates of a builder are retained.
enum ApplyMode {
    /// Kept until replaced (transient axes only affect this message).
    Persistent,
    /// Kept while the transaction is pending.
    Transaction,
}

struct ManagerState<P, T> {
    /// Latest parent message.
    parent: Message<P>,
    /// Local updates that survive across updates.
    local: AxisUpdates<T>,
    /// Last published message.
    current: Message<T>,
    /// Incremented by every applied builder.
    version: u64,
    /// Whether at least one message has been sent.
    published: bool,
    pending: Option<PendingTransaction<T>>,
    next_transaction: u64,
}

/// View handed to an update delegate.
pub struct CurrentMessage<'a, P, T> {
    parent: &'a Message<P>,
    local: &'a Message<T>,
    version: u64,
}

impl<'a, P, T> CurrentMessage<'a, P, T> {
    pub fn parent(&self) -> &Message<P> {
        self.parent
    }

    /// The last message sent by the manager.
    pub fn local(&self) -> &Message<T> {
        self.local
    }

    /// Builder derived from this snapshot.
    pub fn with(&self) -> MessageBuilder<T, P> {
        MessageBuilder::for_manager(self.version)
    }

    /// Builder derived from this snapshot with a new parent message.
    pub fn with_parent(&self, parent: Message<P>) -> MessageBuilder<T, P> {
        self.with().with_parent(parent)
    }
}

/// Merges a parent message with locally defined axis updates into the
/// messages of a derived stream.
///
/// All updates are serialized by one lock. Every update recomputes each axis
/// with `MessageAxis::local_value` and sends a message only when at least
/// one axis changed (the first update always sends). `send` is invoked
/// while the lock is held, so messages leave the manager in order.
pub struct MessageManager<P, T> {
    state: Mutex<ManagerState<P, T>>,
    send: Box<dyn Fn(Message<T>) + Send + Sync>,
    parent_data: Option<DataProjection<P, T>>,
}

impl<P, T> MessageManager<P, T>
where
    T: Clone + PartialEq,
{
    /// Manager whose Data axis is only ever defined locally.
    pub fn new(send: impl Fn(Message<T>) + Send + Sync + 'static) -> Self {
        Self::with_projection(send, None)
    }

    fn with_projection(
        send: impl Fn(Message<T>) + Send + Sync + 'static,
        parent_data: Option<DataProjection<P, T>>,
    ) -> Self {
        Self {
            state: Mutex::new(ManagerState {
                parent: Message::initial(),
                local: AxisUpdates::empty(),
                current: Message::initial(),
                version: 1,
                published: false,
                pending: None,
                next_transaction: 1,
            }),
            send: Box::new(send),
            parent_data,
        }
    }

    /// Last sent message (the initial message until the first update).
    pub fn current(&self) -> Message<T> {
        self.state.lock().current.clone()
    }

    pub fn parent(&self) -> Message<P> {
        self.state.lock().parent.clone()
    }

    /// Whether a transaction is pending.
    pub fn in_transaction(&self) -> bool {
        self.state.lock().pending.is_some()
    }

    /// Apply a persistent update.
    ///
    /// Returns whether a message was sent. A cancelled token makes this a
    /// no-op. A builder not obtained from the given `CurrentMessage` is
    /// rejected with `FeedError::StaleBuilder`.
    pub fn update<F>(&self, updater: F, ct: &CancellationToken) -> Result<bool>
    where
        F: FnOnce(&CurrentMessage<'_, P, T>) -> MessageBuilder<T, P>,
    {
        if ct.is_cancelled() {
            return Ok(false);
        }

        let mut state = self.state.lock();
        self.run(&mut state, updater, ApplyMode::Persistent)
    }

    /// Start a transaction.
    ///
    /// The pending updates of a previous transaction are discarded, except
    /// for the `preserve` axes which carry over into the new one.
    pub fn begin_update(
        &self,
        ct: &CancellationToken,
        preserve: &[MessageAxis],
    ) -> UpdateTransaction<'_, P, T> {
        let mut state = self.state.lock();
        let id = state.next_transaction;
        state.next_transaction += 1;

        let carried = match state.pending.take() {
            Some(previous) => {
                let mut updates = previous.updates;
                updates.retain(preserve.iter().copied().collect());
                tracing::trace!(
                    transaction = previous.id,
                    superseded_by = id,
                    "discarding pending transaction"
                );
                Some(updates)
            }
            None => None,
        };

        let republish = carried.is_some();
        state.pending = Some(PendingTransaction {
            id,
            updates: carried.unwrap_or_else(AxisUpdates::empty),
        });

        if republish && !ct.is_cancelled() {
            self.apply(&mut state, Self::no_change(), ApplyMode::Persistent);
        }

        UpdateTransaction {
            manager: self,
            id,
            ct: ct.clone(),
            ended: false,
        }
    }

    fn no_change() -> BuilderParts<T, P> {
        BuilderParts {
            origin: None,
            parent: None,
            updates: AxisUpdates::empty(),
            inherit: AxisSet::empty(),
        }
    }

    fn run<F>(&self, state: &mut ManagerState<P, T>, updater: F, mode: ApplyMode) -> Result<bool>
    where
        F: FnOnce(&CurrentMessage<'_, P, T>) -> MessageBuilder<T, P>,
    {
        let builder = {
            let current = CurrentMessage {
                parent: &state.parent,
                local: &state.current,
                version: state.version,
            };
            updater(&current)
        };

        let parts = builder.into_parts();
        if parts.origin != Some(state.version) {
            return Err(FeedError::StaleBuilder {
                built_from: parts.origin.unwrap_or(0),
                current: state.version,
            });
        }

        Ok(self.apply(state, parts, mode))
    }

    fn apply(&self, state: &mut ManagerState<P, T>, parts: BuilderParts<T, P>, mode: ApplyMode) -> bool {
        let parent_changes = match parts.parent {
            Some(parent) => {
                let changes = parent.changes();
                state.parent = parent;
                changes
            }
            None => AxisSet::empty(),
        };

        // When following a parent of the same type, the latest write wins: a
        // parent change replaces the local value unless re-declared here.
        if self.parent_data.is_some() {
            let declared = parts.updates.axes();
            for axis in parent_changes.iter() {
                if !declared.contains(axis) {
                    state.local.remove(axis);
                }
            }
        }

        let mut this_call = AxisUpdates::empty();
        match mode {
            ApplyMode::Persistent => {
                for axis in parts.inherit.iter() {
                    state.local.remove(axis);
                }
                for update in parts.updates.into_iter() {
                    if update.axis.is_transient() {
                        this_call.put(update);
                    } else {
                        state.local.put(update);
                    }
                }
            }
            ApplyMode::Transaction => {
                if let Some(pending) = state.pending.as_mut() {
                    for axis in parts.inherit.iter() {
                        pending.updates.remove(axis);
                    }
                    for update in parts.updates.into_iter() {
                        pending.updates.put(update);
                    }
                }
            }
        }

        let previous = Arc::clone(state.current.current_arc());
        let mut next = MessageEntry::clone(&previous);
        for axis in MessageAxis::ALL {
            let parent_value = self.parent_value(&state.parent, axis, parent_changes);
            let update = state
                .pending
                .as_ref()
                .and_then(|p| p.updates.get(axis))
                .or_else(|| this_call.get(axis))
                .or_else(|| state.local.get(axis));
            next.set(axis, axis.local_value(&parent_value, update));
        }

        state.version += 1;
        let message = Message::from_entries(previous, Arc::new(next));
        if message.changes().is_empty() && state.published {
            return false;
        }

        state.current = message.clone();
        state.published = true;
        (self.send)(message);
        true
    }

    fn parent_value(&self, parent: &Message<P>, axis: MessageAxis, changes: AxisSet) -> MessageAxisValue<T> {
        let value = parent.current().get(axis);
        match axis {
            MessageAxis::Data => match self.parent_data {
                Some(project) => project(value),
                None => MessageAxisValue::Unset,
            },
            // A transient value belongs to the parent message that carried it
            _ if axis.is_transient() && !changes.contains(axis) => MessageAxisValue::Unset,
            _ => value.cast(),
        }
    }

    fn end_transaction(&self, id: u64, republish: bool) -> bool {
        let mut state = self.state.lock();
        if state.pending.as_ref().map(|p| p.id) != Some(id) {
            return false;
        }

        state.pending = None;
        if republish {
            self.apply(&mut state, Self::no_change(), ApplyMode::Persistent);
        }
        true
    }
}

impl<T> MessageManager<T, T>
where
    T: Clone + PartialEq,
{
    /// Manager whose Data axis follows the parent unless overridden.
    pub fn following(send: impl Fn(Message<T>) + Send + Sync + 'static) -> Self {
        Self::with_projection(send, Some(MessageAxisValue::clone))
    }
}

/// A set of updates that are visible immediately and rolled back unless
/// committed.
///
/// Dropping an uncommitted transaction discards its transient updates and
/// republishes, unless its cancellation token has fired.
pub struct UpdateTransaction<'a, P, T>
where
    T: Clone + PartialEq,
{
    manager: &'a MessageManager<P, T>,
    id: u64,
    ct: CancellationToken,
    ended: bool,
}

impl<'a, P, T> UpdateTransaction<'a, P, T>
where
    T: Clone + PartialEq,
{
    /// Whether a newer transaction replaced this one.
    pub fn is_superseded(&self) -> bool {
        self.manager.state.lock().pending.as_ref().map(|p| p.id) != Some(self.id)
    }

    /// Apply updates that last until the transaction ends.
    pub fn transient_update<F>(&self, updater: F) -> Result<bool>
    where
        F: FnOnce(&CurrentMessage<'_, P, T>) -> MessageBuilder<T, P>,
    {
        if self.ct.is_cancelled() {
            return Ok(false);
        }

        let mut state = self.manager.state.lock();
        if state.pending.as_ref().map(|p| p.id) != Some(self.id) {
            return Ok(false);
        }
        self.manager.run(&mut state, updater, ApplyMode::Transaction)
    }

    /// Apply a persistent update without ending the transaction.
    pub fn update<F>(&self, updater: F) -> Result<bool>
    where
        F: FnOnce(&CurrentMessage<'_, P, T>) -> MessageBuilder<T, P>,
    {
        self.manager.update(updater, &self.ct)
    }

    /// Drop the transient updates and apply a final persistent update in
    /// the same message.
    pub fn commit<F>(mut self, updater: F) -> Result<bool>
    where
        F: FnOnce(&CurrentMessage<'_, P, T>) -> MessageBuilder<T, P>,
    {
        self.ended = true;
        if self.ct.is_cancelled() {
            self.manager.end_transaction(self.id, false);
            return Ok(false);
        }

        let mut state = self.manager.state.lock();
        if state.pending.as_ref().map(|p| p.id) != Some(self.id) {
            return Ok(false);
        }
        state.pending = None;
        let result = self.manager.run(&mut state, updater, ApplyMode::Persistent);
        if result.is_err() {
            // Withdraw the transient updates of the ended transaction
            self.manager
                .apply(&mut state, MessageManager::<P, T>::no_change(), ApplyMode::Persistent);
        }
        result
    }
}

impl<'a, P, T> Drop for UpdateTransaction<'a, P, T>
where
    T: Clone + PartialEq,
{
    fn drop(&mut self) {
        if self.ended {
            return;
        }
        if self.manager.end_transaction(self.id, !self.ct.is_cancelled()) {
            tracing::debug!(transaction = self.id, "rolled back uncommitted transaction");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axes::AxisPayload;
    use crate::error::FeedFault;
    use crate::types::DataValue;

    type Sent<T> = Arc<Mutex<Vec<Message<T>>>>;

    fn manager<P>() -> (MessageManager<P, i32>, Sent<i32>) {
        let sent: Sent<i32> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&sent);
        let manager = MessageManager::new(move |m| sink.lock().push(m));
        (manager, sent)
    }

    #[test]
    fn test_first_update_always_publishes() {
        let (manager, sent) = manager::<()>();
        let ct = CancellationToken::new();

        assert!(manager.update(|c| c.with(), &ct).unwrap());
        assert!(!manager.update(|c| c.with(), &ct).unwrap());
        assert_eq!(sent.lock().len(), 1);
    }

    #[test]
    fn test_only_changed_axes_publish() {
        let (manager, sent) = manager::<()>();
        let ct = CancellationToken::new();

        manager.update(|c| c.with().data(Some(1)), &ct).unwrap();
        assert!(!manager.update(|c| c.with().data(Some(1)), &ct).unwrap());
        assert!(manager.update(|c| c.with().data(Some(2)), &ct).unwrap());

        let sent = sent.lock();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].changes(), AxisSet::from([MessageAxis::Data]));
        assert_eq!(sent[1].previous().data(), DataValue::Value(&1));
    }

    #[test]
    fn test_cancelled_update_is_noop() {
        let (manager, sent) = manager::<()>();
        let ct = CancellationToken::new();
        ct.cancel();

        assert!(!manager.update(|c| c.with().data(Some(1)), &ct).unwrap());
        assert!(sent.lock().is_empty());
    }

    #[test]
    fn test_foreign_builder_is_rejected() {
        let (manager, _) = manager::<()>();
        let ct = CancellationToken::new();

        let result = manager.update(|_| Message::initial().with().data(Some(1)), &ct);
        assert!(matches!(result, Err(FeedError::StaleBuilder { .. })));
    }

    #[test]
    fn test_parent_error_is_inherited() {
        let (manager, _) = manager::<String>();
        let ct = CancellationToken::new();
        let fault = FeedFault::msg("boom");

        let parent = Message::<String>::initial()
            .with()
            .data(Some("a".to_string()))
            .error(fault.clone())
            .build();

        manager
            .update(|c| c.with_parent(parent).data(Some(1)), &ct)
            .unwrap();

        let current = manager.current();
        assert_eq!(current.current().data(), DataValue::Value(&1));
        assert_eq!(current.current().error(), Some(&fault));
    }

    #[test]
    fn test_local_override_replaces_parent() {
        let (manager, _) = manager::<()>();
        let ct = CancellationToken::new();
        let parent = Message::<()>::initial().with().progress(true).build();

        manager
            .update(|c| c.with_parent(parent).progress(false), &ct)
            .unwrap();
        assert!(!manager.current().current().is_transient());

        // Inheriting again exposes the parent's value
        manager
            .update(|c| c.with().inherit(MessageAxis::Progress), &ct)
            .unwrap();
        assert!(manager.current().current().is_transient());
    }

    #[test]
    fn test_following_inherits_data() {
        let sent: Sent<i32> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&sent);
        let manager = MessageManager::<i32, i32>::following(move |m| sink.lock().push(m));
        let ct = CancellationToken::new();

        let parent = Message::initial().with().data(Some(5)).build();
        manager.update(|c| c.with_parent(parent), &ct).unwrap();
        assert_eq!(manager.current().current().data(), DataValue::Value(&5));

        manager.update(|c| c.with().data(Some(6)), &ct).unwrap();
        assert_eq!(manager.current().current().data(), DataValue::Value(&6));

        // A newer parent value replaces the local one
        let parent = manager.parent().with().data(Some(7)).build();
        manager.update(|c| c.with_parent(parent), &ct).unwrap();
        assert_eq!(manager.current().current().data(), DataValue::Value(&7));
        assert_eq!(sent.lock().len(), 3);
    }

    #[test]
    fn test_transaction_rollback_clears_progress() {
        let (manager, sent) = manager::<()>();
        let ct = CancellationToken::new();
        manager.update(|c| c.with().data(Some(1)), &ct).unwrap();

        {
            let tx = manager.begin_update(&ct, &[]);
            tx.transient_update(|c| c.with().progress(true)).unwrap();
            assert!(manager.current().current().is_transient());
        }

        let current = manager.current();
        assert!(!current.current().is_transient());
        assert!(current.changes().contains(MessageAxis::Progress));
        assert_eq!(current.current().data(), DataValue::Value(&1));
        assert_eq!(sent.lock().len(), 3);
        assert!(!manager.in_transaction());
    }

    #[test]
    fn test_commit_keeps_redeclared_progress() {
        let (manager, _) = manager::<()>();
        let ct = CancellationToken::new();

        let tx = manager.begin_update(&ct, &[]);
        tx.transient_update(|c| c.with().progress(true)).unwrap();
        tx.commit(|c| c.with().data(Some(2)).progress(true)).unwrap();

        let current = manager.current();
        assert!(current.current().is_transient());
        assert_eq!(current.current().data(), DataValue::Value(&2));
    }

    #[test]
    fn test_commit_drops_transient_updates() {
        let (manager, _) = manager::<()>();
        let ct = CancellationToken::new();

        let tx = manager.begin_update(&ct, &[]);
        tx.transient_update(|c| c.with().progress(true)).unwrap();
        tx.commit(|c| c.with().data(Some(2))).unwrap();

        let current = manager.current();
        assert!(!current.current().is_transient());
        assert_eq!(
            current.changes(),
            AxisSet::from([MessageAxis::Data, MessageAxis::Progress])
        );
    }

    #[test]
    fn test_rejected_commit_withdraws_transient_updates() {
        let (manager, sent) = manager::<()>();
        let ct = CancellationToken::new();

        let tx = manager.begin_update(&ct, &[]);
        tx.transient_update(|c| c.with().progress(true)).unwrap();
        let result = tx.commit(|_| Message::initial().with().data(Some(1)));

        assert!(matches!(result, Err(FeedError::StaleBuilder { .. })));
        assert!(!manager.in_transaction());
        assert!(!manager.current().current().is_transient());
        assert_eq!(sent.lock().len(), 2);
    }

    #[test]
    fn test_new_transaction_discards_previous() {
        let (manager, _) = manager::<()>();
        let ct = CancellationToken::new();

        let first = manager.begin_update(&ct, &[]);
        first.transient_update(|c| c.with().error(FeedFault::msg("x"))).unwrap();
        first.transient_update(|c| c.with().progress(true)).unwrap();

        let second = manager.begin_update(&ct, &[MessageAxis::Progress]);
        assert!(first.is_superseded());
        assert!(!first.transient_update(|c| c.with().data(Some(9))).unwrap());

        let current = manager.current();
        assert!(current.current().is_transient());
        assert!(current.current().error().is_none());

        drop(first);
        assert!(manager.in_transaction());
        drop(second);
        assert!(!manager.current().current().is_transient());
    }

    #[test]
    fn test_cancelled_rollback_does_not_publish() {
        let (manager, sent) = manager::<()>();
        let ct = CancellationToken::new();

        let tx = manager.begin_update(&ct, &[]);
        tx.transient_update(|c| c.with().progress(true)).unwrap();
        ct.cancel();
        drop(tx);

        assert_eq!(sent.lock().len(), 1);
        assert!(!manager.in_transaction());
    }

    #[test]
    fn test_transient_axis_only_in_its_message() {
        use crate::tokens::{RefreshToken, Token, TokenSet};
        use crate::types::{ContextId, SourceId};

        let (manager, _) = manager::<()>();
        let ct = CancellationToken::new();
        let token = RefreshToken::new(SourceId::next(), ContextId(1), 1);

        manager
            .update(|c| c.with().data(Some(1)).refreshed(token), &ct)
            .unwrap();
        assert_eq!(
            manager.current().current().get(MessageAxis::Refresh),
            &MessageAxisValue::Set(AxisPayload::Refresh(TokenSet::from(token)))
        );

        manager.update(|c| c.with().data(Some(2)), &ct).unwrap();
        assert!(manager.current().current().refresh_tokens().is_empty());
    }
}
