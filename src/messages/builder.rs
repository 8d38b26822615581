//! Message builders.

use super::message::Message;
use crate::axes::{AxisPayload, AxisSet, MessageAxis, MessageAxisUpdate, MessageAxisValue};
use crate::error::{FeedError, FeedFault, Result};
use crate::tokens::{PageToken, RefreshToken, TokenSet};
use crate::types::{DataValue, SelectionInfo};
use std::fmt;
use std::sync::Arc;

/// At most one pending update per axis.
#[derive(Clone)]
pub(crate) struct AxisUpdates<T> {
    slots: [Option<MessageAxisUpdate<T>>; MessageAxis::COUNT],
}

impl<T> AxisUpdates<T> {
    pub(crate) fn empty() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
        }
    }

    pub(crate) fn get(&self, axis: MessageAxis) -> Option<&MessageAxisUpdate<T>> {
        self.slots[axis.index()].as_ref()
    }

    pub(crate) fn put(&mut self, update: MessageAxisUpdate<T>) {
        let index = update.axis.index();
        self.slots[index] = Some(update);
    }

    pub(crate) fn remove(&mut self, axis: MessageAxis) -> Option<MessageAxisUpdate<T>> {
        self.slots[axis.index()].take()
    }

    pub(crate) fn axes(&self) -> AxisSet {
        MessageAxis::ALL
            .into_iter()
            .filter(|a| self.slots[a.index()].is_some())
            .collect()
    }

    pub(crate) fn into_iter(self) -> impl Iterator<Item = MessageAxisUpdate<T>> {
        self.slots.into_iter().flatten()
    }

    /// Keep only the given axes.
    pub(crate) fn retain(&mut self, axes: AxisSet) {
        for axis in MessageAxis::ALL {
            if !axes.contains(axis) {
                self.slots[axis.index()] = None;
            }
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for AxisUpdates<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.slots.iter().flatten()).finish()
    }
}

/// Parts of a builder consumed by a `MessageManager`.
pub(crate) struct BuilderParts<T, P> {
    pub(crate) origin: Option<u64>,
    pub(crate) parent: Option<Message<P>>,
    pub(crate) updates: AxisUpdates<T>,
    pub(crate) inherit: AxisSet,
}

/// Records axis updates before materializing a message.
///
/// A builder obtained from `Message::with` builds the next message of that
/// stream. A builder obtained from a `MessageManager` is applied by the
/// manager and may also carry a new parent message.
pub struct MessageBuilder<T, P = ()> {
    origin: Option<u64>,
    base: Option<Message<T>>,
    parent: Option<Message<P>>,
    updates: AxisUpdates<T>,
    inherit: AxisSet,
}

impl<T> MessageBuilder<T, ()> {
    pub(crate) fn from_message(base: Message<T>) -> Self {
        Self {
            origin: None,
            base: Some(base),
            parent: None,
            updates: AxisUpdates::empty(),
            inherit: AxisSet::empty(),
        }
    }
}

impl<T, P> MessageBuilder<T, P> {
    pub(crate) fn for_manager(origin: u64) -> Self {
        Self {
            origin: Some(origin),
            base: None,
            parent: None,
            updates: AxisUpdates::empty(),
            inherit: AxisSet::empty(),
        }
    }

    pub(crate) fn into_parts(self) -> BuilderParts<T, P> {
        BuilderParts {
            origin: self.origin,
            parent: self.parent,
            updates: self.updates,
            inherit: self.inherit,
        }
    }

    /// Replace the parent message the result derives from.
    pub fn with_parent(mut self, parent: Message<P>) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Record an update. Fails if the value belongs to another axis.
    pub fn update(mut self, update: MessageAxisUpdate<T>) -> Result<Self> {
        if let Some(payload) = update.value.payload() {
            if payload.axis() != update.axis {
                return Err(FeedError::AxisMismatch {
                    axis: update.axis,
                    payload: payload.axis(),
                });
            }
        }
        self.inherit.remove(update.axis);
        self.updates.put(update);
        Ok(self)
    }

    /// Override an axis value.
    pub fn set(self, axis: MessageAxis, value: MessageAxisValue<T>) -> Result<Self> {
        self.update(MessageAxisUpdate::replace(axis, value))
    }

    fn replace(mut self, payload: AxisPayload<T>) -> Self {
        let axis = payload.axis();
        self.inherit.remove(axis);
        self.updates
            .put(MessageAxisUpdate::replace(axis, MessageAxisValue::Set(payload)));
        self
    }

    /// Combine a value with the parent's value instead of replacing it.
    pub fn combine(mut self, payload: AxisPayload<T>) -> Self {
        let axis = payload.axis();
        self.inherit.remove(axis);
        self.updates
            .put(MessageAxisUpdate::combine(axis, MessageAxisValue::Set(payload)));
        self
    }

    /// Override an axis with "unset".
    pub fn clear(mut self, axis: MessageAxis) -> Self {
        self.inherit.remove(axis);
        self.updates
            .put(MessageAxisUpdate::replace(axis, MessageAxisValue::Unset));
        self
    }

    /// Drop any local definition of an axis so it follows the parent again.
    pub fn inherit(mut self, axis: MessageAxis) -> Self {
        self.updates.remove(axis);
        self.inherit.insert(axis);
        self
    }

    pub fn data(self, data: Option<T>) -> Self {
        self.replace(AxisPayload::Data(data))
    }

    pub fn data_value(self, data: DataValue<T>) -> Self {
        match data {
            DataValue::Undefined => self.clear(MessageAxis::Data),
            DataValue::Empty => self.data(None),
            DataValue::Value(v) => self.data(Some(v)),
        }
    }

    pub fn error(self, fault: FeedFault) -> Self {
        self.replace(AxisPayload::Error(fault))
    }

    pub fn clear_error(self) -> Self {
        self.clear(MessageAxis::Error)
    }

    pub fn progress(self, is_transient: bool) -> Self {
        self.replace(AxisPayload::Progress(is_transient))
    }

    pub fn refreshed(self, tokens: impl Into<TokenSet<RefreshToken>>) -> Self {
        self.replace(AxisPayload::Refresh(tokens.into()))
    }

    pub fn paged(self, tokens: impl Into<TokenSet<PageToken>>) -> Self {
        self.replace(AxisPayload::Pagination(tokens.into()))
    }

    pub fn selected(self, selection: SelectionInfo) -> Self {
        self.replace(AxisPayload::Selection(selection))
    }

    /// Axes touched by this builder.
    pub fn touched(&self) -> AxisSet {
        self.updates.axes().union(self.inherit)
    }
}

impl<T: Clone + PartialEq> MessageBuilder<T, ()> {
    /// Materialize the next message from the base message.
    ///
    /// Untouched axes keep the base value, except transient axes which are
    /// cleared.
    pub fn build(self) -> Message<T> {
        let base = self.base.unwrap_or_else(Message::initial);
        let mut next = base.current().clone();

        for axis in MessageAxis::ALL {
            let inherited = if axis.is_transient() {
                MessageAxisValue::Unset
            } else {
                base.current().get(axis).clone()
            };
            next.set(axis, axis.local_value(&inherited, self.updates.get(axis)));
        }

        Message::from_entries(Arc::clone(base.current_arc()), Arc::new(next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::Token;
    use crate::types::{ContextId, SourceId};

    #[test]
    fn test_build_records_changes() {
        let msg = Message::<i32>::initial()
            .with()
            .data(Some(3))
            .progress(true)
            .build();

        assert_eq!(msg.current().data(), DataValue::Value(&3));
        assert!(msg.current().is_transient());
        assert_eq!(
            msg.changes(),
            AxisSet::from([MessageAxis::Data, MessageAxis::Progress])
        );
    }

    #[test]
    fn test_build_without_updates_changes_nothing() {
        let first = Message::<i32>::initial().with().data(Some(3)).build();
        let second = first.with().build();
        assert!(second.changes().is_empty());
        assert_eq!(second.current().data(), DataValue::Value(&3));
    }

    #[test]
    fn test_transient_axes_are_cleared() {
        let token = RefreshToken::new(SourceId::next(), ContextId(1), 1);
        let first = Message::<i32>::initial().with().refreshed(token).build();
        assert_eq!(first.current().refresh_tokens(), TokenSet::from(token));

        let second = first.with().data(Some(1)).build();
        assert!(second.current().refresh_tokens().is_empty());
        assert!(second.changes().contains(MessageAxis::Refresh));
    }

    #[test]
    fn test_combine_aggregates_with_base() {
        let first = Message::<i32>::initial().with().progress(true).build();
        let second = first.with().combine(AxisPayload::Progress(false)).build();
        assert!(second.current().is_transient());
    }

    #[test]
    fn test_set_rejects_foreign_payload() {
        let result = Message::<i32>::initial()
            .with()
            .set(MessageAxis::Error, AxisPayload::Progress(true).into());

        assert!(matches!(
            result,
            Err(FeedError::AxisMismatch {
                axis: MessageAxis::Error,
                payload: MessageAxis::Progress
            })
        ));
    }

    #[test]
    fn test_data_value_undefined_clears() {
        let first = Message::<i32>::initial().with().data(Some(1)).build();
        let second = first.with().data_value(DataValue::Undefined).build();
        assert!(second.current().data().is_undefined());
    }
}
