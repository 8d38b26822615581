//! Immutable axis-value snapshots.

use crate::axes::{AxisPayload, AxisSet, MessageAxis, MessageAxisValue};
use crate::error::FeedFault;
use crate::tokens::{PageToken, RefreshToken, TokenSet};
use crate::types::{DataValue, SelectionInfo};

/// One value per axis. The Data axis is always present, possibly unset
/// ("undefined"), which differs from an explicit empty value.
#[derive(Clone, Debug, PartialEq)]
pub struct MessageEntry<T> {
    values: [MessageAxisValue<T>; MessageAxis::COUNT],
}

impl<T> MessageEntry<T> {
    /// Entry with every axis unset.
    pub fn empty() -> Self {
        Self {
            values: std::array::from_fn(|_| MessageAxisValue::Unset),
        }
    }

    pub fn get(&self, axis: MessageAxis) -> &MessageAxisValue<T> {
        &self.values[axis.index()]
    }

    /// Store a value. The caller guarantees the payload belongs to `axis`.
    pub(crate) fn set(&mut self, axis: MessageAxis, value: MessageAxisValue<T>) {
        debug_assert!(axis.accepts(&value), "payload stored on the wrong axis");
        self.values[axis.index()] = value;
    }

    pub fn data(&self) -> DataValue<&T> {
        match self.get(MessageAxis::Data) {
            MessageAxisValue::Set(AxisPayload::Data(Some(v))) => DataValue::Value(v),
            MessageAxisValue::Set(AxisPayload::Data(None)) => DataValue::Empty,
            _ => DataValue::Undefined,
        }
    }

    pub fn error(&self) -> Option<&FeedFault> {
        match self.get(MessageAxis::Error) {
            MessageAxisValue::Set(AxisPayload::Error(e)) => Some(e),
            _ => None,
        }
    }

    /// True while a load is in flight.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.get(MessageAxis::Progress),
            MessageAxisValue::Set(AxisPayload::Progress(true))
        )
    }

    pub fn refresh_tokens(&self) -> TokenSet<RefreshToken> {
        match self.get(MessageAxis::Refresh) {
            MessageAxisValue::Set(AxisPayload::Refresh(t)) => t.clone(),
            _ => TokenSet::empty(),
        }
    }

    pub fn page_tokens(&self) -> TokenSet<PageToken> {
        match self.get(MessageAxis::Pagination) {
            MessageAxisValue::Set(AxisPayload::Pagination(t)) => t.clone(),
            _ => TokenSet::empty(),
        }
    }

    pub fn selection(&self) -> Option<&SelectionInfo> {
        match self.get(MessageAxis::Selection) {
            MessageAxisValue::Set(AxisPayload::Selection(s)) => Some(s),
            _ => None,
        }
    }

    /// Axes holding a value.
    pub fn set_axes(&self) -> AxisSet {
        MessageAxis::ALL
            .into_iter()
            .filter(|a| self.get(*a).is_set())
            .collect()
    }
}

impl<T: PartialEq> MessageEntry<T> {
    /// Axes whose values differ between the two entries.
    pub fn diff(&self, other: &MessageEntry<T>) -> AxisSet {
        MessageAxis::ALL
            .into_iter()
            .filter(|a| !a.are_equal(self.get(*a), other.get(*a)))
            .collect()
    }
}

impl<T> Default for MessageEntry<T> {
    fn default() -> Self {
        Self::empty()
    }
}
