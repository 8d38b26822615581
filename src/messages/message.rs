//! Immutable messages.

use super::builder::MessageBuilder;
use super::entry::MessageEntry;
use crate::axes::AxisSet;
use std::sync::Arc;

/// A snapshot transition: the previous entry, the current entry and the
/// axes that differ between them.
///
/// `changes` is always exactly the set of axes whose values are not equal
/// between `previous` and `current`; messages are only constructed through
/// paths that compute it.
#[derive(Debug)]
pub struct Message<T> {
    previous: Arc<MessageEntry<T>>,
    current: Arc<MessageEntry<T>>,
    changes: AxisSet,
}

impl<T> Clone for Message<T> {
    fn clone(&self) -> Self {
        Self {
            previous: Arc::clone(&self.previous),
            current: Arc::clone(&self.current),
            changes: self.changes,
        }
    }
}

impl<T> Message<T> {
    /// The first message of every stream: nothing set, nothing changed.
    pub fn initial() -> Self {
        let entry = Arc::new(MessageEntry::empty());
        Self {
            previous: Arc::clone(&entry),
            current: entry,
            changes: AxisSet::empty(),
        }
    }

    pub fn previous(&self) -> &MessageEntry<T> {
        &self.previous
    }

    pub fn current(&self) -> &MessageEntry<T> {
        &self.current
    }

    pub fn changes(&self) -> AxisSet {
        self.changes
    }

    pub(crate) fn current_arc(&self) -> &Arc<MessageEntry<T>> {
        &self.current
    }

    /// Start a builder for the next message of this stream.
    pub fn with(&self) -> MessageBuilder<T> {
        MessageBuilder::from_message(self.clone())
    }
}

impl<T: PartialEq> Message<T> {
    pub(crate) fn from_entries(
        previous: Arc<MessageEntry<T>>,
        current: Arc<MessageEntry<T>>,
    ) -> Self {
        let changes = if Arc::ptr_eq(&previous, &current) {
            AxisSet::empty()
        } else {
            previous.diff(&current)
        };

        Self {
            previous,
            current,
            changes,
        }
    }

    /// The same current entry seen from another previous entry.
    ///
    /// Used when a consumer did not observe this message's previous entry
    /// (late attach): changes are recomputed against what it did observe.
    pub fn rebase(&self, previous: &Arc<MessageEntry<T>>) -> Message<T> {
        if Arc::ptr_eq(previous, &self.previous) {
            return self.clone();
        }
        Self::from_entries(Arc::clone(previous), Arc::clone(&self.current))
    }
}

impl<T> Default for Message<T> {
    fn default() -> Self {
        Self::initial()
    }
}
