//! Axis descriptors and axis sets.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A named metadata channel carried by every message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageAxis {
    /// The value itself (undefined / empty / some).
    Data,
    /// Domain failure of the producer.
    Error,
    /// The message is transient: a load is in flight.
    Progress,
    /// Refresh tokens satisfied by this message.
    Refresh,
    /// Page tokens satisfied by this message.
    Pagination,
    /// Selected items.
    Selection,
}

impl MessageAxis {
    pub const COUNT: usize = 6;

    pub const ALL: [MessageAxis; MessageAxis::COUNT] = [
        MessageAxis::Data,
        MessageAxis::Error,
        MessageAxis::Progress,
        MessageAxis::Refresh,
        MessageAxis::Pagination,
        MessageAxis::Selection,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            MessageAxis::Data => "data",
            MessageAxis::Error => "error",
            MessageAxis::Progress => "progress",
            MessageAxis::Refresh => "refresh",
            MessageAxis::Pagination => "pagination",
            MessageAxis::Selection => "selection",
        }
    }

    /// Transient axes are cleared at the start of every update unless the
    /// update sets them again. They describe a single message, not a
    /// persistent property of the feed.
    pub fn is_transient(self) -> bool {
        matches!(self, MessageAxis::Refresh | MessageAxis::Pagination)
    }
}

impl fmt::Display for MessageAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A set of axes (used for the changes of a message).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AxisSet(u8);

impl AxisSet {
    pub const fn empty() -> Self {
        AxisSet(0)
    }

    pub fn all() -> Self {
        MessageAxis::ALL.into_iter().collect()
    }

    pub fn insert(&mut self, axis: MessageAxis) {
        self.0 |= 1 << axis.index();
    }

    pub fn remove(&mut self, axis: MessageAxis) {
        self.0 &= !(1 << axis.index());
    }

    pub fn contains(&self, axis: MessageAxis) -> bool {
        self.0 & (1 << axis.index()) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn union(self, other: AxisSet) -> AxisSet {
        AxisSet(self.0 | other.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = MessageAxis> + '_ {
        MessageAxis::ALL.into_iter().filter(|a| self.contains(*a))
    }
}

impl FromIterator<MessageAxis> for AxisSet {
    fn from_iter<I: IntoIterator<Item = MessageAxis>>(iter: I) -> Self {
        let mut set = AxisSet::empty();
        for axis in iter {
            set.insert(axis);
        }
        set
    }
}

impl<const N: usize> From<[MessageAxis; N]> for AxisSet {
    fn from(axes: [MessageAxis; N]) -> Self {
        axes.into_iter().collect()
    }
}

impl fmt::Debug for AxisSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}
