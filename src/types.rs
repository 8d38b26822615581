//! Core identifiers and value types for the engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Bound shared by every value that travels on the Data axis.
pub trait FeedValue: Clone + PartialEq + fmt::Debug + Send + Sync + 'static {}

impl<T> FeedValue for T where T: Clone + PartialEq + fmt::Debug + Send + Sync + 'static {}

/// Identity of a token-issuing source (one per request manager).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourceId(pub u64);

static NEXT_SOURCE_ID: AtomicU64 = AtomicU64::new(1);

impl SourceId {
    /// Allocate a process-unique source identity.
    pub fn next() -> Self {
        SourceId(NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Debug for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SourceId({})", self.0)
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a source context.
///
/// `ContextId(0)` is reserved for detached contexts.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct ContextId(pub u32);

static NEXT_CONTEXT_ID: AtomicU32 = AtomicU32::new(1);

impl ContextId {
    /// The id carried by detached contexts.
    pub const DETACHED: ContextId = ContextId(0);

    pub(crate) fn next() -> Self {
        ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Debug for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ctx({})", self.0)
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Three-state view of the Data axis.
///
/// `Undefined` means no data has been produced yet (the axis is unset),
/// which is distinct from `Empty` (a producer explicitly reported "no value").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum DataValue<T> {
    #[default]
    Undefined,
    Empty,
    Value(T),
}

impl<T> DataValue<T> {
    pub fn is_undefined(&self) -> bool {
        matches!(self, DataValue::Undefined)
    }

    pub fn is_value(&self) -> bool {
        matches!(self, DataValue::Value(_))
    }

    pub fn as_ref(&self) -> DataValue<&T> {
        match self {
            DataValue::Undefined => DataValue::Undefined,
            DataValue::Empty => DataValue::Empty,
            DataValue::Value(v) => DataValue::Value(v),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> DataValue<U> {
        match self {
            DataValue::Undefined => DataValue::Undefined,
            DataValue::Empty => DataValue::Empty,
            DataValue::Value(v) => DataValue::Value(f(v)),
        }
    }

    /// Collapse to an `Option`, folding `Undefined` into `None`.
    pub fn into_option(self) -> Option<T> {
        match self {
            DataValue::Value(v) => Some(v),
            _ => None,
        }
    }
}

impl<T: Clone> DataValue<&T> {
    pub fn cloned(self) -> DataValue<T> {
        self.map(Clone::clone)
    }
}

impl<T> From<Option<T>> for DataValue<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => DataValue::Value(v),
            None => DataValue::Empty,
        }
    }
}

/// Selected item indices, kept as sorted, non-overlapping ranges.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SelectionInfo {
    ranges: Vec<Range<u32>>,
}

impl SelectionInfo {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn single(index: u32) -> Self {
        Self {
            ranges: vec![index..index.saturating_add(1)],
        }
    }

    /// Build from arbitrary ranges; empty ranges are dropped and the rest merged.
    pub fn from_ranges(ranges: impl IntoIterator<Item = Range<u32>>) -> Self {
        let mut ranges: Vec<Range<u32>> = ranges.into_iter().filter(|r| r.start < r.end).collect();
        ranges.sort_by_key(|r| r.start);

        let mut merged: Vec<Range<u32>> = Vec::with_capacity(ranges.len());
        for range in ranges {
            match merged.last_mut() {
                Some(last) if range.start <= last.end => last.end = last.end.max(range.end),
                _ => merged.push(range),
            }
        }

        Self { ranges: merged }
    }

    pub fn union(&self, other: &SelectionInfo) -> Self {
        Self::from_ranges(self.ranges.iter().chain(other.ranges.iter()).cloned())
    }

    pub fn ranges(&self) -> &[Range<u32>] {
        &self.ranges
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn contains(&self, index: u32) -> bool {
        self.ranges.iter().any(|r| r.contains(&index))
    }

    pub fn len(&self) -> usize {
        self.ranges.iter().map(|r| (r.end - r.start) as usize).sum()
    }

    pub fn indices(&self) -> impl Iterator<Item = u32> + '_ {
        self.ranges.iter().flat_map(|r| r.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_ids_are_unique() {
        let a = SourceId::next();
        let b = SourceId::next();
        assert_ne!(a, b);
    }

    #[test]
    fn test_data_value_from_option() {
        assert_eq!(DataValue::from(Some(3)), DataValue::Value(3));
        assert_eq!(DataValue::<i32>::from(None), DataValue::Empty);
        assert!(DataValue::<i32>::default().is_undefined());
        assert_eq!(DataValue::Value(2).map(|v| v * 2).into_option(), Some(4));
    }

    #[test]
    fn test_selection_merges_overlapping_ranges() {
        let selection = SelectionInfo::from_ranges(vec![5..8, 0..2, 1..3, 8..9, 4..4]);
        assert_eq!(selection.ranges(), &[0..3, 5..9]);
        assert_eq!(selection.len(), 7);
        assert!(selection.contains(6));
        assert!(!selection.contains(3));
    }

    #[test]
    fn test_selection_union() {
        let a = SelectionInfo::single(1);
        let b = SelectionInfo::from_ranges(vec![2..4]);
        let union = a.union(&b);
        assert_eq!(union.indices().collect::<Vec<_>>(), vec![1, 2, 3]);
    }
}
