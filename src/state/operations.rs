//! Operations on list states.

use crate::error::{FeedError, Result};
use std::ops::Range;

/// An edit of a list value.
#[derive(Clone, Debug, PartialEq)]
pub enum ListOperation<T> {
    /// Replace the whole list.
    Set(Vec<T>),
    Append(T),
    Extend(Vec<T>),
    /// Remove the items in `start..end` (clamped to the list).
    Redact { start: usize, end: usize },
    /// Replace the item at `index`.
    Edit { index: usize, value: T },
}

impl<T> ListOperation<T> {
    pub fn redact(range: Range<usize>) -> Self {
        ListOperation::Redact {
            start: range.start,
            end: range.end,
        }
    }
}

/// Apply a list operation.
pub fn apply_operation<T>(mut items: Vec<T>, operation: ListOperation<T>) -> Result<Vec<T>> {
    match operation {
        ListOperation::Set(values) => Ok(values),

        ListOperation::Append(item) => {
            items.push(item);
            Ok(items)
        }

        ListOperation::Extend(values) => {
            items.extend(values);
            Ok(items)
        }

        ListOperation::Redact { start, end } => {
            let start = start.min(items.len());
            let end = end.min(items.len());
            if start < end {
                items.drain(start..end);
            }
            Ok(items)
        }

        ListOperation::Edit { index, value } => {
            let len = items.len();
            let slot = items
                .get_mut(index)
                .ok_or(FeedError::IndexOutOfBounds { index, len })?;
            *slot = value;
            Ok(items)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set() {
        let result = apply_operation(vec![1], ListOperation::Set(vec![7, 8])).unwrap();
        assert_eq!(result, vec![7, 8]);
    }

    #[test]
    fn test_append_and_extend() {
        let items = apply_operation(Vec::new(), ListOperation::Append(1)).unwrap();
        let items = apply_operation(items, ListOperation::Extend(vec![2, 3])).unwrap();
        assert_eq!(items, vec![1, 2, 3]);
    }

    #[test]
    fn test_redact_clamps() {
        let items = apply_operation(vec![1, 2, 3, 4, 5], ListOperation::redact(1..3)).unwrap();
        assert_eq!(items, vec![1, 4, 5]);

        let items = apply_operation(items, ListOperation::redact(2..99)).unwrap();
        assert_eq!(items, vec![1, 4]);
    }

    #[test]
    fn test_edit() {
        let items = apply_operation(vec!["a", "b", "c"], ListOperation::Edit { index: 1, value: "x" }).unwrap();
        assert_eq!(items, vec!["a", "x", "c"]);
    }

    #[test]
    fn test_edit_out_of_bounds() {
        let result = apply_operation(vec![1], ListOperation::Edit { index: 3, value: 0 });
        assert!(matches!(result, Err(FeedError::IndexOutOfBounds { index: 3, len: 1 })));
    }
}
