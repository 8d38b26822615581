//! Axis values and the per-axis combine rules.

use super::axis::MessageAxis;
use crate::error::FeedFault;
use crate::tokens::{PageToken, RefreshToken, TokenSet};
use crate::types::SelectionInfo;

/// Typed payload of an axis. Each variant belongs to exactly one axis.
#[derive(Clone, Debug, PartialEq)]
pub enum AxisPayload<T> {
    /// `None` is an explicit "no value", distinct from the axis being unset.
    Data(Option<T>),
    Error(FeedFault),
    Progress(bool),
    Refresh(TokenSet<RefreshToken>),
    Pagination(TokenSet<PageToken>),
    Selection(SelectionInfo),
}

impl<T> AxisPayload<T> {
    pub fn axis(&self) -> MessageAxis {
        match self {
            AxisPayload::Data(_) => MessageAxis::Data,
            AxisPayload::Error(_) => MessageAxis::Error,
            AxisPayload::Progress(_) => MessageAxis::Progress,
            AxisPayload::Refresh(_) => MessageAxis::Refresh,
            AxisPayload::Pagination(_) => MessageAxis::Pagination,
            AxisPayload::Selection(_) => MessageAxis::Selection,
        }
    }

    /// Re-type a metadata payload for a message with another data type.
    /// Data payloads cannot cross types and yield `None`.
    pub fn cast<U>(&self) -> Option<AxisPayload<U>> {
        Some(match self {
            AxisPayload::Data(_) => return None,
            AxisPayload::Error(e) => AxisPayload::Error(e.clone()),
            AxisPayload::Progress(p) => AxisPayload::Progress(*p),
            AxisPayload::Refresh(t) => AxisPayload::Refresh(t.clone()),
            AxisPayload::Pagination(t) => AxisPayload::Pagination(t.clone()),
            AxisPayload::Selection(s) => AxisPayload::Selection(s.clone()),
        })
    }
}

/// Optional box for an axis value. `Unset` means "no opinion".
#[derive(Clone, Debug, PartialEq, Default)]
pub enum MessageAxisValue<T> {
    #[default]
    Unset,
    Set(AxisPayload<T>),
}

impl<T> MessageAxisValue<T> {
    pub fn is_set(&self) -> bool {
        matches!(self, MessageAxisValue::Set(_))
    }

    pub fn payload(&self) -> Option<&AxisPayload<T>> {
        match self {
            MessageAxisValue::Set(p) => Some(p),
            MessageAxisValue::Unset => None,
        }
    }

    pub fn cast<U>(&self) -> MessageAxisValue<U> {
        match self.payload().and_then(AxisPayload::cast) {
            Some(p) => MessageAxisValue::Set(p),
            None => MessageAxisValue::Unset,
        }
    }
}

impl<T> From<AxisPayload<T>> for MessageAxisValue<T> {
    fn from(payload: AxisPayload<T>) -> Self {
        MessageAxisValue::Set(payload)
    }
}

/// A pending change to one axis.
///
/// With `is_override` the value replaces whatever the parent provides;
/// otherwise it is combined with the parent's value via `local_value`.
#[derive(Clone, Debug, PartialEq)]
pub struct MessageAxisUpdate<T> {
    pub axis: MessageAxis,
    pub value: MessageAxisValue<T>,
    pub is_override: bool,
}

impl<T> MessageAxisUpdate<T> {
    pub fn replace(axis: MessageAxis, value: MessageAxisValue<T>) -> Self {
        Self {
            axis,
            value,
            is_override: true,
        }
    }

    pub fn combine(axis: MessageAxis, value: MessageAxisValue<T>) -> Self {
        Self {
            axis,
            value,
            is_override: false,
        }
    }
}

impl MessageAxis {
    /// Check that a value may be stored on this axis.
    pub fn accepts<T>(self, value: &MessageAxisValue<T>) -> bool {
        value.payload().map_or(true, |p| p.axis() == self)
    }

    /// Combine concurrent values of this axis.
    ///
    /// No set value gives `Unset`, one gives itself, several are combined:
    /// the last data wins, errors are flattened, progress is or-ed, token
    /// sets keep the highest sequence per group, selections are unioned.
    /// Values that belong to another axis are ignored.
    pub fn aggregate<T: Clone>(
        self,
        values: impl IntoIterator<Item = MessageAxisValue<T>>,
    ) -> MessageAxisValue<T> {
        let mut payloads: Vec<AxisPayload<T>> = values
            .into_iter()
            .filter_map(|v| match v {
                MessageAxisValue::Set(p) if p.axis() == self => Some(p),
                _ => None,
            })
            .collect();

        match payloads.len() {
            0 => return MessageAxisValue::Unset,
            1 => return MessageAxisValue::Set(payloads.remove(0)),
            _ => {}
        }

        let combined = match self {
            MessageAxis::Data => match payloads.pop() {
                Some(last) => last,
                None => return MessageAxisValue::Unset,
            },
            MessageAxis::Error => {
                let faults = payloads.into_iter().filter_map(|p| match p {
                    AxisPayload::Error(f) => Some(f),
                    _ => None,
                });
                match FeedFault::aggregate(faults) {
                    Some(fault) => AxisPayload::Error(fault),
                    None => return MessageAxisValue::Unset,
                }
            }
            MessageAxis::Progress => AxisPayload::Progress(
                payloads
                    .iter()
                    .any(|p| matches!(p, AxisPayload::Progress(true))),
            ),
            MessageAxis::Refresh => AxisPayload::Refresh(TokenSet::merge_all(
                payloads.iter().filter_map(|p| match p {
                    AxisPayload::Refresh(t) => Some(t),
                    _ => None,
                }),
            )),
            MessageAxis::Pagination => AxisPayload::Pagination(TokenSet::merge_all(
                payloads.iter().filter_map(|p| match p {
                    AxisPayload::Pagination(t) => Some(t),
                    _ => None,
                }),
            )),
            MessageAxis::Selection => AxisPayload::Selection(
                payloads
                    .iter()
                    .filter_map(|p| match p {
                        AxisPayload::Selection(s) => Some(s),
                        _ => None,
                    })
                    .fold(SelectionInfo::empty(), |acc, s| acc.union(s)),
            ),
        };

        MessageAxisValue::Set(combined)
    }

    /// Equality of two values of this axis.
    pub fn are_equal<T: PartialEq>(self, a: &MessageAxisValue<T>, b: &MessageAxisValue<T>) -> bool {
        match (a, b) {
            (MessageAxisValue::Unset, MessageAxisValue::Unset) => true,
            (MessageAxisValue::Set(a), MessageAxisValue::Set(b)) => {
                a.axis() == self && b.axis() == self && a == b
            }
            _ => false,
        }
    }

    /// Value of this axis for a derived message, given the parent's value
    /// and an optional local update.
    ///
    /// No update inherits the parent. An override replaces it. Otherwise an
    /// unset side yields the other side and two set values are aggregated.
    pub fn local_value<T: Clone>(
        self,
        parent: &MessageAxisValue<T>,
        update: Option<&MessageAxisUpdate<T>>,
    ) -> MessageAxisValue<T> {
        match update {
            None => parent.clone(),
            Some(u) if u.is_override => u.value.clone(),
            Some(u) => match (parent, &u.value) {
                (MessageAxisValue::Unset, local) => local.clone(),
                (parent, MessageAxisValue::Unset) => parent.clone(),
                (parent, local) => self.aggregate([parent.clone(), local.clone()]),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::Token;
    use crate::types::{ContextId, SourceId};

    fn progress(value: bool) -> MessageAxisValue<i32> {
        AxisPayload::Progress(value).into()
    }

    #[test]
    fn test_aggregate_counts() {
        let none: Vec<MessageAxisValue<i32>> = vec![];
        assert_eq!(MessageAxis::Progress.aggregate(none), MessageAxisValue::Unset);
        assert_eq!(
            MessageAxis::Progress.aggregate(vec![MessageAxisValue::Unset, progress(false)]),
            progress(false)
        );
        assert_eq!(
            MessageAxis::Progress.aggregate(vec![progress(false), progress(true)]),
            progress(true)
        );
    }

    #[test]
    fn test_aggregate_errors_flatten() {
        let a = FeedFault::msg("a");
        let b = FeedFault::msg("b");
        let c = FeedFault::msg("c");
        let ab: MessageAxisValue<i32> =
            AxisPayload::Error(FeedFault::aggregate(vec![a, b]).unwrap()).into();

        let combined = MessageAxis::Error.aggregate(vec![ab, AxisPayload::Error(c).into()]);
        match combined {
            MessageAxisValue::Set(AxisPayload::Error(fault)) => assert_eq!(fault.errors().len(), 3),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_aggregate_tokens_keep_highest() {
        let source = SourceId::next();
        let root = ContextId(7);
        let low: MessageAxisValue<i32> =
            AxisPayload::Refresh(TokenSet::from(RefreshToken::new(source, root, 1))).into();
        let high: MessageAxisValue<i32> =
            AxisPayload::Refresh(TokenSet::from(RefreshToken::new(source, root, 4))).into();

        match MessageAxis::Refresh.aggregate(vec![high, low]) {
            MessageAxisValue::Set(AxisPayload::Refresh(set)) => {
                assert_eq!(set.tokens(), &[RefreshToken::new(source, root, 4)]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_aggregate_ignores_foreign_payloads() {
        let data: MessageAxisValue<i32> = AxisPayload::Data(Some(1)).into();
        assert_eq!(
            MessageAxis::Progress.aggregate(vec![data, progress(true)]),
            progress(true)
        );
    }

    #[test]
    fn test_local_value_rules() {
        let parent = progress(true);
        let unset = MessageAxisValue::<i32>::Unset;

        // No update inherits
        assert_eq!(MessageAxis::Progress.local_value(&parent, None), parent);

        // Override replaces, even with unset
        let clear = MessageAxisUpdate::replace(MessageAxis::Progress, MessageAxisValue::Unset);
        assert_eq!(MessageAxis::Progress.local_value(&parent, Some(&clear)), unset);

        // Combine: unset parent takes local
        let local = MessageAxisUpdate::combine(MessageAxis::Progress, progress(false));
        assert_eq!(MessageAxis::Progress.local_value(&unset, Some(&local)), progress(false));

        // Combine: unset local takes parent
        let empty = MessageAxisUpdate::combine(MessageAxis::Progress, MessageAxisValue::Unset);
        assert_eq!(MessageAxis::Progress.local_value(&parent, Some(&empty)), parent);

        // Combine: both set aggregate
        assert_eq!(MessageAxis::Progress.local_value(&parent, Some(&local)), progress(true));
    }

    #[test]
    fn test_are_equal() {
        let a: MessageAxisValue<i32> = AxisPayload::Data(Some(1)).into();
        let b: MessageAxisValue<i32> = AxisPayload::Data(Some(1)).into();
        let none: MessageAxisValue<i32> = AxisPayload::Data(None).into();

        assert!(MessageAxis::Data.are_equal(&a, &b));
        assert!(!MessageAxis::Data.are_equal(&a, &none));
        assert!(!MessageAxis::Data.are_equal(&none, &MessageAxisValue::Unset));
        assert!(MessageAxis::Data.are_equal(
            &MessageAxisValue::<i32>::Unset,
            &MessageAxisValue::Unset
        ));
    }

    #[test]
    fn test_cast_drops_data() {
        let data: MessageAxisValue<i32> = AxisPayload::Data(Some(1)).into();
        assert_eq!(data.cast::<String>(), MessageAxisValue::Unset);
        assert_eq!(
            progress(true).cast::<String>(),
            MessageAxisValue::Set(AxisPayload::Progress(true))
        );
    }
}
