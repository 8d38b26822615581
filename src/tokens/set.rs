//! Reduced token sets and their partial order.

use super::token::{Token, TokenGroup};
use std::fmt;

/// A set of tokens holding at most one token per `(source, root context)`
/// group: the one with the highest sequence id.
///
/// Tokens are kept sorted by group so comparisons are a single merge walk.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct TokenSet<K: Token> {
    tokens: Vec<K>,
}

impl<K: Token> TokenSet<K> {
    pub fn empty() -> Self {
        Self { tokens: Vec::new() }
    }

    /// Build a reduced set from arbitrary tokens.
    pub fn new(tokens: impl IntoIterator<Item = K>) -> Self {
        let mut tokens: Vec<K> = tokens.into_iter().collect();
        tokens.sort_by(|a, b| {
            a.group()
                .cmp(&b.group())
                .then(b.sequence_id().cmp(&a.sequence_id()))
        });
        tokens.dedup_by(|next, kept| next.group() == kept.group());
        Self { tokens }
    }

    pub fn tokens(&self) -> &[K] {
        &self.tokens
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn get(&self, group: TokenGroup) -> Option<K> {
        self.tokens
            .binary_search_by(|t| t.group().cmp(&group))
            .ok()
            .map(|i| self.tokens[i])
    }

    /// Union of both sets, keeping the highest sequence per group.
    pub fn merge(&self, other: &TokenSet<K>) -> TokenSet<K> {
        if other.is_empty() {
            return self.clone();
        }
        if self.is_empty() {
            return other.clone();
        }
        Self::new(self.tokens.iter().chain(other.tokens.iter()).copied())
    }

    pub fn merge_all<'a>(sets: impl IntoIterator<Item = &'a TokenSet<K>>) -> TokenSet<K> {
        Self::new(sets.into_iter().flat_map(|s| s.tokens.iter().copied()))
    }

    /// Every group of `self` has a counterpart in `other` and the sequence
    /// ids satisfy `relation(self_seq, other_seq)`.
    fn all_groups_satisfy(&self, other: &TokenSet<K>, relation: impl Fn(u32, u32) -> bool) -> bool {
        self.tokens.iter().all(|mine| match other.get(mine.group()) {
            Some(theirs) => relation(mine.sequence_id(), theirs.sequence_id()),
            None => false,
        })
    }

    /// Component-wise `>=` over the groups of `self`.
    ///
    /// A group of `self` missing from `other` makes this false. An empty set
    /// is only greater or equal to another empty set, and every set is
    /// greater or equal to the empty set.
    pub fn is_greater_or_equals(&self, other: &TokenSet<K>) -> bool {
        if self.is_empty() {
            return other.is_empty();
        }
        if other.is_empty() {
            return true;
        }
        self.all_groups_satisfy(other, |mine, theirs| mine >= theirs)
    }

    /// Component-wise `<` over the groups of `self`. The empty set is lower
    /// than any non-empty set.
    pub fn is_lower(&self, other: &TokenSet<K>) -> bool {
        if self.is_empty() {
            return !other.is_empty();
        }
        if other.is_empty() {
            return false;
        }
        self.all_groups_satisfy(other, |mine, theirs| mine < theirs)
    }

    /// Component-wise `<=` over the groups of `self`.
    pub fn is_lower_or_equals(&self, other: &TokenSet<K>) -> bool {
        if self.is_empty() {
            return true;
        }
        if other.is_empty() {
            return false;
        }
        self.all_groups_satisfy(other, |mine, theirs| mine <= theirs)
    }
}

impl<K: Token> Default for TokenSet<K> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<K: Token> From<K> for TokenSet<K> {
    fn from(token: K) -> Self {
        Self {
            tokens: vec![token],
        }
    }
}

impl<K: Token> FromIterator<K> for TokenSet<K> {
    fn from_iter<I: IntoIterator<Item = K>>(iter: I) -> Self {
        Self::new(iter)
    }
}

impl<K: Token> fmt::Debug for TokenSet<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.tokens.iter()).finish()
    }
}
