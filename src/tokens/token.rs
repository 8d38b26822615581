//! Request tokens.

use crate::types::{ContextId, SourceId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;

/// A `(source, root context)` pair. Tokens of one group are totally ordered
/// by their sequence id.
pub type TokenGroup = (SourceId, ContextId);

/// One causal generation of a request issued by a source.
pub trait Token: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static {
    fn new(source: SourceId, root_context_id: ContextId, sequence_id: u32) -> Self;

    fn source(&self) -> SourceId;

    fn root_context_id(&self) -> ContextId;

    fn sequence_id(&self) -> u32;

    fn group(&self) -> TokenGroup {
        (self.source(), self.root_context_id())
    }

    /// The token a source starts from, before any request.
    fn initial(source: SourceId, root_context_id: ContextId) -> Self {
        Self::new(source, root_context_id, 0)
    }

    /// The next token of the same group. Saturates at `u32::MAX`.
    fn next(&self) -> Self {
        Self::new(
            self.source(),
            self.root_context_id(),
            self.sequence_id().saturating_add(1),
        )
    }
}

macro_rules! define_token {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name {
            source: SourceId,
            root_context_id: ContextId,
            sequence_id: u32,
        }

        impl Token for $name {
            fn new(source: SourceId, root_context_id: ContextId, sequence_id: u32) -> Self {
                Self {
                    source,
                    root_context_id,
                    sequence_id,
                }
            }

            fn source(&self) -> SourceId {
                self.source
            }

            fn root_context_id(&self) -> ContextId {
                self.root_context_id
            }

            fn sequence_id(&self) -> u32 {
                self.sequence_id
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(
                    f,
                    concat!($label, "({}:{}#{})"),
                    self.source, self.root_context_id, self.sequence_id
                )
            }
        }
    };
}

define_token!(
    /// Token minted for a refresh request.
    RefreshToken,
    "Refresh"
);

define_token!(
    /// Token minted for a page request.
    PageToken,
    "Page"
);
