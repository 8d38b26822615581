//! Error types for the engine.
//!
//! Two families live here. `FeedError` reports protocol violations and
//! lifecycle misuse to the caller. `FeedFault` is the domain failure a feed
//! carries on its Error axis; it never crosses a stream boundary as an `Err`.

use crate::axes::MessageAxis;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Main error type for engine operations.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Source context '{owner}' has been disposed")]
    ContextDisposed { owner: String },

    #[error("Detached source context rejected by configuration ({operation})")]
    DetachedContext { operation: &'static str },

    #[error("Message builder is stale: built from version {built_from}, manager is at {current}")]
    StaleBuilder { built_from: u64, current: u64 },

    #[error("A {payload} payload cannot be written to the {axis} axis")]
    AxisMismatch {
        axis: MessageAxis,
        payload: MessageAxis,
    },

    #[error("Feed subscription has been disposed")]
    SubscriptionDisposed,

    #[error("No async runtime available to drive {0}")]
    NoRuntime(&'static str),

    #[error("Operation was cancelled")]
    Cancelled,

    #[error("Index {index} out of bounds (len {len})")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl From<serde_json::Error> for FeedError {
    fn from(e: serde_json::Error) -> Self {
        FeedError::Config(e.to_string())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, FeedError>;

/// A shareable domain error.
pub type SharedError = Arc<dyn StdError + Send + Sync + 'static>;

/// Domain failure carried on the Error axis.
///
/// Cheap to clone. Aggregating faults flattens them, so a fault never nests
/// another aggregate. Equality is identity of the underlying errors.
#[derive(Clone)]
pub struct FeedFault {
    errors: Arc<[SharedError]>,
}

#[derive(Debug, Error)]
#[error("{0}")]
struct FaultMessage(String);

impl FeedFault {
    pub fn new(error: impl StdError + Send + Sync + 'static) -> Self {
        Self::from_shared(Arc::new(error))
    }

    pub fn from_shared(error: SharedError) -> Self {
        Self {
            errors: Arc::from(vec![error]),
        }
    }

    /// Fault with a plain text message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new(FaultMessage(message.into()))
    }

    /// Combine faults, flattening any aggregates. Returns `None` for no input.
    pub fn aggregate(faults: impl IntoIterator<Item = FeedFault>) -> Option<FeedFault> {
        let mut faults = faults.into_iter().peekable();
        let first = faults.next()?;
        if faults.peek().is_none() {
            return Some(first);
        }

        let errors: Vec<SharedError> = std::iter::once(first)
            .chain(faults)
            .flat_map(|f| f.errors.iter().cloned().collect::<Vec<_>>())
            .collect();

        Some(Self {
            errors: Arc::from(errors),
        })
    }

    pub fn errors(&self) -> &[SharedError] {
        &self.errors
    }

    pub fn is_aggregate(&self) -> bool {
        self.errors.len() > 1
    }

    /// True when both faults wrap the very same error instances.
    pub fn same_as(&self, other: &FeedFault) -> bool {
        Arc::ptr_eq(&self.errors, &other.errors)
            || (self.errors.len() == other.errors.len()
                && self
                    .errors
                    .iter()
                    .zip(other.errors.iter())
                    .all(|(a, b)| Arc::ptr_eq(a, b)))
    }
}

impl PartialEq for FeedFault {
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other)
    }
}

impl fmt::Debug for FeedFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.errors.iter().map(|e| e.to_string()))
            .finish()
    }
}

impl fmt::Display for FeedFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.as_ref() {
            [single] => write!(f, "{}", single),
            errors => {
                write!(f, "{} errors occurred", errors.len())?;
                for (i, e) in errors.iter().enumerate() {
                    write!(f, "{} {}", if i == 0 { ":" } else { ";" }, e)?;
                }
                Ok(())
            }
        }
    }
}

impl StdError for FeedFault {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self.errors.as_ref() {
            [single] => Some(single.as_ref() as &(dyn StdError + 'static)),
            _ => None,
        }
    }
}
