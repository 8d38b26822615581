//! Source contexts: owner-scoped caches of subscriptions and states.

mod cache;
mod source_context;

pub(crate) use cache::CachedChild;
pub use source_context::{SourceContext, WeakSourceContext};
