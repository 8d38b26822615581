//! Consumer requests and the managers that coalesce them into tokens.
//!
//! A consumer sends a `ContextRequest` through the `RequestSource` of its
//! context. Every request manager listening on that context (or on an
//! ancestor) registers the token it will satisfy on the request, so the
//! consumer can later wait for a message carrying that token.

mod manager;
mod request;
mod sequence;
mod source;

pub use manager::{CoercingRequestManager, RequestManager, SequentialRequestManager};
pub use request::{ContextRequest, PageRequest, RefreshRequest, TokenRequest};
pub use sequence::{SequenceCell, SequenceState};
pub use source::{RequestSource, RequestSubscription};
