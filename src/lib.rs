//! # Tributary
//!
//! A reactive message-propagation engine. Feeds publish streams of
//! immutable, multi-axis messages; derived feeds inherit their parent's
//! axes while overriding some of them locally.
//!
//! ## Core Concepts
//!
//! - **Axes**: Typed metadata channels (data, error, progress, refresh,
//!   pagination, selection) with their own combine rules
//! - **Messages**: Previous/current snapshot pairs with the set of changed axes
//! - **Managers**: Serialize updates of a derived stream, with transactions
//! - **Contexts**: Owner-scoped caches sharing one subscription per feed
//! - **Tokens**: Causal markers tying a request to the message answering it
//!
//! ## Example
//!
//! ```ignore
//! use tributary::{AsyncFeed, EngineConfig, SourceContext};
//! use tokio_util::sync::CancellationToken;
//!
//! let context = SourceContext::new_root("screen", EngineConfig::default());
//! let feed = AsyncFeed::new(|_ct| async { Ok(Some(42)) });
//!
//! // One enumeration of the feed, shared by every consumer in the context
//! let subscription = context.get_or_create_subscription(&feed)?;
//! let mut messages = subscription.get_messages(CancellationToken::new())?;
//!
//! // Reload and wait for the message carrying the refresh
//! let tokens = context.request_refresh()?;
//! subscription.refreshed(tokens, &CancellationToken::new()).await?;
//! ```

pub mod axes;
pub mod config;
pub mod context;
pub mod error;
pub mod feeds;
pub mod messages;
pub mod requests;
pub mod state;
pub mod subscription;
pub mod tokens;
pub mod types;

// Re-exports
pub use axes::{AxisPayload, AxisSet, MessageAxis, MessageAxisUpdate, MessageAxisValue};
pub use config::{DetachedContextPolicy, EngineConfig, DEFAULT_PAGE_SIZE};
pub use context::{SourceContext, WeakSourceContext};
pub use error::{FeedError, FeedFault, Result, SharedError};
pub use feeds::{AsyncFeed, Feed, FeedExt, FilterFeed, MessageStream, PageInfo, PaginatedFeed, SelectFeed};
pub use messages::{CurrentMessage, Message, MessageBuilder, MessageEntry, MessageManager, UpdateTransaction};
pub use requests::{
    CoercingRequestManager, ContextRequest, PageRequest, RefreshRequest, RequestManager, RequestSource,
    RequestSubscription, SequentialRequestManager, TokenRequest,
};
pub use state::{apply_operation, ListOperation, State};
pub use subscription::{FeedSubscription, ReplayBuffer};
pub use tokens::{PageToken, RefreshToken, Token, TokenGroup, TokenSet, TokenSetAwaiter, TokenWait, WaitOutcome};
pub use types::*;
