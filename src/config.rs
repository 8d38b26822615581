//! Engine configuration.

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Page size used when neither the request nor the feed specify one.
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// What happens when a feed is used through a detached context.
///
/// A detached context never caches or shares subscriptions: every request
/// re-subscribes from scratch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetachedContextPolicy {
    /// Allow without logging.
    Silent,
    /// Allow and log a warning.
    #[default]
    Warn,
    /// Fail with `FeedError::DetachedContext`.
    Reject,
}

/// Engine configuration, shared by a root context and all its children.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Policy for detached contexts.
    /// Default: Warn
    pub detached_context: DetachedContextPolicy,

    /// Whether async feeds load as soon as they are subscribed
    /// (the initial request token is published without a request).
    /// Default: true
    pub auto_publish_initial_request: bool,

    /// Page size for paginated feeds when none is requested.
    /// Default: None (falls back to `DEFAULT_PAGE_SIZE`)
    pub default_page_size: Option<u32>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            detached_context: DetachedContextPolicy::default(),
            auto_publish_initial_request: true,
            default_page_size: None,
        }
    }
}

impl EngineConfig {
    /// Parse from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn page_size(&self) -> u32 {
        self.default_page_size.unwrap_or(DEFAULT_PAGE_SIZE).max(1)
    }
}
