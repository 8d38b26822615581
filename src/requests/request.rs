//! Requests issued by consumers of a context.

use crate::tokens::{PageToken, RefreshToken, Token, TokenSet};
use parking_lot::Mutex;
use std::sync::Arc;

/// Ask the feeds of a context to reload.
#[derive(Debug, Default)]
pub struct RefreshRequest {
    tokens: Mutex<TokenSet<RefreshToken>>,
}

impl RefreshRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tokens registered by every manager that handled the request.
    pub fn tokens(&self) -> TokenSet<RefreshToken> {
        self.tokens.lock().clone()
    }
}

/// Ask paginated feeds of a context to load one more page.
#[derive(Debug, Default)]
pub struct PageRequest {
    desired_page_size: Option<u32>,
    tokens: Mutex<TokenSet<PageToken>>,
}

impl PageRequest {
    pub fn new(desired_page_size: Option<u32>) -> Self {
        Self {
            desired_page_size,
            tokens: Mutex::new(TokenSet::empty()),
        }
    }

    pub fn desired_page_size(&self) -> Option<u32> {
        self.desired_page_size
    }

    pub fn tokens(&self) -> TokenSet<PageToken> {
        self.tokens.lock().clone()
    }
}

/// A request travelling through a `RequestSource`.
#[derive(Clone, Debug)]
pub enum ContextRequest {
    Refresh(Arc<RefreshRequest>),
    Page(Arc<PageRequest>),
}

/// A request kind handled by a request manager.
pub trait TokenRequest: Send + Sync + 'static {
    type Token: Token;

    /// Called when a manager mints a token for this request.
    fn register(&self, token: Self::Token);

    fn from_context_request(request: &ContextRequest) -> Option<Arc<Self>>;
}

impl TokenRequest for RefreshRequest {
    type Token = RefreshToken;

    fn register(&self, token: RefreshToken) {
        let mut tokens = self.tokens.lock();
        *tokens = tokens.merge(&TokenSet::from(token));
    }

    fn from_context_request(request: &ContextRequest) -> Option<Arc<Self>> {
        match request {
            ContextRequest::Refresh(r) => Some(Arc::clone(r)),
            ContextRequest::Page(_) => None,
        }
    }
}

impl TokenRequest for PageRequest {
    type Token = PageToken;

    fn register(&self, token: PageToken) {
        let mut tokens = self.tokens.lock();
        *tokens = tokens.merge(&TokenSet::from(token));
    }

    fn from_context_request(request: &ContextRequest) -> Option<Arc<Self>> {
        match request {
            ContextRequest::Page(r) => Some(Arc::clone(r)),
            ContextRequest::Refresh(_) => None,
        }
    }
}
