//! Waiting for a token set to be observed.

use super::set::TokenSet;
use super::token::Token;
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// How a wait completed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    /// A received token set reached the awaited one.
    Observed,
    /// The awaiter was disposed first.
    Disposed,
}

struct Waiter<K: Token> {
    tokens: TokenSet<K>,
    done: oneshot::Sender<WaitOutcome>,
}

struct AwaiterState<K: Token> {
    last: TokenSet<K>,
    waiters: Vec<Waiter<K>>,
    disposed: bool,
}

/// Completes waits once a received token set is greater or equal to the
/// awaited one.
///
/// Each wait completes at most once. Disposal completes every outstanding
/// wait with `WaitOutcome::Disposed`.
pub struct TokenSetAwaiter<K: Token> {
    state: Mutex<AwaiterState<K>>,
}

impl<K: Token> TokenSetAwaiter<K> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(AwaiterState {
                last: TokenSet::empty(),
                waiters: Vec::new(),
                disposed: false,
            }),
        }
    }

    /// Wait until `tokens` have been observed.
    pub fn wait(&self, tokens: TokenSet<K>) -> TokenWait {
        let (tx, rx) = oneshot::channel();
        let mut state = self.state.lock();

        if state.disposed {
            let _ = tx.send(WaitOutcome::Disposed);
        } else if tokens.is_empty() || state.last.is_greater_or_equals(&tokens) {
            let _ = tx.send(WaitOutcome::Observed);
        } else {
            state.waiters.push(Waiter { tokens, done: tx });
        }

        TokenWait { rx }
    }

    /// Record a received token set and release every satisfied wait.
    pub fn received(&self, tokens: &TokenSet<K>) {
        if tokens.is_empty() {
            return;
        }

        let mut state = self.state.lock();
        if state.disposed {
            return;
        }

        state.last = tokens.clone();
        let (ready, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut state.waiters)
            .into_iter()
            .partition(|w| tokens.is_greater_or_equals(&w.tokens));
        state.waiters = pending;
        drop(state);

        for waiter in ready {
            let _ = waiter.done.send(WaitOutcome::Observed);
        }
    }

    pub fn pending(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Complete every outstanding wait. Idempotent.
    pub fn dispose(&self) {
        let waiters = {
            let mut state = self.state.lock();
            state.disposed = true;
            std::mem::take(&mut state.waiters)
        };

        for waiter in waiters {
            let _ = waiter.done.send(WaitOutcome::Disposed);
        }
    }
}

impl<K: Token> Default for TokenSetAwaiter<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Token> Drop for TokenSetAwaiter<K> {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Future returned by `TokenSetAwaiter::wait`.
pub struct TokenWait {
    rx: oneshot::Receiver<WaitOutcome>,
}

impl Future for TokenWait {
    type Output = WaitOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.unwrap_or(WaitOutcome::Disposed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::RefreshToken;
    use crate::types::{ContextId, SourceId};
    use std::time::Duration;

    fn token(source: u64, seq: u32) -> RefreshToken {
        RefreshToken::new(SourceId(source), ContextId(1), seq)
    }

    #[tokio::test]
    async fn test_completes_when_observed() {
        let awaiter = TokenSetAwaiter::new();
        let wait = awaiter.wait(TokenSet::from(token(1, 2)));
        assert_eq!(awaiter.pending(), 1);

        awaiter.received(&TokenSet::from(token(1, 1)));
        assert_eq!(awaiter.pending(), 1);

        awaiter.received(&TokenSet::from(token(1, 3)));
        assert_eq!(awaiter.pending(), 0);

        let outcome = tokio::time::timeout(Duration::from_secs(1), wait).await.unwrap();
        assert_eq!(outcome, WaitOutcome::Observed);
    }

    #[tokio::test]
    async fn test_already_observed_completes_immediately() {
        let awaiter = TokenSetAwaiter::new();
        awaiter.received(&TokenSet::from(token(1, 4)));

        assert_eq!(awaiter.wait(TokenSet::from(token(1, 4))).await, WaitOutcome::Observed);
        assert_eq!(awaiter.wait(TokenSet::empty()).await, WaitOutcome::Observed);
    }

    #[tokio::test]
    async fn test_groups_of_other_sources_are_ignored() {
        let awaiter = TokenSetAwaiter::new();
        let wait = awaiter.wait(TokenSet::new([token(1, 1), token(2, 1)]));

        awaiter.received(&TokenSet::from(token(1, 1)));
        let outcome = tokio::time::timeout(Duration::from_secs(1), wait).await.unwrap();
        assert_eq!(outcome, WaitOutcome::Observed);
    }

    #[tokio::test]
    async fn test_dispose_releases_waits() {
        let awaiter = TokenSetAwaiter::new();
        let wait = awaiter.wait(TokenSet::from(token(1, 9)));

        awaiter.dispose();
        assert_eq!(wait.await, WaitOutcome::Disposed);

        // Waits after disposal complete right away
        assert_eq!(awaiter.wait(TokenSet::from(token(1, 1))).await, WaitOutcome::Disposed);
    }

    #[tokio::test]
    async fn test_drop_releases_waits() {
        let awaiter = TokenSetAwaiter::new();
        let wait = awaiter.wait(TokenSet::from(token(2, 1)));
        drop(awaiter);
        assert_eq!(wait.await, WaitOutcome::Disposed);
    }
}
