//! Causal request tokens.
//!
//! A token identifies one generation of a request issued by a source inside
//! a root context. Token sets keep the latest token per `(source, root)`
//! group and form a component-wise partial order, used to decide whether a
//! received message already reflects a requested token.

mod awaiter;
mod set;
mod token;

pub use awaiter::{TokenSetAwaiter, TokenWait, WaitOutcome};
pub use set::TokenSet;
pub use token::{PageToken, RefreshToken, Token, TokenGroup};
