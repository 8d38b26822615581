//! Mutable feeds backed by a message manager.
//!
//! A `State` publishes the messages of its manager through a replay buffer,
//! so it can be subscribed like any feed. List states also accept
//! `ListOperation`s.

mod feed_state;
mod operations;

pub use feed_state::State;
pub use operations::{apply_operation, ListOperation};
