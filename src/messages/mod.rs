//! Messages and the transactional message manager.
//!
//! A `Message` pairs the previous and current `MessageEntry` of a stream with
//! the set of axes that changed between them. Messages are immutable and
//! derived through a `MessageBuilder`, either directly (`Message::with`) or
//! through a `MessageManager` that merges a parent stream with local updates.

mod builder;
mod entry;
mod manager;
mod message;

pub use builder::MessageBuilder;
pub use entry::MessageEntry;
pub use manager::{CurrentMessage, MessageManager, UpdateTransaction};
pub use message::Message;
