//! Replay-one fan-out of a feed's messages.

mod feed_subscription;
mod replay;

pub use feed_subscription::FeedSubscription;
pub use replay::ReplayBuffer;
