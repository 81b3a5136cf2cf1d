//! # Topic bus.
//!
//! - [`EventBus`] - topic-keyed bus of buffered per-subscriber channels
//! - [`Subscription`] - read side of one channel (also a [`futures::Stream`])
//! - [`TopicInfo`] - per-topic occupancy snapshot

mod bus;
mod subscription;
mod topics;

pub use bus::EventBus;
pub use subscription::Subscription;
pub use topics::TopicInfo;
