//! Wire types for the shard transport and REST payloads.

pub mod frame;

pub use frame::{
    destinations, now_millis, peer_of, topics, ChatMessage, Frame, PostMessage, PushEvent, User,
};
