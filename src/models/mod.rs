//! Data models for the tuner-relay engine

pub mod channel;
pub mod relay;

pub use channel::*;
pub use relay::*;
