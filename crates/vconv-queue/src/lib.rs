//! Queue gateway for conversion tasks and confirmations.
//!
//! This crate provides:
//! - The `QueueGateway` trait (publish, consume, reclaim, settle)
//! - A Redis Streams implementation with consumer groups and dead-letter streams
//! - An in-memory implementation for tests

pub mod binding;
pub mod error;
pub mod gateway;
pub mod memory;
pub mod streams;

pub use binding::{QueueBinding, QueueConfig};
pub use error::{QueueError, QueueResult};
pub use gateway::{Delivery, QueueGateway};
pub use memory::MemoryGateway;
pub use streams::RedisGateway;
