//! Queue provider implementations.
//!
//! This module contains concrete implementations of the `QueueClient` and
//! `QueueAdministration` traits for different queueing media.

pub mod memory;

pub use memory::{InMemoryProvider, MAX_DELIVERY_COUNT_EXCEEDED};
