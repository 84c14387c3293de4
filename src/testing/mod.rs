//! Testing utilities and mock implementations
//!
//! Provides a scripted in-memory broker so the registry, selector and
//! publisher can be exercised without a running RabbitMQ.

pub mod mocks;

pub use mocks::*;
