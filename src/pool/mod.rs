//! Multi-broker connection pool
//!
//! - [`registry`] - dials brokers once and owns their connections/channels
//! - [`selector`] - adaptive, feedback-driven choice among registered brokers

pub mod registry;
pub mod selector;

pub use registry::{BrokerSession, ConnectionRegistry};
pub use selector::{HostSelector, HostStats};
