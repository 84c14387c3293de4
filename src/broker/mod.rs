//! Broker capability used by the publishing core
//!
//! The core never speaks AMQP directly. It dials through a [`Broker`],
//! opens channels on a [`BrokerConnection`] and publishes on a
//! [`BrokerChannel`]. [`amqp::LapinBroker`] is the production
//! implementation; `testing::mocks::MockBroker` scripts failures for tests.

use crate::config::ExchangeSpec;
use crate::error::redact_url;
use async_trait::async_trait;
use thiserror::Error;

pub mod amqp;

pub use amqp::LapinBroker;

/// Content type attached to every published message
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Errors raised by the broker capability
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Dial failed: {}", redact_url(&.0.to_string()))]
    Dial(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Channel open failed: {}", redact_url(&.0.to_string()))]
    Channel(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Exchange declaration failed: {}", redact_url(&.0.to_string()))]
    DeclareExchange(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Publishing failed: {}", redact_url(&.0.to_string()))]
    Publish(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Broker rejected message: {0}")]
    Rejected(String),
    #[error("Close failed: {}", redact_url(&.0.to_string()))]
    Close(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Entry point of the capability: turns a URL into a live connection
#[async_trait]
pub trait Broker: Send + Sync {
    async fn dial(&self, url: &str) -> Result<Box<dyn BrokerConnection>, BrokerError>;
}

/// One physical connection to a broker
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    /// Open a publishing channel multiplexed over this connection
    async fn open_channel(&self) -> Result<Box<dyn BrokerChannel>, BrokerError>;

    /// Close the connection gracefully
    async fn close(&self) -> Result<(), BrokerError>;
}

/// A publishing channel
///
/// Publishing takes `&mut self`: a channel carries at most one in-flight
/// publish, so shared channels must sit behind a lock.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    async fn declare_exchange(&mut self, spec: &ExchangeSpec) -> Result<(), BrokerError>;

    async fn publish(
        &mut self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        persistent: bool,
    ) -> Result<(), BrokerError>;
}
