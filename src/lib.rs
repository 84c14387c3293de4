//! amqp-output
//!
//! Publishing core that delivers structured events to a set of AMQP brokers
//! with automatic failover.
//!
//! # Overview
//!
//! - [`pool::ConnectionRegistry`] dials every configured broker once,
//!   opens a publishing channel and declares the exchange
//! - [`pool::HostSelector`] picks a broker per attempt, biased towards
//!   brokers that have been succeeding
//! - [`publisher::RetryingPublisher`] serializes an event, resolves its
//!   exchange and routing key templates and retries across brokers
//! - [`AmqpOutput`] ties them together behind a per-event entry point
//!
//! # Quick Start
//!
//! ```rust
//! use amqp_output::testing::MockBroker;
//! use amqp_output::{AmqpOutput, LogEvent, OutputConfig};
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let config = OutputConfig::from_toml_str(r#"
//!     urls = ["amqp://rabbit-1:5672", "amqp://rabbit-2:5672"]
//!     exchange = "logs"
//!     exchange_type = "topic"
//!     routing_key = "app.%{service}"
//! "#)?;
//!
//! let broker = MockBroker::new();
//! let output = AmqpOutput::new(&config, &broker).await?;
//!
//! let event = LogEvent::new("user signed in").with_field("service", json!("auth"));
//! output.event(&event).await?;
//!
//! assert_eq!(broker.deliveries()[0].routing_key, "app.auth");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod broker;
pub mod config;
pub mod error;
pub mod event;
pub mod observability;
pub mod output;
pub mod pool;
pub mod publisher;
pub mod testing;

pub use broker::{Broker, BrokerChannel, BrokerConnection, BrokerError, LapinBroker};
pub use config::{ConfigError, ExchangeKind, ExchangeSpec, OutputConfig, SelectorConfig};
pub use error::{OutputError, OutputResult};
pub use event::{LogEvent, OutboundEvent};
pub use output::{AmqpOutput, OutputHealth};
pub use publisher::{Delivered, RetryingPublisher};
