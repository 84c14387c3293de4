//! AMQP output handle
//!
//! [`AmqpOutput`] is what a pipeline runtime constructs from configuration:
//! startup builds the connection registry and seeds the host selector with
//! the brokers that came up, after which [`AmqpOutput::event`] is called
//! once per event, possibly from many tasks at once.
//!
//! Connections are a snapshot taken at startup. A broker that drops later
//! is not re-dialed; it stays in the pool and is disfavored by the selector
//! as its publishes fail.

use crate::broker::Broker;
use crate::config::OutputConfig;
use crate::error::{redact_url, OutputResult};
use crate::event::OutboundEvent;
use crate::observability::{MetricsSnapshot, PublishMetrics};
use crate::pool::{ConnectionRegistry, HostSelector, HostStats};
use crate::publisher::{Delivered, PublishSettings, RetryingPublisher};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, Instrument};

/// Name used for this output in pipeline configuration
pub const MODULE_NAME: &str = "amqp";

/// Health view of one output instance
#[derive(Debug, Clone, Serialize)]
pub struct OutputHealth {
    pub healthy: bool,
    pub hosts: Vec<HostStats>,
    pub metrics: MetricsSnapshot,
}

/// Initialized multi-broker output
pub struct AmqpOutput {
    registry: Arc<ConnectionRegistry>,
    selector: Arc<HostSelector>,
    metrics: Arc<PublishMetrics>,
    publisher: RetryingPublisher,
}

impl std::fmt::Debug for AmqpOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmqpOutput")
            .field("registry", &self.registry)
            .field("settings", self.publisher.settings())
            .finish()
    }
}

impl AmqpOutput {
    /// Connect to the configured brokers and declare the exchange
    ///
    /// Fails when the configuration is invalid, when the exchange cannot
    /// be declared, or when no broker is reachable.
    pub async fn new(config: &OutputConfig, broker: &dyn Broker) -> OutputResult<Self> {
        Self::build(config, broker, None).await
    }

    /// Like [`AmqpOutput::new`] with a fixed selector seed
    pub async fn with_seed(
        config: &OutputConfig,
        broker: &dyn Broker,
        seed: u64,
    ) -> OutputResult<Self> {
        Self::build(config, broker, Some(seed)).await
    }

    async fn build(
        config: &OutputConfig,
        broker: &dyn Broker,
        seed: Option<u64>,
    ) -> OutputResult<Self> {
        config.validate()?;

        let span = crate::lifecycle_span!(
            phase = "init",
            module = MODULE_NAME,
            brokers = config.urls.len()
        );
        let registry = ConnectionRegistry::initialize(broker, &config.urls, &config.exchange_spec())
            .instrument(span)
            .await?;

        let hosts = registry.healthy_hosts().to_vec();
        let selector = match seed {
            Some(seed) => HostSelector::with_seed(hosts, config.selector, seed)?,
            None => HostSelector::new(hosts, config.selector)?,
        };

        let registry = Arc::new(registry);
        let selector = Arc::new(selector);
        let metrics = Arc::new(PublishMetrics::new());
        let publisher = RetryingPublisher::new(
            Arc::clone(&registry),
            Arc::clone(&selector),
            Arc::clone(&metrics),
            PublishSettings {
                exchange: config.exchange.clone(),
                routing_key: config.routing_key.clone(),
                persistent: config.persistent,
                retry_count: config.retry_count,
            },
        );

        info!(
            hosts = ?selector.hosts().iter().map(|h| redact_url(h)).collect::<Vec<_>>(),
            retry_count = config.retry_count,
            "AMQP output ready"
        );

        Ok(Self {
            registry,
            selector,
            metrics,
            publisher,
        })
    }

    /// Per-event entry point
    pub async fn event<E>(&self, event: &E) -> OutputResult<()>
    where
        E: OutboundEvent + ?Sized,
    {
        self.publisher.publish(event).await.map(|_| ())
    }

    /// Publish and report which broker took the event
    pub async fn publish<E>(&self, event: &E) -> OutputResult<Delivered>
    where
        E: OutboundEvent + ?Sized,
    {
        self.publisher.publish(event).await
    }

    /// Brokers that were reachable at startup
    pub fn healthy_hosts(&self) -> &[String] {
        self.registry.healthy_hosts()
    }

    pub fn selector(&self) -> &HostSelector {
        &self.selector
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Healthy while some broker is either untested or not failing outright
    pub fn health(&self) -> OutputHealth {
        let floor = self.selector.config().min_weight;
        let hosts = self.selector.snapshot();
        let healthy = hosts.iter().any(|h| h.failures == 0 || h.score > floor);

        OutputHealth {
            healthy,
            hosts,
            metrics: self.metrics.snapshot(),
        }
    }

    /// Close every broker connection
    pub async fn shutdown(&self) {
        let span = crate::lifecycle_span!(phase = "shutdown", module = MODULE_NAME);
        self.registry.close_all().instrument(span).await;
        info!("AMQP output stopped");
    }
}
