//! Retrying publisher
//!
//! One `publish` call serializes the event once, resolves the exchange and
//! routing key templates, then makes up to `retry_count + 1` attempts,
//! each against a host picked by the adaptive selector. The first success
//! ends the call; otherwise the last attempt's error is returned. There is
//! no delay between attempts.

use crate::error::{redact_url, OutputError, OutputResult};
use crate::event::OutboundEvent;
use crate::observability::PublishMetrics;
use crate::pool::{ConnectionRegistry, HostSelector};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn, Instrument};

/// Static publish settings shared by every call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishSettings {
    pub exchange: String,
    pub routing_key: String,
    pub persistent: bool,
    pub retry_count: u32,
}

/// Successful delivery of one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivered {
    /// Broker that accepted the message
    pub host: String,
    /// Attempts used, including the successful one
    pub attempts: u32,
}

pub struct RetryingPublisher {
    registry: Arc<ConnectionRegistry>,
    selector: Arc<HostSelector>,
    metrics: Arc<PublishMetrics>,
    settings: PublishSettings,
}

impl RetryingPublisher {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        selector: Arc<HostSelector>,
        metrics: Arc<PublishMetrics>,
        settings: PublishSettings,
    ) -> Self {
        Self {
            registry,
            selector,
            metrics,
            settings,
        }
    }

    pub fn settings(&self) -> &PublishSettings {
        &self.settings
    }

    /// Total attempts allowed per event
    pub fn max_attempts(&self) -> u32 {
        self.settings.retry_count.saturating_add(1)
    }

    /// Deliver one event to one broker
    pub async fn publish<E>(&self, event: &E) -> OutputResult<Delivered>
    where
        E: OutboundEvent + ?Sized,
    {
        self.metrics.event_received();
        let started = Instant::now();

        let payload = match event.to_payload() {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "Event serialization failed");
                self.metrics.serialization_failed();
                return Err(OutputError::Serialization(e));
            }
        };

        let exchange = event.format(&self.settings.exchange);
        let routing_key = event.format(&self.settings.routing_key);

        let span = crate::publish_span!(
            exchange = %exchange,
            routing_key = %routing_key,
            payload_bytes = payload.len()
        );

        let result = self
            .deliver(&exchange, &routing_key, &payload)
            .instrument(span)
            .await;

        match &result {
            Ok(_) => self.metrics.event_published(started.elapsed()),
            Err(_) => self.metrics.event_failed(),
        }
        result
    }

    async fn deliver(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> OutputResult<Delivered> {
        let max_attempts = self.max_attempts();
        let mut tried: Vec<&str> = Vec::with_capacity(self.selector.len());
        let mut attempt: u32 = 0;

        loop {
            let host = self.selector.select_excluding(&tried);
            if !tried.contains(&host) {
                tried.push(host);
            }

            let Some(session) = self.registry.get(host) else {
                error!(host = %redact_url(host), "Selected host has no registered connection");
                return Err(OutputError::UnknownHost(redact_url(host)));
            };

            let outcome = {
                let mut channel = session.channel().await;
                channel
                    .publish(exchange, routing_key, payload, self.settings.persistent)
                    .await
            };

            let success = outcome.is_ok();
            self.selector.mark_outcome(host, success);
            self.metrics.attempt(attempt, success);

            match outcome {
                Ok(()) => {
                    debug!(
                        host = %redact_url(host),
                        attempt = attempt + 1,
                        "Event published"
                    );
                    return Ok(Delivered {
                        host: host.to_string(),
                        attempts: attempt + 1,
                    });
                }
                Err(source) if attempt + 1 >= max_attempts => {
                    warn!(
                        host = %redact_url(host),
                        attempts = max_attempts,
                        error = %source,
                        "Publish attempts exhausted"
                    );
                    return Err(OutputError::PublishExhausted {
                        attempts: max_attempts,
                        host: redact_url(host),
                        source,
                    });
                }
                Err(source) => {
                    warn!(
                        host = %redact_url(host),
                        attempt = attempt + 1,
                        max_attempts,
                        error = %source,
                        "Publish attempt failed, retrying on another broker"
                    );
                }
            }

            attempt += 1;
        }
    }
}
