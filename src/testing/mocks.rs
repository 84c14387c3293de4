//! Mock implementations for testing
//!
//! [`MockBroker`] scripts per-URL behavior for every step of the broker
//! capability (dial, channel open, exchange declaration, publish) and
//! records what happened, so registry and publisher behavior can be
//! verified without a running RabbitMQ.

use crate::broker::{Broker, BrokerChannel, BrokerConnection, BrokerError};
use crate::config::ExchangeSpec;
use crate::event::OutboundEvent;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How a mock channel answers publish calls
#[derive(Debug, Clone, Default, PartialEq)]
pub enum PublishBehavior {
    #[default]
    Succeed,
    AlwaysFail,
    /// Fail the first N publishes on this host, then succeed
    FailFirst(usize),
}

/// Scripted behavior for one broker URL
#[derive(Debug, Clone, Default)]
pub struct HostBehavior {
    pub fail_dial: bool,
    pub fail_channel: bool,
    pub fail_declare: bool,
    pub publish: PublishBehavior,
    /// Time spent inside each publish, to widen race windows
    pub publish_delay: Option<Duration>,
}

impl HostBehavior {
    pub fn healthy() -> Self {
        Self::default()
    }

    pub fn unreachable() -> Self {
        Self {
            fail_dial: true,
            ..Self::default()
        }
    }

    pub fn no_channel() -> Self {
        Self {
            fail_channel: true,
            ..Self::default()
        }
    }

    pub fn bad_exchange() -> Self {
        Self {
            fail_declare: true,
            ..Self::default()
        }
    }

    pub fn failing_publish() -> Self {
        Self {
            publish: PublishBehavior::AlwaysFail,
            ..Self::default()
        }
    }

    pub fn flaky(failures: usize) -> Self {
        Self {
            publish: PublishBehavior::FailFirst(failures),
            ..Self::default()
        }
    }

    pub fn with_publish_delay(mut self, delay: Duration) -> Self {
        self.publish_delay = Some(delay);
        self
    }
}

/// A message accepted by a mock channel
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub host: String,
    pub exchange: String,
    pub routing_key: String,
    pub payload: Vec<u8>,
    pub persistent: bool,
}

/// One publish call seen by a mock channel
#[derive(Debug, Clone, PartialEq)]
pub struct PublishRecord {
    pub host: String,
    pub success: bool,
}

#[derive(Debug, Default)]
struct MockState {
    dials: Mutex<Vec<String>>,
    channels_opened: Mutex<Vec<String>>,
    declarations: Mutex<Vec<(String, ExchangeSpec)>>,
    publishes: Mutex<Vec<PublishRecord>>,
    deliveries: Mutex<Vec<Delivery>>,
    closed: Mutex<Vec<String>>,
    max_in_flight: AtomicUsize,
}

/// Scripted in-memory broker
#[derive(Debug, Clone, Default)]
pub struct MockBroker {
    behaviors: HashMap<String, HostBehavior>,
    state: Arc<MockState>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a URL; unscripted URLs behave like [`HostBehavior::healthy`]
    pub fn with_host<S: Into<String>>(mut self, url: S, behavior: HostBehavior) -> Self {
        self.behaviors.insert(url.into(), behavior);
        self
    }

    fn behavior(&self, url: &str) -> HostBehavior {
        self.behaviors.get(url).cloned().unwrap_or_default()
    }

    pub fn dials(&self) -> Vec<String> {
        self.state.dials.lock().unwrap().clone()
    }

    pub fn channels_opened(&self) -> Vec<String> {
        self.state.channels_opened.lock().unwrap().clone()
    }

    pub fn declarations(&self) -> Vec<(String, ExchangeSpec)> {
        self.state.declarations.lock().unwrap().clone()
    }

    pub fn publishes(&self) -> Vec<PublishRecord> {
        self.state.publishes.lock().unwrap().clone()
    }

    pub fn publish_count(&self) -> usize {
        self.state.publishes.lock().unwrap().len()
    }

    pub fn publishes_to(&self, host: &str) -> usize {
        self.state
            .publishes
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.host == host)
            .count()
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.state.deliveries.lock().unwrap().clone()
    }

    pub fn closed(&self) -> Vec<String> {
        self.state.closed.lock().unwrap().clone()
    }

    /// Highest number of publishes observed in flight on one channel
    pub fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn clear_history(&self) {
        self.state.publishes.lock().unwrap().clear();
        self.state.deliveries.lock().unwrap().clear();
    }
}

#[async_trait]
impl Broker for MockBroker {
    async fn dial(&self, url: &str) -> Result<Box<dyn BrokerConnection>, BrokerError> {
        self.state.dials.lock().unwrap().push(url.to_string());

        let behavior = self.behavior(url);
        if behavior.fail_dial {
            return Err(BrokerError::Dial(
                format!("connection refused: {url}").into(),
            ));
        }

        Ok(Box::new(MockConnection {
            url: url.to_string(),
            behavior,
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockConnection {
    url: String,
    behavior: HostBehavior,
    state: Arc<MockState>,
}

#[async_trait]
impl BrokerConnection for MockConnection {
    async fn open_channel(&self) -> Result<Box<dyn BrokerChannel>, BrokerError> {
        if self.behavior.fail_channel {
            return Err(BrokerError::Channel("channel limit reached".into()));
        }
        self.state
            .channels_opened
            .lock()
            .unwrap()
            .push(self.url.clone());

        Ok(Box::new(MockChannel {
            url: self.url.clone(),
            behavior: self.behavior.clone(),
            state: Arc::clone(&self.state),
            publish_calls: 0,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }))
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.state.closed.lock().unwrap().push(self.url.clone());
        Ok(())
    }
}

struct MockChannel {
    url: String,
    behavior: HostBehavior,
    state: Arc<MockState>,
    publish_calls: usize,
    in_flight: Arc<AtomicUsize>,
}

#[async_trait]
impl BrokerChannel for MockChannel {
    async fn declare_exchange(&mut self, spec: &ExchangeSpec) -> Result<(), BrokerError> {
        self.state
            .declarations
            .lock()
            .unwrap()
            .push((self.url.clone(), spec.clone()));

        if self.behavior.fail_declare {
            let reason = format!(
                "PRECONDITION_FAILED - inequivalent arg 'type' for exchange '{}'",
                spec.name
            );
            return Err(BrokerError::DeclareExchange(reason.into()));
        }
        Ok(())
    }

    async fn publish(
        &mut self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        persistent: bool,
    ) -> Result<(), BrokerError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_in_flight.fetch_max(now, Ordering::SeqCst);

        match self.behavior.publish_delay {
            Some(delay) => tokio::time::sleep(delay).await,
            None => tokio::task::yield_now().await,
        }

        self.publish_calls += 1;
        let success = match self.behavior.publish {
            PublishBehavior::Succeed => true,
            PublishBehavior::AlwaysFail => false,
            PublishBehavior::FailFirst(n) => self.publish_calls > n,
        };

        self.state.publishes.lock().unwrap().push(PublishRecord {
            host: self.url.clone(),
            success,
        });

        let result = if success {
            self.state.deliveries.lock().unwrap().push(Delivery {
                host: self.url.clone(),
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
                payload: payload.to_vec(),
                persistent,
            });
            Ok(())
        } else {
            Err(BrokerError::Publish(
                format!("publish #{} to {} failed", self.publish_calls, self.url).into(),
            ))
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

struct Unserializable;

impl Serialize for Unserializable {
    fn serialize<S: Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
        Err(serde::ser::Error::custom("value cannot be encoded"))
    }
}

/// Event whose payload can never be produced
#[derive(Debug, Clone, Default)]
pub struct UnserializableEvent;

impl OutboundEvent for UnserializableEvent {
    fn to_payload(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(&Unserializable).map(Bytes::from)
    }

    fn format(&self, template: &str) -> String {
        template.to_string()
    }
}
