//! AMQP 0-9-1 implementation of the broker capability on top of `lapin`
//!
//! Channels are opened in publisher-confirm mode, so a publish only
//! succeeds once the broker has acknowledged the message.

use super::{Broker, BrokerChannel, BrokerConnection, BrokerError, CONTENT_TYPE_JSON};
use crate::config::{ExchangeKind, ExchangeSpec};
use async_trait::async_trait;
use lapin::options::{BasicPublishOptions, ConfirmSelectOptions, ExchangeDeclareOptions};
use lapin::publisher_confirm::Confirmation;
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tracing::debug;

/// AMQP delivery mode for transient messages
pub const DELIVERY_MODE_TRANSIENT: u8 = 1;
/// AMQP delivery mode for persistent messages
pub const DELIVERY_MODE_PERSISTENT: u8 = 2;

const CONNECTION_NAME: &str = "amqp-output";
const REPLY_SUCCESS: u16 = 200;

/// Map the configured exchange kind onto lapin's
pub fn lapin_exchange_kind(kind: ExchangeKind) -> lapin::ExchangeKind {
    match kind {
        ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
        ExchangeKind::Direct => lapin::ExchangeKind::Direct,
        ExchangeKind::Topic => lapin::ExchangeKind::Topic,
        ExchangeKind::Headers => lapin::ExchangeKind::Headers,
    }
}

/// Delivery mode for the configured persistence flag
pub fn delivery_mode(persistent: bool) -> u8 {
    if persistent {
        DELIVERY_MODE_PERSISTENT
    } else {
        DELIVERY_MODE_TRANSIENT
    }
}

/// Dials real brokers through lapin
#[derive(Debug, Clone, Default)]
pub struct LapinBroker;

impl LapinBroker {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Broker for LapinBroker {
    async fn dial(&self, url: &str) -> Result<Box<dyn BrokerConnection>, BrokerError> {
        let properties =
            ConnectionProperties::default().with_connection_name(CONNECTION_NAME.into());
        let connection = Connection::connect(url, properties)
            .await
            .map_err(|e| BrokerError::Dial(Box::new(e)))?;

        Ok(Box::new(LapinConnection { connection }))
    }
}

/// Live lapin connection
pub struct LapinConnection {
    connection: Connection,
}

#[async_trait]
impl BrokerConnection for LapinConnection {
    async fn open_channel(&self) -> Result<Box<dyn BrokerChannel>, BrokerError> {
        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(|e| BrokerError::Channel(Box::new(e)))?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| BrokerError::Channel(Box::new(e)))?;

        debug!(channel_id = channel.id(), "Opened publishing channel");
        Ok(Box::new(LapinChannel { channel }))
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.connection
            .close(REPLY_SUCCESS, "output shutting down")
            .await
            .map_err(|e| BrokerError::Close(Box::new(e)))
    }
}

/// Publishing channel in confirm mode
pub struct LapinChannel {
    channel: Channel,
}

#[async_trait]
impl BrokerChannel for LapinChannel {
    async fn declare_exchange(&mut self, spec: &ExchangeSpec) -> Result<(), BrokerError> {
        let options = ExchangeDeclareOptions {
            durable: spec.durable,
            auto_delete: spec.auto_delete,
            ..ExchangeDeclareOptions::default()
        };

        self.channel
            .exchange_declare(
                &spec.name,
                lapin_exchange_kind(spec.kind),
                options,
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::DeclareExchange(Box::new(e)))
    }

    async fn publish(
        &mut self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        persistent: bool,
    ) -> Result<(), BrokerError> {
        let properties = BasicProperties::default()
            .with_content_type(CONTENT_TYPE_JSON.into())
            .with_delivery_mode(delivery_mode(persistent));

        let confirm = self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                properties,
            )
            .await
            .map_err(|e| BrokerError::Publish(Box::new(e)))?;

        match confirm
            .await
            .map_err(|e| BrokerError::Publish(Box::new(e)))?
        {
            Confirmation::Nack(_) => Err(BrokerError::Rejected(format!(
                "nack for exchange '{exchange}' routing key '{routing_key}'"
            ))),
            Confirmation::Ack(_) | Confirmation::NotRequested => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_mode() {
        assert_eq!(delivery_mode(true), 2);
        assert_eq!(delivery_mode(false), 1);
    }

    #[test]
    fn test_exchange_kind_mapping() {
        assert!(matches!(
            lapin_exchange_kind(ExchangeKind::Topic),
            lapin::ExchangeKind::Topic
        ));
        assert!(matches!(
            lapin_exchange_kind(ExchangeKind::Fanout),
            lapin::ExchangeKind::Fanout
        ));
        assert!(matches!(
            lapin_exchange_kind(ExchangeKind::Direct),
            lapin::ExchangeKind::Direct
        ));
        assert!(matches!(
            lapin_exchange_kind(ExchangeKind::Headers),
            lapin::ExchangeKind::Headers
        ));
    }

    #[tokio::test]
    async fn test_dial_unreachable_broker_fails() {
        let broker = LapinBroker::new();
        let result = broker.dial("amqp://127.0.0.1:1").await;
        assert!(matches!(result, Err(BrokerError::Dial(_))));
    }
}
