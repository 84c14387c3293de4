//! Broker connection registry
//!
//! Dials every configured broker once at startup, opens a publishing
//! channel and declares the exchange on it. Dial and channel failures
//! drop that broker from the healthy set; an exchange declaration
//! failure aborts initialization outright.

use crate::broker::{Broker, BrokerChannel, BrokerConnection};
use crate::config::ExchangeSpec;
use crate::error::{redact_url, OutputError, OutputResult};
use std::collections::{HashMap, HashSet};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn, Instrument};

/// Live connection plus its publishing channel for one broker
pub struct BrokerSession {
    connection: Box<dyn BrokerConnection>,
    channel: Mutex<Box<dyn BrokerChannel>>,
}

impl BrokerSession {
    fn new(connection: Box<dyn BrokerConnection>, channel: Box<dyn BrokerChannel>) -> Self {
        Self {
            connection,
            channel: Mutex::new(channel),
        }
    }

    /// Exclusive access to the channel; held for the duration of one publish
    pub async fn channel(&self) -> MutexGuard<'_, Box<dyn BrokerChannel>> {
        self.channel.lock().await
    }

    pub fn connection(&self) -> &dyn BrokerConnection {
        self.connection.as_ref()
    }
}

/// Broker URL → session mapping, fixed after initialization
pub struct ConnectionRegistry {
    sessions: HashMap<String, BrokerSession>,
    healthy_hosts: Vec<String>,
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let hosts: Vec<String> = self.healthy_hosts.iter().map(|h| redact_url(h)).collect();
        f.debug_struct("ConnectionRegistry")
            .field("healthy_hosts", &hosts)
            .finish()
    }
}

impl ConnectionRegistry {
    /// Connect to every target and declare the exchange on each
    ///
    /// Returns an error if any exchange declaration fails or if no target
    /// could be dialed.
    pub async fn initialize(
        broker: &dyn Broker,
        targets: &[String],
        exchange: &ExchangeSpec,
    ) -> OutputResult<Self> {
        let mut sessions: HashMap<String, BrokerSession> = HashMap::new();
        let mut healthy_hosts = Vec::new();
        let mut seen = HashSet::new();

        for url in targets {
            if !seen.insert(url.as_str()) {
                debug!(url = %redact_url(url), "Skipping duplicate broker url");
                continue;
            }
            let shown = redact_url(url);

            let dial = broker
                .dial(url)
                .instrument(crate::broker_span!(operation = "dial", url = %shown));
            let connection = match dial.await {
                Ok(connection) => connection,
                Err(e) => {
                    warn!(url = %shown, error = %e, "Broker dial failed, excluding");
                    continue;
                }
            };

            let mut channel = match connection.open_channel().await {
                Ok(channel) => channel,
                Err(e) => {
                    warn!(url = %shown, error = %e, "Channel open failed, excluding broker");
                    close_quietly(connection.as_ref(), &shown).await;
                    continue;
                }
            };

            let declared = channel
                .declare_exchange(exchange)
                .instrument(crate::broker_span!(operation = "declare_exchange", url = %shown))
                .await;
            if let Err(source) = declared {
                warn!(
                    url = %shown,
                    exchange = %exchange.name,
                    kind = %exchange.kind,
                    error = %source,
                    "Exchange declaration failed, aborting initialization"
                );
                close_quietly(connection.as_ref(), &shown).await;
                for (host, session) in &sessions {
                    close_quietly(session.connection(), &redact_url(host)).await;
                }
                return Err(OutputError::ExchangeDeclare {
                    exchange: exchange.name.clone(),
                    url: shown,
                    source,
                });
            }

            info!(url = %shown, exchange = %exchange.name, "Broker registered");
            sessions.insert(url.clone(), BrokerSession::new(connection, channel));
            healthy_hosts.push(url.clone());
        }

        if healthy_hosts.is_empty() {
            return Err(OutputError::NoUsableConnection);
        }

        info!(
            healthy = healthy_hosts.len(),
            configured = targets.len(),
            "Broker registry initialized"
        );
        Ok(Self {
            sessions,
            healthy_hosts,
        })
    }

    /// Registered hosts in configuration order
    pub fn healthy_hosts(&self) -> &[String] {
        &self.healthy_hosts
    }

    pub fn get(&self, host: &str) -> Option<&BrokerSession> {
        self.sessions.get(host)
    }

    pub fn contains(&self, host: &str) -> bool {
        self.sessions.contains_key(host)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Close every connection; failures are logged and skipped
    pub async fn close_all(&self) {
        for host in &self.healthy_hosts {
            if let Some(session) = self.sessions.get(host) {
                match session.connection().close().await {
                    Ok(()) => debug!(url = %redact_url(host), "Broker connection closed"),
                    Err(e) => warn!(url = %redact_url(host), error = %e, "Broker close failed"),
                }
            }
        }
    }
}

/// Close a connection abandoned during initialization; failures are only logged
async fn close_quietly(connection: &dyn BrokerConnection, shown: &str) {
    if let Err(e) = connection.close().await {
        debug!(url = %shown, error = %e, "Close of abandoned connection failed");
    }
}
