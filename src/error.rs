//! Error types for the AMQP output
//!
//! Errors are split by layer: configuration problems ([`ConfigError`]),
//! broker capability failures ([`BrokerError`]) and the output-level
//! [`OutputError`] that callers of [`crate::AmqpOutput`] see.

use crate::broker::BrokerError;
use crate::config::ConfigError;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use thiserror::Error;

/// Main error type for output operations
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Exchange declaration failed during initialization; aborts startup.
    #[error("Failed to declare exchange '{exchange}' on {url}: {source}")]
    ExchangeDeclare {
        exchange: String,
        url: String,
        #[source]
        source: BrokerError,
    },

    #[error("No usable amqp server connection found")]
    NoUsableConnection,

    #[error("Event serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),

    /// Every publish attempt failed; carries the last attempt's error.
    #[error("Publish failed after {attempts} attempt(s), last host {host}: {source}")]
    PublishExhausted {
        attempts: u32,
        host: String,
        #[source]
        source: BrokerError,
    },

    #[error("Host '{0}' is not registered")]
    UnknownHost(String),
}

impl OutputError {
    /// True for errors that abort module startup
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            OutputError::Config(_)
                | OutputError::ExchangeDeclare { .. }
                | OutputError::NoUsableConnection
        )
    }
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

static URL_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z][A-Za-z0-9+.\-]*://\S+").expect("url token pattern is valid")
});

/// Replace the password component of every URL in `text` with `***`
///
/// Works for any scheme and on text that is not a valid URL. Everything
/// between `user:` and the last `@` of the token is masked, so passwords
/// containing `@` do not leak. Applied to every URL before it reaches a
/// log line or error message.
pub fn redact_url(text: &str) -> String {
    URL_TOKEN
        .replace_all(text, |caps: &Captures| redact_token(&caps[0]))
        .into_owned()
}

fn redact_token(token: &str) -> String {
    let Some(scheme_end) = token.find("://").map(|i| i + 3) else {
        return token.to_string();
    };
    let rest = &token[scheme_end..];
    let Some(at) = rest.rfind('@') else {
        return token.to_string();
    };
    match rest[..at].find(':') {
        Some(colon) if !rest[..colon].contains('/') => {
            format!("{}{}:***{}", &token[..scheme_end], &rest[..colon], &rest[at..])
        }
        _ => token.to_string(),
    }
}
