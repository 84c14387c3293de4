//! Tests for logging configuration and format parsing
//!
//! Tests the pure functions in the logging module that handle
//! log format parsing and CLI verbosity.

use amqp_output::observability::logging::{level_with_verbosity, parse_level, LogFormat};
use tracing::Level;

#[test]
fn test_log_format_parse_json() {
    assert_eq!(LogFormat::parse("json"), LogFormat::Json);
    assert_eq!(LogFormat::parse("JSON"), LogFormat::Json);
}

#[test]
fn test_log_format_parse_human_formats() {
    assert_eq!(LogFormat::parse("pretty"), LogFormat::Pretty);
    assert_eq!(LogFormat::parse("Compact"), LogFormat::Compact);
}

#[test]
fn test_log_format_parse_invalid_defaults_to_json() {
    for input in ["invalid", "", "xml", "yaml", "123"] {
        assert_eq!(LogFormat::parse(input), LogFormat::Json, "input: {input:?}");
    }
}

#[test]
fn test_level_parse_is_case_insensitive() {
    assert_eq!(parse_level("warn"), Level::WARN);
    assert_eq!(parse_level(" Debug "), Level::DEBUG);
    assert_eq!(parse_level("nonsense"), Level::INFO);
}

#[test]
fn test_verbose_flag_never_lowers_level() {
    for base in [Level::ERROR, Level::WARN, Level::INFO, Level::DEBUG, Level::TRACE] {
        for verbose in 0..4 {
            assert!(level_with_verbosity(base, verbose) >= base);
        }
    }
}

#[test]
fn test_span_macros_accept_fields() {
    let span = amqp_output::publish_span!(exchange = "logs", routing_key = "a.b");
    let _entered = span.enter();
    let _broker = amqp_output::broker_span!(host = "amqp://a:5672");
    let _lifecycle = amqp_output::lifecycle_span!(phase = "init");
}
