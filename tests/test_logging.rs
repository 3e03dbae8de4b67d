//! Tests for logging configuration and format parsing
//!
//! Tests the pure functions in the logging module plus the guarantee that
//! installing a subscriber twice does not panic.

use expense_events::observability::logging::default_filter;
use expense_events::observability::{LogFormat, init_default_logging, init_logging, parse_level};
use tracing::Level;

#[test]
fn test_log_format_parse_known_values() {
    assert_eq!(LogFormat::parse("json"), LogFormat::Json);
    assert_eq!(LogFormat::parse("Pretty"), LogFormat::Pretty);
    assert_eq!(LogFormat::parse("COMPACT"), LogFormat::Compact);
}

#[test]
fn test_log_format_parse_invalid_defaults_to_json() {
    for input in ["invalid", "", "xml", "yaml", "123", "  pretty  "] {
        assert_eq!(LogFormat::parse(input), LogFormat::Json, "input: {input:?}");
    }
}

#[test]
fn test_log_level_parsing() {
    assert_eq!(parse_level("error"), Level::ERROR);
    assert_eq!(parse_level("WARN"), Level::WARN);
    assert_eq!(parse_level("trace"), Level::TRACE);
    assert_eq!(parse_level(""), Level::INFO);
}

#[test]
fn test_amqp_client_noise_is_capped() {
    let filter = default_filter(Level::TRACE).to_string();
    for target in ["lapin=warn", "amq_protocol=warn", "tokio=warn"] {
        assert!(filter.contains(target), "missing {target} in {filter}");
    }
}

#[test]
fn test_second_initialization_is_rejected_quietly() {
    // The first call may lose the race to another test; the second never wins
    init_logging(Level::INFO, LogFormat::Compact, false);
    assert!(!init_logging(Level::DEBUG, LogFormat::Json, true));
    assert!(!init_default_logging());
}
