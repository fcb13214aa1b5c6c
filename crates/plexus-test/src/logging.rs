//! Log capture for tests.

use plexus_telemetry::{LogConfig, LogFormat, LogTarget, setup_logging};

/// Route `tracing` output through the test writer.
///
/// `RUST_LOG` sets the filter, errors only when unset. Safe to call from
/// every test; only the first call installs a subscriber.
pub fn init_test_logging() {
    let level = std::env::var("RUST_LOG").unwrap_or_else(|_| "error".to_string());
    let config = LogConfig::new(level)
        .with_format(LogFormat::Compact)
        .with_target(LogTarget::Test)
        .without_ansi();
    let _ = setup_logging(&config);
}
