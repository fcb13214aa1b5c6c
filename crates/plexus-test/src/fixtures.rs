//! Test fixtures for common types.

use plexus_config::ControlConfig;
use plexus_control::SubscriptionRequest;
use plexus_core::{Metric, Namespace, RequestedMetric};

use crate::MockPlugin;

/// Controller config for tests: no signature checks and no metric cache.
#[must_use]
pub fn test_control_config() -> ControlConfig {
    ControlConfig {
        plugin_trust_level: "disabled".to_string(),
        cache_expiration_ms: 0,
        ..ControlConfig::default()
    }
}

/// Parse a namespace, panicking on malformed input.
#[must_use]
pub fn ns(namespace: &str) -> Namespace {
    Namespace::parse(namespace)
        .unwrap_or_else(|e| panic!("invalid test namespace {namespace}: {e}"))
}

/// Request the latest version of `namespace`.
#[must_use]
pub fn requested(namespace: &str) -> RequestedMetric {
    RequestedMetric::latest(ns(namespace))
}

/// Request an exact version of `namespace`.
#[must_use]
pub fn requested_version(namespace: &str, version: i32) -> RequestedMetric {
    RequestedMetric::new(ns(namespace), version)
}

/// A subscription request for the latest version of each namespace.
#[must_use]
pub fn metric_request(namespaces: &[&str]) -> SubscriptionRequest {
    SubscriptionRequest::metrics(namespaces.iter().map(|n| requested(n)).collect())
}

/// A collector advertising `namespaces` at the plugin's own version.
#[must_use]
pub fn mock_collector(name: &str, version: i32, namespaces: &[&str]) -> MockPlugin {
    namespaces
        .iter()
        .fold(MockPlugin::collector(name, version), |mock, n| {
            mock.with_metric(Metric::new(ns(n), 0))
        })
}
