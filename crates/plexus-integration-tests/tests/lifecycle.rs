//! Plugin lifecycle: unload guards, swaps, dead instances and validation.

mod common;

use plexus_control::{ControlError, LoadError, SubscriptionRequest, compare_plugins};
use plexus_core::{
    ConfigDataNode, ConfigDataTree, ConfigPolicy, ConfigValue, Metric, PluginKey, PolicyNode,
    Rule, SubscribedPlugin,
};
use plexus_events::{ControlEvent, EventMetadata};
use plexus_test::{
    ControlHarness, MockPlugin, metric_request, mock_collector, ns, requested_version,
    test_control_config,
};

use common::{drain, wait_for};

#[tokio::test]
async fn test_unload_impact_lists_only_orphaned_tasks() {
    let h = ControlHarness::new();
    let v1 = h.load(&mock_collector("mock", 1, &["/intel/mock/foo"])).await;
    let v2 = h.load(&mock_collector("mock", 2, &["/intel/mock/foo"])).await;

    h.controller
        .create_subscription_group(
            "pinned",
            SubscriptionRequest::metrics(vec![requested_version("/intel/mock/foo", 1)]),
        )
        .await
        .unwrap();
    h.controller
        .create_subscription_group("latest", metric_request(&["/intel/mock/foo"]))
        .await
        .unwrap();

    assert_eq!(h.controller.unload_impact(&v1), vec!["pinned".to_string()]);
    assert_eq!(h.controller.unload_impact(&v2), Vec::<String>::new());
}

#[tokio::test]
async fn test_guarded_unload() {
    let mut config = test_control_config();
    config.guard_unload = true;
    let h = ControlHarness::with_config(config);
    let key = h.load(&mock_collector("mock", 1, &["/intel/mock/foo"])).await;
    h.controller
        .create_subscription_group("t1", metric_request(&["/intel/mock/foo"]))
        .await
        .unwrap();

    let err = h.controller.unload(&key).await.unwrap_err();
    assert!(matches!(
        err,
        ControlError::Load(LoadError::PluginInUse { ref tasks, .. }) if tasks == &["t1".to_string()]
    ));
    assert!(h.controller.metric_exists(&ns("/intel/mock/foo"), 1));
}

#[tokio::test]
async fn test_swap_moves_subscribers_to_new_version() {
    let h = ControlHarness::new();
    let old = h.load(&mock_collector("mock", 1, &["/intel/mock/foo"])).await;
    h.controller
        .create_subscription_group("t1", metric_request(&["/intel/mock/foo"]))
        .await
        .unwrap();

    let path = h.install(&mock_collector("mock", 2, &["/intel/mock/foo"]));
    let requested = plexus_control::RequestedPlugin::from_path(&path).unwrap();
    let loaded = h.controller.swap_plugins(&requested, &old).await.unwrap();

    let resolution = h.controller.subscription("t1").unwrap();
    assert_eq!(resolution.plugin_keys(), vec![loaded.key()]);
    assert!(h.controller.unload(&old).await.is_err());
}

#[tokio::test]
async fn test_dead_instance_is_replaced() {
    let h = ControlHarness::new();
    let mock = mock_collector("mock", 1, &["/intel/mock/foo"]);
    let key = h.load(&mock).await;
    h.controller
        .create_subscription_group("t1", metric_request(&["/intel/mock/foo"]))
        .await
        .unwrap();
    let first = h.controller.available_plugins();
    assert_eq!(first.len(), 1);

    let mut events = h.controller.events().subscribe();
    h.controller
        .events()
        .publish(ControlEvent::AvailablePluginDead {
            metadata: EventMetadata::new("test"),
            key: key.clone(),
            instance_id: first[0].id,
            reason: "missed health checks".to_string(),
        });

    let started = wait_for(&mut events, "available_plugin_started").await;
    assert!(started.is_some());
    let now = h.controller.available_plugins();
    assert_eq!(now.len(), 1);
    assert_ne!(now[0].id, first[0].id);
    assert_eq!(mock.kills(), 1);
    assert_eq!(h.controller.pools()[0].restart_count, 1);
}

#[tokio::test]
async fn test_load_events() {
    let h = ControlHarness::new();
    let mut events = h.controller.events().subscribe();
    let key = h.load(&mock_collector("mock", 1, &["/intel/mock/foo"])).await;
    h.controller.unload(&key).await.unwrap();
    assert_eq!(drain(&mut events), vec!["plugin_loaded", "plugin_unloaded"]);
}

#[tokio::test]
async fn test_validate_deps_reports_policy_and_missing_plugins() {
    let h = ControlHarness::new();
    let policy = ConfigPolicy::new().with_node(
        &["intel", "mock", "foo"],
        PolicyNode::new().with_rule(Rule::string("password", true)),
    );
    let mock = MockPlugin::collector("mock", 1)
        .with_metric(Metric::new(ns("/intel/mock/foo"), 1))
        .with_policy(policy);
    let key = h.load(&mock).await;

    let request = metric_request(&["/intel/mock/foo"]).with_plugin(SubscribedPlugin::new(
        plexus_core::PluginType::Publisher,
        "nowhere",
        -1,
    ));
    let errors = h.controller.validate_deps(&request);
    assert_eq!(errors.len(), 2);
    let fields: Vec<_> = errors.iter().map(ControlError::fields).collect();
    assert!(fields.iter().any(|f| {
        f.get("namespace").map(String::as_str) == Some("/intel/mock/foo")
            && f.get("plugin_name") == Some(&key.name)
    }));
    assert!(
        fields
            .iter()
            .any(|f| f.get("plugin_name").map(String::as_str) == Some("nowhere"))
    );

    let mut config = ConfigDataTree::new();
    config.add(
        &["intel", "mock"],
        ConfigDataNode::new().with("password", ConfigValue::from("secret")),
    );
    let request = metric_request(&["/intel/mock/foo"]).with_config(config);
    assert!(h.controller.validate_deps(&request).is_empty());

    let resolution = h
        .controller
        .create_subscription_group("t1", request)
        .await
        .unwrap();
    let metric = &resolution.metrics[&key][0];
    assert_eq!(
        metric.config.get("password").and_then(ConfigValue::as_str),
        Some("secret")
    );
    assert_eq!(h.controller.available_plugins().len(), 1);
}

#[test]
fn test_compare_plugins_is_multiset_complement() {
    let key = |s: &str| SubscribedPlugin::from(&s.parse::<PluginKey>().unwrap());
    let new = vec![key("collector:a:1"), key("collector:a:1"), key("publisher:b:1")];
    let old = vec![key("collector:a:1"), key("processor:c:1")];
    let (adds, removes) = compare_plugins(&new, &old);

    // new ∩ old as multisets is a single collector:a:1.
    let common = 1;
    assert_eq!(adds.len() + common, new.len());
    assert_eq!(removes.len() + common, old.len());
    assert_eq!(removes[0].key().to_string(), "processor:c:1");
}
