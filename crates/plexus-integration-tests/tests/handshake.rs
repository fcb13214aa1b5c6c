//! Process-level start-up through the real executable launcher.
//!
//! Each test drives a small `sh` script and is skipped when `sh` is not on
//! `PATH`.

mod common;

use plexus_config::ControlConfig;
use plexus_control::{ControlError, Controller, LoadError};

use common::{sh_available, write_script};

fn controller(load_timeout_secs: u64) -> Controller {
    let config = ControlConfig {
        plugin_trust_level: "disabled".to_string(),
        plugin_load_timeout_secs: load_timeout_secs,
        ..ControlConfig::default()
    };
    let controller = Controller::new(config).unwrap();
    controller.start();
    controller
}

async fn load_error(
    script: &str,
    load_timeout_secs: u64,
) -> Option<(LoadError, tempfile::TempDir)> {
    if !sh_available() {
        eprintln!("sh not found on PATH, skipping");
        return None;
    }
    let dir = tempfile::tempdir().unwrap();
    let path = write_script(dir.path(), "plexus-collector-script", script);
    let controller = controller(load_timeout_secs);
    let err = controller.load_path(&path).await.unwrap_err();
    controller.stop().await;
    match err {
        ControlError::Load(e) => Some((e, dir)),
        other => panic!("expected a load error, got {other}"),
    }
}

#[tokio::test]
async fn test_reported_failure() {
    let script = r#"echo '{"meta":{"name":"bad","version":1,"type":"collector"},"type":"collector","state":"failure","error_message":"boom"}'"#;
    let Some((err, _dir)) = load_error(script, 3).await else {
        return;
    };
    assert!(matches!(err, LoadError::HandshakeFailed { ref message, .. } if message == "boom"));
}

#[tokio::test]
async fn test_exit_before_handshake() {
    let Some((err, _dir)) = load_error("exit 1", 3).await else {
        return;
    };
    assert!(matches!(err, LoadError::PluginDied { .. }));
    assert!(err.to_string().contains("plugin died without sending response"));
}

#[tokio::test]
async fn test_garbage_handshake() {
    let Some((err, _dir)) = load_error("echo not-json; sleep 5", 3).await else {
        return;
    };
    assert!(matches!(err, LoadError::InvalidHandshake { .. }));
}

#[tokio::test]
async fn test_silent_plugin_times_out() {
    let Some((err, _dir)) = load_error("sleep 30", 1).await else {
        return;
    };
    assert!(matches!(err, LoadError::HandshakeTimeout { timeout_ms: 1000, .. }));
}

#[tokio::test]
async fn test_arguments_passed_as_json() {
    let script = r#"printf '%s' "$1" > "$(dirname "$0")/args.json"; exit 1"#;
    let Some((_, dir)) = load_error(script, 3).await else {
        return;
    };
    let args = std::fs::read_to_string(dir.path().join("args.json")).unwrap();
    for key in ["\"listen_port\"", "\"ping_timeout_ms\"", "\"tls_enabled\""] {
        assert!(args.contains(key), "missing {key} in {args}");
    }
}

#[tokio::test]
async fn test_missing_executable() {
    let controller = controller(1);
    let err = controller
        .load_path("/definitely/not/a/plugin")
        .await
        .unwrap_err();
    assert!(matches!(err, ControlError::Load(LoadError::Io { .. })));
    controller.stop().await;
}
