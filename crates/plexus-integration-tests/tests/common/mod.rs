//! Shared helpers for integration tests.

use std::path::{Path, PathBuf};
use std::time::Duration;

use plexus_events::{ControlEvent, EventReceiver};

/// Whether `sh` is on `PATH`; process-level tests skip without it.
#[allow(dead_code)]
pub fn sh_available() -> bool {
    which::which("sh").is_ok()
}

/// Write an executable `sh` script named `name` under `dir`.
#[allow(dead_code)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

/// Wait up to two seconds for an event of `event_type`.
#[allow(dead_code)]
pub async fn wait_for(events: &mut EventReceiver, event_type: &str) -> Option<ControlEvent> {
    tokio::time::timeout(Duration::from_secs(2), async {
        while let Some(event) = events.recv().await {
            if event.event_type() == event_type {
                return Some(event.as_ref().clone());
            }
        }
        None
    })
    .await
    .ok()
    .flatten()
}

/// Drain queued event types without waiting.
#[allow(dead_code)]
pub fn drain(events: &mut EventReceiver) -> Vec<&'static str> {
    let mut seen = Vec::new();
    while let Some(event) = events.try_recv() {
        seen.push(event.event_type());
    }
    seen
}
