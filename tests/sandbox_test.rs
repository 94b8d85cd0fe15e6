//! Wiring tests: configuration file to running controller.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::indexing_slicing)]

use std::io::Write;
use std::time::Duration;

use vigil::sandbox::{build_state, sandbox_remote};
use vigil_core::{SandboxSection, SandboxTarget, VigilConfig};
use vigil_reconciler::{CreateSession, Credentials, HealthStatus, TargetId};

const CONFIG: &str = r#"
[server]
bind_address = "127.0.0.1:0"

[supervisor]
min_cadence_secs = 5
default_cadence_secs = 7
retry_delay_secs = 15
failure_threshold = 3
fetch_timeout_secs = 20
action_timeout_secs = 20
auth_timeout_secs = 30

[events]
observer_capacity = 16
max_consecutive_drops = 2

[sandbox]
accepted_credentials = ["demo-token"]

[[sandbox.targets]]
id = "grp-1"
name = "Original"
members = ["m-1", "m-2"]
"#;

fn sandbox() -> SandboxSection {
    SandboxSection {
        accepted_credentials: vec!["demo-token".to_string()],
        targets: vec![SandboxTarget {
            id: "grp-1".to_string(),
            name: "Original".to_string(),
            members: vec!["m-1".to_string(), "m-2".to_string()],
        }],
    }
}

#[test]
fn sandbox_seeds_targets_without_labels() {
    let remote = sandbox_remote(&sandbox());

    let state = remote
        .target_state(&TargetId::from("grp-1"))
        .expect("target should be seeded");
    assert_eq!(state.current_name, "Original");
    assert_eq!(state.members.len(), 2);
    assert!(state.members.iter().all(|m| m.current_label.is_none()));
    assert!(remote.target_state(&TargetId::from("grp-2")).is_none());
}

#[tokio::test(start_paused = true)]
async fn config_file_drives_a_working_controller() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(CONFIG.as_bytes()).expect("write config");

    let config = VigilConfig::load(Some(file.path())).expect("config should load");
    let state = build_state(&config);
    let controller = state.controller.clone();

    let rejected = controller
        .create_session(CreateSession {
            credentials: Credentials::new("other"),
            target_id: TargetId::from("grp-1"),
            desired_name: None,
            desired_label: None,
            cadence_secs: None,
        })
        .await;
    assert!(rejected.is_err());

    let key = controller
        .create_session(CreateSession {
            credentials: Credentials::new("demo-token"),
            target_id: TargetId::from("grp-1"),
            desired_name: Some("Locked".to_string()),
            desired_label: None,
            cadence_secs: Some(2),
        })
        .await
        .expect("sandbox credentials should authenticate");
    tokio::time::sleep(Duration::from_millis(100)).await;

    let summary = controller.session(&key).await.expect("session exists");
    assert_eq!(summary.cadence_secs, 5);
    assert_eq!(summary.health, HealthStatus::Protecting);
    assert!(summary.running);

    controller.shutdown().await;
    assert!(controller.list_sessions().await.is_empty());
}

#[test]
fn invalid_config_file_is_rejected() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(b"[supervisor]\nretry_delay_secs = 0\n")
        .expect("write config");

    assert!(VigilConfig::load(Some(file.path())).is_err());
}
