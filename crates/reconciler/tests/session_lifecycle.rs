//! End-to-end lifecycle tests against the in-memory remote.
//!
//! All tests run in paused time, so timeouts and cadences elapse instantly
//! and deterministically.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use vigil_events::{EventBroadcaster, EventSubscription, SessionKey};
use vigil_reconciler::{
    CreateSession, CredentialHealth, Error, HealthStatus, InMemoryRemote, LoopConfig, MemberId,
    MemberState, ReconfigureSession, Reconfigured, SessionController, TargetId, TargetState,
};

fn remote() -> InMemoryRemote {
    InMemoryRemote::builder()
        .accept("token-a")
        .accept("token-b")
        .target("t-1", TargetState::new("Beta", vec![]))
        .target("t-2", TargetState::new("Gamma", vec![]))
        .build()
}

fn controller(remote: &InMemoryRemote) -> SessionController {
    SessionController::new(
        Arc::new(remote.clone()),
        Arc::new(EventBroadcaster::new()),
        LoopConfig::default(),
    )
}

fn create(target: &str, name: Option<&str>, label: Option<&str>, cadence: u64) -> CreateSession {
    CreateSession {
        credentials: "token-a".into(),
        target_id: target.into(),
        desired_name: name.map(str::to_string),
        desired_label: label.map(str::to_string),
        cadence_secs: Some(cadence),
    }
}

fn reconfigure(credentials: Option<&str>, label: Option<&str>, cadence: u64) -> ReconfigureSession {
    ReconfigureSession {
        target_id: "t-1".into(),
        desired_name: Some("Alpha".to_string()),
        desired_label: label.map(str::to_string),
        cadence_secs: Some(cadence),
        credentials: credentials.map(Into::into),
    }
}

/// Let spawned loops run everything that is ready without advancing far.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

fn messages(sub: &mut EventSubscription) -> Vec<String> {
    sub.drain().into_iter().map(|e| e.message).collect()
}

// ===== Scenarios =====

/// Given a remote named "Beta" and a session locking the name to "Alpha"
/// When the first cycle runs
/// Then exactly one rename is issued and the session is PROTECTING
#[tokio::test(start_paused = true)]
async fn name_drift_is_corrected_exactly_once() {
    let remote = remote();
    let controller = controller(&remote);

    let key = controller
        .create_session(create("t-1", Some("Alpha"), None, 10))
        .await
        .unwrap();
    settle().await;

    assert_eq!(
        remote.rename_calls(),
        vec![("Alpha".to_string(), TargetId::new("t-1"))]
    );
    let summary = controller.session(&key).await.unwrap();
    assert_eq!(summary.health, HealthStatus::Protecting);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(remote.fetch_count(), 2);
    assert_eq!(remote.rename_calls().len(), 1);
}

/// Given fetches that always time out and a cadence of 10s
/// When three cycles have failed
/// Then the counter is 3 and the cadence still applies
/// And after the fourth failure the next cycle waits 15s
#[tokio::test(start_paused = true)]
async fn repeated_timeouts_switch_to_retry_delay() {
    let remote = remote();
    remote.hang_fetches(true);
    let controller = controller(&remote);

    let key = controller
        .create_session(create("t-1", Some("Alpha"), None, 10))
        .await
        .unwrap();

    // Failures complete at t=20, 50, 80; cycle 4 starts at t=90.
    tokio::time::sleep(Duration::from_secs(85)).await;
    let summary = controller.session(&key).await.unwrap();
    assert_eq!(summary.consecutive_failures, 3);
    assert_eq!(summary.health, HealthStatus::Reconnecting);
    assert_eq!(summary.credential_health, CredentialHealth::InvalidOrExpired);
    assert_eq!(remote.fetch_count(), 3);

    // Fourth failure at t=110; with backoff cycle 5 starts at t=125, not 120.
    tokio::time::sleep(Duration::from_secs(27)).await;
    let summary = controller.session(&key).await.unwrap();
    assert_eq!(summary.consecutive_failures, 4);
    assert_eq!(remote.fetch_count(), 4);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(remote.fetch_count(), 4, "cadence must not apply above the threshold");

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(remote.fetch_count(), 5);
}

/// Given two drifting members and the first one rejecting the label
/// When a cycle runs
/// Then both are attempted, health is PROTECTING and credential health ACTIVE
#[tokio::test(start_paused = true)]
async fn one_failed_label_does_not_fail_the_cycle() {
    let remote = remote();
    remote.put_target(
        "t-1",
        TargetState::new(
            "Beta",
            vec![
                MemberState::new("m-1", Some("old")),
                MemberState::new("m-2", None),
            ],
        ),
    );
    remote.fail_labels_for("m-1");
    let controller = controller(&remote);

    let key = controller
        .create_session(create("t-1", None, Some("Guard"), 10))
        .await
        .unwrap();
    settle().await;

    assert_eq!(remote.label_calls().len(), 2);
    let summary = controller.session(&key).await.unwrap();
    assert_eq!(summary.health, HealthStatus::Protecting);
    assert_eq!(summary.credential_health, CredentialHealth::Active);
    assert_eq!(summary.consecutive_failures, 0);
}

/// Given a session whose fetch takes 5s
/// When it is terminated while the fetch is in flight
/// Then the cycle completes silently, nothing is rescheduled and it is unlisted
#[tokio::test(start_paused = true)]
async fn terminate_during_fetch_stops_everything() {
    let remote = remote();
    remote.set_fetch_latency(Some(Duration::from_secs(5)));
    let controller = controller(&remote);
    let mut sub = controller.events().subscribe().await;

    let key = controller
        .create_session(create("t-1", Some("Alpha"), None, 5))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(remote.fetch_count(), 1);

    controller.terminate_session(&key).await;
    let before = messages(&mut sub);
    assert_eq!(before.last().map(String::as_str), Some("session terminated"));

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(sub.drain().is_empty(), "no events may follow termination");
    assert!(controller.list_sessions().await.is_empty());
    assert_eq!(remote.fetch_count(), 1);
    assert!(remote.rename_calls().is_empty());
}

// ===== Properties =====

/// Given fetches slower than the cadence
/// When the session runs for a while
/// Then cycles never overlap
#[tokio::test(start_paused = true)]
async fn cycles_never_overlap() {
    let remote = remote();
    remote.set_fetch_latency(Some(Duration::from_secs(12)));
    let controller = controller(&remote);

    controller
        .create_session(create("t-1", None, None, 5))
        .await
        .unwrap();

    // Fetches start at t=0, 17, 34, 51, 68, 85.
    tokio::time::sleep(Duration::from_secs(100)).await;
    assert_eq!(remote.max_concurrent_fetches(&TargetId::new("t-1")), 1);
    assert_eq!(remote.fetch_count(), 6);
}

/// Given a running session
/// When it is reconfigured with different credentials
/// Then the handle is replaced and the events start with a re-authentication notice
#[tokio::test(start_paused = true)]
async fn credential_rotation_replaces_the_handle() {
    let remote = remote();
    let controller = controller(&remote);
    let mut sub = controller.events().subscribe().await;

    let key = controller
        .create_session(create("t-1", Some("Alpha"), None, 7))
        .await
        .unwrap();
    settle().await;
    sub.drain();

    let outcome = controller
        .reconfigure_session(&key, reconfigure(Some("token-b"), None, 7))
        .await;
    assert_eq!(outcome, Ok(Reconfigured::Rotated));

    let events = messages(&mut sub);
    assert!(events.first().unwrap().contains("re-authenticating"));
    assert!(events.iter().any(|m| m == "session activated"));

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(remote.fetching_handles(), vec![1, 2]);

    let summary = controller.session(&key).await.unwrap();
    assert_eq!(summary.credentials, "token-b");
    assert!(summary.running);
    assert_eq!(controller.list_sessions().await.len(), 1);
}

/// Given a running session
/// When it is reconfigured without new credentials
/// Then the loop and handle are kept and the cadence floor still applies
#[tokio::test(start_paused = true)]
async fn reconfigure_in_place_keeps_the_loop() {
    let remote = remote();
    let controller = controller(&remote);

    let key = controller
        .create_session(create("t-1", Some("Alpha"), None, 7))
        .await
        .unwrap();
    settle().await;

    let outcome = controller
        .reconfigure_session(&key, reconfigure(Some("token-a"), Some("Guard"), 2))
        .await;
    assert_eq!(outcome, Ok(Reconfigured::InPlace));

    let summary = controller.session(&key).await.unwrap();
    assert_eq!(summary.cadence_secs, 5);
    assert_eq!(summary.desired_label.as_deref(), Some("Guard"));

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(remote.fetching_handles(), vec![1]);
    let authentications = remote
        .calls()
        .into_iter()
        .filter(|c| matches!(c, vigil_reconciler::RemoteCall::Authenticate { .. }))
        .count();
    assert_eq!(authentications, 1);
}

/// Given a running session
/// When a rotation's credentials are rejected
/// Then the stopped record stays listed as INVALID/EXPIRED
/// And supplying good credentials later restarts it
#[tokio::test(start_paused = true)]
async fn failed_rotation_leaves_a_stopped_record() {
    let remote = remote();
    let controller = controller(&remote);

    let key = controller
        .create_session(create("t-1", None, None, 7))
        .await
        .unwrap();
    settle().await;

    let outcome = controller
        .reconfigure_session(&key, reconfigure(Some("token-x"), None, 7))
        .await;
    assert!(matches!(outcome, Err(Error::Auth { .. })));

    let summary = controller.session(&key).await.unwrap();
    assert!(!summary.running);
    assert_eq!(summary.credential_health, CredentialHealth::InvalidOrExpired);

    let fetches = remote.fetch_count();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(remote.fetch_count(), fetches, "stopped session must not poll");

    let outcome = controller
        .reconfigure_session(&key, reconfigure(Some("token-a"), None, 7))
        .await;
    assert_eq!(outcome, Ok(Reconfigured::Rotated));
    settle().await;
    let summary = controller.session(&key).await.unwrap();
    assert!(summary.running);
    assert_eq!(summary.health, HealthStatus::Protecting);
}

/// Given two sessions
/// When the first one's credentials rotate
/// Then it keeps its position in the listing
#[tokio::test(start_paused = true)]
async fn rotation_keeps_listing_position() {
    let remote = remote();
    let controller = controller(&remote);

    let first = controller
        .create_session(create("t-1", None, None, 7))
        .await
        .unwrap();
    let second = controller
        .create_session(create("t-2", None, None, 7))
        .await
        .unwrap();
    controller
        .reconfigure_session(&first, reconfigure(Some("token-b"), None, 7))
        .await
        .unwrap();

    let keys: Vec<SessionKey> = controller
        .list_sessions()
        .await
        .into_iter()
        .map(|s| s.session_key)
        .collect();
    assert_eq!(keys, vec![first, second]);
}

#[tokio::test(start_paused = true)]
async fn rejected_credentials_create_nothing() {
    let remote = remote();
    let controller = controller(&remote);
    let mut sub = controller.events().subscribe().await;

    let mut request = create("t-1", Some("Alpha"), None, 7);
    request.credentials = "token-x".into();
    let result = controller.create_session(request).await;

    assert!(matches!(result, Err(Error::Auth { .. })));
    assert!(controller.list_sessions().await.is_empty());
    let events = sub.drain();
    assert_eq!(events.len(), 1);
    assert!(events.first().unwrap().is_error());
    assert!(events.first().unwrap().message.starts_with("login error"));
}

#[tokio::test(start_paused = true)]
async fn blank_target_is_rejected() {
    let remote = remote();
    let controller = controller(&remote);
    let result = controller.create_session(create(" ", None, None, 7)).await;
    assert!(matches!(result, Err(Error::InvalidRequest { .. })));
    assert!(remote.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn terminate_is_idempotent() {
    let remote = remote();
    let controller = controller(&remote);
    let mut sub = controller.events().subscribe().await;

    controller.terminate_session(&SessionKey::generate()).await;
    assert!(sub.drain().is_empty());

    let key = controller
        .create_session(create("t-1", None, None, 7))
        .await
        .unwrap();
    controller.terminate_session(&key).await;
    controller.terminate_session(&key).await;
    let terminations = messages(&mut sub)
        .into_iter()
        .filter(|m| m == "session terminated")
        .count();
    assert_eq!(terminations, 1);
}

#[tokio::test(start_paused = true)]
async fn reconfigure_unknown_session_is_not_found() {
    let remote = remote();
    let controller = controller(&remote);
    let result = controller
        .reconfigure_session(&SessionKey::generate(), reconfigure(None, None, 7))
        .await;
    assert!(matches!(result, Err(Error::SessionNotFound { .. })));
}

#[tokio::test(start_paused = true)]
async fn missing_cadence_defaults_to_seven_seconds() {
    let remote = remote();
    let controller = controller(&remote);
    let mut request = create("t-1", None, None, 0);
    request.cadence_secs = None;
    let key = controller.create_session(request).await.unwrap();
    assert_eq!(controller.session(&key).await.unwrap().cadence_secs, 7);

    let key = controller
        .create_session(create("t-1", None, None, 1))
        .await
        .unwrap();
    assert_eq!(controller.session(&key).await.unwrap().cadence_secs, 5);
}

/// Given one session on a missing target and one on a healthy target
/// When both run
/// Then the failing one does not affect the healthy one
#[tokio::test(start_paused = true)]
async fn sessions_fail_independently() {
    let remote = remote();
    let controller = controller(&remote);

    let broken = controller
        .create_session(create("t-missing", None, None, 5))
        .await
        .unwrap();
    let healthy = controller
        .create_session(create("t-2", Some("Delta"), None, 5))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(21)).await;

    let broken = controller.session(&broken).await.unwrap();
    let healthy = controller.session(&healthy).await.unwrap();
    assert_eq!(broken.health, HealthStatus::Reconnecting);
    assert!(broken.consecutive_failures >= 4);
    assert_eq!(healthy.health, HealthStatus::Protecting);
    assert_eq!(healthy.consecutive_failures, 0);
    assert_eq!(
        remote.target_state(&TargetId::new("t-2")).map(|t| t.current_name),
        Some("Delta".to_string())
    );
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_every_session() {
    let remote = remote();
    let controller = controller(&remote);

    controller
        .create_session(create("t-1", None, None, 5))
        .await
        .unwrap();
    controller
        .create_session(create("t-2", None, None, 5))
        .await
        .unwrap();
    settle().await;

    controller.shutdown().await;
    let fetches = remote.fetch_count();
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert!(controller.list_sessions().await.is_empty());
    assert_eq!(remote.fetch_count(), fetches);
}

// ===== Bounded remote calls =====

/// Given a remote whose rename never completes
/// When a cycle finds name drift
/// Then the rename is abandoned after the action timeout and the cycle fails
#[tokio::test(start_paused = true)]
async fn hung_rename_fails_the_cycle_after_action_timeout() {
    let remote = remote();
    remote.hang_renames(true);
    let controller = controller(&remote);
    let mut sub = controller.events().subscribe().await;

    let key = controller
        .create_session(create("t-1", Some("Alpha"), None, 10))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(19)).await;
    assert_eq!(controller.session(&key).await.unwrap().consecutive_failures, 0);

    tokio::time::sleep(Duration::from_secs(2)).await;
    let summary = controller.session(&key).await.unwrap();
    assert_eq!(summary.consecutive_failures, 1);
    assert_eq!(summary.health, HealthStatus::Reconnecting);
    assert_eq!(remote.rename_calls().len(), 1);

    let errors: Vec<String> = sub
        .drain()
        .into_iter()
        .filter(|e| e.is_error())
        .map(|e| e.message)
        .collect();
    assert_eq!(errors, vec!["sync error: set_name timed out after 20s"]);
}

/// Given two drifting members and a label change for the first that never completes
/// When a cycle runs
/// Then the first times out as that member's failure only, the second is
/// still attempted and the cycle succeeds
#[tokio::test(start_paused = true)]
async fn hung_label_is_isolated_to_its_member() {
    let remote = remote();
    remote.put_target(
        "t-1",
        TargetState::new(
            "Beta",
            vec![
                MemberState::new("m-1", Some("old")),
                MemberState::new("m-2", None),
            ],
        ),
    );
    remote.hang_labels_for("m-1");
    let controller = controller(&remote);

    let key = controller
        .create_session(create("t-1", None, Some("Guard"), 30))
        .await
        .unwrap();
    settle().await;
    assert_eq!(remote.label_calls().len(), 1, "second member waits its turn");

    tokio::time::sleep(Duration::from_secs(21)).await;
    assert_eq!(
        remote.label_calls(),
        vec![MemberId::new("m-1"), MemberId::new("m-2")]
    );
    let summary = controller.session(&key).await.unwrap();
    assert_eq!(summary.consecutive_failures, 0);
    assert_eq!(summary.health, HealthStatus::Protecting);
    assert_eq!(summary.credential_health, CredentialHealth::Active);
}

/// Given a credential exchange slower than the auth timeout
/// When a session is created
/// Then creation fails with a timeout and nothing is registered
#[tokio::test(start_paused = true)]
async fn slow_credential_exchange_times_out() {
    let remote = remote();
    remote.set_auth_latency(Some(Duration::from_secs(40)));
    let controller = controller(&remote);

    let outcome = controller
        .create_session(create("t-1", Some("Alpha"), None, 10))
        .await;

    assert!(matches!(
        outcome,
        Err(Error::Auth { ref reason, .. }) if reason.contains("authenticate timed out after 30s")
    ));
    assert!(controller.list_sessions().await.is_empty());
    assert_eq!(remote.fetch_count(), 0);
}

// ===== Termination ordering =====

/// Given a rotation whose credential exchange takes 5s and is then rejected
/// When the session is terminated while the exchange is in flight
/// Then the rotation reports the session as gone and no event follows the
/// termination notice
#[tokio::test(start_paused = true)]
async fn terminate_during_rotation_ends_the_event_stream() {
    let remote = remote();
    let controller = Arc::new(controller(&remote));
    let mut sub = controller.events().subscribe().await;

    let key = controller
        .create_session(create("t-1", Some("Alpha"), None, 7))
        .await
        .unwrap();
    settle().await;
    sub.drain();
    remote.set_auth_latency(Some(Duration::from_secs(5)));

    let rotation = tokio::spawn({
        let controller = Arc::clone(&controller);
        let key = key.clone();
        async move {
            controller
                .reconfigure_session(&key, reconfigure(Some("token-x"), None, 7))
                .await
        }
    });
    tokio::time::sleep(Duration::from_secs(1)).await;
    controller.terminate_session(&key).await;

    let outcome = rotation.await.unwrap();
    assert!(matches!(outcome, Err(Error::SessionNotFound { .. })));

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(
        messages(&mut sub),
        vec!["credentials changed: re-authenticating", "session terminated"]
    );
    assert!(controller.list_sessions().await.is_empty());
}

/// Given a rotation whose credential exchange takes 5s and then succeeds
/// When the session is terminated while the exchange is in flight
/// Then no loop is started and no activation is announced
#[tokio::test(start_paused = true)]
async fn terminate_during_successful_rotation_starts_nothing() {
    let remote = remote();
    let controller = Arc::new(controller(&remote));
    let mut sub = controller.events().subscribe().await;

    let key = controller
        .create_session(create("t-1", Some("Alpha"), None, 7))
        .await
        .unwrap();
    settle().await;
    sub.drain();
    remote.set_auth_latency(Some(Duration::from_secs(5)));

    let rotation = tokio::spawn({
        let controller = Arc::clone(&controller);
        let key = key.clone();
        async move {
            controller
                .reconfigure_session(&key, reconfigure(Some("token-b"), None, 7))
                .await
        }
    });
    tokio::time::sleep(Duration::from_secs(1)).await;
    controller.terminate_session(&key).await;

    let outcome = rotation.await.unwrap();
    assert!(matches!(outcome, Err(Error::SessionNotFound { .. })));

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(
        messages(&mut sub).last().map(String::as_str),
        Some("session terminated")
    );
    assert_eq!(remote.fetching_handles(), vec![1]);
}
