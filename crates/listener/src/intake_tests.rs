use std::sync::atomic::Ordering;
use std::sync::Arc;

use dispatch::{DeploymentId, ExecutionStore, HookError, HookOverride, ProviderError};

use super::*;
use crate::testing::{signed, FakeGate, FakeHook, Fixture, QUEUED};

fn delivery<'a>(event: &'a str, body: &'a str, signature: &'a str) -> Delivery<'a> {
    Delivery {
        event: Some(event),
        id: Some("d-1"),
        signature: Some(signature),
        body: body.as_bytes(),
    }
}

async fn submit(fixture: &Fixture, body: &str) -> Result<IntakeOutcome, IntakeError> {
    let signature = signed(body);
    fixture
        .intake
        .handle(delivery("workflow_job", body, &signature))
        .await
}

fn with_deployment(body: &str) -> String {
    body.replace(
        r#""installation": {"id": 7}"#,
        r#""installation": {"id": 7}, "deployment": {"id": 5}"#,
    )
}

#[tokio::test]
async fn bad_signature_is_forbidden() {
    let fixture = Fixture::plain();
    let result = fixture
        .intake
        .handle(delivery("workflow_job", QUEUED, "sha256=00"))
        .await;
    assert!(matches!(
        result,
        Err(IntakeError::Forbidden(SignatureError::Mismatch))
    ));
    assert!(fixture.store.list_recent(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn ping_is_answered() {
    let fixture = Fixture::plain();
    let body = r#"{"zen": "Keep it logically awesome."}"#;
    let signature = signed(body);
    let outcome = fixture
        .intake
        .handle(delivery("ping", body, &signature))
        .await
        .unwrap();
    assert_eq!(outcome, IntakeOutcome::Pong);
}

#[tokio::test]
async fn other_events_and_actions_are_ignored() {
    let fixture = Fixture::plain();
    let signature = signed(QUEUED);
    let outcome = fixture
        .intake
        .handle(delivery("push", QUEUED, &signature))
        .await
        .unwrap();
    assert!(matches!(outcome, IntakeOutcome::Ignored { .. }));

    let completed = QUEUED.replace(r#""action": "queued""#, r#""action": "completed""#);
    let outcome = submit(&fixture, &completed).await.unwrap();
    assert!(matches!(outcome, IntakeOutcome::Ignored { .. }));
}

#[tokio::test]
async fn malformed_payload_after_valid_signature() {
    let fixture = Fixture::plain();
    let result = submit(&fixture, r#"{"action": "queued"}"#).await;
    assert!(matches!(result, Err(IntakeError::Malformed { .. })));
    let result = submit(&fixture, "not json").await;
    assert!(matches!(result, Err(IntakeError::Malformed { .. })));
}

#[tokio::test]
async fn jobs_without_the_gate_label_are_ignored() {
    let fixture = Fixture::plain();
    let body = QUEUED.replace(r#"["self-hosted", "Linux"]"#, r#"["ubuntu-latest"]"#);
    let outcome = submit(&fixture, &body).await.unwrap();
    assert!(matches!(outcome, IntakeOutcome::Ignored { .. }));
}

#[tokio::test]
async fn gate_label_can_be_disabled() {
    let fixture = Fixture::new(
        IntakeConfig {
            require_label: None,
        },
        Arc::new(FakeGate::open()),
        None,
    );
    let body = QUEUED.replace(r#"["self-hosted", "Linux"]"#, r#"["linux"]"#);
    let outcome = submit(&fixture, &body).await.unwrap();
    assert!(matches!(outcome, IntakeOutcome::Accepted { .. }));
}

#[tokio::test]
async fn queued_job_starts_an_execution() {
    let fixture = Fixture::plain();
    let outcome = submit(&fixture, QUEUED).await.unwrap();
    let IntakeOutcome::Accepted { name, existing } = outcome else {
        panic!("expected acceptance, got {outcome:?}");
    };
    assert_eq!(name.as_str(), "acme-svc-42");
    assert!(!existing);

    let record = fixture.store.get(&name).await.unwrap().unwrap();
    assert_eq!(record.selection.backend.as_str(), "linux-pool");
    assert_eq!(fixture.queue.len().await, 1);
}

#[tokio::test]
async fn duplicate_delivery_reuses_the_running_execution() {
    let fixture = Fixture::plain();
    fixture.backend.hold.store(true, Ordering::SeqCst);

    let first = submit(&fixture, QUEUED).await.unwrap();
    let second = submit(&fixture, QUEUED).await.unwrap();
    assert!(matches!(
        first,
        IntakeOutcome::Accepted { ref name, existing: false } if name.as_str() == "acme-svc-42"
    ));
    assert!(matches!(
        second,
        IntakeOutcome::Accepted { ref name, existing: true } if name.as_str() == "acme-svc-42"
    ));
    assert_eq!(fixture.store.list_active().await.unwrap().len(), 1);
    assert_eq!(fixture.queue.len().await, 1);

    fixture.backend.hold.store(false, Ordering::SeqCst);
    fixture.backend.release.notify_waiters();
}

#[tokio::test]
async fn unmatched_labels_are_a_soft_no_op() {
    let fixture = Fixture::plain();
    let body = QUEUED.replace(r#"["self-hosted", "Linux"]"#, r#"["self-hosted", "arm64"]"#);
    let outcome = submit(&fixture, &body).await.unwrap();
    assert_eq!(outcome, IntakeOutcome::NoMatch);
}

#[tokio::test]
async fn pending_deployment_defers_the_job() {
    let gate = Arc::new(FakeGate::answering(Ok(true)));
    let fixture = Fixture::new(IntakeConfig::default(), gate.clone(), None);
    let outcome = submit(&fixture, &with_deployment(QUEUED)).await.unwrap();
    assert_eq!(
        outcome,
        IntakeOutcome::Deferred {
            deployment: DeploymentId::new(5)
        }
    );
    assert_eq!(gate.asked.lock().unwrap().as_slice(), [DeploymentId::new(5)]);
}

#[tokio::test]
async fn gate_lookup_failure_surfaces() {
    let gate = Arc::new(FakeGate::answering(Err(ProviderError::Unavailable {
        message: "down".to_string(),
    })));
    let fixture = Fixture::new(IntakeConfig::default(), gate, None);
    let result = submit(&fixture, &with_deployment(QUEUED)).await;
    assert!(matches!(result, Err(IntakeError::DeploymentGate(_))));
}

#[tokio::test]
async fn hook_can_reroute_the_job() {
    let hook = Arc::new(FakeHook::answering(Ok(Some(HookOverride {
        backend: Some("gpu".to_string()),
        labels: Some(vec!["gpu".to_string()]),
    }))));
    let fixture = Fixture::new(
        IntakeConfig::default(),
        Arc::new(FakeGate::open()),
        Some(hook.clone()),
    );
    let IntakeOutcome::Accepted { name, .. } = submit(&fixture, QUEUED).await.unwrap() else {
        panic!("expected acceptance");
    };
    let record = fixture.store.get(&name).await.unwrap().unwrap();
    assert_eq!(record.selection.backend.as_str(), "gpu");

    let inputs = hook.inputs.lock().unwrap();
    assert_eq!(inputs[0].backends.len(), 2);
    assert_eq!(
        inputs[0]
            .default_selection
            .as_ref()
            .map(|s| s.backend.as_str()),
        Some("linux-pool")
    );
    assert_eq!(inputs[0].payload["workflow_job"]["id"], 42);
}

#[tokio::test]
async fn hook_can_decline_the_job() {
    let hook = Arc::new(FakeHook::answering(Ok(Some(HookOverride::default()))));
    let fixture = Fixture::new(IntakeConfig::default(), Arc::new(FakeGate::open()), Some(hook));
    let outcome = submit(&fixture, QUEUED).await.unwrap();
    assert_eq!(outcome, IntakeOutcome::Skipped);
}

#[tokio::test]
async fn hook_naming_an_unknown_backend_fails() {
    let hook = Arc::new(FakeHook::answering(Ok(Some(HookOverride {
        backend: Some("mainframe".to_string()),
        labels: Some(vec!["x".to_string()]),
    }))));
    let fixture = Fixture::new(IntakeConfig::default(), Arc::new(FakeGate::open()), Some(hook));
    let result = submit(&fixture, QUEUED).await;
    assert!(matches!(
        result,
        Err(IntakeError::Hook(HookError::UnknownBackend { .. }))
    ));
}
