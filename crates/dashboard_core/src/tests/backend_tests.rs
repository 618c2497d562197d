use super::*;

use std::sync::Arc;

use crate::test_support::{TestBackend, DASHBOARD_ID};

fn policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_backoff_ms: 100,
        backoff_multiplier: 2.0,
    }
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried_with_backoff() {
    let backend = TestBackend::new();
    backend.fail_transiently(2);
    let retrying = RetryingBackend::new(backend.clone(), policy(3));

    let started = tokio::time::Instant::now();
    let catalog = retrying.get_catalog("test-ws").await.expect("third attempt succeeds");
    assert!(!catalog.attributes.is_empty());
    assert_eq!(backend.call_count("get_catalog"), 3);
    assert!(started.elapsed() >= std::time::Duration::from_millis(300));
}

#[tokio::test(start_paused = true)]
async fn retries_stop_at_max_attempts() {
    let backend = TestBackend::new();
    backend.fail_transiently(5);
    let retrying = RetryingBackend::new(backend.clone(), policy(2));

    let err = retrying
        .get_workspace_settings("test-ws")
        .await
        .expect_err("still failing");
    assert!(err.is_transient());
    assert_eq!(backend.call_count("get_workspace_settings"), 2);
}

#[tokio::test]
async fn permanent_failures_are_not_retried() {
    let backend = TestBackend::new();
    backend.fail("get_dashboard", BackendError::NotFound("dashboard".into()));
    let retrying = RetryingBackend::new(backend.clone(), policy(5));

    let err = retrying
        .get_dashboard("test-ws", &ObjRef::identifier(DASHBOARD_ID))
        .await
        .expect_err("not found");
    assert_eq!(err, BackendError::NotFound("dashboard".into()));
    assert_eq!(backend.call_count("get_dashboard"), 1);
}

#[tokio::test]
async fn default_policy_makes_a_single_attempt() {
    let backend = TestBackend::new();
    backend.fail_transiently(1);
    let retrying = RetryingBackend::new(backend.clone(), RetryPolicy::default());

    assert!(retrying.get_catalog("test-ws").await.is_err());
    assert_eq!(backend.call_count("get_catalog"), 1);
    assert!(retrying.get_catalog("test-ws").await.is_ok());
}

#[tokio::test]
async fn shared_handles_forward_to_the_backend() {
    let backend: Arc<dyn AnalyticalBackend> =
        Arc::new(TestBackend::new().with_hostname("https://analytics.example.com"));
    let retrying = RetryingBackend::new(backend, policy(1));

    assert_eq!(
        retrying.hostname().as_deref(),
        Some("https://analytics.example.com")
    );
    assert!(retrying.capabilities().supports_element_uris);
    let document = retrying
        .get_dashboard("test-ws", &ObjRef::identifier(DASHBOARD_ID))
        .await
        .expect("dashboard");
    assert_eq!(document.title, "Sales");
}

#[tokio::test]
async fn missing_backend_reports_unavailable() {
    let backend = MissingBackend;
    assert_eq!(backend.capabilities(), BackendCapabilities::default());
    assert_eq!(backend.hostname(), None);
    let err = backend.get_catalog("sales").await.expect_err("no backend");
    assert!(matches!(err, BackendError::Unavailable(message) if message.contains("sales")));
}

#[test]
fn errors_map_to_payload_codes() {
    let cases = [
        (BackendError::NotFound("x".into()), ErrorCode::NotFound),
        (BackendError::Unauthorized("x".into()), ErrorCode::Unauthorized),
        (BackendError::Unavailable("x".into()), ErrorCode::Unavailable),
        (BackendError::Unsupported("x".into()), ErrorCode::Unsupported),
        (BackendError::Unexpected("x".into()), ErrorCode::Internal),
    ];
    for (err, code) in cases {
        let payload = err.to_payload();
        assert_eq!(payload.code, code);
        assert_eq!(payload.message, err.to_string());
    }
}
