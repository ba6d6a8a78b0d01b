use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use webhook_relay::{
    AttemptLog, ContentType, DeliveryAttempt, DispatchError, Dispatcher, DispatcherConfig,
    EventCatalog, OwnerId, SubscriptionId, SubscriptionRegistry,
};

fn test_catalog() -> EventCatalog {
    EventCatalog::new(["order.created", "order.deleted"]).unwrap()
}

fn test_config() -> DispatcherConfig {
    DispatcherConfig {
        worker_count: 2,
        retry_base_ms: 10,
        retry_max_ms: 100,
        request_timeout: Duration::from_secs(2),
        ..Default::default()
    }
}

fn engine(config: DispatcherConfig) -> (Dispatcher, Arc<SubscriptionRegistry>) {
    let catalog = test_catalog();
    let registry = Arc::new(SubscriptionRegistry::new(catalog.clone()));
    let dispatcher = Dispatcher::new(catalog, registry.clone(), config);
    (dispatcher, registry)
}

/// Poll the attempt log until `n` attempts exist for the subscription
/// or a few seconds pass.
async fn wait_for_attempts(
    log: &Arc<dyn AttemptLog>,
    subscription: &SubscriptionId,
    n: usize,
) -> Vec<DeliveryAttempt> {
    for _ in 0..250 {
        let attempts = log.query(subscription).await;
        if attempts.len() >= n {
            return attempts;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    log.query(subscription).await
}

#[tokio::test]
async fn successful_delivery_records_one_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .and(header("content-type", "application/json"))
        .and(body_json(json!({"id": 1})))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;

    let (dispatcher, registry) = engine(test_config());
    let sub = registry
        .create(
            OwnerId::new("alice"),
            "order.created",
            format!("{}/hook", server.uri()),
            ContentType::Json,
        )
        .await
        .unwrap();

    dispatcher.dispatch("order.created", &json!({"id": 1})).await.unwrap();

    let log = dispatcher.attempt_log();
    let attempts = wait_for_attempts(&log, &sub.id, 1).await;
    assert_eq!(attempts.len(), 1);
    assert!(attempts[0].success);
    assert_eq!(attempts[0].attempt_number, 1);
    assert_eq!(attempts[0].response_status, Some(200));
    assert_eq!(attempts[0].response_message, "ok");
    assert_eq!(attempts[0].payload, br#"{"id":1}"#.to_vec());

    // No further attempts after success.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(log.query(&sub.id).await.len(), 1);

    let stored = registry.get(&sub.id).await.unwrap();
    assert!(stored.last_attempt_at.is_some());

    let mut dispatcher = dispatcher;
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn retries_until_receiver_recovers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(3)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let (dispatcher, registry) = engine(test_config());
    let sub = registry
        .create(OwnerId::new("alice"), "order.created", server.uri(), ContentType::Json)
        .await
        .unwrap();

    dispatcher.dispatch("order.created", &json!({"id": 7})).await.unwrap();

    let log = dispatcher.attempt_log();
    let attempts = wait_for_attempts(&log, &sub.id, 4).await;
    assert_eq!(attempts.len(), 4);

    let successes: Vec<bool> = attempts.iter().map(|a| a.success).collect();
    assert_eq!(successes, vec![false, false, false, true]);

    let numbers: Vec<u32> = attempts.iter().map(|a| a.attempt_number).collect();
    assert_eq!(numbers, vec![1, 2, 3, 4]);

    let statuses: Vec<Option<u16>> = attempts.iter().map(|a| a.response_status).collect();
    assert_eq!(statuses, vec![Some(500), Some(500), Some(500), Some(200)]);

    // Attempt ids order the records by creation.
    assert!(attempts.windows(2).all(|w| w[0].id < w[1].id));

    // Every retry resent the exact original bytes.
    assert!(attempts.iter().all(|a| a.payload == br#"{"id":7}"#.to_vec()));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(log.query(&sub.id).await.len(), 4);

    let mut dispatcher = dispatcher;
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn rejection_is_terminal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such hook"))
        .expect(1)
        .mount(&server)
        .await;

    let (dispatcher, registry) = engine(test_config());
    let sub = registry
        .create(OwnerId::new("alice"), "order.created", server.uri(), ContentType::Json)
        .await
        .unwrap();

    dispatcher.dispatch("order.created", &json!({"id": 1})).await.unwrap();

    let log = dispatcher.attempt_log();
    let attempts = wait_for_attempts(&log, &sub.id, 1).await;
    assert_eq!(attempts.len(), 1);
    assert!(!attempts[0].success);
    assert_eq!(attempts[0].response_status, Some(404));
    assert_eq!(attempts[0].response_message, "no such hook");

    // No retry is ever scheduled for a definitive rejection.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(log.query(&sub.id).await.len(), 1);

    let mut dispatcher = dispatcher;
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn encoding_failure_is_one_terminal_attempt() {
    let (dispatcher, registry) = engine(test_config());
    let sub = registry
        .create(
            OwnerId::new("alice"),
            "order.created",
            "http://localhost:1/hook",
            ContentType::Form,
        )
        .await
        .unwrap();

    // Nested object cannot be form-encoded.
    dispatcher
        .dispatch("order.created", &json!({"id": 1, "customer": {"name": "x"}}))
        .await
        .unwrap();

    let log = dispatcher.attempt_log();
    let attempts = wait_for_attempts(&log, &sub.id, 1).await;
    assert_eq!(attempts.len(), 1);
    assert!(!attempts[0].success);
    assert_eq!(attempts[0].attempt_number, 1);
    assert_eq!(attempts[0].response_status, None);
    assert!(attempts[0].response_message.contains("form encoding"));

    // Deterministic failure: no retry.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(log.query(&sub.id).await.len(), 1);

    let mut dispatcher = dispatcher;
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn exhaustion_stops_at_max_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let config = DispatcherConfig {
        max_attempts: 3,
        ..test_config()
    };
    let (dispatcher, registry) = engine(config);
    let sub = registry
        .create(OwnerId::new("alice"), "order.created", server.uri(), ContentType::Json)
        .await
        .unwrap();

    dispatcher.dispatch("order.created", &json!({"id": 1})).await.unwrap();

    let log = dispatcher.attempt_log();
    let attempts = wait_for_attempts(&log, &sub.id, 3).await;
    assert_eq!(attempts.len(), 3);
    assert!(attempts.iter().all(|a| !a.success));
    assert_eq!(
        attempts.iter().map(|a| a.attempt_number).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );

    // Sequence is exhausted; nothing further is scheduled.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(log.query(&sub.id).await.len(), 3);

    let mut dispatcher = dispatcher;
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn deleting_subscription_cancels_scheduled_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let config = DispatcherConfig {
        // Long enough to delete between the first attempt and the retry.
        retry_base_ms: 400,
        retry_max_ms: 1_000,
        ..test_config()
    };
    let (dispatcher, registry) = engine(config);
    let sub = registry
        .create(OwnerId::new("alice"), "order.created", server.uri(), ContentType::Json)
        .await
        .unwrap();

    dispatcher.dispatch("order.created", &json!({"id": 1})).await.unwrap();

    let log = dispatcher.attempt_log();
    let attempts = wait_for_attempts(&log, &sub.id, 1).await;
    assert_eq!(attempts.len(), 1);

    registry.delete(&sub.id).await.unwrap();

    // The retry comes due, finds the subscription gone, and is
    // dropped without producing a record.
    tokio::time::sleep(Duration::from_millis(1_200)).await;
    assert_eq!(log.query(&sub.id).await.len(), 1);

    let mut dispatcher = dispatcher;
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn failing_subscription_does_not_affect_siblings() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let config = DispatcherConfig {
        max_attempts: 2,
        ..test_config()
    };
    let (dispatcher, registry) = engine(config);

    // Nothing listens on port 9: connection refused, retryable.
    let unreachable = registry
        .create(OwnerId::new("alice"), "order.created", "http://127.0.0.1:9/hook", ContentType::Json)
        .await
        .unwrap();
    let healthy = registry
        .create(OwnerId::new("bob"), "order.created", server.uri(), ContentType::Json)
        .await
        .unwrap();

    dispatcher.dispatch("order.created", &json!({"id": 1})).await.unwrap();

    let log = dispatcher.attempt_log();

    let healthy_attempts = wait_for_attempts(&log, &healthy.id, 1).await;
    assert_eq!(healthy_attempts.len(), 1);
    assert!(healthy_attempts[0].success);

    let failed_attempts = wait_for_attempts(&log, &unreachable.id, 2).await;
    assert_eq!(failed_attempts.len(), 2);
    assert!(failed_attempts.iter().all(|a| !a.success));
    assert!(failed_attempts.iter().all(|a| a.response_status.is_none()));

    let mut dispatcher = dispatcher;
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn form_subscriptions_send_urlencoded_bodies() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("content-type", "application/x-www-form-urlencoded"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let (dispatcher, registry) = engine(test_config());
    let sub = registry
        .create(OwnerId::new("alice"), "order.created", server.uri(), ContentType::Form)
        .await
        .unwrap();

    dispatcher
        .dispatch("order.created", &json!({"id": 1, "state": "created"}))
        .await
        .unwrap();

    let log = dispatcher.attempt_log();
    let attempts = wait_for_attempts(&log, &sub.id, 1).await;
    assert_eq!(attempts.len(), 1);
    assert!(attempts[0].success);
    assert_eq!(attempts[0].payload, b"id=1&state=created".to_vec());

    let mut dispatcher = dispatcher;
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn unknown_event_is_rejected_at_dispatch() {
    let (dispatcher, _registry) = engine(test_config());

    let err = dispatcher
        .dispatch("user.created", &json!({"id": 1}))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        DispatchError::UnknownEvent { event: "user.created".to_string() }
    );

    let mut dispatcher = dispatcher;
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn dispatch_after_shutdown_fails() {
    let (dispatcher, _registry) = engine(test_config());

    let mut dispatcher = dispatcher;
    dispatcher.shutdown().await;
    assert!(!dispatcher.is_running());

    let err = dispatcher
        .dispatch("order.created", &json!({"id": 1}))
        .await
        .unwrap_err();
    assert_eq!(err, DispatchError::Shutdown);
}
