use std::sync::Arc;

use serde_json::json;
use webhook_relay::{
    ContentType, Dispatcher, DispatcherConfig, EventCatalog, OwnerId, SubscriptionRegistry,
};

#[tokio::main]
async fn main() {
    let catalog = EventCatalog::new(["order.created"]).expect("catalog");
    let registry = Arc::new(SubscriptionRegistry::new(catalog.clone()));
    let dispatcher = Dispatcher::new(catalog, registry.clone(), DispatcherConfig::default());

    let subscription = registry
        .create(
            OwnerId::new("demo"),
            "order.created",
            "http://127.0.0.1:8080/hook",
            ContentType::Json,
        )
        .await
        .expect("subscription");

    dispatcher
        .dispatch("order.created", &json!({"id": 1, "total": "9.99"}))
        .await
        .expect("dispatch");

    tokio::time::sleep(std::time::Duration::from_secs(2)).await;

    for attempt in dispatcher.attempt_log().query(&subscription.id).await {
        println!(
            "attempt {} success={} status={:?}",
            attempt.attempt_number, attempt.success, attempt.response_status
        );
    }

    let mut dispatcher = dispatcher;
    dispatcher.shutdown().await;
}
