//! Dispatch webhook contract: payload shape on the wire, and the
//! fire-and-forget policy under endpoint failure.

mod common;

use std::time::Duration;

use comanda_api::entities::order::{OrderKind, OrderStatus};
use comanda_api::services::dispatch::{DispatchPayload, DispatchService};
use common::{cart_item, delivery_request, TestApp};
use rust_decimal_macros::dec;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn ingested_payload(app: &TestApp) -> DispatchPayload {
    let order = app
        .services
        .orders
        .ingest(delivery_request(vec![cart_item(
            Uuid::new_v4(),
            "Feijoada completa",
            2,
            dec!(32.00),
        )]))
        .await
        .expect("ingest");
    DispatchPayload::load(&app.db, order.id)
        .await
        .expect("payload")
}

#[tokio::test]
async fn payload_carries_order_snapshot_and_flattened_items() {
    let app = TestApp::new().await;
    let payload = ingested_payload(&app).await;

    assert_eq!(payload.kind, OrderKind::Delivery);
    assert_eq!(payload.status, OrderStatus::Received);
    assert_eq!(payload.total, dec!(72.00));
    assert_eq!(payload.items.len(), 1);
    assert_eq!(payload.items[0].quantity, 2);
    assert_eq!(payload.items[0].price, dec!(32.00));
    assert!(payload.customer.is_some());
    assert!(payload.address.is_some());
}

#[tokio::test]
async fn successful_delivery_posts_json() {
    let app = TestApp::new().await;
    let payload = ingested_payload(&app).await;

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/dispatch"))
        .and(body_partial_json(serde_json::json!({
            "order_id": payload.order_id,
            "status": "received",
            "kind": "delivery",
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let service = DispatchService::new(
        Some(format!("{}/dispatch", server.uri())),
        Duration::from_secs(2),
    );
    service
        .send(&format!("{}/dispatch", server.uri()), &payload)
        .await
        .expect("2xx answer is a success");
}

#[tokio::test]
async fn non_2xx_answer_is_an_error_for_send_but_swallowed_by_notify() {
    let app = TestApp::new().await;
    let payload = ingested_payload(&app).await;

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let url = format!("{}/dispatch", server.uri());
    let service = DispatchService::new(Some(url.clone()), Duration::from_secs(2));

    assert!(service.send(&url, &payload).await.is_err());

    // notify logs and swallows; it must not panic or propagate.
    service.notify(payload).await;
}

#[tokio::test]
async fn unreachable_endpoint_is_swallowed_by_notify() {
    let app = TestApp::new().await;
    let payload = ingested_payload(&app).await;

    let service = DispatchService::new(
        Some("http://127.0.0.1:9/dispatch".to_string()),
        Duration::from_millis(300),
    );
    service.notify(payload).await;
}

#[tokio::test]
async fn transition_succeeds_even_when_dispatch_endpoint_is_down() {
    let app = TestApp::new().await;

    let order = app
        .services
        .orders
        .ingest(delivery_request(vec![cart_item(
            Uuid::new_v4(),
            "Feijoada",
            1,
            dec!(32.00),
        )]))
        .await
        .expect("ingest");

    for target in [OrderStatus::Confirmed, OrderStatus::Preparing] {
        app.services
            .order_status
            .apply_transition(order.id, target, "kitchen-1")
            .await
            .expect("transition");
    }

    // The dispatch endpoint is unreachable; the transition must still commit
    // because notification is a decoupled, best-effort intent.
    let service = DispatchService::new(
        Some("http://127.0.0.1:9/dispatch".to_string()),
        Duration::from_millis(300),
    );

    let updated = app
        .services
        .order_status
        .apply_transition(order.id, OrderStatus::OutForDelivery, "kitchen-1")
        .await
        .expect("transition commits regardless of webhook fate");
    assert_eq!(updated.status, OrderStatus::OutForDelivery);

    let payload = DispatchPayload::load(&app.db, order.id)
        .await
        .expect("payload");
    service.notify(payload).await;

    let persisted = app
        .services
        .orders
        .get_order(order.id)
        .await
        .expect("get")
        .expect("order exists");
    assert_eq!(persisted.status, OrderStatus::OutForDelivery);
}
