use std::sync::Arc;

use comanda_api::{
    db::{self, DbConfig},
    events::EventSender,
    handlers::AppServices,
};
use rust_decimal::Decimal;
use sea_orm::DatabaseConnection;
use tokio::sync::mpsc;
use uuid::Uuid;

pub const STORE_TZ: chrono_tz::Tz = chrono_tz::America::Sao_Paulo;

/// Helper harness wiring the service layer to a fresh in-memory SQLite
/// database. One connection keeps the in-memory database alive and shared.
pub struct TestApp {
    pub db: Arc<DatabaseConnection>,
    pub services: AppServices,
    pub event_sender: EventSender,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        let config = DbConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        };
        let pool = db::establish_connection_with_config(&config)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db = Arc::new(pool);
        let (event_tx, mut event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);

        // Keep the event channel drained; event fan-out has its own tests.
        let event_task = tokio::spawn(async move { while event_rx.recv().await.is_some() {} });

        let services = AppServices::new(db.clone(), event_sender.clone(), STORE_TZ);

        Self {
            db,
            services,
            event_sender,
            _event_task: event_task,
        }
    }

    /// Opt a product into stock tracking with the given initial quantity.
    pub async fn seed_stock(&self, quantity: i32) -> Uuid {
        let product_id = Uuid::new_v4();
        self.services
            .inventory
            .set_stock(product_id, quantity)
            .await
            .expect("failed to seed stock");
        product_id
    }
}

pub fn cart_item(
    product_id: Uuid,
    name: &str,
    quantity: i32,
    unit_price: Decimal,
) -> comanda_api::services::orders::CartItemInput {
    comanda_api::services::orders::CartItemInput {
        product_id,
        variation_id: None,
        name: name.to_string(),
        quantity,
        unit_price,
        customization: None,
        is_upsell: false,
    }
}

pub fn delivery_request(
    items: Vec<comanda_api::services::orders::CartItemInput>,
) -> comanda_api::services::orders::IngestOrderRequest {
    comanda_api::services::orders::IngestOrderRequest {
        idempotency_key: None,
        customer_id: None,
        customer_name: Some("Marina Duarte".to_string()),
        contact_phone: Some("+5511998765432".to_string()),
        kind: comanda_api::entities::order::OrderKind::Delivery,
        items,
        delivery_fee: Some(Decimal::new(800, 2)),
        delivery_address: Some(serde_json::json!({
            "street": "Rua das Laranjeiras",
            "number": "142",
            "district": "Centro"
        })),
        table_label: None,
        payment_method: "cash".to_string(),
        change_due: None,
        notes: None,
    }
}
