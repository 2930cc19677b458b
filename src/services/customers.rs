use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    entities::customer::{self, Entity as CustomerEntity, Model as CustomerModel},
    errors::ServiceError,
};

/// What the cart collaborator knows about the person placing the order.
#[derive(Debug, Clone, Default)]
pub struct CustomerHint {
    pub customer_id: Option<Uuid>,
    pub name: Option<String>,
    pub phone: Option<String>,
    /// JSON snapshot of the delivery address, stored as the customer's last
    /// known address.
    pub address: Option<String>,
}

/// Resolves or creates the placing customer for an ingestion.
///
/// Phone is a best-effort dedupe key, not a uniqueness constraint: two
/// concurrent first orders with the same new phone may race and create two
/// rows. Accepted and documented; the order still lands on one of them.
#[derive(Clone)]
pub struct CustomerService {
    db: Arc<DatabaseConnection>,
}

impl CustomerService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub async fn get_customer(&self, customer_id: Uuid) -> Result<CustomerModel, ServiceError> {
        CustomerEntity::find_by_id(customer_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Customer {} not found", customer_id)))
    }

    /// Resolution order: explicit identity, then phone lookup, then create.
    /// Returns `None` for anonymous orders (no identity and no phone, e.g. a
    /// walk-in dine-in table).
    #[instrument(skip(self, hint))]
    pub async fn resolve_or_create(
        &self,
        hint: &CustomerHint,
    ) -> Result<Option<CustomerModel>, ServiceError> {
        if let Some(customer_id) = hint.customer_id {
            let customer = self.get_customer(customer_id).await?;
            return Ok(Some(self.refresh_profile(customer, hint).await?));
        }

        let Some(phone) = hint.phone.as_deref().map(str::trim).filter(|p| !p.is_empty())
        else {
            return Ok(None);
        };

        let existing = CustomerEntity::find()
            .filter(customer::Column::Phone.eq(phone))
            .order_by_asc(customer::Column::CreatedAt)
            .one(&*self.db)
            .await?;

        if let Some(customer) = existing {
            return Ok(Some(self.refresh_profile(customer, hint).await?));
        }

        let customer_id = Uuid::new_v4();
        let now = Utc::now();
        let active = customer::ActiveModel {
            id: Set(customer_id),
            name: Set(hint
                .name
                .clone()
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| "Guest".to_string())),
            phone: Set(phone.to_string()),
            last_address: Set(hint.address.clone()),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        };
        let customer = active.insert(&*self.db).await?;

        info!(customer_id = %customer_id, "customer created from ingestion");
        Ok(Some(customer))
    }

    /// A new order refreshes what we know: display name and last delivery
    /// address.
    async fn refresh_profile(
        &self,
        customer: CustomerModel,
        hint: &CustomerHint,
    ) -> Result<CustomerModel, ServiceError> {
        let new_name = hint
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty() && *n != customer.name);
        let new_address = hint
            .address
            .as_deref()
            .filter(|a| Some(*a) != customer.last_address.as_deref());

        if new_name.is_none() && new_address.is_none() {
            return Ok(customer);
        }

        let mut active: customer::ActiveModel = customer.into();
        if let Some(name) = new_name {
            active.name = Set(name.to_string());
        }
        if let Some(address) = new_address {
            active.last_address = Set(Some(address.to_string()));
        }
        active.updated_at = Set(Some(Utc::now()));
        Ok(active.update(&*self.db).await?)
    }
}
