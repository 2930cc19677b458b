use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    entities::order::{
        self, Entity as OrderEntity, Model as OrderModel, OrderKind, OrderStatus,
    },
    errors::ServiceError,
    events::{Event, EventSender},
};

/// The fixed, directional transition table, parameterized by order kind.
///
/// Delivery rides the full path through `out_for_delivery`; pickup hands the
/// bag over from `ready` (or straight from `preparing`); dine-in is served at
/// the table from `preparing`. `cancelled` is reachable from every
/// non-terminal state, terminals have no exits.
pub fn legal_transitions(kind: OrderKind, from: OrderStatus) -> &'static [OrderStatus] {
    use OrderKind::*;
    use OrderStatus::*;

    match (kind, from) {
        (_, Received) => &[Confirmed, Cancelled],
        (_, Confirmed) => &[Preparing, Cancelled],

        (Delivery, Preparing) => &[Ready, OutForDelivery, Cancelled],
        (Delivery, Ready) => &[OutForDelivery, Cancelled],
        (Delivery, OutForDelivery) => &[Delivered, Cancelled],

        (Pickup, Preparing) => &[Ready, Delivered, Cancelled],
        (Pickup, Ready) => &[Delivered, Cancelled],
        // Unreachable for pickup orders, but the table stays total.
        (Pickup, OutForDelivery) => &[Delivered, Cancelled],

        (DineIn, Preparing) => &[Delivered, Cancelled],
        (DineIn, Ready) => &[Delivered, Cancelled],
        (DineIn, OutForDelivery) => &[Delivered, Cancelled],

        (_, Delivered) | (_, Cancelled) => &[],
    }
}

/// The effect of a validated transition: the target status, which milestone
/// timestamps to stamp, and whether the external dispatch collaborator must
/// be notified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub new_status: OrderStatus,
    pub stamp_confirmed_at: Option<DateTime<Utc>>,
    pub stamp_delivered_at: Option<DateTime<Utc>>,
    pub notify_dispatch: bool,
}

/// Validate `target` against the transition table and compute the side
/// effects. Pure; the order is untouched on rejection.
pub fn plan_transition(
    order: &OrderModel,
    target: OrderStatus,
    now: DateTime<Utc>,
) -> Result<StatusChange, ServiceError> {
    let legal = legal_transitions(order.kind, order.status);
    if !legal.contains(&target) {
        return Err(ServiceError::IllegalTransition {
            from: order.status,
            to: target,
            legal: legal.to_vec(),
        });
    }

    let stamp_confirmed_at = (matches!(target, OrderStatus::Preparing | OrderStatus::Ready)
        && order.confirmed_at.is_none())
    .then_some(now);
    let stamp_delivered_at = (target == OrderStatus::Delivered).then_some(now);

    Ok(StatusChange {
        new_status: target,
        stamp_confirmed_at,
        stamp_delivered_at,
        notify_dispatch: target == OrderStatus::OutForDelivery,
    })
}

/// Applies validated status transitions. Button presses and drag-and-drop
/// reclassification both funnel through `apply_transition`, so there is one
/// validation path.
#[derive(Clone)]
pub struct OrderStatusService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl OrderStatusService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Move an order to `target`, or fail with `IllegalTransition` leaving it
    /// untouched. Racing operators are resolved last-write-wins at the store
    /// layer; the state machine adds no extra guard.
    #[instrument(skip(self), fields(order_id = %order_id, target = %target, actor = actor))]
    pub async fn apply_transition(
        &self,
        order_id: Uuid,
        target: OrderStatus,
        actor: &str,
    ) -> Result<OrderModel, ServiceError> {
        let order = OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let now = Utc::now();
        let change = plan_transition(&order, target, now)?;
        let old_status = order.status;

        let mut active: order::ActiveModel = order.into();
        active.status = Set(change.new_status);
        if let Some(ts) = change.stamp_confirmed_at {
            active.confirmed_at = Set(Some(ts));
        }
        if let Some(ts) = change.stamp_delivered_at {
            active.delivered_at = Set(Some(ts));
        }
        active.updated_at = Set(Some(now));
        active.version = Set(active.version.unwrap() + 1);

        let updated = active.update(&*self.db).await?;

        info!(
            order_id = %order_id,
            old_status = %old_status,
            new_status = %target,
            actor = actor,
            "order status updated"
        );

        if let Err(e) = self
            .event_sender
            .send(Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status: target,
            })
            .await
        {
            warn!(error = %e, order_id = %order_id, "Failed to send status changed event");
        }

        // Side-effect intent only; delivery is fire-and-forget and its
        // failure never fails the transition.
        if change.notify_dispatch {
            if let Err(e) = self.event_sender.send(Event::DispatchRequested(order_id)).await {
                warn!(error = %e, order_id = %order_id, "Failed to send dispatch intent");
            }
        }

        Ok(updated)
    }

    /// Cancellation is a regular transition; legal from any non-terminal
    /// state.
    #[instrument(skip(self), fields(order_id = %order_id, actor = actor))]
    pub async fn cancel(&self, order_id: Uuid, actor: &str) -> Result<OrderModel, ServiceError> {
        self.apply_transition(order_id, OrderStatus::Cancelled, actor)
            .await
    }

    /// Legal next statuses for an order, so the operator UI can hide the
    /// rest.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn legal_targets(&self, order_id: Uuid) -> Result<Vec<OrderStatus>, ServiceError> {
        let order = OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        Ok(legal_transitions(order.kind, order.status).to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use sea_orm::Iterable;

    fn order(kind: OrderKind, status: OrderStatus) -> OrderModel {
        let now = Utc::now();
        OrderModel {
            id: Uuid::new_v4(),
            order_number: "ORD-TEST01".into(),
            customer_id: None,
            kind,
            status,
            subtotal: dec!(30.00),
            delivery_fee: dec!(5.00),
            upsell_total: dec!(0.00),
            total: dec!(35.00),
            payment_method: "cash".into(),
            change_due: None,
            notes: None,
            contact_phone: Some("+5511999990000".into()),
            delivery_address: None,
            table_label: None,
            idempotency_key: None,
            placed_at: now,
            confirmed_at: None,
            delivered_at: None,
            is_archived: false,
            created_at: now,
            updated_at: Some(now),
            version: 1,
        }
    }

    #[test]
    fn plan_is_total_over_every_kind_status_target_triple() {
        for kind in OrderKind::iter() {
            for from in OrderStatus::iter() {
                let legal = legal_transitions(kind, from);
                for target in OrderStatus::iter() {
                    let result = plan_transition(&order(kind, from), target, Utc::now());
                    if legal.contains(&target) {
                        assert!(
                            result.is_ok(),
                            "{kind:?}: {from:?} -> {target:?} should be legal"
                        );
                    } else {
                        match result {
                            Err(ServiceError::IllegalTransition {
                                from: f, to: t, ..
                            }) => {
                                assert_eq!(f, from);
                                assert_eq!(t, target);
                            }
                            other => unreachable!(
                                "{kind:?}: {from:?} -> {target:?} expected IllegalTransition, got {other:?}"
                            ),
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn terminals_have_no_exits() {
        for kind in OrderKind::iter() {
            assert!(legal_transitions(kind, OrderStatus::Delivered).is_empty());
            assert!(legal_transitions(kind, OrderStatus::Cancelled).is_empty());
        }
    }

    #[test]
    fn cancellation_is_reachable_from_every_non_terminal_state() {
        for kind in OrderKind::iter() {
            for from in OrderStatus::iter().filter(|s| !s.is_terminal()) {
                assert!(
                    legal_transitions(kind, from).contains(&OrderStatus::Cancelled),
                    "{kind:?}: {from:?} should allow cancellation"
                );
            }
        }
    }

    #[test]
    fn delivery_must_pass_through_out_for_delivery() {
        let err = plan_transition(
            &order(OrderKind::Delivery, OrderStatus::Preparing),
            OrderStatus::Delivered,
            Utc::now(),
        )
        .unwrap_err();
        match err {
            ServiceError::IllegalTransition { legal, .. } => {
                assert!(legal.contains(&OrderStatus::OutForDelivery));
                assert!(!legal.contains(&OrderStatus::Delivered));
            }
            other => unreachable!("expected IllegalTransition, got {other:?}"),
        }
    }

    #[test]
    fn dine_in_is_served_straight_from_preparing() {
        let change = plan_transition(
            &order(OrderKind::DineIn, OrderStatus::Preparing),
            OrderStatus::Delivered,
            Utc::now(),
        )
        .expect("dine-in serves from preparing");
        assert_eq!(change.new_status, OrderStatus::Delivered);
        assert!(change.stamp_delivered_at.is_some());
    }

    #[test]
    fn entering_preparing_stamps_confirmed_at_once() {
        let now = Utc::now();
        let change = plan_transition(
            &order(OrderKind::Delivery, OrderStatus::Confirmed),
            OrderStatus::Preparing,
            now,
        )
        .unwrap();
        assert_eq!(change.stamp_confirmed_at, Some(now));

        // Already stamped: left alone.
        let mut confirmed = order(OrderKind::Pickup, OrderStatus::Preparing);
        confirmed.confirmed_at = Some(now);
        let change = plan_transition(&confirmed, OrderStatus::Ready, now).unwrap();
        assert_eq!(change.stamp_confirmed_at, None);
    }

    #[test]
    fn out_for_delivery_raises_the_dispatch_intent() {
        let change = plan_transition(
            &order(OrderKind::Delivery, OrderStatus::Preparing),
            OrderStatus::OutForDelivery,
            Utc::now(),
        )
        .unwrap();
        assert!(change.notify_dispatch);
        assert_eq!(change.stamp_confirmed_at, None);
        assert_eq!(change.stamp_delivered_at, None);
    }

    #[test]
    fn repeating_the_current_status_is_rejected() {
        // Two terminals racing to mark the same order delivered: the second
        // write is rejected, the order is not corrupted.
        let err = plan_transition(
            &order(OrderKind::Delivery, OrderStatus::Delivered),
            OrderStatus::Delivered,
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, ServiceError::IllegalTransition { .. }));
    }
}
