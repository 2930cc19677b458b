//! Realtime propagation of order, inventory and schedule changes.
//!
//! Every observer owns an explicit [`Subscription`] handle; there is no
//! ambient global channel. Delivery is at-least-once: a lagging or closed
//! channel makes the handle emit [`SyncMessage::Refresh`], telling the
//! observer to re-fetch from the store, and a heartbeat tick does the same on
//! a fixed cadence so nobody is ever silently stale for longer than one
//! heartbeat interval.

use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::entities::order::OrderStatus;

/// What a single observer is interested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionFilter {
    /// Kitchen board: every order placed today (store time zone).
    OrdersToday,
    /// Customer tracking view: one order by id.
    Order(Uuid),
    /// Storefront banner: weekly schedule and override changes.
    StoreConfig,
    /// Ops dashboard: stock level changes.
    Inventory,
}

/// A store mutation, already committed, as seen by the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    Order {
        order_id: Uuid,
        status: OrderStatus,
        /// Calendar day the order was placed, in the store time zone.
        placed_on: NaiveDate,
    },
    Inventory {
        product_id: Uuid,
    },
    StoreConfig,
}

impl SubscriptionFilter {
    fn matches(&self, event: &ChangeEvent, today: NaiveDate) -> bool {
        match (self, event) {
            (SubscriptionFilter::OrdersToday, ChangeEvent::Order { placed_on, .. }) => {
                *placed_on == today
            }
            (SubscriptionFilter::Order(id), ChangeEvent::Order { order_id, .. }) => id == order_id,
            (SubscriptionFilter::StoreConfig, ChangeEvent::StoreConfig) => true,
            (SubscriptionFilter::Inventory, ChangeEvent::Inventory { .. }) => true,
            _ => false,
        }
    }
}

/// What a subscription hands its observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncMessage {
    /// A mutation matching the filter; carries the changed fields.
    Changed(ChangeEvent),
    /// Re-fetch from the store: heartbeat tick, or the channel lagged/closed.
    Refresh,
}

/// Fan-out hub. One per process; cheap to clone handles from.
#[derive(Debug)]
pub struct SyncBridge {
    tx: broadcast::Sender<ChangeEvent>,
    heartbeat: Duration,
    tz: Tz,
}

impl SyncBridge {
    pub fn new(capacity: usize, heartbeat: Duration, tz: Tz) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, heartbeat, tz }
    }

    /// Publish a committed mutation to every live subscription. Publishing
    /// with no subscribers is not an error.
    pub fn publish(&self, event: ChangeEvent) {
        match self.tx.send(event) {
            Ok(receivers) => debug!(receivers, "change event published"),
            Err(_) => debug!("change event dropped, no live subscriptions"),
        }
    }

    /// Open a subscription. The returned handle owns its receiver and its
    /// heartbeat timer; dropping (or `close`-ing) it tears both down.
    pub fn subscribe(&self, filter: SubscriptionFilter) -> Subscription {
        let mut heartbeat = interval_at(Instant::now() + self.heartbeat, self.heartbeat);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Subscription {
            filter,
            rx: self.tx.subscribe(),
            heartbeat,
            tz: self.tz,
            degraded: false,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// One observer's live subscription.
pub struct Subscription {
    filter: SubscriptionFilter,
    rx: broadcast::Receiver<ChangeEvent>,
    heartbeat: Interval,
    tz: Tz,
    /// Set once the underlying channel is gone; from then on the handle is a
    /// pure polling timer.
    degraded: bool,
}

impl Subscription {
    pub fn filter(&self) -> &SubscriptionFilter {
        &self.filter
    }

    /// Wait for the next message. Never returns an error: channel trouble
    /// degrades to `Refresh` instead of surfacing to the UI.
    pub async fn recv(&mut self) -> SyncMessage {
        loop {
            if self.degraded {
                self.heartbeat.tick().await;
                return SyncMessage::Refresh;
            }

            tokio::select! {
                _ = self.heartbeat.tick() => return SyncMessage::Refresh,
                received = self.rx.recv() => match received {
                    Ok(event) => {
                        let today = Utc::now().with_timezone(&self.tz).date_naive();
                        if self.filter.matches(&event, today) {
                            return SyncMessage::Changed(event);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, filter = ?self.filter, "subscription lagged, observer must re-fetch");
                        return SyncMessage::Refresh;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!(filter = ?self.filter, "subscription channel closed, degrading to heartbeat polling");
                        self.degraded = true;
                        return SyncMessage::Refresh;
                    }
                }
            }
        }
    }

    /// Explicit teardown; equivalent to dropping the handle.
    pub fn close(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    const TZ: Tz = chrono_tz::America::Sao_Paulo;

    fn today() -> NaiveDate {
        Utc::now().with_timezone(&TZ).date_naive()
    }

    fn order_event(order_id: Uuid, placed_on: NaiveDate) -> ChangeEvent {
        ChangeEvent::Order {
            order_id,
            status: OrderStatus::Confirmed,
            placed_on,
        }
    }

    #[tokio::test]
    async fn delivers_matching_order_event() {
        let bridge = SyncBridge::new(16, Duration::from_secs(30), TZ);
        let order_id = Uuid::new_v4();
        let mut sub = bridge.subscribe(SubscriptionFilter::Order(order_id));

        bridge.publish(order_event(order_id, today()));

        match sub.recv().await {
            SyncMessage::Changed(ChangeEvent::Order { order_id: got, .. }) => {
                assert_eq!(got, order_id)
            }
            other => unreachable!("expected Changed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn orders_today_filter_skips_other_days() {
        let bridge = SyncBridge::new(16, Duration::from_millis(40), TZ);
        let mut sub = bridge.subscribe(SubscriptionFilter::OrdersToday);

        let yesterday = today().pred_opt().unwrap();
        bridge.publish(order_event(Uuid::new_v4(), yesterday));

        // The stale-day event is filtered out; the next message is the
        // heartbeat refresh.
        assert_eq!(sub.recv().await, SyncMessage::Refresh);
    }

    #[tokio::test]
    async fn store_config_filter_ignores_order_traffic() {
        let bridge = SyncBridge::new(16, Duration::from_secs(30), TZ);
        let mut sub = bridge.subscribe(SubscriptionFilter::StoreConfig);

        bridge.publish(order_event(Uuid::new_v4(), today()));
        bridge.publish(ChangeEvent::StoreConfig);

        assert_eq!(sub.recv().await, SyncMessage::Changed(ChangeEvent::StoreConfig));
    }

    #[tokio::test]
    async fn lagged_subscription_requests_refresh() {
        let bridge = SyncBridge::new(1, Duration::from_secs(30), TZ);
        let mut sub = bridge.subscribe(SubscriptionFilter::OrdersToday);

        for _ in 0..4 {
            bridge.publish(order_event(Uuid::new_v4(), today()));
        }

        assert_eq!(sub.recv().await, SyncMessage::Refresh);
    }

    #[tokio::test]
    async fn closed_channel_degrades_to_heartbeat_polling() {
        let bridge = SyncBridge::new(16, Duration::from_millis(20), TZ);
        let mut sub = bridge.subscribe(SubscriptionFilter::Inventory);
        drop(bridge);

        // First recv observes the closed channel, later ones are pure polling.
        assert_eq!(sub.recv().await, SyncMessage::Refresh);
        assert_eq!(sub.recv().await, SyncMessage::Refresh);
    }

    #[tokio::test]
    async fn heartbeat_fires_without_any_traffic() {
        let bridge = SyncBridge::new(16, Duration::from_millis(20), TZ);
        let mut sub = bridge.subscribe(SubscriptionFilter::OrdersToday);

        assert_eq!(sub.recv().await, SyncMessage::Refresh);
    }

    #[tokio::test]
    async fn dropping_handles_releases_receivers() {
        let bridge = SyncBridge::new(16, Duration::from_secs(30), TZ);
        let a = bridge.subscribe(SubscriptionFilter::OrdersToday);
        let b = bridge.subscribe(SubscriptionFilter::StoreConfig);
        assert_eq!(bridge.subscriber_count(), 2);

        a.close();
        drop(b);
        assert_eq!(bridge.subscriber_count(), 0);
    }
}
