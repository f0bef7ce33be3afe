//! Order Lifecycle Manager
//!
//! Sole owner of the orders this bot has placed. Two policies run through
//! one cancellation helper:
//! - expiry: orders resting for at least `timeout` are cancelled at the
//!   start of every trade execution
//! - recycling: `free_up_funds` cancels the oldest resting buys until
//!   their estimated locked collateral covers a shortfall
//!
//! Every operation holds the collection lock for its full duration,
//! including the exchange calls, so mutations never interleave.

use crate::error::CopyError;
use crate::gateway::ExchangeGateway;
use crate::types::{ManagedOrder, Side};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Resting orders older than this are cancelled
pub const ORDER_TIMEOUT_SECS: i64 = 3600;

pub struct OrderManager {
    exchange: Arc<dyn ExchangeGateway>,
    orders: Mutex<Vec<ManagedOrder>>,
    timeout: Duration,
}

impl OrderManager {
    pub fn new(exchange: Arc<dyn ExchangeGateway>) -> Self {
        Self::with_timeout(exchange, Duration::seconds(ORDER_TIMEOUT_SECS))
    }

    pub fn with_timeout(exchange: Arc<dyn ExchangeGateway>, timeout: Duration) -> Self {
        Self {
            exchange,
            orders: Mutex::new(Vec::new()),
            timeout,
        }
    }

    /// Track a successfully placed order, stamped now
    pub async fn add_order(&self, order_id: &str, side: Side, price: Decimal, size: Decimal, token_id: &str) {
        self.add_order_at(order_id, side, price, size, token_id, Utc::now()).await
    }

    pub async fn add_order_at(
        &self,
        order_id: &str,
        side: Side,
        price: Decimal,
        size: Decimal,
        token_id: &str,
        created_at: DateTime<Utc>,
    ) {
        let mut orders = self.orders.lock().await;
        orders.retain(|o| o.order_id != order_id);
        orders.push(ManagedOrder {
            order_id: order_id.to_string(),
            token_id: token_id.to_string(),
            side,
            price,
            size,
            created_at,
        });
        info!(
            "[Orders] Tracking {} {} token={} price={} size={} ({} open)",
            short_id(order_id),
            side,
            token_id,
            price,
            size,
            orders.len()
        );
    }

    /// Stop tracking an order the caller learned was filled or cancelled
    pub async fn remove_order(&self, order_id: &str) -> Option<ManagedOrder> {
        let mut orders = self.orders.lock().await;
        let idx = orders.iter().position(|o| o.order_id == order_id)?;
        let removed = orders.remove(idx);
        debug!("[Orders] Untracked {}", short_id(order_id));
        Some(removed)
    }

    /// Cancel every order whose age has reached the timeout.
    /// Returns the number of orders actually removed.
    pub async fn check_and_cancel_expired(&self) -> usize {
        self.check_and_cancel_expired_at(Utc::now()).await
    }

    pub async fn check_and_cancel_expired_at(&self, now: DateTime<Utc>) -> usize {
        let mut orders = self.orders.lock().await;

        let expired: Vec<String> = orders
            .iter()
            .filter(|o| now - o.created_at >= self.timeout)
            .map(|o| o.order_id.clone())
            .collect();

        if expired.is_empty() {
            return 0;
        }

        info!("[Orders] {} order(s) past {}s timeout", expired.len(), self.timeout.num_seconds());
        self.cancel_tracked(&mut orders, &expired).await.len()
    }

    /// Cancel the oldest resting buys until their estimated locked value
    /// (price x size) reaches `required`. Returns the value actually freed.
    /// Sells are never touched. With no buys tracked this is a no-op
    /// returning zero.
    pub async fn free_up_funds(&self, required: Decimal) -> Decimal {
        let mut orders = self.orders.lock().await;

        let mut oldest_first: Vec<&ManagedOrder> = orders.iter().filter(|o| o.locks_collateral()).collect();
        if oldest_first.is_empty() || required <= Decimal::ZERO {
            if required > Decimal::ZERO {
                debug!("[Orders] No resting buys to recycle for {} shortfall", required);
            }
            return Decimal::ZERO;
        }

        oldest_first.sort_by_key(|o| o.created_at);

        let mut accumulated = Decimal::ZERO;
        let mut selected = Vec::new();
        for order in oldest_first {
            if accumulated >= required {
                break;
            }
            accumulated += order.estimated_value();
            selected.push(order.order_id.clone());
        }

        info!(
            "[Orders] Freeing {} for shortfall {}: cancelling {} oldest order(s)",
            accumulated,
            required,
            selected.len()
        );

        let removed = self.cancel_tracked(&mut orders, &selected).await;
        removed.iter().map(ManagedOrder::estimated_value).sum()
    }

    /// Snapshot of tracked orders, oldest first
    pub async fn tracked(&self) -> Vec<ManagedOrder> {
        let mut snapshot = self.orders.lock().await.clone();
        snapshot.sort_by_key(|o| o.created_at);
        snapshot
    }

    /// Collateral the exchange holds against our resting buys
    pub async fn locked_value(&self) -> Decimal {
        self.orders
            .lock()
            .await
            .iter()
            .filter(|o| o.locks_collateral())
            .map(ManagedOrder::estimated_value)
            .sum()
    }

    pub async fn len(&self) -> usize {
        self.orders.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.orders.lock().await.is_empty()
    }

    /// Shared cancellation helper. An order leaves tracking on a confirmed
    /// cancel, or when the exchange no longer knows it (already filled or
    /// cancelled). Any other failure keeps it tracked for the next pass.
    async fn cancel_tracked(&self, orders: &mut Vec<ManagedOrder>, ids: &[String]) -> Vec<ManagedOrder> {
        let mut removed = Vec::new();

        for id in ids {
            let drop_it = match self.exchange.cancel_order(id).await {
                Ok(()) => {
                    info!("[Orders] Cancelled {}", short_id(id));
                    true
                }
                Err(CopyError::NotFound(reason)) => {
                    info!("[Orders] {} already resolved on exchange ({}), dropping", short_id(id), reason);
                    true
                }
                Err(e) => {
                    warn!("[Orders] Cancel {} failed, keeping for next pass: {}", short_id(id), e);
                    false
                }
            };

            if drop_it {
                if let Some(idx) = orders.iter().position(|o| &o.order_id == id) {
                    removed.push(orders.remove(idx));
                }
            }
        }

        removed
    }
}

fn short_id(order_id: &str) -> &str {
    order_id.get(..16).unwrap_or(order_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockExchange;
    use rust_decimal_macros::dec;

    fn manager() -> (Arc<MockExchange>, OrderManager) {
        let exchange = Arc::new(MockExchange::default());
        let manager = OrderManager::new(exchange.clone());
        (exchange, manager)
    }

    #[tokio::test]
    async fn test_expiry_fires_at_timeout_not_before() {
        let (exchange, manager) = manager();
        let t0 = Utc::now();
        manager.add_order_at("a", Side::Buy, dec!(0.5), dec!(10), "tok", t0).await;

        let just_before = t0 + Duration::seconds(ORDER_TIMEOUT_SECS - 1);
        assert_eq!(manager.check_and_cancel_expired_at(just_before).await, 0);
        assert!(exchange.cancelled().is_empty());

        let at_timeout = t0 + Duration::seconds(ORDER_TIMEOUT_SECS);
        assert_eq!(manager.check_and_cancel_expired_at(at_timeout).await, 1);
        assert_eq!(exchange.cancelled(), vec!["a".to_string()]);
        assert!(manager.is_empty().await);
    }

    #[tokio::test]
    async fn test_failed_cancel_stays_tracked() {
        let (exchange, manager) = manager();
        let t0 = Utc::now() - Duration::hours(2);
        manager.add_order_at("stuck", Side::Buy, dec!(0.5), dec!(10), "tok", t0).await;
        exchange.fail_cancel("stuck", CopyError::Network("timeout".into()));

        assert_eq!(manager.check_and_cancel_expired().await, 0);
        assert_eq!(manager.len().await, 1);

        exchange.cancel_failures.lock().unwrap().clear();
        assert_eq!(manager.check_and_cancel_expired().await, 1);
        assert!(manager.is_empty().await);
    }

    #[tokio::test]
    async fn test_not_found_cancel_drops_order() {
        let (exchange, manager) = manager();
        let t0 = Utc::now() - Duration::hours(2);
        manager.add_order_at("filled", Side::Buy, dec!(0.5), dec!(10), "tok", t0).await;
        exchange.fail_cancel("filled", CopyError::NotFound("order already matched".into()));

        assert_eq!(manager.check_and_cancel_expired().await, 1);
        assert!(manager.is_empty().await);
    }

    #[tokio::test]
    async fn test_free_up_funds_cancels_oldest_prefix() {
        let (exchange, manager) = manager();
        let t0 = Utc::now();
        // Inserted out of age order on purpose
        manager.add_order_at("mid", Side::Buy, dec!(0.5), dec!(20), "tok", t0 - Duration::minutes(20)).await;
        manager.add_order_at("new", Side::Buy, dec!(0.5), dec!(20), "tok", t0 - Duration::minutes(5)).await;
        manager.add_order_at("old", Side::Buy, dec!(0.5), dec!(20), "tok", t0 - Duration::minutes(40)).await;

        let freed = manager.free_up_funds(dec!(15)).await;

        assert_eq!(freed, dec!(20));
        assert_eq!(exchange.cancelled(), vec!["old".to_string(), "mid".to_string()]);
        let left: Vec<String> = manager.tracked().await.into_iter().map(|o| o.order_id).collect();
        assert_eq!(left, vec!["new".to_string()]);
    }

    #[tokio::test]
    async fn test_free_up_funds_two_orders_cover_shortfall_of_fifteen() {
        let (exchange, manager) = manager();
        let t0 = Utc::now();
        manager.add_order_at("first", Side::Buy, dec!(0.5), dec!(20), "tok", t0 - Duration::minutes(10)).await;
        manager.add_order_at("second", Side::Buy, dec!(0.25), dec!(40), "tok", t0 - Duration::minutes(5)).await;

        let freed = manager.free_up_funds(dec!(15)).await;

        assert_eq!(freed, dec!(20));
        assert_eq!(exchange.cancelled().len(), 2);
        assert!(manager.is_empty().await);
    }

    #[tokio::test]
    async fn test_free_up_funds_with_nothing_tracked_is_noop() {
        let (exchange, manager) = manager();
        assert_eq!(manager.free_up_funds(dec!(50)).await, Decimal::ZERO);
        assert!(exchange.cancelled().is_empty());
    }

    #[tokio::test]
    async fn test_free_up_funds_reports_only_confirmed_value() {
        let (exchange, manager) = manager();
        let t0 = Utc::now();
        manager.add_order_at("a", Side::Buy, dec!(0.5), dec!(10), "tok", t0 - Duration::minutes(2)).await;
        manager.add_order_at("b", Side::Buy, dec!(0.5), dec!(10), "tok", t0 - Duration::minutes(1)).await;
        exchange.fail_cancel("a", CopyError::Network("reset".into()));

        let freed = manager.free_up_funds(dec!(10)).await;

        assert_eq!(freed, Decimal::ZERO);
        assert_eq!(manager.len().await, 2);
        assert!(exchange.cancelled().is_empty());
    }

    #[tokio::test]
    async fn test_remove_order_and_duplicate_add() {
        let (_exchange, manager) = manager();
        manager.add_order("x", Side::Buy, dec!(0.3), dec!(5), "tok").await;
        manager.add_order("x", Side::Buy, dec!(0.4), dec!(5), "tok").await;
        assert_eq!(manager.len().await, 1);
        assert_eq!(manager.tracked().await[0].price, dec!(0.4));

        assert!(manager.remove_order("x").await.is_some());
        assert!(manager.remove_order("x").await.is_none());
    }

    #[tokio::test]
    async fn test_locked_value_sums_open_orders() {
        let (_exchange, manager) = manager();
        assert_eq!(manager.locked_value().await, Decimal::ZERO);
        manager.add_order("a", Side::Buy, dec!(0.5), dec!(10), "tok").await;
        manager.add_order("b", Side::Buy, dec!(0.2), dec!(25), "tok").await;
        assert_eq!(manager.locked_value().await, dec!(10));
    }

    #[tokio::test]
    async fn test_resting_sells_neither_lock_nor_recycle() {
        let (exchange, manager) = manager();
        let t0 = Utc::now();
        manager.add_order_at("sell-old", Side::Sell, dec!(0.5), dec!(100), "tok", t0 - Duration::minutes(30)).await;
        manager.add_order_at("buy-mid", Side::Buy, dec!(0.5), dec!(10), "tok", t0 - Duration::minutes(20)).await;
        manager.add_order_at("buy-new", Side::Buy, dec!(0.5), dec!(10), "tok", t0 - Duration::minutes(10)).await;

        assert_eq!(manager.locked_value().await, dec!(10));

        let freed = manager.free_up_funds(dec!(4)).await;

        assert_eq!(freed, dec!(5));
        assert_eq!(exchange.cancelled(), vec!["buy-mid".to_string()]);
        let left: Vec<String> = manager.tracked().await.into_iter().map(|o| o.order_id).collect();
        assert_eq!(left, vec!["sell-old".to_string(), "buy-new".to_string()]);
    }

    #[tokio::test]
    async fn test_free_up_funds_with_only_sells_is_noop() {
        let (exchange, manager) = manager();
        manager.add_order("sell1", Side::Sell, dec!(0.5), dec!(100), "tok").await;

        assert_eq!(manager.free_up_funds(dec!(20)).await, Decimal::ZERO);
        assert!(exchange.cancelled().is_empty());
        assert_eq!(manager.len().await, 1);
    }

    #[test]
    fn test_short_id_survives_multibyte_ids() {
        assert_eq!(short_id("0x0123456789abcdef0123"), "0x0123456789abcd");
        assert_eq!(short_id("0x0123456789abcéd"), "0x0123456789abcéd");
    }
}
