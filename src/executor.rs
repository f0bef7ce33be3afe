//! Execution Coordinator: sizes each observed trade and places the copy.

use crate::error::Result;
use crate::gateway::ExchangeGateway;
use crate::order_manager::OrderManager;
use crate::services::retry::{with_retry, RetryConfig};
use crate::sizing::{SizingDecision, SizingEngine, SkipReason};
use crate::types::{OrderInstruction, TradeEvent};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Outcome of handling one trade event
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionResult {
    Placed {
        order_id: String,
        order: OrderInstruction,
    },
    Skipped {
        reason: SkipReason,
    },
}

pub struct TradeExecutor {
    exchange: Arc<dyn ExchangeGateway>,
    orders: Arc<OrderManager>,
    sizing: SizingEngine,
    retry: RetryConfig,
}

impl TradeExecutor {
    pub fn new(
        exchange: Arc<dyn ExchangeGateway>,
        orders: Arc<OrderManager>,
        sizing: SizingEngine,
        retry_limit: u32,
    ) -> Self {
        Self::with_retry_config(exchange, orders, sizing, RetryConfig::order_post(retry_limit))
    }

    pub fn with_retry_config(
        exchange: Arc<dyn ExchangeGateway>,
        orders: Arc<OrderManager>,
        sizing: SizingEngine,
        retry: RetryConfig,
    ) -> Self {
        Self {
            exchange,
            orders,
            sizing,
            retry,
        }
    }

    /// Consume events one at a time until every sender is dropped.
    pub async fn run(&self, mut rx: mpsc::Receiver<TradeEvent>) {
        info!("[Executor] Waiting for trades");

        while let Some(event) = rx.recv().await {
            match self.execute(&event).await {
                Ok(ExecutionResult::Placed { order_id, order }) => info!(
                    "[Executor] Copied {} -> order {} {} {} @ {} (notional {})",
                    event.short_hash(),
                    order_id,
                    order.side,
                    order.size,
                    order.price,
                    order.notional()
                ),
                Ok(ExecutionResult::Skipped { reason }) => info!(
                    "[Executor] Skipped {} token={} quote={}: {}",
                    event.short_hash(),
                    event.token_id,
                    event.quote_amount,
                    reason
                ),
                Err(e) => warn!(
                    "[Executor] Failed to copy {} token={}: {}",
                    event.short_hash(),
                    event.token_id,
                    e
                ),
            }
        }

        info!("[Executor] Event channel closed");
    }

    /// Expire stale orders, size the trade, then post with bounded retry
    /// and track the result.
    pub async fn execute(&self, event: &TradeEvent) -> Result<ExecutionResult> {
        self.orders.check_and_cancel_expired().await;

        let order = match self.sizing.size(event).await? {
            SizingDecision::Place(order) => order,
            SizingDecision::Skip(reason) => return Ok(ExecutionResult::Skipped { reason }),
        };

        info!(
            "[Executor] Placing {} {} @ {} token={} for {}",
            order.side,
            order.size,
            order.price,
            order.token_id,
            event.short_hash()
        );

        let order_id = with_retry(&self.retry, "order post", || self.exchange.place_order(&order)).await?;

        self.orders
            .add_order(&order_id, order.side, order.price, order.size, &order.token_id)
            .await;

        Ok(ExecutionResult::Placed { order_id, order })
    }
}
