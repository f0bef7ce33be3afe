//! Scripted gateway doubles shared by the unit tests

use crate::error::{CopyError, Result};
use crate::gateway::{ChainGateway, DataSource, ExchangeGateway};
use crate::types::{BookLevel, CallReceipt, MarketInfo, OrderBook, OrderInstruction};
use alloy::primitives::Address;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

pub fn book(bids: &[Decimal], asks: &[Decimal]) -> OrderBook {
    let level = |p: &Decimal| BookLevel {
        price: *p,
        size: Decimal::from(100),
    };
    OrderBook {
        bids: bids.iter().map(level).collect(),
        asks: asks.iter().map(level).collect(),
    }
}

#[derive(Default)]
pub struct MockExchange {
    pub books: Mutex<HashMap<String, OrderBook>>,
    pub markets: Mutex<HashMap<String, MarketInfo>>,
    pub placed: Mutex<Vec<OrderInstruction>>,
    pub cancelled: Mutex<Vec<String>>,
    /// Per-order cancel failures; the error is returned on every attempt
    pub cancel_failures: Mutex<HashMap<String, CopyError>>,
    /// Consumed one per place attempt before succeeding
    pub place_failures: Mutex<VecDeque<CopyError>>,
    pub place_attempts: AtomicUsize,
    pub market_calls: AtomicUsize,
    next_id: AtomicU64,
}

impl MockExchange {
    pub fn set_book(&self, token_id: &str, book: OrderBook) {
        self.books.lock().unwrap().insert(token_id.to_string(), book);
    }

    pub fn set_market(&self, token_id: &str, condition_id: &str, closed: bool) {
        self.markets.lock().unwrap().insert(
            token_id.to_string(),
            MarketInfo {
                condition_id: condition_id.to_string(),
                closed,
                question: format!("market {}", token_id),
            },
        );
    }

    pub fn fail_cancel(&self, order_id: &str, err: CopyError) {
        self.cancel_failures
            .lock()
            .unwrap()
            .insert(order_id.to_string(), err);
    }

    pub fn fail_next_place(&self, err: CopyError) {
        self.place_failures.lock().unwrap().push_back(err);
    }

    pub fn placed(&self) -> Vec<OrderInstruction> {
        self.placed.lock().unwrap().clone()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExchangeGateway for MockExchange {
    async fn order_book(&self, token_id: &str) -> Result<OrderBook> {
        Ok(self
            .books
            .lock()
            .unwrap()
            .get(token_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn place_order(&self, order: &OrderInstruction) -> Result<String> {
        self.place_attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.place_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.placed.lock().unwrap().push(order.clone());
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(format!("order-{}", id))
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        if let Some(err) = self.cancel_failures.lock().unwrap().get(order_id) {
            return Err(err.clone());
        }
        self.cancelled.lock().unwrap().push(order_id.to_string());
        Ok(())
    }

    async fn market(&self, token_id: &str) -> Result<MarketInfo> {
        self.market_calls.fetch_add(1, Ordering::SeqCst);
        self.markets
            .lock()
            .unwrap()
            .get(token_id)
            .cloned()
            .ok_or_else(|| CopyError::NotFound(format!("no market for {}", token_id)))
    }
}

#[derive(Default)]
pub struct MockChain {
    /// Successive balance readings per address; the last one repeats
    pub balances: Mutex<HashMap<String, VecDeque<Decimal>>>,
    /// Conditional-token balance per token id
    pub token_balances: Mutex<HashMap<String, Decimal>>,
    pub native: Mutex<Decimal>,
    pub batch_calls: Mutex<Vec<Vec<String>>>,
    pub calls: Mutex<Vec<(Address, Vec<u8>)>>,
    pub call_labels: Mutex<Vec<String>>,
    /// The next N authorized calls fail
    pub failing_calls: AtomicUsize,
}

impl MockChain {
    pub fn set_balances(&self, address: &str, readings: &[Decimal]) {
        self.balances
            .lock()
            .unwrap()
            .insert(address.to_lowercase(), readings.iter().copied().collect());
    }

    pub fn set_token_balance(&self, token_id: &str, balance: Decimal) {
        self.token_balances
            .lock()
            .unwrap()
            .insert(token_id.to_string(), balance);
    }

    pub fn calls(&self) -> Vec<(Address, Vec<u8>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChainGateway for MockChain {
    async fn balance(&self, address: &str) -> Result<Decimal> {
        let mut balances = self.balances.lock().unwrap();
        let readings = balances
            .get_mut(&address.to_lowercase())
            .ok_or_else(|| CopyError::Chain(format!("no balance scripted for {}", address)))?;
        let value = if readings.len() > 1 {
            readings.pop_front()
        } else {
            readings.front().copied()
        };
        value.ok_or_else(|| CopyError::Chain(format!("no balance scripted for {}", address)))
    }

    async fn batch_balance(&self, accounts: &[String], token_ids: &[String]) -> Result<Vec<Decimal>> {
        assert_eq!(accounts.len(), token_ids.len());
        self.batch_calls.lock().unwrap().push(token_ids.to_vec());
        let balances = self.token_balances.lock().unwrap();
        Ok(token_ids
            .iter()
            .map(|t| balances.get(t).copied().unwrap_or(Decimal::ZERO))
            .collect())
    }

    async fn native_balance(&self, _address: &str) -> Result<Decimal> {
        Ok(*self.native.lock().unwrap())
    }

    async fn execute_authorized_call(&self, to: Address, data: Vec<u8>, label: &str) -> Result<CallReceipt> {
        self.call_labels.lock().unwrap().push(label.to_string());
        let failing = self.failing_calls.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_calls.store(failing - 1, Ordering::SeqCst);
            return Err(CopyError::Redemption("relay rejected transaction".into()));
        }
        let n = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((to, data));
            calls.len()
        };
        Ok(CallReceipt {
            transaction_hash: format!("0xtx{}", n),
        })
    }
}

pub struct MockData {
    pub activity: Mutex<HashMap<String, Result<Vec<Value>>>>,
    pub positions: Mutex<Result<Vec<Value>>>,
    pub trades: Mutex<Result<Vec<Value>>>,
    pub activity_calls: Mutex<Vec<String>>,
}

impl Default for MockData {
    fn default() -> Self {
        Self {
            activity: Mutex::new(HashMap::new()),
            positions: Mutex::new(Ok(Vec::new())),
            trades: Mutex::new(Ok(Vec::new())),
            activity_calls: Mutex::new(Vec::new()),
        }
    }
}

impl MockData {
    pub fn set_activity(&self, wallet: &str, page: Result<Vec<Value>>) {
        self.activity.lock().unwrap().insert(wallet.to_string(), page);
    }

    pub fn set_positions(&self, page: Result<Vec<Value>>) {
        *self.positions.lock().unwrap() = page;
    }

    pub fn set_trades(&self, page: Result<Vec<Value>>) {
        *self.trades.lock().unwrap() = page;
    }
}

#[async_trait]
impl DataSource for MockData {
    async fn activity(&self, wallet: &str, _limit: usize) -> Result<Vec<Value>> {
        self.activity_calls.lock().unwrap().push(wallet.to_string());
        self.activity
            .lock()
            .unwrap()
            .get(wallet)
            .cloned()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn positions(&self, _user: &str, _limit: usize) -> Result<Vec<Value>> {
        self.positions.lock().unwrap().clone()
    }

    async fn trades(&self, _user: &str, _limit: usize) -> Result<Vec<Value>> {
        self.trades.lock().unwrap().clone()
    }
}
