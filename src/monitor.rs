//! Event Monitor: polls watched wallets and emits each new trade once.
//!
//! Wallets are checked one after another per cycle. Within a wallet's page
//! events are emitted in the order the data API returned them, over a
//! bounded channel so a slow executor back-pressures the poller.

use crate::error::{CopyError, Result};
use crate::gateway::DataSource;
use crate::types::{Side, TradeEvent};
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Transaction ids remembered for deduplication
pub const SEEN_CAPACITY: usize = 1000;
/// Activity records requested per wallet per cycle
pub const ACTIVITY_PAGE_SIZE: usize = 20;

/// Values above this are millisecond timestamps
const MILLIS_THRESHOLD: i64 = 100_000_000_000;

/// Insertion-ordered set with a hard size cap; the oldest id is evicted first.
#[derive(Debug)]
pub struct SeenTransactions {
    order: VecDeque<String>,
    ids: HashSet<String>,
    capacity: usize,
}

impl SeenTransactions {
    pub fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity + 1),
            ids: HashSet::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Returns false when the id was already present.
    pub fn insert(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        self.ids.insert(id.to_string());
        self.order.push_back(id.to_string());

        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.ids.remove(&evicted);
            }
        }
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    /// Sleep between full passes over the wallets
    pub interval: Duration,
    /// Older activity is dropped without being emitted
    pub max_age: Duration,
}

pub struct TradeMonitor {
    data: Arc<dyn DataSource>,
    settings: MonitorSettings,
    seen: Mutex<SeenTransactions>,
    running: AtomicBool,
    /// Bumped by every `start`; a loop from an older start exits on wake
    generation: AtomicU64,
}

impl TradeMonitor {
    pub fn new(data: Arc<dyn DataSource>, settings: MonitorSettings) -> Self {
        Self {
            data,
            settings,
            seen: Mutex::new(SeenTransactions::new(SEEN_CAPACITY)),
            running: AtomicBool::new(false),
            generation: AtomicU64::new(0),
        }
    }

    /// Spawn the polling loop. Returns `None` if it is already running.
    pub fn start(self: &Arc<Self>, wallets: Vec<String>, tx: mpsc::Sender<TradeEvent>) -> Option<JoinHandle<()>> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            info!("[Monitor] Already running");
            return None;
        }

        info!(
            "[Monitor] Watching {} wallet(s) every {:?}: {}",
            wallets.len(),
            self.settings.interval,
            wallets.join(", ")
        );

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let monitor = Arc::clone(self);
        Some(tokio::spawn(async move {
            while monitor.is_current(generation) {
                if !monitor.poll_once(&wallets, &tx).await {
                    warn!("[Monitor] Event channel closed, stopping");
                    if monitor.is_current(generation) {
                        monitor.stop();
                    }
                    break;
                }
                tokio::time::sleep(monitor.settings.interval).await;
            }
            info!("[Monitor] Loop {} stopped", generation);
        }))
    }

    /// Takes effect at the top of the next cycle.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("[Monitor] Stopping after current cycle");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.is_running() && self.generation.load(Ordering::SeqCst) == generation
    }

    /// One pass over every wallet. Returns false once the receiver is gone.
    pub async fn poll_once(&self, wallets: &[String], tx: &mpsc::Sender<TradeEvent>) -> bool {
        for wallet in wallets {
            let events = match self.check_wallet(wallet).await {
                Ok(events) => events,
                Err(e) => {
                    warn!("[Monitor] Failed to fetch activity for {}: {}", wallet, e);
                    continue;
                }
            };

            for event in events {
                info!(
                    "[Monitor] New {} trade {} from {} token={} quote={}",
                    event.side,
                    event.transaction_hash,
                    wallet,
                    event.token_id,
                    event.quote_amount
                );
                if tx.send(event).await.is_err() {
                    return false;
                }
            }
        }
        true
    }

    /// Fetch one wallet's recent activity and return the trades not seen before.
    pub async fn check_wallet(&self, wallet: &str) -> Result<Vec<TradeEvent>> {
        self.check_wallet_at(wallet, Utc::now()).await
    }

    async fn check_wallet_at(&self, wallet: &str, now: DateTime<Utc>) -> Result<Vec<TradeEvent>> {
        let records = self.data.activity(wallet, ACTIVITY_PAGE_SIZE).await?;
        let max_age = chrono::Duration::from_std(self.settings.max_age)
            .unwrap_or_else(|_| chrono::Duration::days(36_500));

        let mut seen = self.seen.lock().await;
        let mut fresh = Vec::new();

        for record in &records {
            if record.get("type").and_then(Value::as_str) != Some("TRADE") {
                continue;
            }

            let Some(tx_hash) = transaction_id(record) else {
                continue;
            };
            if !seen.insert(&tx_hash) {
                continue;
            }

            let timestamp = record.get("timestamp").and_then(parse_timestamp);
            if let Some(ts) = timestamp {
                if now - ts > max_age {
                    debug!("[Monitor] Skipping stale {} from {}", tx_hash, ts);
                    continue;
                }
            }

            match decode_trade(record, tx_hash, wallet, timestamp.unwrap_or(now)) {
                Ok(event) => fresh.push(event),
                Err(e) => debug!("[Monitor] Dropping record from {}: {}", wallet, e),
            }
        }

        Ok(fresh)
    }

    pub async fn seen_count(&self) -> usize {
        self.seen.lock().await.len()
    }
}

fn transaction_id(record: &Value) -> Option<String> {
    ["transactionHash", "hash"]
        .iter()
        .filter_map(|key| record.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

/// Validating decode: a complete event or an error, never a partial one.
fn decode_trade(record: &Value, transaction_hash: String, wallet: &str, timestamp: DateTime<Utc>) -> Result<TradeEvent> {
    let token_id = record
        .get("asset")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| CopyError::Validation(format!("trade {} has no asset", transaction_hash)))?
        .to_string();

    let side = match record.get("side") {
        Some(Value::String(s)) => Side::parse_lenient(s),
        Some(Value::Number(n)) if n.as_i64() == Some(0) => Side::Buy,
        _ => Side::Sell,
    };

    let trader = record
        .get("proxyWallet")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or(wallet)
        .to_string();

    let price = Some(decimal_field(record, "price")).filter(|p| *p > Decimal::ZERO);

    Ok(TradeEvent {
        transaction_hash,
        token_id,
        condition_id: string_field(record, "conditionId"),
        side,
        trader,
        base_amount: decimal_field(record, "size"),
        quote_amount: decimal_field(record, "usdcSize"),
        price,
        timestamp,
        source_wallet: wallet.to_string(),
        title: string_field(record, "title"),
    })
}

fn string_field(record: &Value, key: &str) -> Option<String> {
    record
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Numbers or numeric strings; anything else reads as zero.
fn decimal_field(record: &Value, key: &str) -> Decimal {
    match record.get(key) {
        Some(Value::Number(n)) => Decimal::from_str(&n.to_string())
            .or_else(|_| Decimal::from_scientific(&n.to_string()))
            .unwrap_or(Decimal::ZERO),
        Some(Value::String(s)) => Decimal::from_str(s.trim()).unwrap_or(Decimal::ZERO),
        _ => Decimal::ZERO,
    }
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let raw = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?,
        Value::String(s) => s.trim().parse::<i64>().ok()?,
        _ => return None,
    };

    if raw > MILLIS_THRESHOLD {
        Utc.timestamp_millis_opt(raw).single()
    } else {
        Utc.timestamp_opt(raw, 0).single()
    }
}
