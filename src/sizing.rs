//! Sizing Engine: turns an observed trade into a proportional order.
//!
//! The copy ratio is our bankroll over the counterpart's pre-trade
//! bankroll, recomputed for every event. Buys are additionally bounded by
//! free collateral, recycling old resting orders when short.

use crate::error::Result;
use crate::gateway::{ChainGateway, ExchangeGateway};
use crate::order_manager::OrderManager;
use crate::types::{OrderInstruction, Side, TradeEvent};
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Smallest order notional the exchange accepts, in collateral units
pub const MIN_NOTIONAL: Decimal = dec!(1);
/// Headroom applied when lifting a small order onto the minimum
const MIN_NOTIONAL_BUFFER: Decimal = dec!(1.01);
/// Share of free collateral a capped order may use
const CAPACITY_CAP: Decimal = dec!(0.99);
const SIZE_DECIMALS: u32 = 6;

#[derive(Debug, Clone)]
pub struct SizingSettings {
    /// Fallback ratio when the counterpart bankroll is not positive
    pub copy_ratio: Decimal,
    pub pause_trading: bool,
    /// Our collateral-holding wallet
    pub proxy_wallet: String,
}

/// Why a trade was not copied. These are decisions, not failures.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    Paused,
    PriceUnavailable,
    PriceAtCeiling { price: Decimal },
    NonPositiveNotional { notional: Decimal },
    InsufficientCapacity { available: Decimal },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Paused => write!(f, "trading paused"),
            SkipReason::PriceUnavailable => write!(f, "no trade price and empty order book"),
            SkipReason::PriceAtCeiling { price } => write!(f, "buy price {} leaves no upside", price),
            SkipReason::NonPositiveNotional { notional } => write!(f, "target notional {} <= 0", notional),
            SkipReason::InsufficientCapacity { available } => {
                write!(f, "free collateral {} below minimum order {}", available, MIN_NOTIONAL)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SizingDecision {
    Place(OrderInstruction),
    Skip(SkipReason),
}

/// Counterpart bankroll before the trade: add back what a buy spent,
/// take away what a sell received (never below zero).
pub fn reconstruct_counterpart_bankroll(side: Side, current: Decimal, quote_amount: Decimal) -> Decimal {
    match side {
        Side::Buy => current + quote_amount,
        Side::Sell => (current - quote_amount).max(Decimal::ZERO),
    }
}

pub fn copy_ratio(our_bankroll: Decimal, counterpart_bankroll: Decimal, fallback: Decimal) -> Decimal {
    if counterpart_bankroll > Decimal::ZERO {
        our_bankroll / counterpart_bankroll
    } else {
        fallback
    }
}

/// Round a price down onto the market tick grid.
/// Mid-range prices trade on 0.01 ticks, the tails on 0.001.
pub fn snap_to_tick(price: Decimal) -> Decimal {
    if price >= dec!(0.04) && price <= dec!(0.96) {
        price.trunc_with_scale(2)
    } else {
        price.trunc_with_scale(3)
    }
}

/// Shares for `notional` at `price`, never below the minimum order notional,
/// rounded to 6 decimals.
pub fn finalize_size(notional: Decimal, price: Decimal) -> Decimal {
    let mut size = notional / price;
    if size * price < MIN_NOTIONAL {
        size = MIN_NOTIONAL * MIN_NOTIONAL_BUFFER / price;
    }

    size = size.round_dp_with_strategy(SIZE_DECIMALS, RoundingStrategy::MidpointAwayFromZero);
    if size * price < MIN_NOTIONAL {
        size = (MIN_NOTIONAL / price).round_dp_with_strategy(SIZE_DECIMALS, RoundingStrategy::ToPositiveInfinity);
    }
    size
}

pub struct SizingEngine {
    exchange: Arc<dyn ExchangeGateway>,
    chain: Arc<dyn ChainGateway>,
    orders: Arc<OrderManager>,
    settings: SizingSettings,
}

impl SizingEngine {
    pub fn new(
        exchange: Arc<dyn ExchangeGateway>,
        chain: Arc<dyn ChainGateway>,
        orders: Arc<OrderManager>,
        settings: SizingSettings,
    ) -> Self {
        Self {
            exchange,
            chain,
            orders,
            settings,
        }
    }

    /// Size one event. Gateway failures propagate; every abort is a `Skip`.
    pub async fn size(&self, event: &TradeEvent) -> Result<SizingDecision> {
        if self.settings.pause_trading {
            return Ok(SizingDecision::Skip(SkipReason::Paused));
        }

        // Sized at the price actually posted, so the minimum holds on the book
        let price = match self.resolve_price(event).await?.map(snap_to_tick) {
            Some(p) if p > Decimal::ZERO => p,
            _ => return Ok(SizingDecision::Skip(SkipReason::PriceUnavailable)),
        };
        if event.side == Side::Buy && price >= Decimal::ONE {
            return Ok(SizingDecision::Skip(SkipReason::PriceAtCeiling { price }));
        }

        let our_balance = self.chain.balance(&self.settings.proxy_wallet).await?;
        let counterpart_balance = self.chain.balance(&event.trader).await?;

        let counterpart_bankroll =
            reconstruct_counterpart_bankroll(event.side, counterpart_balance, event.quote_amount);
        let ratio = copy_ratio(our_balance, counterpart_bankroll, self.settings.copy_ratio);
        let mut notional = event.quote_amount * ratio;

        debug!(
            "[Sizing] {} ours={} theirs={} (pre-trade {}) ratio={} notional={}",
            event.short_hash(),
            our_balance,
            counterpart_balance,
            counterpart_bankroll,
            ratio,
            notional
        );

        if notional <= Decimal::ZERO {
            return Ok(SizingDecision::Skip(SkipReason::NonPositiveNotional { notional }));
        }

        if event.side == Side::Buy {
            let mut available = our_balance - self.orders.locked_value().await;

            if notional > available {
                let shortfall = notional - available;
                info!(
                    "[Sizing] {} needs {} but {} free, recycling {}",
                    event.short_hash(),
                    notional,
                    available,
                    shortfall
                );
                self.orders.free_up_funds(shortfall).await;

                let refreshed = self.chain.balance(&self.settings.proxy_wallet).await?;
                available = refreshed - self.orders.locked_value().await;
                if notional > available {
                    notional = (available * CAPACITY_CAP).max(Decimal::ZERO);
                    info!("[Sizing] {} capped to {} of {} free", event.short_hash(), notional, available);
                }
            }

            if available < MIN_NOTIONAL {
                return Ok(SizingDecision::Skip(SkipReason::InsufficientCapacity { available }));
            }
        }

        let size = finalize_size(notional, price);

        Ok(SizingDecision::Place(OrderInstruction {
            token_id: event.token_id.clone(),
            side: event.side,
            price,
            size,
        }))
    }

    /// Trade's own price when positive, else best ask (buy) / best bid (sell)
    async fn resolve_price(&self, event: &TradeEvent) -> Result<Option<Decimal>> {
        if let Some(price) = event.price.filter(|p| *p > Decimal::ZERO) {
            return Ok(Some(price));
        }

        let book = self.exchange.order_book(&event.token_id).await?;
        let price = book.taking_price(event.side);
        debug!(
            "[Sizing] {} has no price, book {} = {:?}",
            event.short_hash(),
            if event.side == Side::Buy { "ask" } else { "bid" },
            price
        );
        Ok(price)
    }
}
