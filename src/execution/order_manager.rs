use std::sync::Arc;

use rust_decimal::Decimal;

use super::reconciler::ReconcileAction;
use crate::api::ExchangeClient;
use crate::config::TradingSettings;
use crate::discovery::Universe;
use crate::models::{Instrument, OrderRequest, RestingOrder, Side};

/// Outcome counts for one pass of the order manager
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub cancelled: usize,
    pub placed: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Round `value` down to a whole number of `step`s
pub fn floor_to_step(value: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return value;
    }
    ((value / step).floor() * step).normalize()
}

/// Entry quantity for a quote notional at `price`, floored to the lot step
pub fn entry_quantity(amount: Decimal, price: Decimal, step: Decimal) -> Option<Decimal> {
    let raw = amount.checked_div(price)?;
    let qty = floor_to_step(raw, step);
    (qty > Decimal::ZERO).then_some(qty)
}

/// Resting non-reduce-only orders older than `timeout_ms`
pub fn stale_orders(orders: &[RestingOrder], now_ms: i64, timeout_ms: i64) -> Vec<&RestingOrder> {
    orders
        .iter()
        .filter(|o| !o.reduce_only && now_ms - o.update_time_ms > timeout_ms)
        .collect()
}

struct PricedEntry {
    price: Decimal,
    quantity: Decimal,
    /// Opposite-side entry to cancel before placing
    replace: Option<i64>,
}

struct PreparedAction {
    instrument: Instrument,
    close_quantity: Option<Decimal>,
    /// `Err` carries the reason the entry leg is skipped
    entry: std::result::Result<PricedEntry, String>,
}

/// Cancels stale orders and places entries for reconciled actions
///
/// Each action yields at most one cancel and one entry placement. Individual
/// exchange failures are counted and skipped; nothing is retried in-cycle.
pub struct OrderLifecycleManager {
    exchange: Arc<dyn ExchangeClient>,
    universe: Arc<Universe>,
    settings: TradingSettings,
}

impl OrderLifecycleManager {
    pub fn new(
        exchange: Arc<dyn ExchangeClient>,
        universe: Arc<Universe>,
        settings: TradingSettings,
    ) -> Self {
        Self {
            exchange,
            universe,
            settings,
        }
    }

    pub async fn execute(
        &self,
        actions: &[ReconcileAction],
        open_orders: Vec<RestingOrder>,
        now_ms: i64,
    ) -> CycleReport {
        let mut report = CycleReport::default();
        let mut working = self.sweep_stale(open_orders, now_ms, &mut report).await;

        for action in actions {
            self.apply(action, &mut working, now_ms, &mut report).await;
        }

        tracing::info!(
            cancelled = report.cancelled,
            placed = report.placed,
            skipped = report.skipped,
            failed = report.failed,
            "Order pass complete"
        );
        report
    }

    /// Cancel stale entries; returns the orders still resting
    async fn sweep_stale(
        &self,
        orders: Vec<RestingOrder>,
        now_ms: i64,
        report: &mut CycleReport,
    ) -> Vec<RestingOrder> {
        let timeout_ms = self.settings.orders_timeout_secs as i64 * 1000;
        let stale: Vec<i64> = stale_orders(&orders, now_ms, timeout_ms)
            .into_iter()
            .map(|o| o.order_id)
            .collect();

        let mut remaining = Vec::with_capacity(orders.len());
        for order in orders {
            if !stale.contains(&order.order_id) {
                remaining.push(order);
                continue;
            }

            match self.exchange.cancel_order(&order.symbol, order.order_id).await {
                Ok(()) => {
                    tracing::info!(
                        symbol = %order.symbol,
                        order_id = order.order_id,
                        age_secs = (now_ms - order.update_time_ms) / 1000,
                        "🧹 Cancelled stale order"
                    );
                    report.cancelled += 1;
                }
                Err(e) => {
                    tracing::warn!(symbol = %order.symbol, order_id = order.order_id, error = %e, "Stale cancel failed");
                    report.failed += 1;
                    remaining.push(order);
                }
            }
        }

        remaining
    }

    async fn apply(
        &self,
        action: &ReconcileAction,
        working: &mut Vec<RestingOrder>,
        now_ms: i64,
        report: &mut CycleReport,
    ) {
        let (symbol, side, close_quantity) = match action {
            ReconcileAction::Open { symbol, side } => (symbol, *side, None),
            ReconcileAction::Flip {
                symbol,
                side,
                close_quantity,
            } => (symbol, *side, Some(*close_quantity)),
            ReconcileAction::Skip => return,
        };

        let prepared = match self.prepare(symbol, side, close_quantity, working.as_slice()).await {
            Ok(prepared) => prepared,
            Err(reason) => {
                tracing::info!(%symbol, %side, "Skipping action: {}", reason);
                report.skipped += 1;
                return;
            }
        };

        let entry = match prepared.entry {
            Ok(entry) => Some(entry),
            Err(reason) if prepared.close_quantity.is_some() => {
                tracing::info!(%symbol, %side, "Closing opposing leg only: {}", reason);
                None
            }
            Err(reason) => {
                tracing::info!(%symbol, %side, "Skipping entry: {}", reason);
                report.skipped += 1;
                return;
            }
        };

        if let Some(order_id) = entry.as_ref().and_then(|e| e.replace) {
            match self.exchange.cancel_order(symbol, order_id).await {
                Ok(()) => {
                    tracing::info!(%symbol, order_id, "Cancelled opposite-side entry");
                    working.retain(|o| o.order_id != order_id);
                    report.cancelled += 1;
                }
                Err(e) => {
                    tracing::warn!(%symbol, order_id, error = %e, "Opposite entry cancel failed");
                    report.failed += 1;
                    return;
                }
            }
        }

        if entry.is_some() {
            if let Err(e) = self
                .exchange
                .set_leverage(symbol, self.settings.leverage)
                .await
            {
                tracing::warn!(%symbol, leverage = self.settings.leverage, error = %e, "Leverage update failed");
                report.failed += 1;
                return;
            }
        }

        if let Some(qty) = prepared.close_quantity {
            let close = OrderRequest::market(
                symbol.as_str(),
                side.opposite().exit_order_side(),
                side.opposite().position_side(),
                qty,
            );
            match self.exchange.place_order(&close).await {
                Ok(ack) => {
                    tracing::info!(%symbol, order_id = ack.order_id, status = %ack.status, quantity = %qty, leg = %side.opposite(), "🔄 Closed opposing leg");
                    report.placed += 1;
                }
                Err(e) => {
                    tracing::warn!(%symbol, error = %e, "Close leg failed, entry not placed");
                    report.failed += 1;
                    return;
                }
            }
        }

        let Some(priced) = entry else {
            report.skipped += 1;
            return;
        };

        let order = OrderRequest::limit(
            symbol.as_str(),
            side.entry_order_side(),
            side.position_side(),
            priced.quantity,
            priced.price,
        );
        match self.exchange.place_order(&order).await {
            Ok(ack) => {
                tracing::info!(
                    %symbol,
                    %side,
                    order_id = ack.order_id,
                    status = %ack.status,
                    price = %priced.price,
                    quantity = %priced.quantity,
                    "📤 Placed entry"
                );
                report.placed += 1;
                working.push(RestingOrder {
                    order_id: ack.order_id,
                    symbol: prepared.instrument.symbol.clone(),
                    side: order.side,
                    position_side: order.position_side,
                    quantity: priced.quantity,
                    price: priced.price,
                    update_time_ms: now_ms,
                    reduce_only: false,
                });
            }
            Err(e) => {
                tracing::warn!(%symbol, %side, error = %e, "Entry rejected");
                report.failed += 1;
            }
        }
    }

    /// Read-only checks and pricing; an outer `Err` skips the whole action
    async fn prepare(
        &self,
        symbol: &str,
        side: Side,
        close_quantity: Option<Decimal>,
        working: &[RestingOrder],
    ) -> std::result::Result<PreparedAction, String> {
        let instrument = self
            .universe
            .get(symbol)
            .cloned()
            .ok_or_else(|| "symbol not in universe".to_string())?;

        let close_quantity = match close_quantity {
            Some(qty) => {
                let floored = floor_to_step(qty, instrument.step_size);
                if floored <= Decimal::ZERO {
                    return Err(format!("close quantity {} below one lot", qty));
                }
                Some(floored)
            }
            None => None,
        };

        let entry = self.price_entry(&instrument, side, working).await;
        Ok(PreparedAction {
            instrument,
            close_quantity,
            entry,
        })
    }

    async fn price_entry(
        &self,
        instrument: &Instrument,
        side: Side,
        working: &[RestingOrder],
    ) -> std::result::Result<PricedEntry, String> {
        let symbol = instrument.symbol.as_str();
        let target = side.position_side();
        let entries: Vec<&RestingOrder> = working
            .iter()
            .filter(|o| o.symbol == symbol && !o.reduce_only)
            .collect();

        if entries.iter().any(|o| o.position_side == target) {
            return Err(format!("entry already resting on {}", target.as_str()));
        }

        let replace = if self.settings.bidirectional {
            None
        } else {
            entries
                .iter()
                .find(|o| o.is_entry() && o.position_side == side.opposite().position_side())
                .map(|o| o.order_id)
        };

        let entry_side = side.entry_order_side();
        let book = self
            .exchange
            .order_book(symbol, self.settings.book_limit)
            .await
            .map_err(|e| format!("order book unavailable: {}", e))?;
        let price = book
            .passive_price(entry_side, self.settings.price_depth)
            .ok_or_else(|| format!("book shallower than depth {}", self.settings.price_depth))?;

        let amount = Decimal::try_from(self.settings.amount)
            .map_err(|e| format!("bad notional {}: {}", self.settings.amount, e))?;
        let quantity = entry_quantity(amount, price, instrument.step_size)
            .ok_or_else(|| format!("notional {} below one lot at {}", amount, price))?;

        Ok(PricedEntry {
            price,
            quantity,
            replace,
        })
    }
}
