use std::sync::Arc;

use crate::api::{ExchangeClient, FlowFeed};
use crate::config::Settings;
use crate::discovery::Universe;
use crate::execution::{CycleReport, OrderLifecycleManager, PositionReconciler, ReconcileAction};
use crate::strategy::{FlowRanker, SignalConfig, SignalFilter};
use crate::Result;

/// What one cycle did, for logging and tests
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleOutcome {
    pub flows: usize,
    pub ranked: usize,
    pub candidates: usize,
    pub actions: usize,
    pub report: CycleReport,
}

/// One feed → rank → filter → reconcile → execute pass
///
/// Holds only immutable state, so overlapping cycles share it freely.
pub struct TradingEngine {
    exchange: Arc<dyn ExchangeClient>,
    feed: Arc<dyn FlowFeed>,
    universe: Arc<Universe>,
    quote_asset: String,
    ranker: FlowRanker,
    filter: SignalFilter,
    reconciler: PositionReconciler,
    orders: OrderLifecycleManager,
}

impl TradingEngine {
    pub fn new(
        exchange: Arc<dyn ExchangeClient>,
        feed: Arc<dyn FlowFeed>,
        universe: Arc<Universe>,
        settings: &Settings,
    ) -> Self {
        Self {
            filter: SignalFilter::new(
                Arc::clone(&exchange),
                SignalConfig::from(&settings.strategy),
            ),
            orders: OrderLifecycleManager::new(
                Arc::clone(&exchange),
                Arc::clone(&universe),
                settings.trading.clone(),
            ),
            ranker: FlowRanker::from_settings(&settings.strategy),
            reconciler: PositionReconciler::from_settings(&settings.trading),
            quote_asset: settings.strategy.quote_asset.clone(),
            exchange,
            feed,
            universe,
        }
    }

    /// Exchange-clock "now" for stamping a cycle
    pub fn exchange_time_ms(&self) -> i64 {
        self.exchange.server_time_ms()
    }

    pub async fn run_cycle(&self, now_ms: i64) -> Result<CycleOutcome> {
        let mut outcome = CycleOutcome::default();

        let flows = self.feed.fetch_flows().await?;
        let eligible = self.universe.eligible_flows(flows, &self.quote_asset);
        outcome.flows = eligible.len();

        let ranked = self.ranker.rank(&eligible)?;
        outcome.ranked = ranked.len();

        let candidates = self.filter.filter(&ranked, now_ms).await;
        outcome.candidates = candidates.len();
        if candidates.is_empty() {
            tracing::info!(ranked = ranked.len(), "No candidates this cycle");
            return Ok(outcome);
        }

        let account = self.exchange.account().await?;
        let decisions = self.reconciler.reconcile(&candidates, &account)?;
        let actions: Vec<ReconcileAction> = decisions
            .into_iter()
            .map(|d| d.action)
            .filter(|a| *a != ReconcileAction::Skip)
            .collect();
        outcome.actions = actions.len();

        let open_orders = self.exchange.open_orders().await?;
        outcome.report = self.orders.execute(&actions, open_orders, now_ms).await;

        Ok(outcome)
    }
}
