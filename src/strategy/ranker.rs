use std::cmp::Ordering;

use crate::config::StrategySettings;
use crate::error::EngineError;
use crate::models::FlowSnapshot;
use crate::Result;

/// Picks the strongest inflows and outflows from a flow snapshot
///
/// Output is the top `max_coins` by 5-minute net flow followed by the bottom
/// `max_coins`. With narrowing enabled, the top half keeps only entries above
/// `buy_net_amount` and the bottom half only entries below `-sell_net_amount`.
#[derive(Debug, Clone)]
pub struct FlowRanker {
    max_coins: usize,
    narrow_by_threshold: bool,
    buy_net_amount: f64,
    sell_net_amount: f64,
}

impl FlowRanker {
    pub fn new(max_coins: usize) -> Self {
        Self {
            max_coins,
            narrow_by_threshold: false,
            buy_net_amount: 0.0,
            sell_net_amount: 0.0,
        }
    }

    pub fn with_narrowing(mut self, buy_net_amount: f64, sell_net_amount: f64) -> Self {
        self.narrow_by_threshold = true;
        self.buy_net_amount = buy_net_amount;
        self.sell_net_amount = sell_net_amount;
        self
    }

    pub fn from_settings(settings: &StrategySettings) -> Self {
        let ranker = Self::new(settings.max_coins);
        if settings.narrow_by_threshold {
            ranker.with_narrowing(settings.buy_net_amount, settings.sell_net_amount)
        } else {
            ranker
        }
    }

    /// Minimum snapshot count for a full ranking
    pub fn required(&self) -> usize {
        self.max_coins * 2
    }

    pub fn rank(&self, flows: &[FlowSnapshot]) -> Result<Vec<FlowSnapshot>> {
        if flows.len() < self.required() {
            return Err(EngineError::InsufficientData(format!(
                "{} flow snapshots, need {}",
                flows.len(),
                self.required()
            )));
        }

        let mut sorted: Vec<&FlowSnapshot> = flows.iter().collect();
        // Stable sort keeps feed order among equal flows
        sorted.sort_by(|a, b| b.m5_net.partial_cmp(&a.m5_net).unwrap_or(Ordering::Equal));

        let top = sorted.iter().take(self.max_coins);
        let bottom = sorted.iter().rev().take(self.max_coins);

        let ranked: Vec<FlowSnapshot> = if self.narrow_by_threshold {
            top.filter(|f| f.m5_net > self.buy_net_amount)
                .chain(bottom.filter(|f| f.m5_net < -self.sell_net_amount))
                .map(|f| (*f).clone())
                .collect()
        } else {
            top.chain(bottom).map(|f| (*f).clone()).collect()
        };

        tracing::debug!(
            ranked = ranked.len(),
            from = flows.len(),
            coins = ?ranked.iter().map(|f| f.coin.as_str()).collect::<Vec<_>>(),
            "Ranked flows"
        );

        Ok(ranked)
    }
}
