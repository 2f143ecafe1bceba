use std::collections::HashSet;
use std::sync::Arc;

use tokio::task::JoinSet;

use crate::api::ExchangeClient;
use crate::config::StrategySettings;
use crate::error::EngineError;
use crate::indicators::calculate_crsi;
use crate::models::{Candidate, FlowSnapshot, Kline, QualifyingRule, Side};
use crate::Result;

/// Thresholds for the two qualifying rules
#[derive(Debug, Clone)]
pub struct SignalConfig {
    pub buy_net_amount: f64,
    pub sell_net_amount: f64,
    pub multiple_net_amount: f64,
    pub rsi_length: usize,
    /// Oversold level; overbought is `100 - rsi_level`
    pub rsi_level: f64,
    pub kline_interval: String,
    pub kline_limit: usize,
    pub quote_asset: String,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self::from(&StrategySettings::default())
    }
}

impl From<&StrategySettings> for SignalConfig {
    fn from(s: &StrategySettings) -> Self {
        Self {
            buy_net_amount: s.buy_net_amount,
            sell_net_amount: s.sell_net_amount,
            multiple_net_amount: s.multiple_net_amount,
            rsi_length: s.rsi_length,
            rsi_level: s.rsi_level,
            kline_interval: s.kline_interval.clone(),
            kline_limit: s.kline_limit,
            quote_asset: s.quote_asset.clone(),
        }
    }
}

/// Net flow is accelerating in the candidate's direction
pub fn volume_rule(flow: &FlowSnapshot, config: &SignalConfig) -> bool {
    let (m5, m15) = (flow.m5_net, flow.m15_net);
    let scaled = m5 * config.multiple_net_amount;
    match flow.side {
        Side::Long => m5 > config.buy_net_amount && m15 > 1.0 && m15 > scaled,
        Side::Short => m5 < -config.sell_net_amount && m15 < 1.0 && m15 < scaled,
    }
}

/// CRSI is stretched against the candidate's direction
pub fn oscillator_rule(side: Side, crsi: f64, config: &SignalConfig) -> bool {
    match side {
        Side::Long => crsi < config.rsi_level,
        Side::Short => crsi > 100.0 - config.rsi_level,
    }
}

/// Qualifying rule for a flow and its latest CRSI; volume wins when both pass
pub fn evaluate(flow: &FlowSnapshot, crsi: f64, config: &SignalConfig) -> Option<QualifyingRule> {
    if volume_rule(flow, config) {
        Some(QualifyingRule::Volume)
    } else if oscillator_rule(flow.side, crsi, config) {
        Some(QualifyingRule::Oscillator)
    } else {
        None
    }
}

/// Closes of bars that finished before `now_ms`
pub fn completed_closes(klines: &[Kline], now_ms: i64) -> Vec<f64> {
    klines
        .iter()
        .filter(|k| k.close_time_ms < now_ms)
        .map(|k| k.close)
        .collect()
}

/// Turns ranked flows into trade candidates
pub struct SignalFilter {
    exchange: Arc<dyn ExchangeClient>,
    config: SignalConfig,
}

impl SignalFilter {
    pub fn new(exchange: Arc<dyn ExchangeClient>, config: SignalConfig) -> Self {
        Self { exchange, config }
    }

    /// Fetch price series concurrently and keep flows passing either rule
    ///
    /// A failed fetch or indicator error drops only that flow. Bars still
    /// open at `now_ms` are ignored. Output keeps ranking order and holds each
    /// symbol at most once.
    pub async fn filter(&self, ranked: &[FlowSnapshot], now_ms: i64) -> Vec<Candidate> {
        let mut seen = HashSet::new();
        let unique: Vec<&FlowSnapshot> = ranked
            .iter()
            .filter(|f| seen.insert((f.coin.clone(), f.side)))
            .collect();

        let mut tasks = JoinSet::new();
        for (idx, flow) in unique.iter().enumerate() {
            let exchange = Arc::clone(&self.exchange);
            let symbol = flow.symbol(&self.config.quote_asset);
            let interval = self.config.kline_interval.clone();
            let limit = self.config.kline_limit;
            let period = self.config.rsi_length;

            tasks.spawn(async move {
                let result =
                    last_crsi(exchange.as_ref(), &symbol, &interval, limit, period, now_ms).await;
                (idx, symbol, result)
            });
        }

        let mut scored = Vec::with_capacity(unique.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, symbol, Ok(crsi))) => scored.push((idx, symbol, crsi)),
                Ok((_, symbol, Err(e))) => {
                    tracing::warn!(%symbol, error = %e, "Dropping candidate: price series unavailable");
                }
                Err(e) => tracing::error!(error = %e, "Price series task failed"),
            }
        }
        scored.sort_by_key(|(idx, _, _)| *idx);

        let mut candidates = Vec::new();
        for (idx, symbol, crsi) in scored {
            let flow = unique[idx];
            match evaluate(flow, crsi, &self.config) {
                Some(rule) => {
                    tracing::info!(
                        %symbol,
                        side = %flow.side,
                        m5 = flow.m5_net,
                        m15 = flow.m15_net,
                        crsi = %format!("{:.2}", crsi),
                        ?rule,
                        "Candidate qualified"
                    );
                    candidates.push(Candidate {
                        symbol,
                        coin: flow.coin.clone(),
                        side: flow.side,
                        m5_net: flow.m5_net,
                        m15_net: flow.m15_net,
                        crsi,
                        rule,
                    });
                }
                None => {
                    tracing::debug!(%symbol, side = %flow.side, crsi, "No rule passed");
                }
            }
        }

        candidates
    }
}

async fn last_crsi(
    exchange: &dyn ExchangeClient,
    symbol: &str,
    interval: &str,
    limit: usize,
    period: usize,
    now_ms: i64,
) -> Result<f64> {
    let klines = exchange.klines(symbol, interval, limit).await?;
    let closes = completed_closes(&klines, now_ms);
    let crsi = calculate_crsi(&closes, period)?;
    crsi.last().copied().ok_or(EngineError::NoData {
        needed: period.max(1),
        got: 0,
    })
}
