use super::moving_average::calculate_rma;
use crate::error::EngineError;
use crate::Result;

/// Weight of the current lag-adjusted value in the CRSI momentum filter
const CRSI_FAST: f64 = 0.12;
/// Weight carried over from the previous CRSI value
const CRSI_SLOW: f64 = 0.88;
const CRSI_LAG: usize = 4;

/// Relative Strength Index series with Wilder smoothing
///
/// The first average gain/loss is the simple mean over deltas `1..=period`;
/// later averages use `(prev * (period - 1) + value) / period`.
/// Values before index `period` are left at 0.0 (warm-up). A window with no
/// losses reads 100. This series is the input to [`calculate_crsi`].
pub fn calculate_rsi(prices: &[f64], period: usize) -> Result<Vec<f64>> {
    if period == 0 || prices.len() <= period {
        return Err(EngineError::NoData {
            needed: period + 1,
            got: prices.len(),
        });
    }

    let mut rsi = vec![0.0; prices.len()];
    let mut gains = vec![0.0; prices.len()];
    let mut losses = vec![0.0; prices.len()];

    for i in 1..prices.len() {
        let change = prices[i] - prices[i - 1];
        gains[i] = change.max(0.0);
        losses[i] = (-change).max(0.0);
    }

    let p = period as f64;
    let mut avg_gain = gains[1..=period].iter().sum::<f64>() / p;
    let mut avg_loss = losses[1..=period].iter().sum::<f64>() / p;

    for i in period..prices.len() {
        if i > period {
            avg_gain = (avg_gain * (p - 1.0) + gains[i]) / p;
            avg_loss = (avg_loss * (p - 1.0) + losses[i]) / p;
        }

        rsi[i] = if avg_loss == 0.0 {
            100.0
        } else {
            100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
        };
    }

    Ok(rsi)
}

/// Cumulative RSI: RMA-smoothed RSI passed through a 4-lag momentum filter
///
/// `crsi[i] = 0.12 * (2 * rsi[i] - rsi[i - 4]) + 0.88 * crsi[i - 1]` for i >= 4,
/// seeded with `crsi[i] = rsi[i]` below that.
pub fn calculate_crsi(prices: &[f64], period: usize) -> Result<Vec<f64>> {
    if period == 0 || prices.len() < period {
        return Err(EngineError::NoData {
            needed: period.max(1),
            got: prices.len(),
        });
    }

    let mut ups = vec![0.0; prices.len()];
    let mut downs = vec![0.0; prices.len()];
    for i in 1..prices.len() {
        let change = prices[i] - prices[i - 1];
        ups[i] = change.max(0.0);
        downs[i] = (-change).max(0.0);
    }

    let up_rma = calculate_rma(&ups, period);
    let down_rma = calculate_rma(&downs, period);

    let rsi: Vec<f64> = up_rma
        .iter()
        .zip(&down_rma)
        .map(|(&up, &down)| {
            if down == 0.0 {
                100.0
            } else if up == 0.0 {
                0.0
            } else {
                100.0 - 100.0 / (1.0 + up / down)
            }
        })
        .collect();

    Ok(momentum_filter(&rsi))
}

/// The CRSI lag filter applied to an already computed RSI series
pub fn momentum_filter(rsi: &[f64]) -> Vec<f64> {
    let mut crsi = Vec::with_capacity(rsi.len());
    for i in 0..rsi.len() {
        let value = if i < CRSI_LAG {
            rsi[i]
        } else {
            CRSI_FAST * (2.0 * rsi[i] - rsi[i - CRSI_LAG]) + CRSI_SLOW * crsi[i - 1]
        };
        crsi.push(value);
    }
    crsi
}
