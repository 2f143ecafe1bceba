use std::collections::HashMap;

use crate::config::Settings;
use crate::models::{FlowSnapshot, Instrument};

/// Eligibility filter for exchange instruments
///
/// Checks, in order:
/// 1. Quote asset matches the configured settlement asset
/// 2. Contract is a perpetual
/// 3. Exchange reports the symbol as trading
/// 4. Base asset is not blacklisted
/// 5. Step and tick sizes are usable for sizing and pricing
///
/// Returns (is_tradeable, reason) tuple
pub fn is_tradeable(instrument: &Instrument, settings: &Settings) -> (bool, String) {
    let quote = &settings.strategy.quote_asset;

    if !instrument.quote_asset.eq_ignore_ascii_case(quote) {
        return (
            false,
            format!("WrongQuote: {} (want {})", instrument.quote_asset, quote),
        );
    }

    if !instrument.perpetual {
        return (false, "NotPerpetual: dated or unknown contract".to_string());
    }

    if !instrument.tradeable {
        return (false, "NotTrading: symbol halted or settling".to_string());
    }

    if settings.is_blacklisted(&instrument.base_asset) {
        return (false, format!("Blacklisted: {}", instrument.base_asset));
    }

    if instrument.step_size <= rust_decimal::Decimal::ZERO
        || instrument.tick_size <= rust_decimal::Decimal::ZERO
    {
        return (
            false,
            format!(
                "InvalidData: step {} tick {}",
                instrument.step_size, instrument.tick_size
            ),
        );
    }

    (true, "Eligible".to_string())
}

/// Instruments eligible for trading, keyed by symbol; fixed for the process lifetime
#[derive(Debug, Clone, Default)]
pub struct Universe {
    instruments: HashMap<String, Instrument>,
}

impl Universe {
    pub fn get(&self, symbol: &str) -> Option<&Instrument> {
        self.instruments.get(symbol)
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.instruments.contains_key(symbol)
    }

    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }

    /// Keep the first snapshot per coin whose symbol is in the universe
    pub fn eligible_flows(&self, flows: Vec<FlowSnapshot>, quote_asset: &str) -> Vec<FlowSnapshot> {
        let mut seen = std::collections::HashSet::new();
        flows
            .into_iter()
            .filter(|f| self.contains(&f.symbol(quote_asset)))
            .filter(|f| seen.insert(f.coin.clone()))
            .collect()
    }
}

impl FromIterator<Instrument> for Universe {
    fn from_iter<I: IntoIterator<Item = Instrument>>(iter: I) -> Self {
        Self {
            instruments: iter.into_iter().map(|i| (i.symbol.clone(), i)).collect(),
        }
    }
}

/// Filter raw exchange metadata down to the tradeable universe
pub fn build_universe(instruments: Vec<Instrument>, settings: &Settings) -> Universe {
    let total = instruments.len();
    let universe: Universe = instruments
        .into_iter()
        .filter(|instrument| {
            let (ok, reason) = is_tradeable(instrument, settings);
            if !ok {
                tracing::trace!(symbol = %instrument.symbol, %reason, "Excluded from universe");
            }
            ok
        })
        .collect();

    tracing::info!(eligible = universe.len(), total, "Built instrument universe");
    universe
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn instrument(symbol: &str, base: &str, quote: &str) -> Instrument {
        Instrument {
            symbol: symbol.to_string(),
            base_asset: base.to_string(),
            quote_asset: quote.to_string(),
            tick_size: Decimal::from_str("0.01").unwrap(),
            step_size: Decimal::from_str("0.001").unwrap(),
            perpetual: true,
            tradeable: true,
        }
    }

    #[test]
    fn test_usdt_perpetual_passes() {
        let (ok, reason) = is_tradeable(&instrument("BTCUSDT", "BTC", "USDT"), &Settings::default());
        assert!(ok);
        assert_eq!(reason, "Eligible");
    }

    #[test]
    fn test_wrong_quote_rejected() {
        let (ok, reason) = is_tradeable(&instrument("BTCUSDC", "BTC", "USDC"), &Settings::default());
        assert!(!ok);
        assert!(reason.contains("WrongQuote"));
    }

    #[test]
    fn test_dated_contract_rejected() {
        let mut quarterly = instrument("BTCUSDT_250627", "BTC", "USDT");
        quarterly.perpetual = false;
        let (ok, reason) = is_tradeable(&quarterly, &Settings::default());
        assert!(!ok);
        assert!(reason.contains("NotPerpetual"));
    }

    #[test]
    fn test_halted_symbol_rejected() {
        let mut halted = instrument("ETHUSDT", "ETH", "USDT");
        halted.tradeable = false;
        let (ok, reason) = is_tradeable(&halted, &Settings::default());
        assert!(!ok);
        assert!(reason.contains("NotTrading"));
    }

    #[test]
    fn test_blacklisted_base_rejected() {
        let mut settings = Settings::default();
        settings.strategy.blacklist = vec!["luna".to_string()];
        let (ok, reason) = is_tradeable(&instrument("LUNAUSDT", "LUNA", "USDT"), &settings);
        assert!(!ok);
        assert!(reason.contains("Blacklisted"));
    }

    #[test]
    fn test_zero_step_rejected() {
        let mut broken = instrument("XUSDT", "X", "USDT");
        broken.step_size = Decimal::ZERO;
        let (ok, reason) = is_tradeable(&broken, &Settings::default());
        assert!(!ok);
        assert!(reason.contains("InvalidData"));
    }

    #[test]
    fn test_build_universe_and_filter_flows() {
        let mut halted = instrument("ETHUSDT", "ETH", "USDT");
        halted.tradeable = false;
        let universe = build_universe(
            vec![instrument("BTCUSDT", "BTC", "USDT"), halted],
            &Settings::default(),
        );
        assert_eq!(universe.len(), 1);
        assert!(universe.get("BTCUSDT").is_some());

        let flows = vec![
            FlowSnapshot::new("BTC", 1.0, 1.0, 0.0),
            FlowSnapshot::new("ETH", 1.0, 1.0, 0.0),
            FlowSnapshot::new("BTC", 2.0, 2.0, 0.0),
            FlowSnapshot::new("DOGE", 1.0, 1.0, 0.0),
        ];
        let eligible = universe.eligible_flows(flows, "USDT");
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].m5_net, 1.0);
    }
}
