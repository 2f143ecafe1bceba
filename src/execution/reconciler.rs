use rust_decimal::Decimal;

use crate::config::TradingSettings;
use crate::models::{AccountSnapshot, Candidate, PositionInfo, Side};
use crate::risk::MarginGuard;
use crate::Result;

/// Exposure already held on a candidate's symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionState {
    NoPosition,
    HasSameSide,
    HasOppositeSide,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileAction {
    Open {
        symbol: String,
        side: Side,
    },
    /// Close the opposing leg, then enter on `side`
    Flip {
        symbol: String,
        side: Side,
        close_quantity: Decimal,
    },
    Skip,
}

impl ReconcileAction {
    pub fn symbol(&self) -> Option<&str> {
        match self {
            ReconcileAction::Open { symbol, .. } | ReconcileAction::Flip { symbol, .. } => {
                Some(symbol)
            }
            ReconcileAction::Skip => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReconcileDecision {
    pub symbol: String,
    pub action: ReconcileAction,
    pub reason: String,
}

/// Classify the account's exposure on `symbol` relative to `side`
///
/// A non-zero opposing leg wins over a same-side leg; a symbol absent from
/// the snapshot has no position.
pub fn position_state<'a>(
    account: &'a AccountSnapshot,
    symbol: &str,
    side: Side,
) -> (PositionState, Option<&'a PositionInfo>) {
    let open_leg = |s: Side| {
        account
            .position(symbol, s.position_side())
            .filter(|p| p.is_open())
    };

    if let Some(opposing) = open_leg(side.opposite()) {
        return (PositionState::HasOppositeSide, Some(opposing));
    }
    if let Some(same) = open_leg(side) {
        return (PositionState::HasSameSide, Some(same));
    }
    (PositionState::NoPosition, None)
}

/// Maps candidates onto Open / Flip / Skip against the live account
pub struct PositionReconciler {
    guard: MarginGuard,
    bidirectional: bool,
    /// Absolute quote-currency profit required on the opposing leg; 0 disables
    profit_exit: f64,
}

impl PositionReconciler {
    pub fn new(guard: MarginGuard, bidirectional: bool, profit_exit: f64) -> Self {
        Self {
            guard,
            bidirectional,
            profit_exit,
        }
    }

    pub fn from_settings(settings: &TradingSettings) -> Self {
        Self::new(
            MarginGuard::new(settings.margin_utilization_rate),
            settings.bidirectional,
            settings.profit_exit,
        )
    }

    /// One decision per candidate, or `MarginExceeded` with nothing decided
    pub fn reconcile(
        &self,
        candidates: &[Candidate],
        account: &AccountSnapshot,
    ) -> Result<Vec<ReconcileDecision>> {
        if let Err(trip) = self.guard.check(account) {
            let err = self.guard.to_error(&trip);
            tracing::warn!(
                utilization = MarginGuard::utilization(account),
                ?trip,
                "Margin guard tripped, no actions this cycle"
            );
            return Err(err);
        }

        let decisions: Vec<ReconcileDecision> = candidates
            .iter()
            .map(|candidate| {
                let decision = self.decide(candidate, account);
                tracing::info!(
                    symbol = %decision.symbol,
                    side = %candidate.side,
                    action = ?decision.action,
                    "{}",
                    decision.reason
                );
                decision
            })
            .collect();

        Ok(decisions)
    }

    fn decide(&self, candidate: &Candidate, account: &AccountSnapshot) -> ReconcileDecision {
        let symbol = candidate.symbol.clone();
        let side = candidate.side;
        let (state, leg) = position_state(account, &symbol, side);

        let (action, reason) = match (state, leg) {
            (PositionState::NoPosition, _) => (
                ReconcileAction::Open {
                    symbol: symbol.clone(),
                    side,
                },
                format!("No position, opening {}", side),
            ),
            (PositionState::HasSameSide, _) => (
                ReconcileAction::Skip,
                format!("Already holding {}", side),
            ),
            (PositionState::HasOppositeSide, _) if self.bidirectional => (
                ReconcileAction::Skip,
                format!("Holding {} in bidirectional mode", side.opposite()),
            ),
            (PositionState::HasOppositeSide, Some(opposing)) => {
                if self.profit_exit > 0.0 && opposing.unrealized_profit < self.profit_exit {
                    (
                        ReconcileAction::Skip,
                        format!(
                            "Opposing {} profit {:.4} below exit threshold {:.4}",
                            side.opposite(),
                            opposing.unrealized_profit,
                            self.profit_exit
                        ),
                    )
                } else {
                    let close_quantity = opposing.quantity.abs();
                    (
                        ReconcileAction::Flip {
                            symbol: symbol.clone(),
                            side,
                            close_quantity,
                        },
                        format!(
                            "Flipping {} -> {} (closing {})",
                            side.opposite(),
                            side,
                            close_quantity
                        ),
                    )
                }
            }
            (PositionState::HasOppositeSide, None) => {
                (ReconcileAction::Skip, "Opposing leg vanished".to_string())
            }
        };

        ReconcileDecision {
            symbol,
            action,
            reason,
        }
    }
}
