use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::models::AccountSnapshot;

/// Whole-cycle guard on account margin utilization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarginGuard {
    /// Max (position margin + open-order margin) / wallet balance
    pub max_utilization: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MarginTrip {
    EmptyWallet,
    UtilizationCap { used: f64, wallet: f64 },
}

impl MarginGuard {
    pub fn new(max_utilization: f64) -> Self {
        Self { max_utilization }
    }

    pub fn check(&self, account: &AccountSnapshot) -> Result<(), MarginTrip> {
        let wallet = account.wallet_balance;
        if wallet <= 0.0 {
            return Err(MarginTrip::EmptyWallet);
        }

        let used = account.used_margin();
        if used > wallet * self.max_utilization {
            return Err(MarginTrip::UtilizationCap { used, wallet });
        }

        Ok(())
    }

    pub fn utilization(account: &AccountSnapshot) -> f64 {
        if account.wallet_balance <= 0.0 {
            return f64::INFINITY;
        }
        account.used_margin() / account.wallet_balance
    }

    pub fn to_error(&self, trip: &MarginTrip) -> EngineError {
        match trip {
            MarginTrip::EmptyWallet => EngineError::MarginExceeded {
                used: 0.0,
                wallet: 0.0,
                cap: self.max_utilization,
            },
            MarginTrip::UtilizationCap { used, wallet } => EngineError::MarginExceeded {
                used: *used,
                wallet: *wallet,
                cap: self.max_utilization,
            },
        }
    }
}
