use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;

use super::exchange::FlowFeed;
use crate::error::EngineError;
use crate::models::FlowSnapshot;
use crate::Result;

const FUND_REAL_PATH: &str = "/api/fund/fundReal";
const FUND_REAL_QUERY: &[(&str, &str)] = &[
    ("page", "1"),
    ("size", "50"),
    ("type", "1"),
    ("productType", "SWAP"),
    ("sortBy", ""),
    ("baseCoin", ""),
    ("isFollow", "false"),
];
const TOKEN_HEADER: &str = "coinank-apikey";
const TOKEN_TIME_OFFSET_MS: i64 = 1_111_111_111_111;
const TOKEN_SUFFIX: u32 = 347;

/// Client for the Coinank real-time fund flow feed
///
/// The auth token embeds the request time, so it is derived per call and
/// never cached.
#[derive(Clone)]
pub struct CoinankClient {
    client: Client,
    base_url: String,
    token_seed: String,
    inflow_threshold: f64,
}

// ============== Response Types ==============

#[derive(Debug, Deserialize)]
struct FundResponse {
    success: bool,
    #[serde(default)]
    data: Option<FundPage>,
}

#[derive(Debug, Deserialize)]
struct FundPage {
    list: Vec<FundRow>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FundRow {
    base_coin: String,
    m5net: f64,
    m15net: f64,
}

// ============== Implementation ==============

impl CoinankClient {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        token_seed: impl Into<String>,
        inflow_threshold: f64,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token_seed: token_seed.into(),
            inflow_threshold,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}{}", self.base_url, FUND_REAL_PATH)
    }

    /// Parse a feed body into snapshots, validating every required field
    fn parse_body(&self, body: &str) -> Result<Vec<FlowSnapshot>> {
        let response: FundResponse = serde_json::from_str(body)
            .map_err(|e| EngineError::Parse(format!("fund flow payload: {}", e)))?;

        if !response.success {
            return Err(EngineError::Parse(
                "fund flow feed returned success=false".to_string(),
            ));
        }

        let page = response
            .data
            .ok_or_else(|| EngineError::Parse("fund flow payload has no data".to_string()))?;

        let mut snapshots = Vec::with_capacity(page.list.len());
        for row in page.list {
            if !row.m5net.is_finite() || !row.m15net.is_finite() {
                return Err(EngineError::Parse(format!(
                    "non-finite net flow for {}",
                    row.base_coin
                )));
            }
            snapshots.push(FlowSnapshot::new(
                row.base_coin,
                row.m5net,
                row.m15net,
                self.inflow_threshold,
            ));
        }

        Ok(snapshots)
    }
}

/// Build the time-embedded feed token for `now_ms`
pub fn derive_token(seed: &str, now_ms: i64) -> String {
    let raw = format!(
        "{}|{}{}",
        seed,
        now_ms + TOKEN_TIME_OFFSET_MS,
        TOKEN_SUFFIX
    );
    STANDARD.encode(raw.as_bytes())
}

#[async_trait]
impl FlowFeed for CoinankClient {
    async fn ping(&self) -> Result<()> {
        let response = self
            .client
            .get(self.endpoint())
            .query(FUND_REAL_QUERY)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(EngineError::TransientNetwork(format!(
                "Coinank status {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn fetch_flows(&self) -> Result<Vec<FlowSnapshot>> {
        let token = derive_token(&self.token_seed, Utc::now().timestamp_millis());

        let response = self
            .client
            .post(self.endpoint())
            .query(FUND_REAL_QUERY)
            .header(TOKEN_HEADER, token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::TransientNetwork(format!(
                "Coinank API error: {}",
                status
            )));
        }

        let body = response.text().await?;
        let snapshots = self.parse_body(&body)?;

        tracing::debug!(rows = snapshots.len(), "Fetched fund flow snapshot");
        Ok(snapshots)
    }
}
