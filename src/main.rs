use anyhow::Context;
use chrono::{Timelike, Utc};
use clap::Parser;
use flowbot::api::{build_http_client, BinanceFuturesClient, CoinankClient};
use flowbot::config::{Settings, DEFAULT_CONFIG_PATH};
use flowbot::discovery::{build_universe, Universe};
use flowbot::{EngineError, ExchangeClient, FlowFeed, TradingEngine};
use std::sync::Arc;
use tokio::time::{interval_at, Duration, Instant};

#[derive(Debug, Parser)]
#[command(name = "flowbot", about = "Capital-flow driven perpetual futures engine")]
struct Cli {
    /// Config file (TOML); missing file falls back to defaults + env
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,

    /// Run boot checks only
    #[arg(long)]
    check: bool,
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Instant of the next wall-clock minute boundary (XX:XX:00)
fn next_minute_boundary() -> Instant {
    let now = Utc::now();
    let into_minute_ms = now.second() as u64 * 1000 + now.timestamp_subsec_millis() as u64;
    let wait_ms = if into_minute_ms == 0 {
        0
    } else {
        60_000 - into_minute_ms
    };
    Instant::now() + Duration::from_millis(wait_ms)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    tracing::info!("🚀 FlowBot starting");

    let settings = Settings::load(&cli.config).context("loading configuration")?;
    let http = build_http_client(
        settings.exchange.timeout_secs,
        settings.exchange.proxy.as_deref(),
    )?;

    let exchange: Arc<dyn ExchangeClient> = Arc::new(BinanceFuturesClient::new(
        http.clone(),
        settings.exchange.base_url.clone(),
        settings.exchange.api_key.clone(),
        settings.exchange.api_secret.clone(),
        settings.exchange.recv_window_ms,
        settings.exchange.requests_per_second,
    ));
    let feed: Arc<dyn FlowFeed> = Arc::new(CoinankClient::new(
        http,
        settings.flow.base_url.clone(),
        settings.flow.token_seed.clone(),
        settings.strategy.side_inflow_threshold,
    ));

    let universe = Arc::new(boot(exchange.as_ref(), feed.as_ref(), &settings).await?);
    log_configuration(&settings, &universe);

    if cli.check {
        tracing::info!("✅ Boot checks passed");
        return Ok(());
    }

    let engine = Arc::new(TradingEngine::new(
        Arc::clone(&exchange),
        feed,
        universe,
        &settings,
    ));

    if cli.once {
        run_cycle(&engine).await;
        return Ok(());
    }

    tracing::info!("\n🔄 Spawning loops...");
    let cycle_task = {
        let engine = Arc::clone(&engine);
        let period = settings.engine.cycle_interval_secs;
        tokio::spawn(async move { cycle_loop(engine, period).await })
    };
    let sync_task = {
        let exchange = Arc::clone(&exchange);
        let period = settings.engine.time_sync_interval_secs;
        tokio::spawn(async move { time_sync_loop(exchange, period).await })
    };

    tracing::info!(
        "  💹 Trading: every {}s (aligned to the minute)",
        settings.engine.cycle_interval_secs
    );
    tracing::info!(
        "  ⏱️  Clock sync: every {}s",
        settings.engine.time_sync_interval_secs
    );
    tracing::info!("\nPress Ctrl+C to stop...\n");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("\n⚠️  Received Ctrl+C, shutting down...");
        }
        result = cycle_task => {
            tracing::error!("Trading loop exited: {:?}", result);
        }
        result = sync_task => {
            let err = match result {
                Ok(err) => err,
                Err(join) => EngineError::FatalStartup(join.to_string()),
            };
            tracing::error!("❌ Clock sync failed, terminating: {}", err);
            return Err(err.into());
        }
    }

    tracing::info!("👋 FlowBot stopped");
    Ok(())
}

// ============================================================================
// Initialization Functions
// ============================================================================

fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("flowbot=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Connectivity, clock and metadata checks; any failure is fatal
async fn boot(
    exchange: &dyn ExchangeClient,
    feed: &dyn FlowFeed,
    settings: &Settings,
) -> flowbot::Result<Universe> {
    let fatal = |what: &str, e: EngineError| EngineError::FatalStartup(format!("{}: {}", what, e));

    tracing::info!("🔍 Checking connectivity...");
    feed.ping().await.map_err(|e| fatal("flow feed unreachable", e))?;
    exchange
        .ping()
        .await
        .map_err(|e| fatal("exchange unreachable", e))?;

    let offset = exchange
        .sync_time()
        .await
        .map_err(|e| fatal("exchange time sync", e))?;
    tracing::info!("  Clock offset: {}ms", offset);

    let instruments = exchange
        .instruments()
        .await
        .map_err(|e| fatal("exchange metadata", e))?;
    let universe = build_universe(instruments, settings);
    if universe.is_empty() {
        return Err(EngineError::FatalStartup(
            "no tradeable instruments after filtering".to_string(),
        ));
    }

    tracing::info!("✅ Connectivity verified, {} instruments tradeable", universe.len());
    Ok(universe)
}

fn log_configuration(settings: &Settings, universe: &Universe) {
    let s = &settings.strategy;
    let t = &settings.trading;
    tracing::info!("\n📊 Configuration:");
    tracing::info!("  Universe: {} {} perpetuals", universe.len(), s.quote_asset);
    tracing::info!("  Max coins per side: {}", s.max_coins);
    tracing::info!("  CRSI: length {} level {}", s.rsi_length, s.rsi_level);
    tracing::info!("  Order: {} {} at {}x, book depth {}", t.amount, s.quote_asset, t.leverage, t.price_depth);
    tracing::info!("  Margin cap: {}%", t.margin_utilization_rate * 100.0);
    tracing::info!(
        "  Mode: {}",
        if t.bidirectional { "bidirectional" } else { "unidirectional" }
    );
}

// ============================================================================
// Loops
// ============================================================================

async fn run_cycle(engine: &TradingEngine) {
    match engine.run_cycle(engine.exchange_time_ms()).await {
        Ok(outcome) => {
            tracing::info!(
                "✅ Cycle done: {} flows, {} ranked, {} candidates, {} actions, {} placed, {} cancelled",
                outcome.flows,
                outcome.ranked,
                outcome.candidates,
                outcome.actions,
                outcome.report.placed,
                outcome.report.cancelled
            );
        }
        Err(e) if e.aborts_cycle() => tracing::warn!("⚠️  Cycle aborted: {}", e),
        Err(e) => tracing::error!("❌ Cycle failed: {}", e),
    }
}

/// Each tick spawns its own cycle; a slow cycle never delays the next
async fn cycle_loop(engine: Arc<TradingEngine>, period_secs: u64) {
    let mut ticker = interval_at(next_minute_boundary(), Duration::from_secs(period_secs));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        tracing::info!("💹 [TRADING] Tick at {}", Utc::now().format("%H:%M:%S"));

        let engine = Arc::clone(&engine);
        tokio::spawn(async move { run_cycle(&engine).await });
    }
}

/// Runs until a sync fails and returns that error
async fn time_sync_loop(exchange: Arc<dyn ExchangeClient>, period_secs: u64) -> EngineError {
    let period = Duration::from_secs(period_secs);
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        match exchange.sync_time().await {
            Ok(offset) => tracing::debug!("⏱️  Clock offset {}ms", offset),
            Err(e) => return e,
        }
    }
}
