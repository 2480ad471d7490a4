//! Drives a historical candle file through the Ingestion Pipeline's replay
//! path and the Decision Scheduler for offline backtesting (§4.2 Replay
//! mode, §9 "historical replay / mock at the caller"). Cycle freshness
//! during replay is evaluated against the real wall clock everywhere else
//! in the system, which would make every cycle look stale against
//! historical timestamps; this binary runs the scheduler with an
//! effectively unbounded max-age instead of `config.data_max_age_seconds()`
//! so replayed cycles are not rejected as stale data.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use trading_orchestrator::agents::AgentGraph;
use trading_orchestrator::broker::PaperBroker;
use trading_orchestrator::config::{self, Config};
use trading_orchestrator::ingestion::run_replay;
use trading_orchestrator::llm::LlmRouter;
use trading_orchestrator::market::{Instrument, InstrumentKind, MarketStore};
use trading_orchestrator::persistence::{Persistence, SqlitePersistence};
use trading_orchestrator::provider::{Candle, HistoricalReplayProvider};
use trading_orchestrator::scheduler::{CycleKind, DecisionScheduler};

const CYCLE_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Parser, Debug)]
#[command(name = "replay_run", about = "Replays historical candles through the scheduler for backtesting")]
struct ReplayCli {
    /// Path to the TOML configuration file (same schema as `orchestrator`).
    #[arg(long, env = "ORCHESTRATOR_CONFIG", default_value = "orchestrator.toml")]
    config: PathBuf,

    /// JSON array of `Candle { at, open, high, low, close, volume }`.
    #[arg(long)]
    candles: PathBuf,

    /// Replay speed multiplier passed to `HistoricalReplayProvider`.
    #[arg(long, default_value_t = 60.0)]
    speed: f64,
}

fn parse_instrument_kind(kind: &str) -> InstrumentKind {
    match kind {
        "index" => InstrumentKind::Index,
        "future" => InstrumentKind::Future,
        "option" => InstrumentKind::Option,
        _ => InstrumentKind::Spot,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = ReplayCli::parse();
    let inner_cli = config::Cli { config: cli.config.clone(), paper_mode: Some(true), port: None };
    let config = Arc::new(Config::load(&inner_cli)?);

    let instrument = Instrument::new(
        config.instrument.symbol.clone(),
        config.instrument.exchange.clone(),
        parse_instrument_kind(&config.instrument.kind),
    );

    let candles_raw = std::fs::read_to_string(&cli.candles)?;
    let candles: Vec<Candle> = serde_json::from_str(&candles_raw)?;
    anyhow::ensure!(!candles.is_empty(), "candle file {} is empty", cli.candles.display());

    let market = Arc::new(MarketStore::new());
    let persistence: Arc<dyn Persistence> = Arc::new(SqlitePersistence::open(&config.persistence.database_path)?);
    let replay = Arc::new(HistoricalReplayProvider::new(instrument.symbol.clone(), candles, cli.speed));

    let llm = Arc::new(LlmRouter::from_config(&config));
    let graph = Arc::new(AgentGraph::new(
        llm,
        persistence.clone(),
        config.risk.default_stop_loss_pct,
        config.risk.default_take_profit_pct,
    ));
    let broker = Arc::new(PaperBroker::new(
        config.trading.initial_capital,
        config.trading.commission_per_trade,
        config.trading.slippage_bps,
        config.trading.margin_fraction,
        config.trading.max_concurrent_positions,
    ));

    let scheduler = Arc::new(DecisionScheduler::new(
        market.clone(),
        persistence.clone(),
        broker.clone(),
        graph,
        config.clone(),
        instrument.clone(),
        u64::MAX,
    ));

    let cancel = CancellationToken::new();

    let ingestion_task = {
        let instrument = instrument.clone();
        let replay = replay.clone();
        let market = market.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { run_replay(instrument, replay, market, cancel).await })
    };

    while !replay.is_exhausted() {
        tokio::time::sleep(CYCLE_POLL_INTERVAL).await;
        if let Err(e) = scheduler.run_cycle(CycleKind::Tactical, cancel.clone()).await {
            tracing::warn!(error = %e, "replay cycle did not complete");
        }
    }

    cancel.cancel();
    let _ = ingestion_task.await;

    let closed = broker.closed_positions();
    let total_pnl: f64 = closed.iter().filter_map(|p| p.pnl).sum();
    tracing::info!(trades = closed.len(), total_pnl, "replay complete");

    Ok(())
}
