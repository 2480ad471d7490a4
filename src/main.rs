//! Process entry point: builds every component from a single `Config`,
//! spawns the concurrency topology in §5 (one ingestion task per
//! instrument, one scheduler per cycle-type per instrument, one position
//! monitor, one snapshot builder, one LLM health-check loop), and serves
//! the `/api/*` + `/metrics/*` HTTP surface until `Ctrl-C`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::middleware as axum_mw;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use trading_orchestrator::agents::AgentGraph;
use trading_orchestrator::api::{self, AppState};
use trading_orchestrator::broker::PaperBroker;
use trading_orchestrator::config::{Cli, Config};
use trading_orchestrator::ingestion::IngestionPipeline;
use trading_orchestrator::llm::LlmRouter;
use trading_orchestrator::market::{Instrument, InstrumentKind, MarketStore};
use trading_orchestrator::middleware::{rate_limit_middleware, request_logging, RateLimitConfig, RateLimitLayer};
use trading_orchestrator::monitor::PositionMonitor;
use trading_orchestrator::persistence::{Persistence, SqlitePersistence};
use trading_orchestrator::provider::{select_provider, MockProvider, Provider};
use trading_orchestrator::scheduler::{cancel_with_grace, DecisionScheduler};
use trading_orchestrator::snapshot::SnapshotBuilder;

/// Price the Mock Provider starts quoting around when no live credentials
/// and no replay dataset are configured — a development fallback only.
const MOCK_PROVIDER_BASE_PRICE: f64 = 100.0;
const MOCK_PROVIDER_SEED: u64 = 42;

const POSITION_SYNC_PERIOD: Duration = Duration::from_secs(5);
const LLM_HEALTH_CHECK_PERIOD: Duration = Duration::from_secs(60);

/// §B.7's 30-day `ohlc_history` retention, swept once a day rather than
/// checked per-row.
const OHLC_TTL_SWEEP_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);
const OHLC_TTL_DAYS: i64 = 30;

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

    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install the process-wide metrics recorder");

    let cli = Cli::parse();
    let config = match Config::load(&cli) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!(error = %e, "fatal configuration error");
            std::process::exit(1);
        }
    };

    let instrument = Instrument::new(
        config.instrument.symbol.clone(),
        config.instrument.exchange.clone(),
        parse_instrument_kind(&config.instrument.kind),
    );

    let market = Arc::new(MarketStore::new());
    let sqlite = Arc::new(SqlitePersistence::open(&config.persistence.database_path)?);
    let persistence: Arc<dyn Persistence> = sqlite.clone();

    let provider: Arc<dyn Provider> = select_provider(&config, None)
        .unwrap_or_else(|| Arc::new(MockProvider::new(MOCK_PROVIDER_SEED, MOCK_PROVIDER_BASE_PRICE)));

    let llm = Arc::new(LlmRouter::from_config(&config));
    let graph = Arc::new(AgentGraph::new(
        llm.clone(),
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
        graph.clone(),
        config.clone(),
        instrument.clone(),
        config.data_max_age_seconds(),
    ));

    let monitor = Arc::new(PositionMonitor::new(broker.clone(), market.clone(), instrument.clone()));
    {
        let monitor = monitor.clone();
        market.register_tick_callback(Box::new(move |_tick| monitor.evaluate_once(false)));
    }

    let snapshot = Arc::new(SnapshotBuilder::new(market.clone(), broker.clone(), config.instrument.strike_step));

    let ingestion = Arc::new(IngestionPipeline::new(instrument.clone(), provider.clone(), market.clone(), persistence.clone()));

    let cancel = CancellationToken::new();

    let ingestion_task = {
        let ingestion = ingestion.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { ingestion.run(cancel).await })
    };

    let scheduler_task = {
        let scheduler = scheduler.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            scheduler
                .run_forever(
                    Duration::from_secs(config.scheduler.strategic_cycle_minutes * 60),
                    Duration::from_secs(config.scheduler.tactical_cycle_minutes * 60),
                    cancel,
                )
                .await
        })
    };

    let monitor_task = {
        let monitor = monitor.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { monitor.run(cancel, || false).await })
    };

    let position_sync_task = {
        let broker = broker.clone();
        let persistence = persistence.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { position_sync_loop(broker, persistence, cancel).await })
    };

    let llm_health_task = {
        let llm = llm.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { llm_health_check_loop(llm, cancel).await })
    };

    let ttl_sweep_task = {
        let sqlite = sqlite.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { ttl_sweep_loop(sqlite, cancel).await })
    };

    let state = AppState {
        market: market.clone(),
        broker: broker.clone(),
        persistence: persistence.clone(),
        snapshot,
        instrument: instrument.clone(),
        config: config.clone(),
        metrics_handle,
    };

    let rate_limiter = RateLimitLayer::new(RateLimitConfig::default());
    let app = api::router(state)
        .layer(axum_mw::from_fn(request_logging))
        .layer(axum_mw::from_fn_with_state(rate_limiter, rate_limit_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "orchestrator listening");

    let server_cancel = cancel.clone();
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("ctrl-c received, shutting down");
            server_cancel.cancel();
        })
        .await?;

    cancel_with_grace(&cancel).await;

    for task in [ingestion_task, scheduler_task, monitor_task, position_sync_task, llm_health_task, ttl_sweep_task] {
        task.abort();
    }

    Ok(())
}

/// Mirrors `Position`'s JSON shape onto `trades_executed`'s expected columns
/// (`trade_id`, `entry_at`, `status`) so both open and closed positions stay
/// queryable from `/api/recent-trades` fallbacks and offline analysis.
async fn position_sync_loop(broker: Arc<PaperBroker>, persistence: Arc<dyn Persistence>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(POSITION_SYNC_PERIOD);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                for position in broker.open_positions().into_iter().chain(broker.closed_positions()) {
                    if let Ok(doc) = serde_json::to_value(&position) {
                        if let Err(e) = persistence.insert("trades_executed", doc).await {
                            warn!(error = %e, "failed to sync position to persistence");
                        }
                    }
                }
            }
        }
    }
}

async fn llm_health_check_loop(llm: Arc<LlmRouter>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(LLM_HEALTH_CHECK_PERIOD);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => llm.health_check_all().await,
        }
    }
}

/// §6.2's 30-day TTL on `ohlc_history` as a periodic sweep (SPEC_FULL.md
/// §B.7), since SQLite has no native per-row TTL.
async fn ttl_sweep_loop(persistence: Arc<SqlitePersistence>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(OHLC_TTL_SWEEP_PERIOD);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                match persistence.prune_ohlc_older_than(OHLC_TTL_DAYS) {
                    Ok(pruned) if pruned > 0 => info!(pruned, "pruned ohlc_history rows past the 30-day TTL"),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "ohlc_history TTL sweep failed"),
                }
            }
        }
    }
}
