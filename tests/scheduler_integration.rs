//! End-to-end test of one strategic cycle: seed the Market Store through a
//! Mock Provider quote, run the Decision Scheduler with no LLM providers
//! configured (every analyst/researcher/portfolio-manager stage degrades to
//! `AgentOutput::error` per the agent contract), and confirm the cycle
//! still completes with a safe HOLD decision instead of panicking or
//! hanging.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use trading_orchestrator::agents::AgentGraph;
use trading_orchestrator::agents::output::TradeSignalAction;
use trading_orchestrator::broker::PaperBroker;
use trading_orchestrator::config::Config;
use trading_orchestrator::llm::LlmRouter;
use trading_orchestrator::market::{Instrument, InstrumentKind, MarketStore, Tick};
use trading_orchestrator::persistence::{Persistence, SqlitePersistence};
use trading_orchestrator::provider::{MockProvider, Provider};
use trading_orchestrator::scheduler::{CycleKind, DecisionScheduler};

fn test_config() -> Config {
    toml::from_str(
        r#"
        [instrument]
        symbol = "NIFTY"
        exchange = "NSE"
        kind = "index"
        "#,
    )
    .expect("test config must parse")
}

#[tokio::test]
async fn strategic_cycle_completes_with_hold_when_no_llm_providers_configured() {
    let config = Arc::new(test_config());
    let instrument = Instrument::new(
        config.instrument.symbol.clone(),
        config.instrument.exchange.clone(),
        InstrumentKind::Index,
    );

    let market = Arc::new(MarketStore::new());

    let provider = MockProvider::new(7, 21500.0);
    let symbols = vec![instrument.symbol.clone()];
    let quotes = provider.quote(&symbols).await.expect("mock provider always returns a quote");
    let quote = quotes.get(&instrument.symbol).expect("mock provider quotes every requested symbol");
    market.put_tick(Tick {
        instrument: instrument.clone(),
        timestamp: quote.at,
        last_price: quote.price,
        volume: Some(quote.volume),
        bid_depth: vec![],
        ask_depth: vec![],
        bid_qty_total: None,
        ask_qty_total: None,
    });

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("orchestrator_test.db");
    let persistence: Arc<dyn Persistence> = Arc::new(SqlitePersistence::open(db_path.to_str().unwrap()).unwrap());

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
        market,
        persistence.clone(),
        broker.clone(),
        graph,
        config.clone(),
        instrument.clone(),
        120,
    ));

    let result = scheduler
        .run_cycle(CycleKind::Strategic, CancellationToken::new())
        .await
        .expect("a cycle with fresh data must not error even when every LLM-backed agent fails");

    assert_eq!(result.instrument, instrument.symbol);
    assert_eq!(result.final_signal, TradeSignalAction::Hold);
    assert!(broker.open_positions().is_empty(), "no execution agent should open a position without LLM input");

    let persisted = persistence
        .find_many("market_events", serde_json::json!({}), None, 10)
        .await
        .unwrap();
    assert!(!persisted.is_empty(), "the cycle result must be persisted to market_events");
}

#[tokio::test]
async fn mock_provider_quotes_are_deterministic_per_seed() {
    let instrument = Instrument::new("NIFTY", "NSE", InstrumentKind::Index);
    let provider_a = MockProvider::new(99, 100.0);
    let provider_b = MockProvider::new(99, 100.0);
    let symbols = vec![instrument.symbol.clone()];

    let quotes_a = provider_a.quote(&symbols).await.unwrap();
    let quotes_b = provider_b.quote(&symbols).await.unwrap();

    assert_eq!(quotes_a[&instrument.symbol].price, quotes_b[&instrument.symbol].price);
}
