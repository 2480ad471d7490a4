//! `/api/*` and `/metrics/*` handlers (§6.1). Every success and error body
//! passes through the alias law and carries the no-cache contract; reads
//! come straight off the Market Store / Paper Broker / Persistence Layer,
//! never duplicating state the components already hold.

use axum::extract::{Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::agents::output::ExecutionOutput;
use crate::config::MarketHoursConfig;
use crate::market::Timeframe;
use crate::persistence::{Sort, SortOrder};
use crate::risk::VaRCalculator;

use super::alias::add_camel_aliases;
use super::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/market-data", get(market_data))
        .route("/api/latest-signal", get(latest_signal))
        .route("/api/latest-analysis", get(latest_analysis))
        .route("/api/recent-trades", get(recent_trades))
        .route("/api/portfolio", get(portfolio))
        .route("/api/decision-snapshot", get(decision_snapshot))
        .route("/metrics/trading", get(metrics_trading))
        .route("/metrics/risk", get(metrics_risk))
        .route("/metrics", get(metrics_prometheus))
        .with_state(state)
}

/// Raw Prometheus exposition of the process counters/gauges recorded via
/// the `metrics` crate (ticks ingested, cycles run, orders filled/closed).
/// Not part of §6.1's JSON contract; plain text, no alias law, no cache
/// header override beyond axum's default.
async fn metrics_prometheus(State(state): State<AppState>) -> String {
    state.metrics_handle.render()
}

fn api_ok(body: Value) -> Response {
    api_response(StatusCode::OK, body)
}

fn api_response(status: StatusCode, body: Value) -> Response {
    let aliased = add_camel_aliases(body);
    let mut response = (status, Json(aliased)).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache, no-store, must-revalidate"));
    response
}

async fn health(State(state): State<AppState>) -> Response {
    let ltp_age = state.market.age(&state.instrument);
    let depth_age = state.market.depth_age(&state.instrument);
    let ltp_fresh = ltp_age.map(|a| a < 120.0).unwrap_or(false);
    let depth_recent = depth_age.map(|a| a < 180.0).unwrap_or(false);

    // §8 P9: `ok` iff both the last tick and the last depth update are
    // recent; `unhealthy` when no tick has ever arrived at all.
    let status = if ltp_age.is_none() {
        "unhealthy"
    } else if ltp_fresh && depth_recent {
        "ok"
    } else {
        "degraded"
    };

    api_ok(json!({
        "status": status,
        "ltp_fresh": ltp_fresh,
        "ltp_age_seconds": ltp_age,
        "depth_recent": depth_recent,
        "depth_age_seconds": depth_age,
    }))
}

async fn market_data(State(state): State<AppState>) -> Response {
    let current_price = state.market.latest_price(&state.instrument);
    let bars = state.market.recent_bars(&state.instrument, Timeframe::H1, 24);

    let high_24h = bars.iter().map(|b| b.high).reduce(f64::max);
    let low_24h = bars.iter().map(|b| b.low).reduce(f64::min);
    let total_volume: f64 = bars.iter().map(|b| b.volume).sum();
    let vwap = (total_volume > 0.0).then(|| bars.iter().map(|b| b.close * b.volume).sum::<f64>() / total_volume);
    let change_24h = current_price.zip(bars.first()).map(|(cur, first)| cur - first.open);

    api_ok(json!({
        "current_price": current_price,
        "market_open": market_is_open(&state.config.market_hours),
        "high_24h": high_24h,
        "low_24h": low_24h,
        "vwap": vwap,
        "change_24h": change_24h,
        "timestamp": Utc::now(),
    }))
}

fn market_is_open(hours: &MarketHoursConfig) -> bool {
    if hours.is_24_7 {
        return true;
    }
    let (Some(open), Some(close)) = (hours.open.as_deref(), hours.close.as_deref()) else {
        return true;
    };
    let parse = |s: &str| chrono::NaiveTime::parse_from_str(s, "%H:%M").ok();
    let (Some(open_t), Some(close_t)) = (parse(open), parse(close)) else {
        return true;
    };
    let now = Utc::now().time();
    if open_t <= close_t {
        now >= open_t && now <= close_t
    } else {
        now >= open_t || now <= close_t
    }
}

async fn recent_market_events(state: &AppState, limit: usize) -> Vec<Value> {
    state
        .persistence
        .find_many("market_events", json!({}), Some(Sort { field: "event_at", order: SortOrder::Desc }), limit)
        .await
        .unwrap_or_default()
}

async fn latest_signal(State(state): State<AppState>) -> Response {
    let events = recent_market_events(&state, 50).await;
    let signal = events.iter().find(|e| e.get("action").is_some());
    let reasoning = events.iter().find_map(|e| e.get("executive_summary").cloned()).unwrap_or(Value::String(String::new()));

    match signal {
        Some(doc) => api_ok(json!({
            "signal": doc.get("action").cloned().unwrap_or(Value::Null),
            "entry_price": doc.get("entry").cloned().unwrap_or(Value::Null),
            "stop_loss": doc.get("stop_loss").cloned().unwrap_or(Value::Null),
            "take_profit": doc.get("take_profit").cloned().unwrap_or(Value::Null),
            "confidence": doc.get("confidence").cloned().unwrap_or(Value::Null),
            "reasoning": reasoning,
        })),
        None => api_ok(json!({
            "signal": "HOLD",
            "entry_price": Value::Null,
            "stop_loss": Value::Null,
            "take_profit": Value::Null,
            "confidence": 0.0,
            "reasoning": "no signal has been emitted yet",
        })),
    }
}

async fn latest_analysis(State(state): State<AppState>) -> Response {
    let events = recent_market_events(&state, 50).await;
    let Some(cycle) = events.iter().find(|e| e.get("final_signal").is_some()) else {
        return api_ok(json!({
            "agents": {},
            "timestamp": Value::Null,
            "final_signal": "HOLD",
            "bullish_score": 0.0,
            "bearish_score": 0.0,
            "executive_summary": "no cycle has completed yet",
        }));
    };

    let cycle_id = cycle.get("cycle_id").and_then(|v| v.as_str()).unwrap_or_default();
    let decisions = state
        .persistence
        .find_many("agent_decisions", json!({"cycle_id": cycle_id}), None, 32)
        .await
        .unwrap_or_default();

    let agents: serde_json::Map<String, Value> = decisions
        .into_iter()
        .filter_map(|d| {
            let name = d.get("agent_name")?.as_str()?.to_string();
            Some((name, d.get("output").cloned().unwrap_or(Value::Null)))
        })
        .collect();

    api_ok(json!({
        "agents": agents,
        "timestamp": cycle.get("at").cloned().unwrap_or(Value::Null),
        "final_signal": cycle.get("final_signal").cloned().unwrap_or(Value::Null),
        "bullish_score": cycle.get("bullish_score").cloned().unwrap_or(Value::Null),
        "bearish_score": cycle.get("bearish_score").cloned().unwrap_or(Value::Null),
        "executive_summary": cycle.get("executive_summary").cloned().unwrap_or(Value::Null),
    }))
}

#[derive(Debug, Deserialize)]
struct RecentTradesQuery {
    limit: Option<usize>,
}

async fn recent_trades(State(state): State<AppState>, Query(q): Query<RecentTradesQuery>) -> Response {
    let limit = q.limit.unwrap_or(20).clamp(1, 500);
    let mut trades = state.broker.closed_positions();
    trades.sort_by(|a, b| b.exit_at.cmp(&a.exit_at));
    trades.truncate(limit);
    api_ok(serde_json::to_value(&trades).unwrap_or_else(|_| json!([])))
}

async fn portfolio(State(state): State<AppState>) -> Response {
    let positions = state.broker.open_positions();
    let current = state.market.latest_price(&state.instrument);

    let mut total_unrealized = 0.0;
    let rows: Vec<Value> = positions
        .iter()
        .map(|p| {
            let mark = current.unwrap_or(p.entry_price);
            let pnl = (mark - p.entry_price) * p.quantity * p.side.direction();
            total_unrealized += pnl;
            json!({
                "symbol": p.instrument,
                "size": p.quantity,
                "entry": p.entry_price,
                "current": mark,
                "pnl": pnl,
            })
        })
        .collect();

    api_ok(json!({
        "total_value": state.broker.capital() + total_unrealized,
        "positions": rows,
    }))
}

async fn decision_snapshot(State(state): State<AppState>) -> Response {
    if state.market.latest_price(&state.instrument).is_none() {
        return api_response(
            StatusCode::SERVICE_UNAVAILABLE,
            json!({"error": "no snapshot has ever been built"}),
        );
    }

    let execution = latest_execution_output(&state).await;
    let snapshot = state.snapshot.build(&state.instrument, execution.as_ref());
    api_ok(serde_json::to_value(&snapshot).unwrap_or_else(|_| json!({})))
}

async fn latest_execution_output(state: &AppState) -> Option<ExecutionOutput> {
    let doc = state
        .persistence
        .find_one(
            "agent_decisions",
            json!({"agent_name": "execution"}),
            Some(Sort { field: "at", order: SortOrder::Desc }),
        )
        .await
        .ok()??;
    let payload = doc.get("output")?.get("payload")?.clone();
    serde_json::from_value(payload).ok()
}

async fn metrics_trading(State(state): State<AppState>) -> Response {
    let closed = state.broker.closed_positions();
    let total_trades = closed.len();
    let wins = closed.iter().filter(|p| p.pnl.unwrap_or(0.0) > 0.0).count();
    let win_rate = if total_trades > 0 { wins as f64 / total_trades as f64 } else { 0.0 };
    let total_pnl: f64 = closed.iter().filter_map(|p| p.pnl).sum();

    api_ok(json!({
        "total_trades": total_trades,
        "win_rate": win_rate,
        "total_pnl": total_pnl,
        "open_positions": state.broker.open_count(),
    }))
}

async fn metrics_risk(State(state): State<AppState>) -> Response {
    let closed = state.broker.closed_positions();
    let pnl_series: Vec<f64> = closed.iter().filter_map(|p| p.pnl).collect();

    let mut var_calc = VaRCalculator::new(0.95);
    for &pnl in &pnl_series {
        var_calc.add_pnl(pnl);
    }
    let var_95 = var_calc.calculate_var().unwrap_or(0.0);

    let mut equity_curve = Vec::with_capacity(pnl_series.len() + 1);
    let mut equity = state.config.trading.initial_capital;
    equity_curve.push(equity);
    for &pnl in &pnl_series {
        equity += pnl;
        equity_curve.push(equity);
    }

    let open_notional: f64 = state.broker.open_positions().iter().map(|p| p.entry_price * p.quantity).sum();

    api_ok(json!({
        "sharpe_ratio": crate::risk::sharpe_ratio(&pnl_series),
        "max_drawdown": crate::risk::max_drawdown_pct(&equity_curve),
        "var_95": var_95,
        "total_exposure": open_notional,
    }))
}
