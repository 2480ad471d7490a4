//! Process-wide configuration, built exactly once at startup (§6.3, §9).
//!
//! No component reads `std::env` or a dotenv file at use-site; `Config` is
//! parsed from a TOML file, optionally overridden by CLI flags, and then
//! handed to every component's constructor as `Arc<Config>`.

use std::path::PathBuf;

use clap::Parser;
use serde::Deserialize;

use crate::error::OrchestratorError;

#[derive(Parser, Debug)]
#[command(name = "orchestrator", about = "Live algorithmic trading orchestrator")]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, env = "ORCHESTRATOR_CONFIG", default_value = "orchestrator.toml")]
    pub config: PathBuf,

    /// Override `trading.paper_mode`.
    #[arg(long)]
    pub paper_mode: Option<bool>,

    /// HTTP bind port, overrides `server.port`.
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstrumentConfig {
    pub symbol: String,
    pub exchange: String,
    #[serde(default = "default_instrument_kind")]
    pub kind: String,
    /// Strike spacing used by the Snapshot Builder's ATM selection (§9 open question 3).
    #[serde(default)]
    pub strike_step: Option<i64>,
}

fn default_instrument_kind() -> String {
    "spot".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketHoursConfig {
    #[serde(default)]
    pub open: Option<String>,
    #[serde(default)]
    pub close: Option<String>,
    #[serde(default)]
    pub tz: Option<String>,
    #[serde(default)]
    pub is_24_7: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradingConfig {
    #[serde(default = "default_true")]
    pub paper_mode: bool,
    #[serde(default = "default_max_position_size_pct")]
    pub max_position_size_pct: f64,
    #[serde(default = "default_max_leverage")]
    pub max_leverage: f64,
    #[serde(default = "default_max_concurrent_positions")]
    pub max_concurrent_positions: usize,
    #[serde(default = "default_slippage_bps")]
    pub slippage_bps: f64,
    #[serde(default = "default_commission_per_trade")]
    pub commission_per_trade: f64,
    #[serde(default = "default_margin_fraction")]
    pub margin_fraction: f64,
    #[serde(default = "default_initial_capital")]
    pub initial_capital: f64,
}

fn default_true() -> bool {
    true
}
fn default_max_position_size_pct() -> f64 {
    0.1
}
fn default_max_leverage() -> f64 {
    3.0
}
fn default_max_concurrent_positions() -> usize {
    5
}
fn default_slippage_bps() -> f64 {
    5.0
}
fn default_commission_per_trade() -> f64 {
    20.0
}
fn default_margin_fraction() -> f64 {
    1.0
}
fn default_initial_capital() -> f64 {
    1_000_000.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct RiskConfig {
    #[serde(default = "default_daily_loss_limit_pct")]
    pub daily_loss_limit_pct: f64,
    #[serde(default = "default_stop_loss_pct")]
    pub default_stop_loss_pct: f64,
    #[serde(default = "default_take_profit_pct")]
    pub default_take_profit_pct: f64,
    #[serde(default = "default_high_volatility_threshold")]
    pub high_volatility_threshold: f64,
    #[serde(default = "default_api_rate_limit_per_min")]
    pub api_rate_limit_per_min: u32,
}

fn default_daily_loss_limit_pct() -> f64 {
    2.0
}
fn default_stop_loss_pct() -> f64 {
    0.3
}
fn default_take_profit_pct() -> f64 {
    0.6
}
fn default_high_volatility_threshold() -> f64 {
    25.0
}
fn default_api_rate_limit_per_min() -> u32 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmProviderConfig {
    pub name: String,
    pub priority: u32,
    #[serde(default)]
    pub api_key: Option<String>,
    pub model: String,
    #[serde(default)]
    pub daily_token_quota: Option<u64>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    Priority,
    Hash,
    RoundRobin,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub providers: Vec<LlmProviderConfig>,
    #[serde(default = "default_selection_strategy")]
    pub selection_strategy: SelectionStrategy,
}

fn default_selection_strategy() -> SelectionStrategy {
    SelectionStrategy::Priority
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_strategic_minutes")]
    pub strategic_cycle_minutes: u64,
    #[serde(default = "default_tactical_minutes")]
    pub tactical_cycle_minutes: u64,
    #[serde(default = "default_max_age_equity")]
    pub data_max_age_seconds: u64,
}

fn default_strategic_minutes() -> u64 {
    12
}
fn default_tactical_minutes() -> u64 {
    3
}
fn default_max_age_equity() -> u64 {
    120
}

/// Provider selection and live credentials (§4.2, §9 "credentials passed
/// via Config instead of env/credentials.json"). `name` is the explicit
/// override; absent both `name` and credentials, the factory falls back to
/// historical replay or mock at the caller.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub live_api_key: Option<String>,
    #[serde(default)]
    pub live_base_url: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self { name: None, live_api_key: None, live_base_url: None }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

fn default_database_path() -> String {
    "./orchestrator.db".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub instrument: InstrumentConfig,
    #[serde(default)]
    pub market_hours: MarketHoursConfig,
    #[serde(default)]
    pub trading: TradingConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Default for MarketHoursConfig {
    fn default() -> Self {
        Self {
            open: None,
            close: None,
            tz: None,
            is_24_7: true,
        }
    }
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            paper_mode: default_true(),
            max_position_size_pct: default_max_position_size_pct(),
            max_leverage: default_max_leverage(),
            max_concurrent_positions: default_max_concurrent_positions(),
            slippage_bps: default_slippage_bps(),
            commission_per_trade: default_commission_per_trade(),
            margin_fraction: default_margin_fraction(),
            initial_capital: default_initial_capital(),
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            daily_loss_limit_pct: default_daily_loss_limit_pct(),
            default_stop_loss_pct: default_stop_loss_pct(),
            default_take_profit_pct: default_take_profit_pct(),
            high_volatility_threshold: default_high_volatility_threshold(),
            api_rate_limit_per_min: default_api_rate_limit_per_min(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            selection_strategy: default_selection_strategy(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            strategic_cycle_minutes: default_strategic_minutes(),
            tactical_cycle_minutes: default_tactical_minutes(),
            data_max_age_seconds: default_max_age_equity(),
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: default_port() }
    }
}

impl Config {
    /// Load from the CLI-resolved path, applying CLI overrides. Any failure
    /// here is `ConfigError`, the one fatal-at-startup variant (§7).
    pub fn load(cli: &Cli) -> Result<Self, OrchestratorError> {
        let raw = std::fs::read_to_string(&cli.config).map_err(|e| {
            OrchestratorError::ConfigError(format!(
                "cannot read config file {}: {e}",
                cli.config.display()
            ))
        })?;

        let mut config: Config = toml::from_str(&raw)
            .map_err(|e| OrchestratorError::ConfigError(format!("invalid config TOML: {e}")))?;

        if let Some(paper_mode) = cli.paper_mode {
            config.trading.paper_mode = paper_mode;
        }
        if let Some(port) = cli.port {
            config.server.port = port;
        }

        if config.instrument.symbol.trim().is_empty() {
            return Err(OrchestratorError::ConfigError(
                "instrument.symbol must not be empty".to_string(),
            ));
        }

        Ok(config)
    }

    /// Freshness threshold for this config's instrument kind, per §6.3 /
    /// §4.6 step 3 (120s default equities, 10s crypto).
    pub fn data_max_age_seconds(&self) -> u64 {
        match self.instrument.kind.as_str() {
            "spot" => self.scheduler.data_max_age_seconds.min(10),
            _ => self.scheduler.data_max_age_seconds,
        }
    }
}
