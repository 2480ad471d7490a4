//! Circuit Breaker (C9): the seven safety checks evaluated every cycle and
//! on demand, generalized from the original `CircuitBreaker.check_all`
//! (§4.9). Unlike the original's hardcoded `1000000` capital assumption,
//! checks here take capital as an explicit input.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CircuitBreakerChecks {
    pub daily_loss: bool,
    pub consecutive_losses: bool,
    pub data_feed_down: bool,
    pub api_rate_limit: bool,
    pub high_volatility: bool,
    pub over_leveraged: bool,
    pub market_halted: bool,
}

impl CircuitBreakerChecks {
    pub fn should_halt(&self) -> bool {
        self.daily_loss
            || self.consecutive_losses
            || self.data_feed_down
            || self.api_rate_limit
            || self.high_volatility
            || self.over_leveraged
            || self.market_halted
    }
}

pub struct CircuitBreakerInput {
    pub daily_pnl: f64,
    pub capital: f64,
    pub daily_loss_limit_pct: f64,
    pub consecutive_losses: u32,
    pub data_age_seconds: f64,
    pub stale_threshold_seconds: f64,
    pub llm_calls_last_minute: u32,
    pub api_rate_limit_per_min: u32,
    pub current_volatility: f64,
    pub high_volatility_threshold: f64,
    pub open_notional: f64,
    pub max_leverage: f64,
    pub market_halted: bool,
}

/// The five-trades-in-a-row threshold from the original implementation.
const CONSECUTIVE_LOSSES_THRESHOLD: u32 = 5;

/// `over_leveraged`'s tolerance multiplier over the configured max (§4.9).
const LEVERAGE_TOLERANCE: f64 = 1.1;

pub struct CircuitBreaker;

impl CircuitBreaker {
    pub fn evaluate(input: &CircuitBreakerInput) -> CircuitBreakerChecks {
        let daily_loss = input.daily_pnl < -(input.daily_loss_limit_pct / 100.0) * input.capital;
        let consecutive_losses = input.consecutive_losses >= CONSECUTIVE_LOSSES_THRESHOLD;
        let data_feed_down = input.data_age_seconds > input.stale_threshold_seconds;
        let api_rate_limit = input.llm_calls_last_minute > input.api_rate_limit_per_min;
        let high_volatility = input.current_volatility > input.high_volatility_threshold;
        let over_leveraged = input.capital > 0.0 && (input.open_notional / input.capital) > (input.max_leverage * LEVERAGE_TOLERANCE);
        let market_halted = input.market_halted;

        let checks = CircuitBreakerChecks {
            daily_loss,
            consecutive_losses,
            data_feed_down,
            api_rate_limit,
            high_volatility,
            over_leveraged,
            market_halted,
        };

        if checks.should_halt() {
            tracing::warn!(?checks, "circuit breaker tripped");
        }

        checks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_input() -> CircuitBreakerInput {
        CircuitBreakerInput {
            daily_pnl: 0.0,
            capital: 1_000_000.0,
            daily_loss_limit_pct: 2.0,
            consecutive_losses: 0,
            data_age_seconds: 1.0,
            stale_threshold_seconds: 120.0,
            llm_calls_last_minute: 0,
            api_rate_limit_per_min: 60,
            current_volatility: 10.0,
            high_volatility_threshold: 25.0,
            open_notional: 0.0,
            max_leverage: 3.0,
            market_halted: false,
        }
    }

    #[test]
    fn no_checks_tripped_on_healthy_input() {
        let checks = CircuitBreaker::evaluate(&base_input());
        assert!(!checks.should_halt());
    }

    #[test]
    fn daily_loss_trips_on_breach() {
        let mut input = base_input();
        input.daily_pnl = -25_000.0;
        let checks = CircuitBreaker::evaluate(&input);
        assert!(checks.daily_loss);
        assert!(checks.should_halt());
    }

    #[test]
    fn over_leveraged_uses_tolerance_multiplier() {
        let mut input = base_input();
        input.open_notional = 3_200_000.0; // 3.2x, just under 3.0*1.1=3.3x
        assert!(!CircuitBreaker::evaluate(&input).over_leveraged);
        input.open_notional = 3_400_000.0; // 3.4x, over tolerance
        assert!(CircuitBreaker::evaluate(&input).over_leveraged);
    }

    #[test]
    fn consecutive_losses_trips_at_five() {
        let mut input = base_input();
        input.consecutive_losses = 5;
        assert!(CircuitBreaker::evaluate(&input).consecutive_losses);
    }
}
