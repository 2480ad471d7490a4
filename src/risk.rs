//! Risk Management Module
//! Pilot in Command: Risk Engine
//! Mission: position sizing and loss-distribution statistics

use anyhow::Result;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::VecDeque;

/// Kelly Criterion Calculator for optimal position sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KellyCalculator {
    /// Fractional Kelly multiplier for safety (0.25-0.5x)
    pub fraction: f64,
    /// Bankroll available for trading
    pub bankroll: f64,
    /// Historical win rates
    win_history: VecDeque<bool>,
    /// Maximum history size
    max_history: usize,
}

impl KellyCalculator {
    pub fn new(bankroll: f64, fraction: f64) -> Self {
        Self {
            fraction: fraction.clamp(0.1, 0.5), // Safety bounds
            bankroll,
            win_history: VecDeque::with_capacity(1000),
            max_history: 1000,
        }
    }

    /// Compute the raw Kelly fraction (before safety caps or additional guardrails)
    pub fn raw_fraction(&self, win_probability: f64) -> f64 {
        let p = win_probability.clamp(0.001, 0.999);
        let q = 1.0 - p;
        let b = (1.0 / p) - 1.0;
        if b <= 0.0 {
            return 0.0;
        }
        ((b * p - q) / b).max(0.0)
    }

    pub fn update_history(&mut self, won: bool) {
        if self.win_history.len() >= self.max_history {
            self.win_history.pop_front();
        }
        self.win_history.push_back(won);
    }

    pub fn get_win_rate(&self) -> f64 {
        if self.win_history.is_empty() {
            return 0.5; // Default assumption
        }
        let wins = self.win_history.iter().filter(|&&w| w).count() as f64;
        wins / self.win_history.len() as f64
    }

    pub fn apply_pnl(&mut self, pnl: f64) {
        self.bankroll = (self.bankroll + pnl).max(0.0);
    }
}

/// Value at Risk (VaR) Calculator using historical simulation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaRCalculator {
    /// Historical PnL data
    historical_pnl: VecDeque<f64>,
    /// Confidence level (e.g., 0.95 for 95% VaR)
    confidence_level: f64,
    /// Maximum history size
    max_history: usize,
}

impl VaRCalculator {
    pub fn new(confidence_level: f64) -> Self {
        Self {
            historical_pnl: VecDeque::with_capacity(10000),
            confidence_level: confidence_level.clamp(0.9, 0.99),
            max_history: 10000,
        }
    }

    /// Add a new PnL observation
    pub fn add_pnl(&mut self, pnl: f64) {
        if self.historical_pnl.len() >= self.max_history {
            self.historical_pnl.pop_front();
        }
        self.historical_pnl.push_back(pnl);
    }

    /// Calculate VaR at specified confidence level
    pub fn calculate_var(&self) -> Result<f64> {
        if self.historical_pnl.len() < 100 {
            return Ok(0.0); // Not enough data
        }

        let mut sorted_pnl: Vec<f64> = self.historical_pnl.iter().copied().collect();
        sorted_pnl.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let index = ((1.0 - self.confidence_level) * sorted_pnl.len() as f64) as usize;
        Ok(-sorted_pnl[index]) // VaR is typically reported as positive
    }

    /// Calculate Conditional VaR (CVaR) - average of losses beyond VaR
    pub fn calculate_cvar(&self) -> Result<f64> {
        if self.historical_pnl.len() < 100 {
            return Ok(0.0); // Not enough data
        }

        let mut sorted_pnl: Vec<f64> = self.historical_pnl.iter().copied().collect();
        sorted_pnl.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let var_index = ((1.0 - self.confidence_level) * sorted_pnl.len() as f64) as usize;

        // Calculate average of all losses worse than VaR
        let tail_losses: Vec<f64> = sorted_pnl[..=var_index].to_vec();
        if tail_losses.is_empty() {
            return Ok(0.0);
        }

        let cvar = tail_losses.iter().sum::<f64>() / tail_losses.len() as f64;
        Ok(-cvar) // CVaR is typically reported as positive
    }

    /// Get current statistics
    pub fn get_stats(&self) -> RiskStats {
        RiskStats {
            var_95: self.calculate_var().unwrap_or(0.0),
            cvar_95: self.calculate_cvar().unwrap_or(0.0),
            sample_size: self.historical_pnl.len(),
            max_loss: if self.historical_pnl.is_empty() {
                0.0
            } else {
                self.historical_pnl
                    .iter()
                    .copied()
                    .fold(f64::INFINITY, f64::min)
            },
            max_gain: if self.historical_pnl.is_empty() {
                0.0
            } else {
                self.historical_pnl
                    .iter()
                    .copied()
                    .fold(f64::NEG_INFINITY, f64::max)
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskStats {
    pub var_95: f64,
    pub cvar_95: f64,
    pub sample_size: usize,
    pub max_loss: f64,
    pub max_gain: f64,
}

/// Peak-to-trough drawdown over an equity curve (aggregate risk metrics
/// endpoint; one-shot, not a live throttle).
pub fn max_drawdown_pct(equity_curve: &[f64]) -> f64 {
    let mut peak = f64::NEG_INFINITY;
    let mut max_dd: f64 = 0.0;
    for &equity in equity_curve {
        peak = peak.max(equity);
        if peak > 0.0 {
            max_dd = max_dd.max(((peak - equity) / peak).clamp(0.0, 1.0));
        }
    }
    max_dd
}

/// Sample Sharpe ratio (mean over population std-dev, unannualized) of a PnL
/// series. `0.0` when fewer than two observations or the series has no
/// variance.
pub fn sharpe_ratio(pnl: &[f64]) -> f64 {
    if pnl.len() < 2 {
        return 0.0;
    }
    let mean = pnl.mean();
    let std_dev = pnl.std_dev();
    if std_dev == 0.0 {
        0.0
    } else {
        mean / std_dev
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kelly_raw_fraction_is_zero_below_breakeven_probability() {
        let kelly = KellyCalculator::new(10_000.0, 0.5);
        assert_eq!(kelly.raw_fraction(0.2), 0.0);
        assert!(kelly.raw_fraction(0.8) > 0.0);
    }

    #[test]
    fn kelly_win_rate_tracks_rolling_history() {
        let mut kelly = KellyCalculator::new(10_000.0, 0.5);
        for won in [true, true, false, true] {
            kelly.update_history(won);
        }
        assert!((kelly.get_win_rate() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn var_calculator_reports_zero_until_minimum_sample_size() {
        let mut var_calc = VaRCalculator::new(0.95);
        for i in 0..50 {
            var_calc.add_pnl(-(i as f64));
        }
        assert_eq!(var_calc.calculate_var().unwrap(), 0.0);
    }

    #[test]
    fn var_calculator_computes_var_once_enough_samples() {
        let mut var_calc = VaRCalculator::new(0.95);
        for i in 0..200 {
            var_calc.add_pnl(100.0 - i as f64);
        }
        let var_95 = var_calc.calculate_var().unwrap();
        assert!(var_95 > 0.0);
    }

    #[test]
    fn max_drawdown_pct_tracks_worst_peak_to_trough_decline() {
        let curve = [100.0, 120.0, 90.0, 110.0, 60.0];
        assert!((max_drawdown_pct(&curve) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn sharpe_ratio_is_zero_with_no_variance() {
        assert_eq!(sharpe_ratio(&[10.0, 10.0, 10.0]), 0.0);
    }
}
