//! Stage D: the three parallel Risk Agents (§4.5). Unlike Stage A-C these
//! are deterministic — they size positions from the Kelly criterion and the
//! PM's confidence rather than calling out to an LLM, reusing the module's
//! risk-sizing machinery.

use async_trait::async_trait;

use crate::risk::KellyCalculator;

use super::agent_trait::Agent;
use super::output::{AgentPayload, PortfolioManagerOutput, RiskOutput, RiskProfile, TradeSignalAction};
use super::state::CycleState;

/// Per-profile multiplier applied on top of the raw Kelly fraction; risk
/// agents may only downgrade the PM's tentative conviction, never upgrade it.
fn profile_multiplier(profile: RiskProfile) -> f64 {
    match profile {
        RiskProfile::Aggressive => 1.0,
        RiskProfile::Neutral => 0.6,
        RiskProfile::Conservative => 0.3,
    }
}

fn profile_sl_tp(profile: RiskProfile, base_sl_pct: f64, base_tp_pct: f64) -> (f64, f64) {
    match profile {
        RiskProfile::Aggressive => (base_sl_pct, base_tp_pct * 1.5),
        RiskProfile::Neutral => (base_sl_pct, base_tp_pct),
        RiskProfile::Conservative => (base_sl_pct * 0.6, base_tp_pct * 0.8),
    }
}

fn pm_output(state: &CycleState) -> Option<&PortfolioManagerOutput> {
    state.prior_outputs.get("portfolio_manager").and_then(|out| match &out.payload {
        AgentPayload::PortfolioManager(pm) => Some(pm),
        _ => None,
    })
}

pub struct RiskAgent {
    name: &'static str,
    profile: RiskProfile,
    default_stop_loss_pct: f64,
    default_take_profit_pct: f64,
}

impl RiskAgent {
    pub fn aggressive(default_stop_loss_pct: f64, default_take_profit_pct: f64) -> Self {
        Self {
            name: "risk_aggressive",
            profile: RiskProfile::Aggressive,
            default_stop_loss_pct,
            default_take_profit_pct,
        }
    }

    pub fn conservative(default_stop_loss_pct: f64, default_take_profit_pct: f64) -> Self {
        Self {
            name: "risk_conservative",
            profile: RiskProfile::Conservative,
            default_stop_loss_pct,
            default_take_profit_pct,
        }
    }

    pub fn neutral(default_stop_loss_pct: f64, default_take_profit_pct: f64) -> Self {
        Self {
            name: "risk_neutral",
            profile: RiskProfile::Neutral,
            default_stop_loss_pct,
            default_take_profit_pct,
        }
    }
}

#[async_trait]
impl Agent for RiskAgent {
    fn name(&self) -> &str {
        self.name
    }

    async fn run(&self, state: &CycleState) -> anyhow::Result<AgentPayload> {
        let pm = pm_output(state);
        let conviction = pm.map(|p| p.bullish_score.max(p.bearish_score)).unwrap_or(0.5);

        if matches!(pm.map(|p| p.tentative_signal), Some(TradeSignalAction::Hold) | None) {
            let (stop_loss_pct, take_profit_pct) =
                profile_sl_tp(self.profile, self.default_stop_loss_pct, self.default_take_profit_pct);
            return Ok(AgentPayload::Risk(RiskOutput {
                profile: self.profile,
                quantity_multiplier: 0.0,
                stop_loss_pct,
                take_profit_pct,
            }));
        }

        let kelly = KellyCalculator::new(1.0, 0.5);
        let raw = kelly.raw_fraction(conviction);
        let quantity_multiplier = (raw * profile_multiplier(self.profile)).clamp(0.0, 1.0);
        let (stop_loss_pct, take_profit_pct) =
            profile_sl_tp(self.profile, self.default_stop_loss_pct, self.default_take_profit_pct);

        Ok(AgentPayload::Risk(RiskOutput {
            profile: self.profile,
            quantity_multiplier,
            stop_loss_pct,
            take_profit_pct,
        }))
    }
}

/// Reconciles the three Risk Agent outputs (§4.5 "Conservative wins ties").
pub fn reconcile(outputs: &[RiskOutput]) -> Option<RiskOutput> {
    outputs
        .iter()
        .min_by(|a, b| {
            a.quantity_multiplier
                .partial_cmp(&b.quantity_multiplier)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    // Conservative wins exact ties.
                    let rank = |p: RiskProfile| match p {
                        RiskProfile::Conservative => 0,
                        RiskProfile::Neutral => 1,
                        RiskProfile::Aggressive => 2,
                    };
                    rank(a.profile).cmp(&rank(b.profile))
                })
        })
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconcile_picks_most_conservative_sizing() {
        let outputs = vec![
            RiskOutput { profile: RiskProfile::Aggressive, quantity_multiplier: 0.8, stop_loss_pct: 0.3, take_profit_pct: 0.9 },
            RiskOutput { profile: RiskProfile::Conservative, quantity_multiplier: 0.2, stop_loss_pct: 0.18, take_profit_pct: 0.48 },
            RiskOutput { profile: RiskProfile::Neutral, quantity_multiplier: 0.5, stop_loss_pct: 0.3, take_profit_pct: 0.6 },
        ];
        let chosen = reconcile(&outputs).unwrap();
        assert_eq!(chosen.profile, RiskProfile::Conservative);
    }

    #[test]
    fn reconcile_breaks_ties_toward_conservative() {
        let outputs = vec![
            RiskOutput { profile: RiskProfile::Aggressive, quantity_multiplier: 0.4, stop_loss_pct: 0.3, take_profit_pct: 0.9 },
            RiskOutput { profile: RiskProfile::Conservative, quantity_multiplier: 0.4, stop_loss_pct: 0.18, take_profit_pct: 0.48 },
        ];
        let chosen = reconcile(&outputs).unwrap();
        assert_eq!(chosen.profile, RiskProfile::Conservative);
    }
}
