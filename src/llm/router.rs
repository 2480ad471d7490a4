//! LLM Router (C4): multi-provider gateway with priority, rate-limit, daily
//! token budgets, and failover (§4.4). All state mutation is guarded by a
//! single mutex (simplicity per spec); the HTTP call itself runs without
//! holding the lock.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::config::{Config, SelectionStrategy};
use crate::error::OrchestratorError;

use super::provider::{LlmCallOutput, LlmErrorKind, LlmProviderClient};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderStatus {
    Available,
    RateLimited,
    Unhealthy,
    Unknown,
}

struct ProviderState {
    name: String,
    priority: u32,
    client: LlmProviderClient,
    daily_token_quota: Option<u64>,
    tokens_today: u64,
    day_start: DateTime<Utc>,
    status: ProviderStatus,
    cooldown_until: Option<DateTime<Utc>>,
    consecutive_failures: u32,
    last_check: Option<DateTime<Utc>>,
}

pub struct LlmRouter {
    providers: Mutex<Vec<ProviderState>>,
    strategy: SelectionStrategy,
    rr_cursor: Mutex<usize>,
}

pub struct CallResult {
    pub text: String,
    pub provider_used: String,
    pub tokens_used: u64,
}

impl LlmRouter {
    pub fn from_config(config: &Config) -> Self {
        let now = Utc::now();
        let providers = config
            .llm
            .providers
            .iter()
            .map(|p| ProviderState {
                name: p.name.clone(),
                priority: p.priority,
                client: LlmProviderClient::new(
                    p.base_url.clone(),
                    p.api_key.clone().unwrap_or_default(),
                    p.model.clone(),
                ),
                daily_token_quota: p.daily_token_quota,
                tokens_today: 0,
                day_start: now,
                status: ProviderStatus::Unknown,
                cooldown_until: None,
                consecutive_failures: 0,
                last_check: None,
            })
            .collect();

        Self {
            providers: Mutex::new(providers),
            strategy: config.llm.selection_strategy,
            rr_cursor: Mutex::new(0),
        }
    }

    fn reset_daily_if_needed(state: &mut ProviderState, now: DateTime<Utc>) {
        if now.date_naive() != state.day_start.date_naive() {
            state.tokens_today = 0;
            state.day_start = now;
        }
    }

    /// §4.4 steps 1-3: builds the ordered, eligible candidate list.
    fn eligible_order(&self, estimated_tokens: u64, now: DateTime<Utc>) -> Vec<usize> {
        let mut providers = self.providers.lock();
        let mut idx: Vec<usize> = (0..providers.len()).collect();

        for p in providers.iter_mut() {
            Self::reset_daily_if_needed(p, now);
            if let Some(cooldown) = p.cooldown_until {
                if now >= cooldown {
                    p.status = ProviderStatus::Available;
                    p.cooldown_until = None;
                }
            }
        }

        idx.retain(|&i| {
            let p = &providers[i];
            let cooldown_active = p.cooldown_until.map(|c| now < c).unwrap_or(false);
            if cooldown_active {
                return false;
            }
            if let Some(quota) = p.daily_token_quota {
                if p.tokens_today + estimated_tokens > quota {
                    return false;
                }
            }
            true
        });

        match self.strategy {
            SelectionStrategy::Priority => {
                idx.sort_by_key(|&i| providers[i].priority);
            }
            SelectionStrategy::Hash => {
                idx.sort_by_key(|&i| providers[i].priority);
            }
            SelectionStrategy::RoundRobin => {
                let mut cursor = self.rr_cursor.lock();
                idx.rotate_left(*cursor % idx.len().max(1));
                *cursor = cursor.wrapping_add(1);
            }
        }

        idx
    }

    /// §4.4 `call()`: tries providers in order, applying failover rules on
    /// failure, until one succeeds or all are exhausted.
    pub async fn call(&self, system: &str, user: &str, max_tokens: u32) -> Result<CallResult, OrchestratorError> {
        let now = Utc::now();
        let candidates = self.eligible_order(max_tokens as u64, now);

        if candidates.is_empty() {
            return Err(OrchestratorError::NoProviderAvailable);
        }

        for idx in candidates {
            let client = {
                let providers = self.providers.lock();
                providers[idx].client.clone()
            };

            let result = client
                .chat_completion(system, user, max_tokens, 0.2, Duration::from_secs(60))
                .await;

            match result {
                Ok(LlmCallOutput { content, usage, .. }) => {
                    let tokens = usage.total_tokens.unwrap_or(max_tokens as u64);
                    self.record_success(idx, tokens);
                    return Ok(CallResult {
                        text: content,
                        provider_used: self.name_of(idx),
                        tokens_used: tokens,
                    });
                }
                Err((kind, _err)) => {
                    self.record_failure(idx, kind);
                }
            }
        }

        Err(OrchestratorError::NoProviderAvailable)
    }

    fn name_of(&self, idx: usize) -> String {
        self.providers.lock()[idx].name.clone()
    }

    fn record_success(&self, idx: usize, tokens: u64) {
        let mut providers = self.providers.lock();
        let p = &mut providers[idx];
        p.tokens_today += tokens;
        p.consecutive_failures = 0;
        p.status = ProviderStatus::Available;
    }

    /// §4.4 step 5: classify and cool down.
    fn record_failure(&self, idx: usize, kind: LlmErrorKind) {
        let mut providers = self.providers.lock();
        let p = &mut providers[idx];
        let now = Utc::now();
        match kind {
            LlmErrorKind::RateLimit => {
                p.status = ProviderStatus::RateLimited;
                p.cooldown_until = Some(now + chrono::Duration::seconds(60));
            }
            LlmErrorKind::AuthOrConfig => {
                p.status = ProviderStatus::Unhealthy;
                p.cooldown_until = Some(now + chrono::Duration::seconds(600));
            }
            LlmErrorKind::Network => {
                p.consecutive_failures += 1;
                if p.consecutive_failures >= 3 {
                    p.status = ProviderStatus::Unhealthy;
                    p.cooldown_until = Some(now + chrono::Duration::seconds(120));
                }
            }
        }
    }

    /// Health check (§4.4): once per 5 min probe each provider with a
    /// trivial prompt; `unhealthy → available` on success.
    pub async fn health_check_all(&self) {
        let names: Vec<(usize, String)> = {
            let providers = self.providers.lock();
            providers.iter().enumerate().map(|(i, p)| (i, p.name.clone())).collect()
        };

        for (idx, name) in names {
            let client = self.providers.lock()[idx].client.clone();
            let result = client
                .chat_completion("health check", "ping", 4, 0.0, Duration::from_secs(10))
                .await;
            let mut providers = self.providers.lock();
            let p = &mut providers[idx];
            p.last_check = Some(Utc::now());
            if result.is_ok() && p.status == ProviderStatus::Unhealthy {
                p.status = ProviderStatus::Available;
                p.cooldown_until = None;
                tracing::info!(provider = %name, "llm provider recovered");
            }
        }
    }

    pub fn tokens_today(&self) -> HashMap<String, u64> {
        self.providers
            .lock()
            .iter()
            .map(|p| (p.name.clone(), p.tokens_today))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LlmConfig, LlmProviderConfig};

    fn router_with(providers: Vec<LlmProviderConfig>) -> LlmRouter {
        let config = LlmConfig {
            providers,
            selection_strategy: SelectionStrategy::Priority,
        };
        let state = providers_to_states(&config);
        LlmRouter {
            providers: Mutex::new(state),
            strategy: SelectionStrategy::Priority,
            rr_cursor: Mutex::new(0),
        }
    }

    fn providers_to_states(config: &LlmConfig) -> Vec<ProviderState> {
        let now = Utc::now();
        config
            .providers
            .iter()
            .map(|p| ProviderState {
                name: p.name.clone(),
                priority: p.priority,
                client: LlmProviderClient::new(p.base_url.clone(), "test".to_string(), p.model.clone()),
                daily_token_quota: p.daily_token_quota,
                tokens_today: 0,
                day_start: now,
                status: ProviderStatus::Unknown,
                cooldown_until: None,
                consecutive_failures: 0,
                last_check: None,
            })
            .collect()
    }

    #[test]
    fn eligible_order_skips_over_quota_provider() {
        let router = router_with(vec![
            LlmProviderConfig {
                name: "a".into(),
                priority: 1,
                api_key: None,
                model: "m".into(),
                daily_token_quota: Some(10),
                base_url: "http://x".into(),
            },
            LlmProviderConfig {
                name: "b".into(),
                priority: 2,
                api_key: None,
                model: "m".into(),
                daily_token_quota: None,
                base_url: "http://x".into(),
            },
        ]);
        {
            let mut providers = router.providers.lock();
            providers[0].tokens_today = 9;
        }
        let order = router.eligible_order(5, Utc::now());
        assert_eq!(order, vec![1]);
    }

    #[test]
    fn failover_marks_rate_limited_with_cooldown() {
        let router = router_with(vec![LlmProviderConfig {
            name: "a".into(),
            priority: 1,
            api_key: None,
            model: "m".into(),
            daily_token_quota: None,
            base_url: "http://x".into(),
        }]);
        router.record_failure(0, LlmErrorKind::RateLimit);
        let providers = router.providers.lock();
        assert_eq!(providers[0].status, ProviderStatus::RateLimited);
        assert!(providers[0].cooldown_until.unwrap() >= Utc::now() + chrono::Duration::seconds(59));
    }
}
