//! Deterministic-seeded random-walk provider, used when no live credentials
//! are configured and no replay dataset is given. Grounded on the original
//! mock provider's `price += uniform(-20, 20)` quote walk and synthetic OHLC
//! candle generation for `historical()`.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::{rngs::StdRng, Rng, SeedableRng};

use super::{Candle, OrderRequest, Provider, ProviderProfile, Quote};

pub struct MockProvider {
    rng: Mutex<StdRng>,
    last_price: Mutex<HashMap<String, f64>>,
    base_price: f64,
}

impl MockProvider {
    pub fn new(seed: u64, base_price: f64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            last_price: Mutex::new(HashMap::new()),
            base_price,
        }
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn quote(&self, symbols: &[String]) -> anyhow::Result<HashMap<String, Quote>> {
        let mut out = HashMap::new();
        let mut last = self.last_price.lock().unwrap();
        let mut rng = self.rng.lock().unwrap();
        let now = Utc::now();
        for symbol in symbols {
            let prev = *last.get(symbol).unwrap_or(&self.base_price);
            let step: f64 = rng.gen_range(-20.0..20.0);
            let price = (prev + step).max(0.01);
            last.insert(symbol.clone(), price);
            let spread = price * 0.0005;
            out.insert(
                symbol.clone(),
                Quote {
                    symbol: symbol.clone(),
                    price,
                    bid: price - spread,
                    ask: price + spread,
                    volume: rng.gen_range(1.0..1000.0),
                    at: now,
                },
            );
        }
        Ok(out)
    }

    async fn historical(
        &self,
        _symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        interval_secs: i64,
    ) -> anyhow::Result<Vec<Candle>> {
        let mut candles = Vec::new();
        let mut rng = self.rng.lock().unwrap();
        let mut price = self.base_price;
        let mut at = from;
        while at < to {
            let open = price;
            let mut high = open;
            let mut low = open;
            for _ in 0..4 {
                let step: f64 = rng.gen_range(-10.0..10.0);
                price = (price + step).max(0.01);
                high = high.max(price);
                low = low.min(price);
            }
            candles.push(Candle {
                at,
                open,
                high,
                low,
                close: price,
                volume: rng.gen_range(10.0..5000.0),
            });
            at += chrono::Duration::seconds(interval_secs);
        }
        Ok(candles)
    }

    async fn place_order(&self, order: OrderRequest) -> anyhow::Result<String> {
        Ok(format!("mock-{}-{:?}-{}", order.symbol, order.side, uuid::Uuid::new_v4()))
    }

    fn profile(&self) -> ProviderProfile {
        ProviderProfile {
            name: "mock".to_string(),
            is_live: false,
            supports_orders: true,
        }
    }
}
