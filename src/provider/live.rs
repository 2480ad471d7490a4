//! Live broker/exchange provider: polls a REST quote endpoint (§4.3 mode 1,
//! "polling every ≤ 5s for quotes") and places real orders through the same
//! HTTP client, grounded on the teacher's `reqwest`-based broker clients.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{Candle, OrderRequest, Provider, ProviderProfile, Quote};

pub struct LiveProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    name: String,
}

impl LiveProvider {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            name: name.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawQuote {
    symbol: String,
    price: f64,
    bid: f64,
    ask: f64,
    volume: f64,
}

#[derive(Debug, Deserialize)]
struct RawCandle {
    #[serde(rename = "timestamp")]
    at: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

#[async_trait]
impl Provider for LiveProvider {
    async fn quote(&self, symbols: &[String]) -> anyhow::Result<HashMap<String, Quote>> {
        let resp = self
            .http
            .get(format!("{}/quotes", self.base_url))
            .bearer_auth(&self.api_key)
            .query(&[("symbols", symbols.join(","))])
            .timeout(std::time::Duration::from_secs(5))
            .send()
            .await?
            .error_for_status()?;

        let raw: Vec<RawQuote> = resp.json().await?;
        let now = Utc::now();
        Ok(raw
            .into_iter()
            .map(|r| {
                (
                    r.symbol.clone(),
                    Quote {
                        symbol: r.symbol,
                        price: r.price,
                        bid: r.bid,
                        ask: r.ask,
                        volume: r.volume,
                        at: now,
                    },
                )
            })
            .collect())
    }

    async fn historical(
        &self,
        symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        interval_secs: i64,
    ) -> anyhow::Result<Vec<Candle>> {
        let resp = self
            .http
            .get(format!("{}/candles", self.base_url))
            .bearer_auth(&self.api_key)
            .query(&[
                ("symbol", symbol.to_string()),
                ("from", from.to_rfc3339()),
                ("to", to.to_rfc3339()),
                ("interval", interval_secs.to_string()),
            ])
            .timeout(std::time::Duration::from_secs(5))
            .send()
            .await?
            .error_for_status()?;

        let raw: Vec<RawCandle> = resp.json().await?;
        Ok(raw
            .into_iter()
            .filter_map(|r| {
                DateTime::from_timestamp(r.at, 0).map(|at| Candle {
                    at,
                    open: r.open,
                    high: r.high,
                    low: r.low,
                    close: r.close,
                    volume: r.volume,
                })
            })
            .collect())
    }

    async fn place_order(&self, order: OrderRequest) -> anyhow::Result<String> {
        #[derive(serde::Serialize)]
        struct Req<'a> {
            symbol: &'a str,
            side: &'a str,
            quantity: f64,
        }
        #[derive(Deserialize)]
        struct Resp {
            order_id: String,
        }

        let side = match order.side {
            super::OrderSide::Buy => "buy",
            super::OrderSide::Sell => "sell",
        };

        let resp: Resp = self
            .http
            .post(format!("{}/orders", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&Req {
                symbol: &order.symbol,
                side,
                quantity: order.quantity,
            })
            .timeout(std::time::Duration::from_secs(5))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(resp.order_id)
    }

    fn profile(&self) -> ProviderProfile {
        ProviderProfile {
            name: self.name.clone(),
            is_live: true,
            supports_orders: true,
        }
    }
}
