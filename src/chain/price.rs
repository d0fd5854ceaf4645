use crate::chain::domain::PriceClient;
use crate::shared::error::WatcherError;
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

/// CoinGecko simple-price quote for ETH/USD.
pub struct CoinGeckoClient {
    url: String,
    http_client: Client,
}

impl CoinGeckoClient {
    pub fn new(url: String, request_timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self { url, http_client })
    }
}

fn parse_quote(response: &Value) -> Result<f64> {
    response
        .get("ethereum")
        .and_then(|eth| eth.get("usd"))
        .and_then(|usd| usd.as_f64())
        .ok_or_else(|| WatcherError::Price(format!("unexpected response: {}", response)).into())
}

#[async_trait]
impl PriceClient for CoinGeckoClient {
    async fn eth_usd(&self) -> Result<f64> {
        let response = self
            .http_client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| WatcherError::Price(e.to_string()))?;

        if !response.status().is_success() {
            return Err(WatcherError::Price(format!("status {}", response.status())).into());
        }

        let body: Value = response.json().await.map_err(|e| WatcherError::Price(e.to_string()))?;
        parse_quote(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_quote() {
        let body = serde_json::json!({ "ethereum": { "usd": 3150.42 } });
        assert_eq!(parse_quote(&body).unwrap(), 3150.42);

        let bad = serde_json::json!({ "error": "rate limited" });
        assert!(parse_quote(&bad).is_err());
    }
}
