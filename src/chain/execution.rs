use crate::chain::domain::{ExecutionBlockInfo, ExecutionClient, ExecutionTransaction};
use crate::shared::error::WatcherError;
use crate::shared::types::H160;
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

/// Execution node client used for the fee recipient check.
pub struct ExecutionRpcClient {
    rpc_url: String,
    http_client: Client,
}

impl ExecutionRpcClient {
    pub fn new(rpc_url: String, request_timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self { rpc_url, http_client })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let request_body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let response = self
            .http_client
            .post(&self.rpc_url)
            .json(&request_body)
            .send()
            .await
            .map_err(WatcherError::from)?;

        if !response.status().is_success() {
            return Err(WatcherError::Execution(format!(
                "{} failed with status: {}",
                method,
                response.status()
            ))
            .into());
        }

        let mut response_data: Value = response.json().await.map_err(WatcherError::from)?;

        if let Some(error) = response_data.get("error") {
            return Err(WatcherError::Execution(format!("{} returned error: {}", method, error)).into());
        }

        Ok(response_data["result"].take())
    }
}

fn parse_address(value: &Value, field: &str) -> Result<H160> {
    let raw = value
        .get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| WatcherError::Execution(format!("missing field {}", field)))?;
    Ok(raw.parse()?)
}

/// Extracts fee recipient and last transaction from an `eth_getBlockByNumber` result
/// fetched with full transaction objects.
fn parse_block_info(number: u64, block: &Value) -> Result<ExecutionBlockInfo> {
    if block.is_null() {
        return Err(WatcherError::Execution(format!("block {} not found", number)).into());
    }

    let fee_recipient = parse_address(block, "miner")?;

    let last_transaction = match block.get("transactions").and_then(|t| t.as_array()).and_then(|t| t.last()) {
        Some(tx) => Some(ExecutionTransaction {
            from: parse_address(tx, "from")?,
            to: match tx.get("to").and_then(|v| v.as_str()) {
                Some(to) => Some(to.parse()?),
                None => None,
            },
        }),
        None => None,
    };

    Ok(ExecutionBlockInfo {
        number,
        fee_recipient,
        last_transaction,
    })
}

#[async_trait]
impl ExecutionClient for ExecutionRpcClient {
    async fn block_info(&self, number: u64) -> Result<ExecutionBlockInfo> {
        let block = self
            .call("eth_getBlockByNumber", serde_json::json!([format!("0x{:x}", number), true]))
            .await?;
        parse_block_info(number, &block)
    }
}
