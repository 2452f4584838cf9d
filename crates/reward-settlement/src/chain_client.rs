use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use gacha_domain::{Address, H256, U256, format_address};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// `Unavailable` covers transport failures and timeouts and is the only
/// retryable kind; `Rejected` means the node answered and refused.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("chain unavailable: {0}")]
    Unavailable(String),
    #[error("chain rejected request: {0}")]
    Rejected(String),
}

impl ChainError {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    pub from: Address,
    pub to: Address,
    pub data: Vec<u8>,
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn pending_nonce(&self, address: Address) -> Result<u64, ChainError>;

    async fn suggest_gas_price(&self) -> Result<U256, ChainError>;

    async fn estimate_gas(&self, call: &CallRequest) -> Result<u64, ChainError>;

    async fn network_id(&self) -> Result<u64, ChainError>;

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<H256, ChainError>;
}

/// Ethereum JSON-RPC over HTTP. Every call is a single request bounded by the
/// client timeout; retries are the caller's decision.
#[derive(Debug)]
pub struct JsonRpcChainClient {
    endpoint: String,
    client: reqwest::Client,
    next_request_id: AtomicU64,
}

impl JsonRpcChainClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, ChainError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChainError::Unavailable(format!("http client init failed: {e}")))?;
        Ok(Self {
            endpoint: endpoint.into(),
            client,
            next_request_id: AtomicU64::new(1),
        })
    }

    async fn rpc_call<T: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, ChainError> {
        let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChainError::Unavailable(format!("{method}: {e}")))?;
        check_status(method, resp.status())?;
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| ChainError::Unavailable(format!("{method}: {e}")))?;
        let result = decode_response(method, &bytes)?;
        debug!(method, request_id = id, "chain rpc call succeeded");
        Ok(result)
    }
}

/// Server errors and throttling are transient; any other status is left to
/// the JSON-RPC body to decide.
fn check_status(method: &str, status: reqwest::StatusCode) -> Result<(), ChainError> {
    if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(ChainError::Unavailable(format!("{method}: http status {status}")));
    }
    Ok(())
}

fn decode_response<T: for<'de> Deserialize<'de>>(
    method: &str,
    body: &[u8],
) -> Result<T, ChainError> {
    let payload: JsonRpcResponse<T> = serde_json::from_slice(body)
        .map_err(|e| ChainError::Rejected(format!("{method}: malformed response: {e}")))?;
    if let Some(err) = payload.error {
        return Err(ChainError::Rejected(format!(
            "{method}: code={} message={}",
            err.code, err.message
        )));
    }
    payload
        .result
        .ok_or_else(|| ChainError::Rejected(format!("{method}: missing result")))
}

#[async_trait]
impl ChainClient for JsonRpcChainClient {
    async fn pending_nonce(&self, address: Address) -> Result<u64, ChainError> {
        let raw: String = self
            .rpc_call(
                "eth_getTransactionCount",
                serde_json::json!([format_address(&address), "pending"]),
            )
            .await?;
        parse_hex_u64(&raw)
    }

    async fn suggest_gas_price(&self) -> Result<U256, ChainError> {
        let raw: String = self.rpc_call("eth_gasPrice", serde_json::json!([])).await?;
        parse_hex_u256(&raw)
    }

    async fn estimate_gas(&self, call: &CallRequest) -> Result<u64, ChainError> {
        let raw: String = self
            .rpc_call(
                "eth_estimateGas",
                serde_json::json!([{
                    "from": format_address(&call.from),
                    "to": format_address(&call.to),
                    "data": format!("0x{}", hex::encode(&call.data)),
                }]),
            )
            .await?;
        parse_hex_u64(&raw)
    }

    async fn network_id(&self) -> Result<u64, ChainError> {
        let raw: String = self.rpc_call("eth_chainId", serde_json::json!([])).await?;
        parse_hex_u64(&raw)
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<H256, ChainError> {
        let hash: String = self
            .rpc_call(
                "eth_sendRawTransaction",
                serde_json::json!([format!("0x{}", hex::encode(raw))]),
            )
            .await?;
        parse_tx_hash(&hash)
    }
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

fn strip_hex_marker(input: &str) -> &str {
    let s = input.trim();
    s.strip_prefix("0x").unwrap_or(s)
}

pub(crate) fn parse_hex_u64(input: &str) -> Result<u64, ChainError> {
    let raw = strip_hex_marker(input);
    if raw.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(raw, 16)
        .map_err(|e| ChainError::Rejected(format!("invalid quantity {input:?}: {e}")))
}

pub(crate) fn parse_hex_u256(input: &str) -> Result<U256, ChainError> {
    let raw = strip_hex_marker(input);
    if raw.is_empty() {
        return Ok(U256::zero());
    }
    U256::from_str_radix(raw, 16)
        .map_err(|e| ChainError::Rejected(format!("invalid quantity {input:?}: {e:?}")))
}

pub(crate) fn parse_tx_hash(input: &str) -> Result<H256, ChainError> {
    let raw = strip_hex_marker(input);
    let bytes = hex::decode(raw)
        .map_err(|e| ChainError::Rejected(format!("invalid tx hash {input:?}: {e}")))?;
    if bytes.len() != 32 {
        return Err(ChainError::Rejected(format!(
            "invalid tx hash {input:?}: expected 32 bytes"
        )));
    }
    Ok(H256::from_slice(&bytes))
}
