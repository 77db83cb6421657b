//! Wallet provider seam
//!
//! The host environment injects a provider exposing an EIP-1193 style
//! `request(method, params)` interface. Everything the relay layer needs from
//! the chain (reads, logs, receipts, typed-data signatures) flows through it.

use crate::errors::{RelayError, Result};
use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const USER_REJECTED: i64 = 4001;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INTERNAL_ERROR: i64 = -32603;

/// Error object returned by a provider, shaped like a JSON-RPC error.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message}")]
pub struct ProviderError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ProviderError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    fn transport(err: reqwest::Error) -> Self {
        Self::new(INTERNAL_ERROR, err.to_string())
    }
}

#[async_trait]
pub trait WalletProvider: Send + Sync {
    async fn request(&self, method: &str, params: Value) -> std::result::Result<Value, ProviderError>;
}

/// JSON-RPC provider talking to a node that holds an unlocked account.
#[derive(Clone, Debug)]
pub struct HttpWalletProvider {
    endpoint: Url,
    http: Client,
    next_id: Arc<AtomicU64>,
}

impl HttpWalletProvider {
    pub fn new(endpoint: impl AsRef<str>) -> Result<Self> {
        Self::with_http_client(
            endpoint,
            Client::builder().timeout(Duration::from_secs(10)).build()?,
        )
    }

    /// Use an existing reqwest client (custom TLS, proxies).
    pub fn with_http_client(endpoint: impl AsRef<str>, http: Client) -> Result<Self> {
        let endpoint = Url::parse(endpoint.as_ref())?;
        Ok(Self {
            endpoint,
            http,
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl WalletProvider for HttpWalletProvider {
    async fn request(&self, method: &str, params: Value) -> std::result::Result<Value, ProviderError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response = self
            .http
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .await
            .map_err(ProviderError::transport)?;
        let status = response.status();
        let envelope = response
            .json::<RpcEnvelope>()
            .await
            .map_err(|err| {
                ProviderError::new(INTERNAL_ERROR, format!("invalid response (status {status}): {err}"))
            })?;

        if let Some(error) = envelope.error {
            return Err(error);
        }
        Ok(envelope.result.unwrap_or(Value::Null))
    }
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ProviderError>,
}

/// Log entry as returned by `eth_getLogs` and inside receipts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number: Option<String>,
}

impl RpcLog {
    pub fn block(&self) -> Option<u64> {
        self.block_number
            .as_deref()
            .and_then(|raw| u64::from_str_radix(strip_hex(raw), 16).ok())
    }
}

/// Receipt fields the channel inspects.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RpcReceipt {
    pub block_number: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub logs: Vec<RpcLog>,
}

/// Plain `eth_call` against `to`, optionally from a given sender.
pub async fn eth_call(
    provider: &dyn WalletProvider,
    from: Option<Address>,
    to: Address,
    data: Vec<u8>,
) -> Result<Bytes> {
    let mut tx = json!({ "to": to, "data": Bytes::from(data) });
    if let Some(from) = from {
        tx["from"] = json!(from);
    }
    let value = provider.request("eth_call", json!([tx, "latest"])).await?;
    parse_bytes(&value)
}

pub(crate) fn strip_hex(raw: &str) -> &str {
    raw.strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .unwrap_or(raw)
}

fn expect_str(value: &Value) -> Result<&str> {
    value
        .as_str()
        .ok_or_else(|| RelayError::parse_error(format!("expected hex string, got {value}")))
}

pub fn parse_quantity(value: &Value) -> Result<u64> {
    let raw = expect_str(value)?;
    u64::from_str_radix(strip_hex(raw), 16)
        .map_err(|err| RelayError::parse_error(format!("invalid quantity `{raw}`: {err}")))
}

pub fn parse_u256(value: &Value) -> Result<U256> {
    let raw = expect_str(value)?;
    U256::from_str_radix(strip_hex(raw), 16)
        .map_err(|err| RelayError::parse_error(format!("invalid quantity `{raw}`: {err}")))
}

pub fn parse_bytes(value: &Value) -> Result<Bytes> {
    let raw = expect_str(value)?;
    hex::decode(strip_hex(raw))
        .map(Bytes::from)
        .map_err(|err| RelayError::parse_error(format!("invalid data `{raw}`: {err}")))
}

pub fn format_quantity(value: u64) -> String {
    format!("{value:#x}")
}
