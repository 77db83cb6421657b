//! Relay server transport
//!
//! Relay servers expose `GET /getaddr` (readiness and worker address) and
//! `POST /relay` (accept a signed meta-transaction and broadcast it).

use crate::errors::{RelayError, Result};
use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Readiness report of a relay server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingResponse {
    pub relay_worker_address: Address,
    pub relay_manager_address: Address,
    pub relay_hub_address: Address,
    /// Decimal wei amount
    #[serde(default)]
    pub min_gas_price: String,
    pub ready: bool,
    #[serde(default)]
    pub version: String,
}

impl PingResponse {
    /// A ready relay bound to `hub`.
    pub fn ready(hub: Address, manager: Address, worker: Address) -> Self {
        Self {
            relay_worker_address: worker,
            relay_manager_address: manager,
            relay_hub_address: hub,
            min_gas_price: "0".to_string(),
            ready: true,
            version: "2.2.0".to_string(),
        }
    }

    pub fn min_gas_price(&self) -> U256 {
        self.min_gas_price.parse().unwrap_or(U256::ZERO)
    }
}

/// Call the user signs; executed by the forwarder on the user's behalf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardRequest {
    pub from: Address,
    pub to: Address,
    pub value: String,
    pub gas: String,
    pub nonce: String,
    pub data: Bytes,
    pub valid_until: String,
}

/// Fee and routing terms of a relayed call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayData {
    pub gas_price: String,
    pub pct_relay_fee: String,
    pub base_relay_fee: String,
    pub relay_worker: Address,
    pub paymaster: Address,
    pub forwarder: Address,
    pub paymaster_data: Bytes,
    pub client_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayRequest {
    pub request: ForwardRequest,
    pub relay_data: RelayData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayMetadata {
    pub approval_data: Bytes,
    pub relay_hub_address: Address,
    pub relay_max_nonce: u64,
    pub signature: Bytes,
}

/// Body of `POST /relay`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayTransactionRequest {
    pub relay_request: RelayRequest,
    pub metadata: RelayMetadata,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelayResponse {
    #[serde(default)]
    signed_tx: Option<Bytes>,
    #[serde(default)]
    tx_hash: Option<B256>,
    #[serde(default)]
    error: Option<String>,
}

impl RelayResponse {
    fn into_tx_hash(self) -> Result<B256> {
        if let Some(error) = self.error {
            return Err(RelayError::Rejected(error));
        }
        match (self.tx_hash, self.signed_tx) {
            (Some(hash), _) => Ok(hash),
            (None, Some(signed)) => Ok(keccak256(&signed)),
            (None, None) => Err(RelayError::parse_error(
                "relay response carried no transaction",
            )),
        }
    }
}

#[async_trait]
pub trait RelayTransport: Send + Sync {
    async fn ping(&self, relay_url: &str) -> Result<PingResponse>;

    /// Hand a signed request to a relay; returns the hash of the broadcast tx.
    async fn relay(&self, relay_url: &str, request: &RelayTransactionRequest) -> Result<B256>;
}

/// HTTP client for relay servers.
#[derive(Clone, Debug)]
pub struct HttpRelayTransport {
    http: Client,
}

impl HttpRelayTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self::with_http_client(
            Client::builder().timeout(timeout).build()?,
        ))
    }

    pub fn with_http_client(http: Client) -> Self {
        Self { http }
    }
}

fn endpoint(relay_url: &str, path: &str) -> Result<Url> {
    let url = format!(
        "{}/{}",
        relay_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    Ok(Url::parse(&url)?)
}

#[async_trait]
impl RelayTransport for HttpRelayTransport {
    async fn ping(&self, relay_url: &str) -> Result<PingResponse> {
        let response = self.http.get(endpoint(relay_url, "getaddr")?).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RelayError::Rejected(format!(
                "relay {relay_url} answered ping with status {status}"
            )));
        }
        Ok(response.json::<PingResponse>().await?)
    }

    async fn relay(&self, relay_url: &str, request: &RelayTransactionRequest) -> Result<B256> {
        let response = self
            .http
            .post(endpoint(relay_url, "relay")?)
            .json(request)
            .send()
            .await?;
        let status = response.status();
        let bytes = response.bytes().await?;

        match serde_json::from_slice::<RelayResponse>(&bytes) {
            Ok(reply) => reply.into_tx_hash(),
            Err(_) if status.is_success() => Err(RelayError::parse_error(format!(
                "unexpected relay response: {}",
                String::from_utf8_lossy(&bytes)
            ))),
            Err(_) => Err(RelayError::Rejected(
                String::from_utf8_lossy(&bytes).to_string(),
            )),
        }
    }
}

/// In-memory relay servers keyed by URL.
#[derive(Clone, Default)]
pub struct StubRelayTransport {
    state: Arc<RwLock<StubRelayState>>,
}

#[derive(Default)]
struct StubRelayState {
    relays: HashMap<String, PingResponse>,
    rejections: HashMap<String, String>,
    pings: Vec<String>,
    relayed: Vec<(String, RelayTransactionRequest)>,
}

impl StubRelayTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_relay(self, relay_url: impl Into<String>, ping: PingResponse) -> Self {
        self.state.write().relays.insert(relay_url.into(), ping);
        self
    }

    /// Make the relay at `relay_url` refuse every request with `message`.
    pub fn reject(&self, relay_url: impl Into<String>, message: impl Into<String>) {
        self.state
            .write()
            .rejections
            .insert(relay_url.into(), message.into());
    }

    pub fn pings(&self) -> Vec<String> {
        self.state.read().pings.clone()
    }

    pub fn relayed(&self) -> Vec<(String, RelayTransactionRequest)> {
        self.state.read().relayed.clone()
    }
}

#[async_trait]
impl RelayTransport for StubRelayTransport {
    async fn ping(&self, relay_url: &str) -> Result<PingResponse> {
        let mut state = self.state.write();
        state.pings.push(relay_url.to_string());
        state
            .relays
            .get(relay_url)
            .cloned()
            .ok_or_else(|| RelayError::Rejected(format!("relay {relay_url} unreachable")))
    }

    async fn relay(&self, relay_url: &str, request: &RelayTransactionRequest) -> Result<B256> {
        let mut state = self.state.write();
        if let Some(message) = state.rejections.get(relay_url) {
            return Err(RelayError::Rejected(message.clone()));
        }
        let tx_hash = keccak256(serde_json::to_vec(request)?);
        state.relayed.push((relay_url.to_string(), request.clone()));
        Ok(tx_hash)
    }
}
