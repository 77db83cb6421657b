//! Relay-backed transaction channel
//!
//! [`RelayChannelBuilder`] performs the one-time handshake with the relay
//! network: it reads how the sponsor is wired (hub and forwarder), checks the
//! sponsor can pay, and discovers responsive relay servers. The resulting
//! [`RelayChannel`] sends every write as an EIP-712 signed meta-transaction
//! through those relays and serves reads as plain `eth_call`s.

use crate::config::RelayConfig;
use crate::contracts::{IForwarder, IPaymaster, IRelayHub};
use crate::discovery::{self, ActiveRelay};
use crate::errors::{RelayError, Result, UnavailableReason};
use crate::provider::{self, RpcReceipt, WalletProvider, USER_REJECTED};
use crate::transport::{
    ForwardRequest, HttpRelayTransport, RelayData, RelayMetadata, RelayRequest, RelayTransactionRequest,
    RelayTransport,
};
use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_sol_types::{decode_revert_reason, Revert, SolCall, SolError, SolEvent};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

const DOMAIN_NAME: &str = "GSN Relayed Transaction";
const DOMAIN_VERSION: &str = "2";
const CLIENT_ID: &str = "1";
/// Nonce slack a relay worker may use before our request goes stale.
const MAX_RELAY_NONCE_GAP: u64 = 3;

/// Inclusion report for a relayed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReceipt {
    pub tx_hash: B256,
    pub block_number: u64,
}

/// Builds the single relay channel of a session.
pub struct RelayChannelBuilder {
    config: RelayConfig,
    transport: Arc<dyn RelayTransport>,
}

impl RelayChannelBuilder {
    /// Builder talking to relay servers over HTTP.
    pub fn new(config: RelayConfig) -> Result<Self> {
        let transport = HttpRelayTransport::new(config.http_timeout())?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    pub fn with_transport(config: RelayConfig, transport: Arc<dyn RelayTransport>) -> Self {
        Self { config, transport }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Run the relay handshake over `provider`.
    ///
    /// A missing provider yields [`RelayError::NoWalletProvider`] without any
    /// network call. Every other failure is reported as
    /// [`RelayError::Unavailable`]: the session has no gasless channel.
    pub async fn build(&self, provider: Option<Arc<dyn WalletProvider>>) -> Result<RelayChannel> {
        let Some(provider) = provider else {
            warn!("no wallet provider injected; relay channel not created");
            return Err(RelayError::NoWalletProvider);
        };

        match self.handshake(provider).await {
            Ok(channel) => Ok(channel),
            Err(RelayError::Unavailable(reason)) => {
                warn!(%reason, "relay network unavailable");
                Err(RelayError::Unavailable(reason))
            }
            Err(other) => {
                let reason = UnavailableReason::Handshake(other.to_string());
                warn!(%reason, "relay network unavailable");
                Err(RelayError::Unavailable(reason))
            }
        }
    }

    async fn handshake(&self, provider: Arc<dyn WalletProvider>) -> Result<RelayChannel> {
        let paymaster = self.config.paymaster_address;
        debug!(
            %paymaster,
            relay_lookup_window_blocks = self.config.relay_lookup_window_blocks,
            relay_registration_lookup_blocks = self.config.relay_registration_lookup_blocks,
            "initializing relay provider"
        );

        let chain_id = provider::parse_quantity(&provider.request("eth_chainId", json!([])).await?)?;
        let accounts: Vec<Address> =
            serde_json::from_value(provider.request("eth_requestAccounts", json!([])).await?)?;
        let signer = accounts
            .first()
            .copied()
            .ok_or(RelayError::Unavailable(UnavailableReason::NoAccounts))?;

        let raw = provider::eth_call(
            provider.as_ref(),
            None,
            paymaster,
            IPaymaster::getHubAddrCall {}.abi_encode(),
        )
        .await?;
        let relay_hub = IPaymaster::getHubAddrCall::abi_decode_returns(&raw, true)?._0;

        let raw = provider::eth_call(
            provider.as_ref(),
            None,
            paymaster,
            IPaymaster::trustedForwarderCall {}.abi_encode(),
        )
        .await?;
        let forwarder = IPaymaster::trustedForwarderCall::abi_decode_returns(&raw, true)?._0;

        if relay_hub.is_zero() || forwarder.is_zero() {
            return Err(RelayError::Unavailable(
                UnavailableReason::SponsorNotConfigured { paymaster },
            ));
        }

        let raw = provider::eth_call(
            provider.as_ref(),
            None,
            relay_hub,
            IRelayHub::balanceOfCall { target: paymaster }.abi_encode(),
        )
        .await?;
        let deposit = IRelayHub::balanceOfCall::abi_decode_returns(&raw, true)?._0;
        if deposit.is_zero() {
            return Err(RelayError::Unavailable(UnavailableReason::SponsorRejected {
                paymaster,
                reason: "no deposit at relay hub".to_string(),
            }));
        }

        let current_block =
            provider::parse_quantity(&provider.request("eth_blockNumber", json!([])).await?)?;
        let candidates =
            discovery::candidate_relays(provider.as_ref(), relay_hub, current_block, &self.config)
                .await?;
        let relays =
            discovery::select_active(self.transport.as_ref(), relay_hub, candidates).await;
        if relays.is_empty() {
            return Err(RelayError::Unavailable(UnavailableReason::NoActiveRelays));
        }

        info!(
            chain_id,
            %signer,
            %paymaster,
            %relay_hub,
            %forwarder,
            relays = relays.len(),
            "relay channel ready"
        );

        Ok(RelayChannel {
            provider,
            transport: self.transport.clone(),
            config: self.config.clone(),
            chain_id,
            signer,
            relay_hub,
            forwarder,
            relays,
        })
    }
}

/// Transaction channel that routes writes through relay servers.
pub struct RelayChannel {
    provider: Arc<dyn WalletProvider>,
    transport: Arc<dyn RelayTransport>,
    config: RelayConfig,
    chain_id: u64,
    signer: Address,
    relay_hub: Address,
    forwarder: Address,
    relays: Vec<ActiveRelay>,
}

impl fmt::Debug for RelayChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayChannel")
            .field("chain_id", &self.chain_id)
            .field("signer", &self.signer)
            .field("paymaster", &self.config.paymaster_address)
            .field("relay_hub", &self.relay_hub)
            .field("forwarder", &self.forwarder)
            .field("relays", &self.relays.len())
            .finish_non_exhaustive()
    }
}

impl RelayChannel {
    /// Account that signs relayed requests.
    pub fn signer(&self) -> Address {
        self.signer
    }

    pub fn paymaster(&self) -> Address {
        self.config.paymaster_address
    }

    pub fn relay_hub(&self) -> Address {
        self.relay_hub
    }

    pub fn forwarder(&self) -> Address {
        self.forwarder
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Relays in the order they are tried.
    pub fn relays(&self) -> &[ActiveRelay] {
        &self.relays
    }

    /// Read-only call from the signer.
    pub async fn call(&self, to: Address, data: Vec<u8>) -> Result<Bytes> {
        provider::eth_call(self.provider.as_ref(), Some(self.signer), to, data).await
    }

    /// Sign `data` for `to` as a meta-transaction and hand it to the first
    /// relay that accepts it. Returns the hash of the broadcast transaction;
    /// inclusion is awaited separately with [`Self::wait_for_receipt`].
    pub async fn send_transaction(&self, to: Address, data: Vec<u8>) -> Result<B256> {
        let nonce = self.forwarder_nonce().await?;
        let gas_limit = self.estimate_gas(to, &data).await;
        let network_gas_price =
            provider::parse_u256(&self.provider.request("eth_gasPrice", json!([])).await?)?;
        let data = Bytes::from(data);

        let mut last_error = None;
        for relay in &self.relays {
            let relay_request = RelayRequest {
                request: ForwardRequest {
                    from: self.signer,
                    to,
                    value: "0".to_string(),
                    gas: gas_limit.to_string(),
                    nonce: nonce.to_string(),
                    data: data.clone(),
                    valid_until: "0".to_string(),
                },
                relay_data: RelayData {
                    gas_price: network_gas_price.max(relay.min_gas_price()).to_string(),
                    pct_relay_fee: relay.info.pct_relay_fee.to_string(),
                    base_relay_fee: relay.info.base_relay_fee.to_string(),
                    relay_worker: relay.ping.relay_worker_address,
                    paymaster: self.config.paymaster_address,
                    forwarder: self.forwarder,
                    paymaster_data: Bytes::new(),
                    client_id: CLIENT_ID.to_string(),
                },
            };
            // The signature binds the relay's worker and fees, so each relay
            // needs its own. A user refusal ends the attempt.
            let signature = match self.sign(&relay_request).await {
                Ok(signature) => signature,
                Err(RelayError::Provider(err)) if err.code == USER_REJECTED => {
                    return Err(RelayError::Provider(err));
                }
                Err(err) => {
                    warn!(relay = relay.url(), error = %err, "signing for relay failed");
                    last_error = Some(err);
                    continue;
                }
            };
            let relay_max_nonce = match self.relay_max_nonce(relay.ping.relay_worker_address).await {
                Ok(nonce) => nonce,
                Err(err) => {
                    warn!(relay = relay.url(), error = %err, "relay worker nonce unavailable");
                    last_error = Some(err);
                    continue;
                }
            };
            let envelope = RelayTransactionRequest {
                relay_request,
                metadata: RelayMetadata {
                    approval_data: Bytes::new(),
                    relay_hub_address: self.relay_hub,
                    relay_max_nonce,
                    signature,
                },
            };

            debug!(relay = relay.url(), %to, nonce = %nonce, gas_limit, "relaying meta-transaction");
            match self.transport.relay(relay.url(), &envelope).await {
                Ok(tx_hash) => {
                    info!(%tx_hash, relay = relay.url(), "meta-transaction accepted by relay");
                    return Ok(tx_hash);
                }
                Err(err) => {
                    warn!(relay = relay.url(), error = %err, "relay refused meta-transaction");
                    last_error = Some(err);
                }
            }
        }

        Err(match last_error {
            Some(RelayError::Rejected(message)) => RelayError::Rejected(message),
            Some(other) => RelayError::Rejected(other.to_string()),
            None => RelayError::Unavailable(UnavailableReason::NoActiveRelays),
        })
    }

    /// Wait until `tx_hash` is included and check the relayed call succeeded.
    pub async fn wait_for_receipt(&self, tx_hash: B256) -> Result<TransactionReceipt> {
        match self.config.confirmation_timeout() {
            Some(limit) => timeout(limit, self.poll_receipt(tx_hash))
                .await
                .map_err(|_| RelayError::Timeout(tx_hash))?,
            None => self.poll_receipt(tx_hash).await,
        }
    }

    async fn poll_receipt(&self, tx_hash: B256) -> Result<TransactionReceipt> {
        let interval = self.config.receipt_poll_interval();
        loop {
            let value = self
                .provider
                .request("eth_getTransactionReceipt", json!([tx_hash]))
                .await?;
            if !value.is_null() {
                let receipt: RpcReceipt = serde_json::from_value(value)?;
                return self.check_receipt(tx_hash, receipt);
            }
            debug!(%tx_hash, "transaction not yet included");
            sleep(interval).await;
        }
    }

    fn check_receipt(&self, tx_hash: B256, receipt: RpcReceipt) -> Result<TransactionReceipt> {
        let block_number = provider::parse_quantity(&Value::String(receipt.block_number))?;
        if let Some(status) = receipt.status {
            if provider::parse_quantity(&Value::String(status))? == 0 {
                return Err(RelayError::Reverted {
                    tx_hash,
                    reason: "execution reverted".to_string(),
                });
            }
        }

        for log in receipt.logs.iter().filter(|log| log.address == self.relay_hub) {
            let Some(topic) = log.topics.first() else {
                continue;
            };
            if *topic == IRelayHub::TransactionResult::SIGNATURE_HASH {
                let event = IRelayHub::TransactionResult::decode_raw_log(
                    log.topics.iter().copied(),
                    &log.data,
                    true,
                )?;
                if event.status != 0 {
                    let reason = revert_reason(&event.returnValue).unwrap_or_else(|| {
                        format!("relayed call failed with status {}", event.status)
                    });
                    return Err(RelayError::Reverted { tx_hash, reason });
                }
            } else if *topic == IRelayHub::TransactionRejectedByPaymaster::SIGNATURE_HASH {
                let reason = IRelayHub::TransactionRejectedByPaymaster::decode_raw_log(
                    log.topics.iter().copied(),
                    &log.data,
                    true,
                )
                .ok()
                .and_then(|event| revert_reason(&event.reason))
                .unwrap_or_else(|| "rejected by paymaster".to_string());
                return Err(RelayError::Reverted { tx_hash, reason });
            }
        }

        debug!(%tx_hash, block_number, "transaction included");
        Ok(TransactionReceipt {
            tx_hash,
            block_number,
        })
    }

    async fn forwarder_nonce(&self) -> Result<U256> {
        let raw = self
            .call(
                self.forwarder,
                IForwarder::getNonceCall { from: self.signer }.abi_encode(),
            )
            .await?;
        Ok(IForwarder::getNonceCall::abi_decode_returns(&raw, true)?._0)
    }

    async fn estimate_gas(&self, to: Address, data: &[u8]) -> u64 {
        let tx = json!({ "from": self.signer, "to": to, "data": Bytes::copy_from_slice(data) });
        let estimate = match self.provider.request("eth_estimateGas", json!([tx])).await {
            Ok(value) => provider::parse_quantity(&value),
            Err(err) => Err(err.into()),
        };
        match estimate {
            Ok(gas) => gas,
            Err(err) => {
                debug!(error = %err, fallback = self.config.default_gas_limit, "gas estimation failed");
                self.config.default_gas_limit
            }
        }
    }

    async fn relay_max_nonce(&self, worker: Address) -> Result<u64> {
        let value = self
            .provider
            .request("eth_getTransactionCount", json!([worker, "pending"]))
            .await?;
        Ok(provider::parse_quantity(&value)? + MAX_RELAY_NONCE_GAP)
    }

    async fn sign(&self, request: &RelayRequest) -> Result<Bytes> {
        let typed = typed_data(self.chain_id, self.forwarder, request)?;
        let value = self
            .provider
            .request("eth_signTypedData_v4", json!([self.signer, typed.to_string()]))
            .await?;
        provider::parse_bytes(&value)
    }
}

/// EIP-712 payload of a relay request, verified by the forwarder.
fn typed_data(chain_id: u64, forwarder: Address, request: &RelayRequest) -> Result<Value> {
    let mut message = serde_json::to_value(&request.request)?;
    message["relayData"] = serde_json::to_value(&request.relay_data)?;

    Ok(json!({
        "types": {
            "EIP712Domain": [
                { "name": "name", "type": "string" },
                { "name": "version", "type": "string" },
                { "name": "chainId", "type": "uint256" },
                { "name": "verifyingContract", "type": "address" }
            ],
            "RelayRequest": [
                { "name": "from", "type": "address" },
                { "name": "to", "type": "address" },
                { "name": "value", "type": "uint256" },
                { "name": "gas", "type": "uint256" },
                { "name": "nonce", "type": "uint256" },
                { "name": "data", "type": "bytes" },
                { "name": "validUntil", "type": "uint256" },
                { "name": "relayData", "type": "RelayData" }
            ],
            "RelayData": [
                { "name": "gasPrice", "type": "uint256" },
                { "name": "pctRelayFee", "type": "uint256" },
                { "name": "baseRelayFee", "type": "uint256" },
                { "name": "relayWorker", "type": "address" },
                { "name": "paymaster", "type": "address" },
                { "name": "forwarder", "type": "address" },
                { "name": "paymasterData", "type": "bytes" },
                { "name": "clientId", "type": "uint256" }
            ]
        },
        "primaryType": "RelayRequest",
        "domain": {
            "name": DOMAIN_NAME,
            "version": DOMAIN_VERSION,
            "chainId": chain_id,
            "verifyingContract": forwarder
        },
        "message": message
    }))
}

fn revert_reason(data: &[u8]) -> Option<String> {
    Revert::abi_decode(data, true)
        .map(|revert| revert.reason)
        .ok()
        .or_else(|| decode_revert_reason(data))
        .filter(|reason| !reason.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revert_reason_unwraps_error_string() {
        let payload = Revert {
            reason: "handle already taken".to_string(),
        }
        .abi_encode();
        assert_eq!(revert_reason(&payload).as_deref(), Some("handle already taken"));
        assert_eq!(revert_reason(&[]), None);
        let empty = Revert {
            reason: String::new(),
        }
        .abi_encode();
        assert_eq!(revert_reason(&empty), None);
    }

    #[test]
    fn typed_data_binds_forwarder_domain() {
        let forwarder = Address::repeat_byte(0xf0);
        let request = RelayRequest {
            request: ForwardRequest {
                from: Address::repeat_byte(0x01),
                to: Address::repeat_byte(0x02),
                value: "0".to_string(),
                gas: "200000".to_string(),
                nonce: "4".to_string(),
                data: Bytes::from(vec![0xde, 0xad]),
                valid_until: "0".to_string(),
            },
            relay_data: RelayData {
                gas_price: "1000000000".to_string(),
                pct_relay_fee: "10".to_string(),
                base_relay_fee: "0".to_string(),
                relay_worker: Address::repeat_byte(0x03),
                paymaster: Address::repeat_byte(0x04),
                forwarder,
                paymaster_data: Bytes::new(),
                client_id: CLIENT_ID.to_string(),
            },
        };

        let typed = typed_data(80001, forwarder, &request).unwrap();
        assert_eq!(typed["primaryType"], "RelayRequest");
        assert_eq!(typed["domain"]["chainId"], 80001);
        assert_eq!(typed["message"]["nonce"], "4");
        assert_eq!(typed["message"]["validUntil"], "0");
        assert_eq!(typed["message"]["relayData"]["pctRelayFee"], "10");
        assert_eq!(
            typed["domain"]["verifyingContract"]
                .as_str()
                .unwrap()
                .parse::<Address>()
                .unwrap(),
            forwarder
        );
    }
}
