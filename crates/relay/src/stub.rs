//! Scripted in-memory chain behind the [`WalletProvider`] seam.
//!
//! Answers the handful of JSON-RPC methods the relay channel uses. Contract
//! reads are scripted per `(contract, selector)`; every request is recorded.

use crate::contracts::IRelayHub;
use crate::provider::{
    format_quantity, strip_hex, ProviderError, RpcLog, WalletProvider, INTERNAL_ERROR, METHOD_NOT_FOUND,
    USER_REJECTED,
};
use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_sol_types::{Revert, SolError, SolEvent};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

const DEFAULT_CHAIN_ID: u64 = 80001;
const DEFAULT_BLOCK: u64 = 10_000;
const DEFAULT_GAS_PRICE: u64 = 1_000_000_000;
const ESTIMATED_GAS: u64 = 200_000;

#[derive(Clone)]
pub struct StubWalletProvider {
    chain: Arc<RwLock<StubChain>>,
}

struct StubChain {
    accounts: Vec<Address>,
    chain_id: u64,
    block_number: u64,
    calls: HashMap<(Address, [u8; 4]), Vec<u8>>,
    logs: Vec<RpcLog>,
    receipt_status: bool,
    receipt_logs: Vec<RpcLog>,
    unmined_polls: usize,
    signature_rejection: Option<String>,
    /// One-shot failures keyed by method
    failures: HashMap<String, String>,
    requests: Vec<(String, Value)>,
}

impl Default for StubWalletProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl StubWalletProvider {
    pub fn new() -> Self {
        Self {
            chain: Arc::new(RwLock::new(StubChain {
                accounts: Vec::new(),
                chain_id: DEFAULT_CHAIN_ID,
                block_number: DEFAULT_BLOCK,
                calls: HashMap::new(),
                logs: Vec::new(),
                receipt_status: true,
                receipt_logs: Vec::new(),
                unmined_polls: 0,
                signature_rejection: None,
                failures: HashMap::new(),
                requests: Vec::new(),
            })),
        }
    }

    pub fn with_account(self, account: Address) -> Self {
        self.chain.write().accounts.push(account);
        self
    }

    pub fn with_block_number(self, block_number: u64) -> Self {
        self.chain.write().block_number = block_number;
        self
    }

    pub fn with_call(self, to: Address, selector: [u8; 4], output: Vec<u8>) -> Self {
        self.set_call(to, selector, output);
        self
    }

    pub fn with_log(self, log: RpcLog) -> Self {
        self.chain.write().logs.push(log);
        self
    }

    /// Script the ABI-encoded output of calling `selector` on `to`.
    pub fn set_call(&self, to: Address, selector: [u8; 4], output: Vec<u8>) {
        self.chain.write().calls.insert((to, selector), output);
    }

    /// Status and logs of every receipt handed out from now on.
    pub fn set_receipt(&self, status: bool, logs: Vec<RpcLog>) {
        let mut chain = self.chain.write();
        chain.receipt_status = status;
        chain.receipt_logs = logs;
    }

    /// Report the next `polls` receipt lookups as not yet mined.
    pub fn delay_receipts(&self, polls: usize) {
        self.chain.write().unmined_polls = polls;
    }

    pub fn reject_signatures(&self, message: impl Into<String>) {
        self.chain.write().signature_rejection = Some(message.into());
    }

    /// Fail the next `method` request with an internal error.
    pub fn fail_next(&self, method: impl Into<String>, message: impl Into<String>) {
        self.chain.write().failures.insert(method.into(), message.into());
    }

    pub fn requests(&self) -> Vec<(String, Value)> {
        self.chain.read().requests.clone()
    }

    pub fn request_count(&self, method: &str) -> usize {
        self.chain
            .read()
            .requests
            .iter()
            .filter(|(name, _)| name == method)
            .count()
    }

    fn answer(&self, method: &str, params: &Value) -> Result<Value, ProviderError> {
        let mut chain = self.chain.write();
        chain.requests.push((method.to_string(), params.clone()));
        if let Some(message) = chain.failures.remove(method) {
            return Err(ProviderError::new(INTERNAL_ERROR, message));
        }

        match method {
            "eth_chainId" => Ok(json!(format_quantity(chain.chain_id))),
            "eth_accounts" | "eth_requestAccounts" => Ok(json!(chain.accounts)),
            "eth_blockNumber" => Ok(json!(format_quantity(chain.block_number))),
            "eth_gasPrice" => Ok(json!(format_quantity(DEFAULT_GAS_PRICE))),
            "eth_estimateGas" => Ok(json!(format_quantity(ESTIMATED_GAS))),
            "eth_getTransactionCount" => Ok(json!(format_quantity(0))),
            "eth_call" => {
                let (to, data) = call_target(params)?;
                let selector: [u8; 4] = data
                    .get(..4)
                    .and_then(|bytes| bytes.try_into().ok())
                    .ok_or_else(|| ProviderError::new(-32602, "call data shorter than a selector"))?;
                chain
                    .calls
                    .get(&(to, selector))
                    .map(|output| json!(Bytes::from(output.clone())))
                    .ok_or_else(|| ProviderError::new(3, "execution reverted"))
            }
            "eth_getLogs" => {
                let filter = &params[0];
                let address = filter["address"].as_str().and_then(|raw| raw.parse::<Address>().ok());
                let from_block = filter["fromBlock"]
                    .as_str()
                    .and_then(|raw| u64::from_str_radix(strip_hex(raw), 16).ok())
                    .unwrap_or(0);
                let topic = filter["topics"][0].as_str().and_then(|raw| raw.parse::<B256>().ok());
                let logs: Vec<&RpcLog> = chain
                    .logs
                    .iter()
                    .filter(|log| address.map_or(true, |address| log.address == address))
                    .filter(|log| log.block().unwrap_or(0) >= from_block)
                    .filter(|log| {
                        topic.map_or(true, |topic| log.topics.first() == Some(&topic))
                    })
                    .collect();
                Ok(json!(logs))
            }
            "eth_signTypedData_v4" => {
                if let Some(message) = &chain.signature_rejection {
                    return Err(ProviderError::new(USER_REJECTED, message.clone()));
                }
                let payload = params[1].as_str().unwrap_or_default();
                let digest = keccak256(payload.as_bytes());
                let mut signature = Vec::with_capacity(65);
                signature.extend_from_slice(digest.as_slice());
                signature.extend_from_slice(digest.as_slice());
                signature.push(0x1b);
                Ok(json!(Bytes::from(signature)))
            }
            "eth_getTransactionReceipt" => {
                if chain.unmined_polls > 0 {
                    chain.unmined_polls -= 1;
                    return Ok(Value::Null);
                }
                let status = if chain.receipt_status { "0x1" } else { "0x0" };
                Ok(json!({
                    "transactionHash": params[0],
                    "blockNumber": format_quantity(chain.block_number + 1),
                    "status": status,
                    "logs": chain.receipt_logs,
                }))
            }
            other => Err(ProviderError::new(
                METHOD_NOT_FOUND,
                format!("method {other} not supported"),
            )),
        }
    }
}

fn call_target(params: &Value) -> Result<(Address, Vec<u8>), ProviderError> {
    let tx = &params[0];
    let to = tx["to"]
        .as_str()
        .and_then(|raw| raw.parse::<Address>().ok())
        .ok_or_else(|| ProviderError::new(-32602, "eth_call without target"))?;
    let data = tx["data"]
        .as_str()
        .or_else(|| tx["input"].as_str())
        .map(|raw| hex::decode(strip_hex(raw)))
        .transpose()
        .map_err(|err| ProviderError::new(-32602, err.to_string()))?
        .unwrap_or_default();
    Ok((to, data))
}

#[async_trait]
impl WalletProvider for StubWalletProvider {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError> {
        self.answer(method, &params)
    }
}

/// Hub log announcing a relay server.
pub fn registration_log(hub: Address, manager: Address, relay_url: &str, block: u64) -> RpcLog {
    let event = IRelayHub::RelayServerRegistered {
        relayManager: manager,
        baseRelayFee: U256::ZERO,
        pctRelayFee: U256::from(10),
        relayUrl: relay_url.to_string(),
    };
    RpcLog {
        address: hub,
        topics: vec![
            IRelayHub::RelayServerRegistered::SIGNATURE_HASH,
            manager.into_word(),
        ],
        data: Bytes::from(event.encode_data()),
        block_number: Some(format_quantity(block)),
    }
}

/// Hub log reporting the outcome of a relayed call; a non-zero `status`
/// carries `revert_reason` as an `Error(string)` payload.
pub fn transaction_result_log(hub: Address, status: u8, revert_reason: &str) -> RpcLog {
    let return_value = if status == 0 {
        Vec::new()
    } else {
        Revert {
            reason: revert_reason.to_string(),
        }
        .abi_encode()
    };
    let event = IRelayHub::TransactionResult {
        status,
        returnValue: Bytes::from(return_value),
    };
    RpcLog {
        address: hub,
        topics: vec![IRelayHub::TransactionResult::SIGNATURE_HASH],
        data: Bytes::from(event.encode_data()),
        block_number: None,
    }
}
