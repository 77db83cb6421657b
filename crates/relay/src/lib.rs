//! Fee-Relay Transaction Channel
//!
//! This crate turns a plain wallet provider into a gasless one. Outgoing
//! transactions are signed as meta-transactions and handed to relay servers
//! registered on a relay hub; a sponsor contract (paymaster) pays their gas.
//! Reads go through the same channel as plain `eth_call`s.

pub mod channel;
pub mod config;
pub mod contracts;
pub mod discovery;
pub mod errors;
pub mod provider;
pub mod stub;
pub mod transport;

pub use channel::{RelayChannel, RelayChannelBuilder, TransactionReceipt};
pub use config::RelayConfig;
pub use discovery::{ActiveRelay, RelayInfo};
pub use errors::*;
pub use provider::{HttpWalletProvider, ProviderError, RpcLog, WalletProvider};
pub use stub::StubWalletProvider;
pub use transport::{HttpRelayTransport, PingResponse, RelayTransport, StubRelayTransport};
