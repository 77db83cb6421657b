//! Relay channel configuration

use alloy_primitives::{address, Address};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Sponsor contract of the reference deployment (Polygon Mumbai).
pub const DEFAULT_PAYMASTER: Address = address!("cA94aBEdcC18A10521aB7273B3F3D5ED28Cf7B8A");

/// Settings for the relay handshake and meta-transaction submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Sponsor (paymaster) contract that pays relayed gas
    pub paymaster_address: Address,
    /// Registrations newer than this many blocks count as recently active
    pub relay_lookup_window_blocks: u64,
    /// How far back relay registrations are scanned
    pub relay_registration_lookup_blocks: u64,
    /// Diagnostic verbosity of the relay layer (tracing directive level)
    pub log_level: String,
    /// Relay URLs tried before any discovered relay
    pub preferred_relays: Vec<String>,
    /// Gas limit used when the node cannot estimate the call
    pub default_gas_limit: u64,
    pub receipt_poll_interval_ms: u64,
    /// Upper bound on waiting for inclusion; `None` waits indefinitely
    pub confirmation_timeout_secs: Option<u64>,
    pub relay_http_timeout_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            paymaster_address: DEFAULT_PAYMASTER,
            relay_lookup_window_blocks: 1000,
            relay_registration_lookup_blocks: 1000,
            log_level: "debug".to_string(),
            preferred_relays: Vec::new(),
            default_gas_limit: 500_000,
            receipt_poll_interval_ms: 1_000,
            confirmation_timeout_secs: None,
            relay_http_timeout_secs: 10,
        }
    }
}

impl RelayConfig {
    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_interval_ms.max(1))
    }

    pub fn confirmation_timeout(&self) -> Option<Duration> {
        self.confirmation_timeout_secs.map(Duration::from_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.relay_http_timeout_secs)
    }

    /// First block scanned for relay registrations.
    pub fn registration_from_block(&self, current_block: u64) -> u64 {
        current_block.saturating_sub(self.relay_registration_lookup_blocks)
    }

    /// First block whose registrations count as recently active.
    pub fn active_since_block(&self, current_block: u64) -> u64 {
        current_block.saturating_sub(self.relay_lookup_window_blocks)
    }
}
