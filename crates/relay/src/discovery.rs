//! Relay server discovery
//!
//! Relay servers announce themselves with `RelayServerRegistered` events on
//! the hub. Discovery scans a bounded window of recent blocks for those
//! events, ranks the candidates and keeps the ones that answer a ping.

use crate::config::RelayConfig;
use crate::contracts::IRelayHub;
use crate::errors::Result;
use crate::provider::{format_quantity, RpcLog, WalletProvider};
use crate::transport::{PingResponse, RelayTransport};
use alloy_primitives::{Address, U256};
use alloy_sol_types::SolEvent;
use serde_json::json;
use std::collections::HashMap;
use tracing::{debug, warn};

/// A relay server known from configuration or from a hub registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayInfo {
    pub url: String,
    pub manager: Option<Address>,
    pub base_relay_fee: U256,
    pub pct_relay_fee: U256,
    /// Block of the latest registration seen
    pub registered_at: Option<u64>,
    pub recently_active: bool,
    pub preferred: bool,
}

impl RelayInfo {
    pub fn preferred(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            manager: None,
            base_relay_fee: U256::ZERO,
            pct_relay_fee: U256::ZERO,
            registered_at: None,
            recently_active: false,
            preferred: true,
        }
    }
}

/// A relay that answered its ping as ready on the expected hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveRelay {
    pub info: RelayInfo,
    pub ping: PingResponse,
}

impl ActiveRelay {
    pub fn url(&self) -> &str {
        &self.info.url
    }

    pub fn min_gas_price(&self) -> U256 {
        self.ping.min_gas_price()
    }
}

/// Scan the hub for registrations inside the configured lookback window.
pub(crate) async fn candidate_relays(
    provider: &dyn WalletProvider,
    hub: Address,
    current_block: u64,
    config: &RelayConfig,
) -> Result<Vec<RelayInfo>> {
    let from_block = config.registration_from_block(current_block);
    let filter = json!({
        "address": hub,
        "fromBlock": format_quantity(from_block),
        "toBlock": "latest",
        "topics": [IRelayHub::RelayServerRegistered::SIGNATURE_HASH],
    });
    let logs: Vec<RpcLog> =
        serde_json::from_value(provider.request("eth_getLogs", json!([filter])).await?)?;
    debug!(
        %hub,
        from_block,
        registrations = logs.len(),
        "scanned relay registrations"
    );

    let mut registered = Vec::with_capacity(logs.len());
    for log in &logs {
        match IRelayHub::RelayServerRegistered::decode_raw_log(
            log.topics.iter().copied(),
            &log.data,
            true,
        ) {
            Ok(event) => registered.push(RelayInfo {
                url: event.relayUrl,
                manager: Some(event.relayManager),
                base_relay_fee: event.baseRelayFee,
                pct_relay_fee: event.pctRelayFee,
                registered_at: log.block(),
                recently_active: false,
                preferred: false,
            }),
            Err(err) => warn!(error = %err, "skipping undecodable relay registration"),
        }
    }

    Ok(rank(
        &config.preferred_relays,
        registered,
        config.active_since_block(current_block),
    ))
}

/// Order candidates: preferred relays first, then recently active
/// registrations, newest first. Only the latest registration per manager
/// counts, and a discovered relay already listed as preferred is dropped.
pub fn rank(preferred: &[String], registered: Vec<RelayInfo>, active_since: u64) -> Vec<RelayInfo> {
    let mut latest: HashMap<Address, RelayInfo> = HashMap::new();
    for mut info in registered {
        info.recently_active = info.registered_at.is_some_and(|block| block >= active_since);
        let Some(manager) = info.manager else {
            continue;
        };
        match latest.get(&manager) {
            Some(existing) if existing.registered_at >= info.registered_at => {}
            _ => {
                latest.insert(manager, info);
            }
        }
    }

    let mut discovered: Vec<RelayInfo> = latest
        .into_values()
        .filter(|info| !preferred.iter().any(|url| same_url(url, &info.url)))
        .collect();
    discovered.sort_by(|a, b| {
        b.recently_active
            .cmp(&a.recently_active)
            .then(b.registered_at.cmp(&a.registered_at))
            .then(a.url.cmp(&b.url))
    });

    preferred
        .iter()
        .map(|url| RelayInfo::preferred(url.as_str()))
        .chain(discovered)
        .collect()
}

fn same_url(a: &str, b: &str) -> bool {
    a.trim_end_matches('/').eq_ignore_ascii_case(b.trim_end_matches('/'))
}

/// Ping every candidate concurrently and keep ready relays bound to `hub`,
/// preserving rank order.
pub(crate) async fn select_active(
    transport: &dyn RelayTransport,
    hub: Address,
    candidates: Vec<RelayInfo>,
) -> Vec<ActiveRelay> {
    let pings = candidates.iter().map(|info| transport.ping(&info.url));
    let results = futures::future::join_all(pings).await;

    candidates
        .into_iter()
        .zip(results)
        .filter_map(|(info, result)| match result {
            Ok(ping) if ping.ready && ping.relay_hub_address == hub => {
                Some(ActiveRelay { info, ping })
            }
            Ok(ping) => {
                debug!(
                    url = %info.url,
                    ready = ping.ready,
                    relay_hub = %ping.relay_hub_address,
                    "skipping relay that is not ready on this hub"
                );
                None
            }
            Err(err) => {
                warn!(url = %info.url, error = %err, "relay ping failed");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration(manager: u8, url: &str, block: u64) -> RelayInfo {
        RelayInfo {
            url: url.to_string(),
            manager: Some(Address::repeat_byte(manager)),
            base_relay_fee: U256::ZERO,
            pct_relay_fee: U256::from(10),
            registered_at: Some(block),
            recently_active: false,
            preferred: false,
        }
    }

    #[test]
    fn recently_active_relays_rank_first() {
        let ranked = rank(
            &[],
            vec![
                registration(1, "https://old.example", 9_100),
                registration(2, "https://fresh.example", 9_990),
            ],
            9_900,
        );
        assert_eq!(ranked[0].url, "https://fresh.example");
        assert!(ranked[0].recently_active);
        assert!(!ranked[1].recently_active);
    }

    #[test]
    fn latest_registration_per_manager_wins() {
        let ranked = rank(
            &[],
            vec![
                registration(1, "https://moved.example", 9_500),
                registration(1, "https://current.example", 9_800),
            ],
            0,
        );
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].url, "https://current.example");
    }

    #[test]
    fn preferred_relays_lead_and_are_not_duplicated() {
        let preferred = vec!["https://mine.example/".to_string()];
        let ranked = rank(
            &preferred,
            vec![
                registration(1, "https://mine.example", 9_999),
                registration(2, "https://other.example", 9_999),
            ],
            0,
        );
        assert_eq!(ranked.len(), 2);
        assert!(ranked[0].preferred);
        assert_eq!(ranked[1].url, "https://other.example");
    }
}
