//! The identity client driven through a relay channel backed by the
//! in-memory chain and relay servers.

use alloy_primitives::{Address, U256};
use alloy_sol_types::{SolCall, SolValue};
use gasless_identity::abi::IIdentityRegistry;
use gasless_identity::{
    ChannelStatus, GaslessConfig, IdentityError, IdentitySession, IdentityToken, MintOutcome,
    PreconditionError, Profile, WalletAddress,
};
use gasless_relay::contracts::{IForwarder, IPaymaster, IRelayHub};
use gasless_relay::stub::{registration_log, transaction_result_log};
use gasless_relay::{PingResponse, RelayConfig, StubRelayTransport, StubWalletProvider, WalletProvider};
use std::sync::Arc;

const HUB: Address = Address::repeat_byte(0xa1);
const FORWARDER: Address = Address::repeat_byte(0xf0);
const MANAGER: Address = Address::repeat_byte(0xb1);
const WORKER: Address = Address::repeat_byte(0xc1);
const USER: Address = Address::repeat_byte(0x42);
const RELAY: &str = "https://relay.example";

fn config() -> GaslessConfig {
    GaslessConfig {
        relay: RelayConfig {
            receipt_poll_interval_ms: 1,
            ..Default::default()
        },
        ..Default::default()
    }
}

fn chain(config: &GaslessConfig) -> StubWalletProvider {
    let paymaster = config.relay.paymaster_address;
    StubWalletProvider::new()
        .with_account(USER)
        .with_call(paymaster, IPaymaster::getHubAddrCall::SELECTOR, HUB.abi_encode())
        .with_call(
            paymaster,
            IPaymaster::trustedForwarderCall::SELECTOR,
            FORWARDER.abi_encode(),
        )
        .with_call(HUB, IRelayHub::balanceOfCall::SELECTOR, U256::from(1_000u64).abi_encode())
        .with_call(FORWARDER, IForwarder::getNonceCall::SELECTOR, U256::ZERO.abi_encode())
        .with_call(
            config.identity_contract,
            IIdentityRegistry::walletOfOwnerCall::SELECTOR,
            U256::ZERO.abi_encode(),
        )
        .with_log(registration_log(HUB, MANAGER, RELAY, 9_900))
}

fn relays() -> StubRelayTransport {
    StubRelayTransport::new().with_relay(RELAY, PingResponse::ready(HUB, MANAGER, WORKER))
}

fn script_profile(chain: &StubWalletProvider, config: &GaslessConfig, id: u64, handle: &str) {
    chain.set_call(
        config.identity_contract,
        IIdentityRegistry::walletOfOwnerCall::SELECTOR,
        U256::from(id).abi_encode(),
    );
    chain.set_call(
        config.identity_contract,
        IIdentityRegistry::profilesCall::SELECTOR,
        (
            U256::from(id),
            USER,
            U256::from(config.platform_id),
            handle.to_string(),
            String::new(),
        )
            .abi_encode_params(),
    );
}

async fn session(config: &GaslessConfig, chain: &StubWalletProvider, relays: &StubRelayTransport) -> IdentitySession {
    let provider: Arc<dyn WalletProvider> = Arc::new(chain.clone());
    IdentitySession::init(config, Some(provider), Arc::new(relays.clone())).await
}

#[tokio::test]
async fn profile_is_read_through_the_channel() {
    let config = config();
    let chain = chain(&config);
    script_profile(&chain, &config, 7, "alice");
    let session = session(&config, &chain, &relays()).await;

    assert_eq!(*session.channel_status(), ChannelStatus::Ready);
    session.set_address(Some(WalletAddress(USER))).await.unwrap();
    assert_eq!(
        session.view().profile,
        Some(Profile {
            id: IdentityToken(7),
            handle: "alice".to_string()
        })
    );
}

#[tokio::test]
async fn zero_token_skips_the_profile_read() {
    let config = config();
    let chain = chain(&config);
    let session = session(&config, &chain, &relays()).await;

    session.set_address(Some(WalletAddress(USER))).await.unwrap();
    assert_eq!(session.view().profile, None);
    let profile_reads = chain
        .requests()
        .iter()
        .filter(|(method, params)| {
            method == "eth_call"
                && params[0]["data"]
                    .as_str()
                    .is_some_and(|data| data.starts_with(&format!("0x{}", hex_selector())))
        })
        .count();
    assert_eq!(profile_reads, 0);
}

fn hex_selector() -> String {
    IIdentityRegistry::profilesCall::SELECTOR
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

#[tokio::test]
async fn mint_is_relayed_and_confirmed() {
    let config = config();
    let chain = chain(&config);
    let relays = relays();
    let session = session(&config, &chain, &relays).await;
    session.set_address(Some(WalletAddress(USER))).await.unwrap();
    chain.set_receipt(true, vec![transaction_result_log(HUB, 0, "")]);
    script_profile(&chain, &config, 1, "bob");

    let outcome = session.submit("bob").await.unwrap();

    assert!(matches!(outcome, MintOutcome::Confirmed(_)));
    let relayed = relays.relayed();
    assert_eq!(relayed.len(), 1);
    let request = &relayed[0].1.relay_request.request;
    assert_eq!(request.from, USER);
    assert_eq!(request.to, config.identity_contract);
    let mint = IIdentityRegistry::mintCall::abi_decode(&request.data, true).unwrap();
    assert_eq!(mint.platformId, U256::from(1));
    assert_eq!(mint.handle, "bob");
    assert_eq!(
        session.view().profile,
        Some(Profile {
            id: IdentityToken(1),
            handle: "bob".to_string()
        })
    );
}

#[tokio::test]
async fn contract_revert_reason_reaches_the_session() {
    let config = config();
    let chain = chain(&config);
    let session = session(&config, &chain, &relays()).await;
    chain.set_receipt(true, vec![transaction_result_log(HUB, 1, "handle already taken")]);

    let outcome = session.submit("bob").await.unwrap();

    assert_eq!(outcome, MintOutcome::Failed("handle already taken".to_string()));
    let view = session.view();
    assert_eq!(view.handle_input, "bob");
    assert_eq!(view.last_error, "handle already taken");
}

#[tokio::test]
async fn relay_refusal_reaches_the_session_verbatim() {
    let config = config();
    let chain = chain(&config);
    let relays = relays();
    let session = session(&config, &chain, &relays).await;
    relays.reject(RELAY, "Paymaster balance too low");

    let outcome = session.submit("bob").await.unwrap();
    assert_eq!(
        outcome,
        MintOutcome::Failed("Paymaster balance too low".to_string())
    );
}

#[tokio::test]
async fn unavailable_relay_network_disables_minting() {
    let config = config();
    let chain = chain(&config);
    let session = session(&config, &chain, &StubRelayTransport::new()).await;

    match session.channel_status() {
        ChannelStatus::Unavailable(reason) => {
            assert_eq!(reason, "relay unavailable: no responsive relay servers")
        }
        other => panic!("unexpected: {other:?}"),
    }
    let err = session.submit("bob").await.unwrap_err();
    assert!(matches!(
        err,
        IdentityError::Precondition(PreconditionError::NoRelayChannel)
    ));
    assert_eq!(chain.request_count("eth_signTypedData_v4"), 0);
}
