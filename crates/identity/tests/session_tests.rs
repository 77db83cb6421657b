//! Session behaviour over the in-memory identity registry.

use alloy_primitives::Address;
use gasless_identity::{
    ChannelStatus, GaslessConfig, IdentityError, IdentitySession, IdentityToken,
    InMemoryIdentityRegistry, MintOutcome, MintState, PreconditionError, Profile, ResolveOutcome,
    SessionEvent, WalletAddress,
};
use gasless_relay::StubRelayTransport;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

const ALICE: Address = Address::repeat_byte(0xa1);
const BOB: Address = Address::repeat_byte(0xb0);
const PLATFORM_ID: u64 = 1;

fn session_for(signer: Address) -> (Arc<InMemoryIdentityRegistry>, Arc<IdentitySession>) {
    let registry = Arc::new(InMemoryIdentityRegistry::new().with_signer(signer));
    let session = Arc::new(IdentitySession::with_contract(registry.clone(), PLATFORM_ID));
    (registry, session)
}

fn profile(id: u64, handle: &str) -> Option<Profile> {
    Some(Profile {
        id: IdentityToken(id),
        handle: handle.to_string(),
    })
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("condition reached");
}

#[tokio::test]
async fn wallet_without_identity_resolves_to_none() {
    let (registry, session) = session_for(BOB);

    let outcome = session.set_address(Some(WalletAddress(BOB))).await.unwrap();
    assert_eq!(outcome, ResolveOutcome::Applied);
    let view = session.view();
    assert_eq!(view.profile, None);
    assert_eq!(view.last_error, "");
    assert_eq!(registry.profile_reads(), 0);
}

#[tokio::test]
async fn existing_identity_is_resolved() {
    let (registry, session) = session_for(ALICE);
    registry.seed(ALICE, IdentityToken(7), "alice");

    session.set_address(Some(WalletAddress(ALICE))).await.unwrap();
    assert_eq!(session.view().profile, profile(7, "alice"));
}

#[tokio::test]
async fn confirmed_mint_refreshes_the_profile() {
    let (registry, session) = session_for(BOB);
    registry.seed(ALICE, IdentityToken(7), "alice");
    session.set_address(Some(WalletAddress(BOB))).await.unwrap();
    let mut mint_events = session.subscribe_mint();

    let outcome = session.submit("bob").await.unwrap();

    assert!(matches!(outcome, MintOutcome::Confirmed(_)));
    assert_eq!(mint_events.recv().await.unwrap(), MintState::Submitting);
    assert_eq!(mint_events.recv().await.unwrap(), MintState::Confirmed);
    let view = session.view();
    assert_eq!(view.mint_state, MintState::Confirmed);
    assert_eq!(view.profile, profile(8, "bob"));
    assert_eq!(view.handle_input, "");
    assert_eq!(view.last_error, "");
}

#[tokio::test]
async fn reverted_mint_keeps_handle_and_reason() {
    let (registry, session) = session_for(BOB);
    registry.seed(ALICE, IdentityToken(7), "bob");
    session.set_address(Some(WalletAddress(BOB))).await.unwrap();
    let mut mint_events = session.subscribe_mint();

    let outcome = session.submit("bob").await.unwrap();

    assert_eq!(outcome, MintOutcome::Failed("handle already taken".to_string()));
    assert_eq!(mint_events.recv().await.unwrap(), MintState::Submitting);
    assert_eq!(
        mint_events.recv().await.unwrap(),
        MintState::Failed("handle already taken".to_string())
    );
    let view = session.view();
    assert_eq!(view.handle_input, "bob");
    assert_eq!(view.last_error, "handle already taken");
    assert_eq!(view.profile, None);
}

#[tokio::test]
async fn relay_refusal_message_is_kept_verbatim() {
    let (registry, session) = session_for(BOB);
    registry.fail_next_submit("Paymaster balance too low");

    let outcome = session.submit("bob").await.unwrap();
    assert_eq!(
        outcome,
        MintOutcome::Failed("Paymaster balance too low".to_string())
    );
    assert_eq!(
        session.view().mint_state,
        MintState::Failed("Paymaster balance too low".to_string())
    );
}

#[tokio::test]
async fn session_without_provider_rejects_submissions() {
    let transport = StubRelayTransport::new();
    let session =
        IdentitySession::init(&GaslessConfig::default(), None, Arc::new(transport.clone())).await;

    assert_eq!(*session.channel_status(), ChannelStatus::NoProvider);
    let err = session.submit("bob").await.unwrap_err();
    assert!(matches!(
        err,
        IdentityError::Precondition(PreconditionError::NoRelayChannel)
    ));
    assert_eq!(session.view().mint_state, MintState::Idle);
    assert!(transport.pings().is_empty());

    let outcome = session.set_address(Some(WalletAddress(BOB))).await.unwrap();
    assert_eq!(outcome, ResolveOutcome::NoChannel);
}

#[tokio::test]
async fn empty_handle_leaves_state_untouched() {
    let (registry, session) = session_for(BOB);

    let err = session.submit("").await.unwrap_err();
    assert!(err.is_precondition());
    assert_eq!(session.view().mint_state, MintState::Idle);
    assert_eq!(registry.submit_calls(), 0);
}

#[tokio::test]
async fn second_submit_while_in_flight_is_ignored() {
    let (registry, session) = session_for(BOB);
    let gate = registry.pause_confirmations();
    let mut mint_events = session.subscribe_mint();

    let first = tokio::spawn({
        let session = session.clone();
        async move { session.submit("bob").await }
    });
    assert_eq!(mint_events.recv().await.unwrap(), MintState::Submitting);

    let second = session.submit("carol").await.unwrap();
    assert_eq!(second, MintOutcome::AlreadyInFlight);
    assert_eq!(session.view().handle_input, "bob");

    gate.notify_one();
    let first = first.await.unwrap().unwrap();
    assert!(matches!(first, MintOutcome::Confirmed(_)));
    assert_eq!(registry.submit_calls(), 1);
    assert_eq!(registry.token_of(BOB), IdentityToken(1));
}

#[tokio::test]
async fn stale_resolution_is_discarded() {
    let (registry, session) = session_for(BOB);
    registry.seed(ALICE, IdentityToken(7), "alice");
    registry.seed(BOB, IdentityToken(8), "bob");
    let gate = registry.pause_reads(ALICE);

    let slow = tokio::spawn({
        let session = session.clone();
        async move { session.set_address(Some(WalletAddress(ALICE))).await }
    });
    wait_until(|| registry.owner_reads() == 1).await;

    let fast = session.set_address(Some(WalletAddress(BOB))).await.unwrap();
    assert_eq!(fast, ResolveOutcome::Applied);

    gate.notify_one();
    assert_eq!(slow.await.unwrap().unwrap(), ResolveOutcome::Stale);
    let view = session.view();
    assert_eq!(view.address, Some(WalletAddress(BOB)));
    assert_eq!(view.profile, profile(8, "bob"));
}

#[tokio::test]
async fn read_failure_is_reported_then_cleared() {
    let (registry, session) = session_for(BOB);
    let mut events = session.subscribe();
    registry.fail_reads(Some("header not found".to_string()));

    let err = session.set_address(Some(WalletAddress(BOB))).await.unwrap_err();
    assert_eq!(err.to_string(), "header not found");
    assert_eq!(session.view().last_error, "header not found");
    assert_eq!(
        events.recv().await.unwrap(),
        SessionEvent::AddressChanged(Some(WalletAddress(BOB)))
    );
    assert_eq!(
        events.recv().await.unwrap(),
        SessionEvent::Error("header not found".to_string())
    );

    registry.fail_reads(None);
    assert_eq!(session.refresh().await.unwrap(), ResolveOutcome::Applied);
    assert_eq!(session.view().last_error, "");
}

#[tokio::test]
async fn teardown_forgets_the_wallet() {
    let (registry, session) = session_for(BOB);
    registry.seed(BOB, IdentityToken(3), "bob");
    session.set_address(Some(WalletAddress(BOB))).await.unwrap();
    session.set_handle_input("draft");

    session.teardown();

    let view = session.view();
    assert_eq!(view.address, None);
    assert_eq!(view.profile, None);
    assert_eq!(view.mint_state, MintState::Idle);
    assert_eq!(view.handle_input, "");
    assert_eq!(session.refresh().await.unwrap(), ResolveOutcome::NoAddress);
}

#[tokio::test]
async fn abandoned_wait_does_not_block_later_submissions() {
    let (registry, session) = session_for(BOB);
    session.set_address(Some(WalletAddress(BOB))).await.unwrap();
    let _gate = registry.pause_confirmations();

    let abandoned = timeout(Duration::from_millis(50), session.submit("bob")).await;
    assert!(abandoned.is_err());
    assert_eq!(session.view().mint_state, MintState::Idle);
    assert_eq!(session.view().handle_input, "bob");

    // The abandoned mint landed on chain after all
    registry.seed(BOB, IdentityToken(1), "bob");
    assert_eq!(session.refresh().await.unwrap(), ResolveOutcome::Applied);
    assert_eq!(session.view().profile, profile(1, "bob"));

    let next = session.submit("bob2").await.unwrap();
    assert_eq!(
        next,
        MintOutcome::Failed("owner already has an identity".to_string())
    );
}

#[tokio::test]
async fn resolved_profile_settles_a_mint_still_in_flight() {
    let (registry, session) = session_for(BOB);
    session.set_address(Some(WalletAddress(BOB))).await.unwrap();
    let gate = registry.pause_confirmations();
    let mut mint_events = session.subscribe_mint();

    let pending = tokio::spawn({
        let session = session.clone();
        async move { session.submit("bob").await }
    });
    assert_eq!(mint_events.recv().await.unwrap(), MintState::Submitting);

    registry.seed(BOB, IdentityToken(1), "bob");
    session.refresh().await.unwrap();
    let view = session.view();
    assert_eq!(view.mint_state, MintState::Confirmed);
    assert_eq!(view.profile, profile(1, "bob"));
    assert_eq!(view.handle_input, "");

    gate.notify_one();
    assert_eq!(pending.await.unwrap().unwrap(), MintOutcome::Superseded);
    let view = session.view();
    assert_eq!(view.mint_state, MintState::Confirmed);
    assert_eq!(view.last_error, "");
}
