//! Mint orchestration
//!
//! Drives one mint at a time through `Idle → Submitting → Confirmed | Failed`.
//! A submit while another is in flight is a no-op. Failures keep the
//! underlying message verbatim and keep the handle so the user can retry.
//! Dropping a submit before it finishes puts the orchestrator back to
//! `Idle`; whether the mint landed is learned from the next resolution.

use crate::contract::IdentityContract;
use crate::errors::{PreconditionError, Result};
use crate::types::{MintReceipt, MintRequest};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 64;

/// Mint progress as the UI shows it.
///
/// `Confirmed` and `Failed` are resting states: they stay visible until the
/// next submit (which they accept exactly like `Idle`) or a reset.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MintState {
    #[default]
    Idle,
    Submitting,
    Confirmed,
    Failed(String),
}

impl MintState {
    pub fn is_submitting(&self) -> bool {
        matches!(self, MintState::Submitting)
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            MintState::Failed(message) => Some(message),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MintOutcome {
    Confirmed(MintReceipt),
    Failed(String),
    /// Another mint was already in flight; nothing was sent.
    AlreadyInFlight,
    /// The mint finished after a reset or after a resolution had already
    /// settled it; the state was left alone.
    Superseded,
}

#[derive(Debug, Default)]
struct MintInner {
    state: MintState,
    handle_input: String,
    /// Bumped by `reset`; outcomes of older submissions are not applied
    generation: u64,
}

pub struct MintOrchestrator {
    contract: Option<Arc<dyn IdentityContract>>,
    platform_id: u64,
    inner: Mutex<MintInner>,
    events: broadcast::Sender<MintState>,
}

impl MintOrchestrator {
    pub fn new(contract: Option<Arc<dyn IdentityContract>>, platform_id: u64) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            contract,
            platform_id,
            inner: Mutex::new(MintInner::default()),
            events,
        }
    }

    pub fn state(&self) -> MintState {
        self.inner.lock().state.clone()
    }

    pub fn handle_input(&self) -> String {
        self.inner.lock().handle_input.clone()
    }

    pub fn set_handle_input(&self, handle: impl Into<String>) {
        self.inner.lock().handle_input = handle.into();
    }

    pub fn platform_id(&self) -> u64 {
        self.platform_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MintState> {
        self.events.subscribe()
    }

    /// Mint `handle` for the connected wallet.
    ///
    /// Returns `Err` only for precondition failures, which leave the state
    /// untouched. Chain and relay failures come back as
    /// [`MintOutcome::Failed`] and are also reflected in [`Self::state`].
    pub async fn submit(&self, handle: &str) -> Result<MintOutcome> {
        let Some(contract) = self.contract.clone() else {
            return Err(PreconditionError::NoRelayChannel.into());
        };
        if handle.is_empty() {
            return Err(PreconditionError::EmptyHandle.into());
        }

        let generation = {
            let mut inner = self.inner.lock();
            if inner.state.is_submitting() {
                debug!(handle, "mint already in flight; ignoring submit");
                return Ok(MintOutcome::AlreadyInFlight);
            }
            inner.state = MintState::Submitting;
            inner.handle_input = handle.to_string();
            inner.generation
        };
        self.publish(MintState::Submitting);
        info!(handle, platform_id = self.platform_id, "submitting mint");
        let mut in_flight = InFlight {
            orchestrator: self,
            generation,
            finished: false,
        };

        let request = MintRequest::new(self.platform_id, handle);
        let result = match contract.submit_mint(&request).await {
            Ok(pending) => contract.confirm(pending).await,
            Err(err) => Err(err),
        };

        let (next, outcome) = match result {
            Ok(receipt) => {
                info!(tx_hash = %receipt.tx_hash, block_number = receipt.block_number, handle, "mint confirmed");
                (MintState::Confirmed, MintOutcome::Confirmed(receipt))
            }
            Err(err) => {
                let message = err.to_string();
                warn!(handle, error = %message, "mint failed");
                (MintState::Failed(message.clone()), MintOutcome::Failed(message))
            }
        };

        in_flight.finished = true;
        {
            let mut inner = self.inner.lock();
            if inner.generation != generation {
                debug!(handle, "mint finished after being superseded; outcome not applied");
                return Ok(MintOutcome::Superseded);
            }
            if next == MintState::Confirmed {
                inner.handle_input.clear();
            }
            inner.state = next.clone();
        }
        self.publish(next);
        Ok(outcome)
    }

    /// Back to `Idle` with an empty handle; an in-flight mint's outcome is
    /// no longer applied.
    pub fn reset(&self) {
        {
            let mut inner = self.inner.lock();
            inner.generation += 1;
            inner.state = MintState::Idle;
            inner.handle_input.clear();
        }
        self.publish(MintState::Idle);
    }

    /// Settle a submission still marked in flight once the wallet is seen
    /// owning an identity. Returns whether anything changed.
    pub fn settle_owned(&self) -> bool {
        {
            let mut inner = self.inner.lock();
            if !inner.state.is_submitting() {
                return false;
            }
            inner.generation += 1;
            inner.state = MintState::Confirmed;
            inner.handle_input.clear();
        }
        info!("in-flight mint settled by resolved profile");
        self.publish(MintState::Confirmed);
        true
    }

    fn publish(&self, state: MintState) {
        // No receivers is fine
        let _ = self.events.send(state);
    }
}

/// Puts an abandoned submission back to `Idle` when its future is dropped.
struct InFlight<'a> {
    orchestrator: &'a MintOrchestrator,
    generation: u64,
    finished: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let abandoned = {
            let mut inner = self.orchestrator.inner.lock();
            let current = inner.generation == self.generation && inner.state.is_submitting();
            if current {
                inner.state = MintState::Idle;
            }
            current
        };
        if abandoned {
            warn!("mint submission abandoned before completion");
            self.orchestrator.publish(MintState::Idle);
        }
    }
}
