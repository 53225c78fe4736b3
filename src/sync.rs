//! The update protocol between the two channel participants.
//!
//! What happens with a received update depends only on how its nonce `n`
//! relates to our stored nonce `k`:
//!
//! - `n <= k`: stale, rejected with our latest state attached.
//! - `n == k + 1`: validated and applied.
//! - `n == k + 2`: the sender's previous update (`k + 1`) is applied first,
//!   then the received one.
//! - `n >= k + 3`: can't be bridged, the channel must be restored.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    chain::ChainReader,
    channel::{
        sign_channel_state, validate_channel_signatures, ChannelCommitment, ChannelUpdate,
        FullChannelState, FullTransferState, SignatureRequirement, UpdateParams,
    },
    config::Config,
    error::{
        InboundChannelUpdateError, InboundReason, OutboundChannelUpdateError, OutboundReason,
        UpdateError,
    },
    policy::ExternalValidation,
    sig::Signer,
    store::{Store, StoreError},
    update::GeneratedUpdate,
    validate::Validator,
    wire::{Messaging, MessagingError},
};

/// Everything a participant needs to run the protocol.
#[derive(Debug, Clone)]
pub struct SyncContext {
    pub signer: Arc<Signer>,
    pub store: Arc<dyn Store>,
    pub messaging: Arc<dyn Messaging>,
    pub chain: Arc<dyn ChainReader>,
    pub external: Arc<dyn ExternalValidation>,
    pub config: Arc<Config>,
}

impl SyncContext {
    pub fn validator(&self) -> Validator<'_> {
        Validator {
            signer: &self.signer,
            chain: self.chain.as_ref(),
            external: self.external.as_ref(),
            config: &self.config,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundOutcome {
    /// Our update was countersigned and saved.
    Applied {
        update: ChannelUpdate,
        channel: FullChannelState,
        active_transfers: Vec<FullTransferState>,
        transfer: Option<FullTransferState>,
    },
    /// We were behind and caught up with the counterparty. The params were
    /// not applied, the caller may retry them on top of `channel`.
    Synced {
        channel: FullChannelState,
        active_transfers: Vec<FullTransferState>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundOutcome {
    /// The received update carrying both signatures.
    pub update: ChannelUpdate,
    pub channel: FullChannelState,
    pub active_transfers: Vec<FullTransferState>,
    /// Transfer created or resolved by the update.
    pub transfer: Option<FullTransferState>,
    /// Our state before the update, or before the catch-up if one was
    /// needed.
    pub previous_state: Option<FullChannelState>,
}

/// Proposes `params` to the counterparty and waits for the countersigned
/// update.
///
/// Nothing is persisted unless the round trip completes, `cancel` was not
/// triggered in the meantime and the stored state is still the one the update
/// was built on.
pub async fn outbound(
    ctx: &SyncContext,
    params: &UpdateParams,
    cancel: &CancellationToken,
) -> Result<OutboundOutcome, OutboundChannelUpdateError> {
    let channel_address = params.channel_address();
    let err = |reason| OutboundChannelUpdateError::new(reason, params);

    let previous = ctx
        .store
        .get_channel_state(channel_address)
        .await
        .map_err(|e| err(OutboundReason::StoreFailure).with_context(e.to_string()))?;
    let active = ctx
        .store
        .get_active_transfers(channel_address)
        .await
        .map_err(|e| {
            err(OutboundReason::StoreFailure)
                .with_state(previous.as_ref())
                .with_context(e.to_string())
        })?;

    let generated = ctx
        .validator()
        .validate_params_and_apply_update(
            params,
            previous.as_ref(),
            &active,
            &ctx.signer.identifier(),
        )
        .await
        .map_err(|e| {
            let reason = match e {
                UpdateError::Validation(_) => OutboundReason::ValidationFailed,
                UpdateError::Create(_) | UpdateError::Apply(_) => OutboundReason::GenerationFailed,
            };
            err(reason)
                .with_state(previous.as_ref())
                .with_context(e.to_string())
        })?;
    let GeneratedUpdate { update, applied } = generated;

    debug!(
        channel = %channel_address,
        nonce = update.nonce,
        update_type = %update.update_type(),
        "sending update"
    );
    let response = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            return Err(err(OutboundReason::Cancelled).with_state(previous.as_ref()));
        }
        response = ctx.messaging.send(
            update.to_identifier,
            update.clone(),
            previous.as_ref().map(|s| s.latest_update.clone()),
            ctx.config.message_timeout(),
        ) => response,
    };

    let response = match response {
        Ok(response) => response,
        Err(MessagingError::Timeout) => {
            warn!(channel = %channel_address, nonce = update.nonce, "counterparty offline");
            return Err(err(OutboundReason::CounterpartyOffline).with_state(previous.as_ref()));
        }
        Err(MessagingError::Transport(e)) => {
            return Err(err(OutboundReason::CounterpartyFailure)
                .with_state(previous.as_ref())
                .with_context(e));
        }
        Err(MessagingError::Rejected(rejection)) => {
            return match rejection.reason {
                InboundReason::StaleUpdate => {
                    sync_from_rejection(ctx, params, previous, active, &rejection, cancel).await
                }
                InboundReason::RestoreNeeded => Err(err(OutboundReason::RestoreNeeded)
                    .with_state(previous.as_ref())
                    .with_context(rejection.to_string())),
                _ => Err(err(OutboundReason::CounterpartyFailure)
                    .with_state(previous.as_ref())
                    .with_context(rejection.to_string())),
            };
        }
    };

    if response.unsigned() != update.unsigned() {
        return Err(err(OutboundReason::InvalidResponse).with_state(previous.as_ref()));
    }
    validate_channel_signatures(
        &applied.channel,
        response.alice_signature,
        response.bob_signature,
        SignatureRequirement::Both,
    )
    .map_err(|e| {
        err(OutboundReason::BadSignatures)
            .with_state(previous.as_ref())
            .with_context(e.to_string())
    })?;

    let mut channel = applied.channel;
    channel.latest_update = response.clone();

    commit(ctx, &channel, applied.transfer.as_ref(), cancel)
        .await
        .map_err(|e| match e {
            CommitError::Cancelled => {
                err(OutboundReason::Cancelled).with_state(previous.as_ref())
            }
            CommitError::Stale(stored) => err(OutboundReason::Cancelled)
                .with_state(stored.as_ref())
                .with_context(format!(
                    "channel advanced to nonce {}",
                    stored.as_ref().map_or(0, |s| s.nonce)
                )),
            CommitError::Store(e) => err(OutboundReason::StoreFailure)
                .with_state(previous.as_ref())
                .with_context(e.to_string()),
        })?;

    info!(
        channel = %channel_address,
        nonce = channel.nonce,
        update_type = %response.update_type(),
        "update applied"
    );
    Ok(OutboundOutcome::Applied {
        update: response,
        channel,
        active_transfers: applied.active_transfers,
        transfer: applied.transfer,
    })
}

/// Catches up with the state the counterparty attached to its stale
/// rejection.
async fn sync_from_rejection(
    ctx: &SyncContext,
    params: &UpdateParams,
    previous: Option<FullChannelState>,
    active: Vec<FullTransferState>,
    rejection: &InboundChannelUpdateError,
    cancel: &CancellationToken,
) -> Result<OutboundOutcome, OutboundChannelUpdateError> {
    let err = |reason| OutboundChannelUpdateError::new(reason, params).with_state(previous.as_ref());
    let our_nonce = previous.as_ref().map_or(0, |s| s.nonce);

    let theirs = match rejection.state.as_deref() {
        Some(state) if state.nonce > our_nonce => state,
        Some(state) => {
            return Err(err(OutboundReason::SyncFailure).with_context(format!(
                "counterparty at nonce {}, we are at {our_nonce}",
                state.nonce
            )));
        }
        None => {
            return Err(err(OutboundReason::SyncFailure)
                .with_context("stale rejection without counterparty state"));
        }
    };

    info!(
        channel = %params.channel_address(),
        ours = our_nonce,
        theirs = theirs.nonce,
        "syncing with counterparty"
    );
    let latest = &theirs.latest_update;
    let synced = apply_received(ctx, latest, None, previous.clone(), active, cancel)
        .await
        .map_err(|e| {
            let reason = match e.reason {
                InboundReason::RestoreNeeded => OutboundReason::RestoreNeeded,
                InboundReason::Cancelled => OutboundReason::Cancelled,
                _ => OutboundReason::SyncFailure,
            };
            err(reason).with_context(e.to_string())
        })?;
    if !synced.update.is_double_signed() {
        return Err(err(OutboundReason::SyncFailure)
            .with_context("counterparty state is not double signed"));
    }

    commit(ctx, &synced.channel, synced.transfer.as_ref(), cancel)
        .await
        .map_err(|e| match e {
            CommitError::Cancelled => err(OutboundReason::Cancelled),
            CommitError::Stale(stored) => err(OutboundReason::SyncFailure)
                .with_context(format!(
                    "channel advanced to nonce {} while syncing",
                    stored.as_ref().map_or(0, |s| s.nonce)
                )),
            CommitError::Store(e) => err(OutboundReason::StoreFailure).with_context(e.to_string()),
        })?;

    Ok(OutboundOutcome::Synced {
        channel: synced.channel,
        active_transfers: synced.active_transfers,
    })
}

/// Handles an update proposed by the counterparty. `previous_update` is the
/// sender's latest update, used to catch up if we are one update behind.
///
/// Returns the countersigned update, which goes back to the sender.
pub async fn inbound(
    ctx: &SyncContext,
    update: &ChannelUpdate,
    previous_update: Option<&ChannelUpdate>,
    cancel: &CancellationToken,
) -> Result<InboundOutcome, InboundChannelUpdateError> {
    let err = |reason| InboundChannelUpdateError::new(reason, update);

    let state = ctx
        .store
        .get_channel_state(update.channel_address)
        .await
        .map_err(|e| err(InboundReason::StoreFailure).with_context(e.to_string()))?;
    let active = ctx
        .store
        .get_active_transfers(update.channel_address)
        .await
        .map_err(|e| {
            err(InboundReason::StoreFailure)
                .with_state(state.as_ref())
                .with_context(e.to_string())
        })?;

    let mut outcome = apply_received(ctx, update, previous_update, state, active, cancel).await?;
    if cancel.is_cancelled() {
        return Err(err(InboundReason::Cancelled).with_state(outcome.previous_state.as_ref()));
    }
    if !outcome.update.is_double_signed() {
        let signature = sign_channel_state(&ctx.signer, &outcome.channel).map_err(|e| {
            err(InboundReason::CouldNotSign)
                .with_state(outcome.previous_state.as_ref())
                .with_context(e.to_string())
        })?;
        if ctx.signer.address() == outcome.channel.alice {
            outcome.update.alice_signature = Some(signature);
        } else {
            outcome.update.bob_signature = Some(signature);
        }
        outcome.channel.latest_update = outcome.update.clone();
    }

    commit(ctx, &outcome.channel, outcome.transfer.as_ref(), cancel)
        .await
        .map_err(|e| match e {
            CommitError::Cancelled => {
                err(InboundReason::Cancelled).with_state(outcome.previous_state.as_ref())
            }
            CommitError::Stale(stored) => err(InboundReason::StaleUpdate).with_state(stored.as_ref()),
            CommitError::Store(e) => err(InboundReason::StoreFailure)
                .with_state(outcome.previous_state.as_ref())
                .with_context(e.to_string()),
        })?;

    info!(
        channel = %update.channel_address,
        nonce = outcome.channel.nonce,
        update_type = %update.update_type(),
        "inbound update applied"
    );
    Ok(outcome)
}

/// Applies `update` on top of `state` following the nonce table. A catch-up
/// update is committed right away, the received update is not.
async fn apply_received(
    ctx: &SyncContext,
    update: &ChannelUpdate,
    previous_update: Option<&ChannelUpdate>,
    state: Option<FullChannelState>,
    active: Vec<FullTransferState>,
    cancel: &CancellationToken,
) -> Result<InboundOutcome, InboundChannelUpdateError> {
    let err = |reason, state: Option<&FullChannelState>| {
        InboundChannelUpdateError::new(reason, update).with_state(state)
    };
    let k = state.as_ref().map_or(0, |s| s.nonce);
    let n = update.nonce;

    let (base, base_active) = if n <= k {
        debug!(channel = %update.channel_address, n, k, "stale update");
        return Err(err(InboundReason::StaleUpdate, state.as_ref()));
    } else if n == k + 1 {
        (state.clone(), active)
    } else if n == k + 2 {
        let previous_update = match previous_update {
            Some(previous_update) if previous_update.nonce == k + 1 => previous_update,
            _ => {
                warn!(channel = %update.channel_address, n, k, "missing update to catch up");
                return Err(err(InboundReason::RestoreNeeded, state.as_ref())
                    .with_context(format!("update {} required", k + 1)));
            }
        };
        debug!(channel = %update.channel_address, n, k, "catching up");
        let caught_up = ctx
            .validator()
            .validate_and_apply_inbound_update(previous_update, state.as_ref(), &active)
            .await?;
        if !caught_up.update.is_double_signed() {
            return Err(err(InboundReason::BadSignatures, state.as_ref())
                .with_context("catch-up update is not double signed"));
        }
        commit(
            ctx,
            &caught_up.applied.channel,
            caught_up.applied.transfer.as_ref(),
            cancel,
        )
        .await
        .map_err(|e| match e {
            CommitError::Cancelled => err(InboundReason::Cancelled, state.as_ref()),
            CommitError::Stale(stored) => err(InboundReason::StaleUpdate, stored.as_ref()),
            CommitError::Store(e) => {
                err(InboundReason::StoreFailure, state.as_ref()).with_context(e.to_string())
            }
        })?;
        (
            Some(caught_up.applied.channel),
            caught_up.applied.active_transfers,
        )
    } else {
        warn!(channel = %update.channel_address, n, k, "restore needed");
        return Err(err(InboundReason::RestoreNeeded, state.as_ref()));
    };

    let generated = ctx
        .validator()
        .validate_and_apply_inbound_update(update, base.as_ref(), &base_active)
        .await?;
    Ok(InboundOutcome {
        update: generated.update,
        channel: generated.applied.channel,
        active_transfers: generated.applied.active_transfers,
        transfer: generated.applied.transfer,
        previous_state: state,
    })
}

enum CommitError {
    Cancelled,
    /// The stored state is not the one right before the update.
    Stale(Option<FullChannelState>),
    Store(StoreError),
}

/// Persists `channel` unless `cancel` was triggered or the stored state moved
/// on. Every write of the protocol goes through here.
async fn commit(
    ctx: &SyncContext,
    channel: &FullChannelState,
    transfer: Option<&FullTransferState>,
    cancel: &CancellationToken,
) -> Result<(), CommitError> {
    if cancel.is_cancelled() {
        return Err(CommitError::Cancelled);
    }
    let stored = ctx
        .store
        .get_channel_state(channel.channel_address)
        .await
        .map_err(CommitError::Store)?;
    if stored.as_ref().map_or(0, |s| s.nonce) + 1 != channel.nonce {
        return Err(CommitError::Stale(stored));
    }
    ctx.store
        .save_channel_state(channel, &ChannelCommitment::from_state(channel), transfer)
        .await
        .map_err(CommitError::Store)
}
