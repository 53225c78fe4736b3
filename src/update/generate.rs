use tracing::debug;

use crate::{
    abiencode::types::{Address, Hash, U256},
    chain::ChainReader,
    channel::{
        sign_channel_state, transfer_id, Balance, ChannelUpdate, CreateDetails, CreateParams,
        DepositDetails, DepositParams, FullChannelState, FullTransferState, ResolveDetails,
        ResolveParams, SetupDetails, SetupParams, UpdateDetails, UpdateParams, ALICE, BOB,
    },
    error::{CreateUpdateError, CreateUpdateReason, UpdateError},
    merkle::MerkleTree,
    sig::{identifier_to_address, Identifier, Signer},
};

use super::{apply_update, transfer_from_details, GeneratedUpdate};

type Result<T> = core::result::Result<T, CreateUpdateError>;

/// Builds the update described by `params` on top of `previous`, applies it
/// and signs the result if `initiator` is the local signer.
///
/// Assumes the params passed validation.
pub async fn generate_update(
    signer: &Signer,
    chain: &dyn ChainReader,
    params: &UpdateParams,
    previous: Option<&FullChannelState>,
    active_transfers: &[FullTransferState],
    initiator: &Identifier,
) -> core::result::Result<GeneratedUpdate, UpdateError> {
    let err = |reason| CreateUpdateError::new(reason, params).with_state(previous);

    let (update, final_transfer_balance) = match params {
        UpdateParams::Setup(p) => (generate_setup(params, p, initiator)?, None),
        UpdateParams::Deposit(p) => {
            let state = previous.ok_or_else(|| err(CreateUpdateReason::ChannelNotFound))?;
            (generate_deposit(chain, params, p, state, initiator).await?, None)
        }
        UpdateParams::Create(p) => {
            let state = previous.ok_or_else(|| err(CreateUpdateReason::ChannelNotFound))?;
            (
                generate_create(params, p, state, active_transfers, initiator)?,
                None,
            )
        }
        UpdateParams::Resolve(p) => {
            let state = previous.ok_or_else(|| err(CreateUpdateReason::ChannelNotFound))?;
            let (update, final_balance) =
                generate_resolve(chain, params, p, state, active_transfers, initiator).await?;
            (update, Some(final_balance))
        }
    };

    let mut applied = apply_update(&update, previous, active_transfers, final_transfer_balance)?;
    let mut update = update;

    if *initiator == signer.identifier() {
        let signature = sign_channel_state(signer, &applied.channel)
            .map_err(|e| err(CreateUpdateReason::CouldNotSign).with_context(e.to_string()))?;
        if signer.address() == applied.channel.alice {
            update.alice_signature = Some(signature);
        } else {
            update.bob_signature = Some(signature);
        }
        applied.channel.latest_update = update.clone();
    }

    debug!(
        channel = %update.channel_address,
        nonce = update.nonce,
        update_type = %update.update_type(),
        "generated update"
    );
    Ok(GeneratedUpdate { update, applied })
}

fn counterparty_of(state: &FullChannelState, initiator: &Identifier) -> Option<Identifier> {
    match state.participant_index(initiator)? {
        ALICE => Some(state.bob_identifier),
        _ => Some(state.alice_identifier),
    }
}

/// The initiator of a setup becomes alice.
fn generate_setup(
    params: &UpdateParams,
    p: &SetupParams,
    initiator: &Identifier,
) -> Result<ChannelUpdate> {
    let address_of = |identifier: &Identifier| {
        identifier_to_address(identifier).map_err(|e| {
            CreateUpdateError::new(CreateUpdateReason::UnknownParticipant, params)
                .with_context(e.to_string())
        })
    };
    let alice = address_of(initiator)?;
    let bob = address_of(&p.counterparty_identifier)?;

    Ok(ChannelUpdate {
        channel_address: p.channel_address,
        from_identifier: *initiator,
        to_identifier: p.counterparty_identifier,
        nonce: 1,
        asset_id: Address::ZERO,
        balance: Balance::zero([alice, bob]),
        details: UpdateDetails::Setup(SetupDetails {
            timeout: p.timeout,
            network_context: p.network_context,
        }),
        alice_signature: None,
        bob_signature: None,
    })
}

/// Reconciles the on-chain balance with the channel: a deposit nonce above
/// the recorded one is alice's deposit, everything else that is not yet
/// accounted for belongs to bob.
async fn generate_deposit(
    chain: &dyn ChainReader,
    params: &UpdateParams,
    p: &DepositParams,
    state: &FullChannelState,
    initiator: &Identifier,
) -> Result<ChannelUpdate> {
    let err = |reason| CreateUpdateError::new(reason, params).with_state(Some(state));
    let to = counterparty_of(state, initiator)
        .ok_or_else(|| err(CreateUpdateReason::UnknownParticipant))?;
    let chain_id = state.network_context.chain_id;

    let (balance, locked, recorded_nonce) = match state.asset_index(&p.asset_id) {
        Some(idx) => (
            state.balances[idx],
            state.locked_balance[idx],
            state.latest_deposit_nonces[idx],
        ),
        None => (Balance::zero(state.participants()), U256::zero(), 0),
    };

    let onchain = chain
        .get_channel_onchain_balance(state.channel_address, chain_id, p.asset_id)
        .await
        .map_err(|e| err(CreateUpdateReason::ChainServiceFailure).with_context(e.to_string()))?;
    let latest = chain
        .get_latest_deposit_by_asset_id(state.channel_address, chain_id, p.asset_id, recorded_nonce)
        .await
        .map_err(|e| err(CreateUpdateReason::ChainServiceFailure).with_context(e.to_string()))?;

    let (alice_deposit, latest_deposit_nonce) = if latest.nonce > recorded_nonce {
        (latest.amount, latest.nonce)
    } else {
        (U256::zero(), recorded_nonce)
    };

    let accounted = balance
        .total()
        .and_then(|total| total.checked_add(locked))
        .and_then(|total| total.checked_add(alice_deposit))
        .ok_or_else(|| err(CreateUpdateReason::BalanceOverflow))?;
    let bob_deposit = onchain.checked_sub(accounted).ok_or_else(|| {
        err(CreateUpdateReason::FailedToReconcileDeposit)
            .with_context(format!("onchain {onchain} below accounted {accounted}"))
    })?;

    let mut balance = balance;
    balance.amount[ALICE] = balance.amount[ALICE]
        .checked_add(alice_deposit)
        .ok_or_else(|| err(CreateUpdateReason::BalanceOverflow))?;
    balance.amount[BOB] = balance.amount[BOB]
        .checked_add(bob_deposit)
        .ok_or_else(|| err(CreateUpdateReason::BalanceOverflow))?;

    Ok(ChannelUpdate {
        channel_address: state.channel_address,
        from_identifier: *initiator,
        to_identifier: to,
        nonce: state.nonce + 1,
        asset_id: p.asset_id,
        balance,
        details: UpdateDetails::Deposit(DepositDetails {
            latest_deposit_nonce,
        }),
        alice_signature: None,
        bob_signature: None,
    })
}

/// Create details for `p` with empty merkle fields.
pub(crate) fn create_details_from_params(
    p: &CreateParams,
    transfer_id: Hash,
) -> CreateDetails {
    CreateDetails {
        transfer_id,
        balance: p.balance,
        transfer_definition: p.transfer_definition,
        transfer_timeout: p.timeout,
        transfer_initial_state: p.transfer_initial_state.clone(),
        transfer_encodings: p.encodings.clone(),
        merkle_proof_data: vec![],
        merkle_root: Hash::ZERO,
        meta: p.meta.clone(),
    }
}

fn generate_create(
    params: &UpdateParams,
    p: &CreateParams,
    state: &FullChannelState,
    active_transfers: &[FullTransferState],
    initiator: &Identifier,
) -> Result<ChannelUpdate> {
    let err = |reason| CreateUpdateError::new(reason, params).with_state(Some(state));
    let nonce = state.nonce + 1;
    let initiator_idx = state
        .participant_index(initiator)
        .ok_or_else(|| err(CreateUpdateReason::UnknownParticipant))?;
    let responder_idx = if initiator_idx == ALICE { BOB } else { ALICE };
    let identifiers = state.identifiers();

    let id = transfer_id(state.channel_address, nonce, p.transfer_definition, p.timeout)
        .map_err(|e| err(CreateUpdateReason::EncodingFailure).with_context(e.to_string()))?;
    let mut details = create_details_from_params(p, id);

    let transfer = transfer_from_details(state, initiator, nonce, p.asset_id, &details)
        .ok_or_else(|| err(CreateUpdateReason::UnknownParticipant))?;
    let leaf = transfer
        .core()
        .leaf()
        .map_err(|e| err(CreateUpdateReason::EncodingFailure).with_context(e.to_string()))?;
    let mut leaves = active_transfers
        .iter()
        .map(|t| t.core().leaf())
        .collect::<core::result::Result<Vec<_>, _>>()
        .map_err(|e| err(CreateUpdateReason::EncodingFailure).with_context(e.to_string()))?;
    leaves.push(leaf);
    let tree = MerkleTree::new(leaves);
    details.merkle_proof_data = tree.proof(&leaf).unwrap_or_default();
    details.merkle_root = tree.root();

    let mut balance = *state
        .balance_of(&p.asset_id)
        .ok_or_else(|| err(CreateUpdateReason::InsufficientFunds).with_context("asset not found"))?;
    let debits = [
        (initiator_idx, p.balance.amount[0]),
        (responder_idx, p.balance.amount[1]),
    ];
    for (channel_idx, amount) in debits {
        balance.amount[channel_idx] = balance.amount[channel_idx]
            .checked_sub(amount)
            .ok_or_else(|| err(CreateUpdateReason::InsufficientFunds))?;
    }

    Ok(ChannelUpdate {
        channel_address: state.channel_address,
        from_identifier: *initiator,
        to_identifier: identifiers[responder_idx],
        nonce,
        asset_id: p.asset_id,
        balance,
        details: UpdateDetails::Create(details),
        alice_signature: None,
        bob_signature: None,
    })
}

/// Asks the transfer definition for the final balance and releases it into
/// the channel. The definition must pay out exactly the locked amount to the
/// transfer's participants.
async fn generate_resolve(
    chain: &dyn ChainReader,
    params: &UpdateParams,
    p: &ResolveParams,
    state: &FullChannelState,
    active_transfers: &[FullTransferState],
    initiator: &Identifier,
) -> Result<(ChannelUpdate, Balance)> {
    let err = |reason| CreateUpdateError::new(reason, params).with_state(Some(state));
    let to = counterparty_of(state, initiator)
        .ok_or_else(|| err(CreateUpdateReason::UnknownParticipant))?;
    let transfer = active_transfers
        .iter()
        .find(|t| t.transfer_id == p.transfer_id)
        .ok_or_else(|| err(CreateUpdateReason::TransferNotActive))?;

    let final_balance = chain
        .resolve(transfer, &p.transfer_resolver, state.network_context.chain_id)
        .await
        .map_err(|e| err(CreateUpdateReason::ChainServiceFailure).with_context(e.to_string()))?;

    let initial_total = transfer
        .initial_balance
        .total()
        .ok_or_else(|| err(CreateUpdateReason::BalanceOverflow))?;
    let final_total = final_balance
        .total()
        .ok_or_else(|| err(CreateUpdateReason::BalanceOverflow))?;
    if final_total != initial_total || final_balance.to != transfer.initial_balance.to {
        return Err(err(CreateUpdateReason::InvalidFinalBalance)
            .with_context(format!("paid out {final_total} of {initial_total}")));
    }

    let mut balance = *state.balance_of(&transfer.asset_id).ok_or_else(|| {
        err(CreateUpdateReason::TransferNotActive).with_context("transfer asset not in channel")
    })?;
    for (to_addr, amount) in final_balance.to.iter().zip(final_balance.amount) {
        if let Some(idx) = state.participant_by_address(to_addr) {
            balance.amount[idx] = balance.amount[idx]
                .checked_add(amount)
                .ok_or_else(|| err(CreateUpdateReason::BalanceOverflow))?;
        }
    }

    let remaining = active_transfers
        .iter()
        .filter(|t| t.transfer_id != p.transfer_id)
        .map(FullTransferState::core)
        .collect::<Vec<_>>();
    let tree = MerkleTree::from_transfers(&remaining)
        .map_err(|e| err(CreateUpdateReason::EncodingFailure).with_context(e.to_string()))?;

    let update = ChannelUpdate {
        channel_address: state.channel_address,
        from_identifier: *initiator,
        to_identifier: to,
        nonce: state.nonce + 1,
        asset_id: transfer.asset_id,
        balance,
        details: UpdateDetails::Resolve(ResolveDetails {
            transfer_id: p.transfer_id,
            transfer_definition: transfer.transfer_definition,
            transfer_resolver: p.transfer_resolver.clone(),
            merkle_root: tree.root(),
            meta: p.meta.clone(),
        }),
        alice_signature: None,
        bob_signature: None,
    };
    Ok((update, final_balance))
}
