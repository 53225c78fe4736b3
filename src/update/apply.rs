use crate::{
    abiencode::types::{Hash, U256},
    channel::{Balance, ChannelUpdate, FullChannelState, FullTransferState, UpdateDetails},
    error::{ApplyUpdateError, ApplyUpdateReason},
};

use super::{transfer_from_details, AppliedUpdate};

/// Computes the state after `update`.
///
/// Pure: the update is expected to be validated already, only conditions
/// that make the transition impossible are reported. `final_transfer_balance`
/// is required for resolve updates.
pub fn apply_update(
    update: &ChannelUpdate,
    previous: Option<&FullChannelState>,
    active_transfers: &[FullTransferState],
    final_transfer_balance: Option<Balance>,
) -> Result<AppliedUpdate, ApplyUpdateError> {
    let err = |reason| ApplyUpdateError::new(reason, update).with_state(previous);

    if let UpdateDetails::Setup(details) = &update.details {
        if previous.is_some() {
            return Err(err(ApplyUpdateReason::ChannelAlreadySetup));
        }
        let channel = FullChannelState {
            channel_address: update.channel_address,
            alice: update.balance.to[0],
            bob: update.balance.to[1],
            alice_identifier: update.from_identifier,
            bob_identifier: update.to_identifier,
            network_context: details.network_context,
            asset_ids: vec![],
            balances: vec![],
            locked_balance: vec![],
            latest_deposit_nonces: vec![],
            nonce: update.nonce,
            merkle_root: Hash::ZERO,
            timeout: details.timeout,
            latest_update: update.clone(),
        };
        return Ok(AppliedUpdate {
            channel,
            active_transfers: vec![],
            transfer: None,
        });
    }

    let previous = previous.ok_or_else(|| err(ApplyUpdateReason::ChannelNotFound))?;
    let mut channel = previous.clone();
    let mut active = active_transfers.to_vec();

    let idx = match channel.asset_index(&update.asset_id) {
        Some(idx) => idx,
        None => {
            channel.asset_ids.push(update.asset_id);
            channel.balances.push(Balance::zero(channel.participants()));
            channel.locked_balance.push(U256::zero());
            channel.latest_deposit_nonces.push(0);
            channel.asset_ids.len() - 1
        }
    };
    if !channel.has_consistent_arrays() {
        return Err(err(ApplyUpdateReason::AssetNotFound)
            .with_context("per-asset arrays differ in length"));
    }

    let transfer = match &update.details {
        UpdateDetails::Setup(_) => None,
        UpdateDetails::Deposit(details) => {
            channel.latest_deposit_nonces[idx] = details.latest_deposit_nonce;
            None
        }
        UpdateDetails::Create(details) => {
            let transfer = transfer_from_details(
                previous,
                &update.from_identifier,
                update.nonce,
                update.asset_id,
                details,
            )
            .ok_or_else(|| err(ApplyUpdateReason::UnknownParticipant))?;

            let locked = details
                .balance
                .total()
                .and_then(|total| channel.locked_balance[idx].checked_add(total))
                .ok_or_else(|| err(ApplyUpdateReason::BalanceOverflow))?;
            channel.locked_balance[idx] = locked;
            channel.merkle_root = details.merkle_root;
            active.push(transfer.clone());
            Some(transfer)
        }
        UpdateDetails::Resolve(details) => {
            let pos = active
                .iter()
                .position(|t| t.transfer_id == details.transfer_id)
                .ok_or_else(|| err(ApplyUpdateReason::TransferNotActive))?;
            let final_balance =
                final_transfer_balance.ok_or_else(|| err(ApplyUpdateReason::MissingFinalBalance))?;

            let mut transfer = active.remove(pos);
            let initial_total = transfer
                .initial_balance
                .total()
                .ok_or_else(|| err(ApplyUpdateReason::BalanceOverflow))?;
            if final_balance.total() != Some(initial_total) {
                return Err(err(ApplyUpdateReason::InvalidFinalBalance));
            }
            let locked = channel.locked_balance[idx]
                .checked_sub(initial_total)
                .ok_or_else(|| {
                    err(ApplyUpdateReason::BalanceOverflow)
                        .with_context("locked balance below transfer balance")
                })?;
            channel.locked_balance[idx] = locked;
            channel.merkle_root = details.merkle_root;

            transfer.balance = final_balance;
            transfer.transfer_resolver = Some(details.transfer_resolver.clone());
            if details.meta.is_some() {
                transfer.meta = details.meta.clone();
            }
            Some(transfer)
        }
    };

    channel.balances[idx] = update.balance;
    channel.nonce = update.nonce;
    channel.latest_update = update.clone();

    Ok(AppliedUpdate {
        channel,
        active_transfers: active,
        transfer,
    })
}
