//! Turning params into updates (generate) and updates into states (apply).

mod apply;
mod generate;

pub use apply::apply_update;
pub use generate::generate_update;
pub(crate) use generate::create_details_from_params;

use crate::{
    abiencode::{keccak256, types::Address},
    channel::{CreateDetails, FullChannelState, FullTransferState, ALICE, BOB},
    sig::Identifier,
};

/// Result of applying an update: the new channel state and the transfers
/// active afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedUpdate {
    pub channel: FullChannelState,
    pub active_transfers: Vec<FullTransferState>,
    /// Transfer created or resolved by the update.
    pub transfer: Option<FullTransferState>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedUpdate {
    pub update: crate::channel::ChannelUpdate,
    pub applied: AppliedUpdate,
}

/// The transfer a create update with `details` adds to the channel. The
/// merkle fields of `details` are not used. `None` if `initiator` is not a
/// participant.
pub(crate) fn transfer_from_details(
    state: &FullChannelState,
    initiator: &Identifier,
    channel_nonce: u64,
    asset_id: Address,
    details: &CreateDetails,
) -> Option<FullTransferState> {
    let initiator_idx = state.participant_index(initiator)?;
    let responder_idx = if initiator_idx == ALICE { BOB } else { ALICE };
    let participants = state.participants();
    let identifiers = state.identifiers();

    Some(FullTransferState {
        channel_address: state.channel_address,
        transfer_id: details.transfer_id,
        transfer_definition: details.transfer_definition,
        initiator: participants[initiator_idx],
        responder: participants[responder_idx],
        initiator_identifier: identifiers[initiator_idx],
        responder_identifier: identifiers[responder_idx],
        asset_id,
        initial_balance: details.balance,
        balance: details.balance,
        transfer_timeout: details.transfer_timeout,
        initial_state_hash: keccak256(&details.transfer_initial_state),
        transfer_state: details.transfer_initial_state.clone(),
        transfer_encodings: details.transfer_encodings.clone(),
        transfer_resolver: None,
        channel_nonce,
        meta: details.meta.clone(),
    })
}
