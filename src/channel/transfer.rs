use serde::Serialize;

use super::Balance;
use crate::{
    abiencode::{
        self,
        types::{Address, Hash},
    },
    sig::Identifier,
};

/// Deterministic id of a transfer created by the update with `nonce`.
pub fn transfer_id(
    channel_address: Address,
    nonce: u64,
    transfer_definition: Address,
    transfer_timeout: u64,
) -> Result<Hash, abiencode::Error> {
    abiencode::to_hash(&(channel_address, nonce, transfer_definition, transfer_timeout))
}

/// The part of a transfer that is committed to in the channel's merkle root.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct CoreTransferState {
    pub channel_address: Address,
    pub transfer_id: Hash,
    pub transfer_definition: Address,
    pub initiator: Address,
    pub responder: Address,
    pub asset_id: Address,
    pub balance: Balance,
    pub transfer_timeout: u64,
    pub initial_state_hash: Hash,
}

impl CoreTransferState {
    /// Merkle leaf of this transfer.
    pub fn leaf(&self) -> Result<Hash, abiencode::Error> {
        abiencode::to_hash(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullTransferState {
    pub channel_address: Address,
    pub transfer_id: Hash,
    pub transfer_definition: Address,
    pub initiator: Address,
    pub responder: Address,
    pub initiator_identifier: Identifier,
    pub responder_identifier: Identifier,
    pub asset_id: Address,
    /// Balance locked at creation, `[initiator, responder]`.
    pub initial_balance: Balance,
    /// Equal to `initial_balance` while active, the final balance once
    /// resolved.
    pub balance: Balance,
    pub transfer_timeout: u64,
    pub initial_state_hash: Hash,
    pub transfer_state: Vec<u8>,
    /// Encodings of the transfer state and the resolver.
    pub transfer_encodings: [String; 2],
    pub transfer_resolver: Option<Vec<u8>>,
    /// Nonce of the channel update that created this transfer.
    pub channel_nonce: u64,
    pub meta: Option<String>,
}

impl FullTransferState {
    pub fn core(&self) -> CoreTransferState {
        CoreTransferState {
            channel_address: self.channel_address,
            transfer_id: self.transfer_id,
            transfer_definition: self.transfer_definition,
            initiator: self.initiator,
            responder: self.responder,
            asset_id: self.asset_id,
            balance: self.initial_balance,
            transfer_timeout: self.transfer_timeout,
            initial_state_hash: self.initial_state_hash,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.transfer_resolver.is_some()
    }
}
