use core::fmt;

use super::{Balance, NetworkContext};
use crate::{
    abiencode::types::{Address, Hash, Signature},
    sig::Identifier,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateType {
    Setup,
    Deposit,
    Create,
    Resolve,
}

impl fmt::Display for UpdateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UpdateType::Setup => "setup",
            UpdateType::Deposit => "deposit",
            UpdateType::Create => "create",
            UpdateType::Resolve => "resolve",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupDetails {
    pub timeout: u64,
    pub network_context: NetworkContext,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositDetails {
    /// Alice's latest on-chain deposit nonce reconciled by this update.
    pub latest_deposit_nonce: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateDetails {
    pub transfer_id: Hash,
    /// Locked balance of the transfer, `[initiator, responder]`.
    pub balance: Balance,
    pub transfer_definition: Address,
    pub transfer_timeout: u64,
    pub transfer_initial_state: Vec<u8>,
    pub transfer_encodings: [String; 2],
    /// Proof of the new transfer against `merkle_root`.
    pub merkle_proof_data: Vec<Hash>,
    pub merkle_root: Hash,
    pub meta: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveDetails {
    pub transfer_id: Hash,
    pub transfer_definition: Address,
    pub transfer_resolver: Vec<u8>,
    /// Root over the active transfers without the resolved one.
    pub merkle_root: Hash,
    pub meta: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateDetails {
    Setup(SetupDetails),
    Deposit(DepositDetails),
    Create(CreateDetails),
    Resolve(ResolveDetails),
}

impl UpdateDetails {
    pub fn update_type(&self) -> UpdateType {
        match self {
            UpdateDetails::Setup(_) => UpdateType::Setup,
            UpdateDetails::Deposit(_) => UpdateType::Deposit,
            UpdateDetails::Create(_) => UpdateType::Create,
            UpdateDetails::Resolve(_) => UpdateType::Resolve,
        }
    }
}

/// A transition of the channel state.
///
/// `balance` is the resulting channel balance of `asset_id` after the update.
/// With one signature this is a proposal, with both it is final.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelUpdate {
    pub channel_address: Address,
    pub from_identifier: Identifier,
    pub to_identifier: Identifier,
    pub nonce: u64,
    pub asset_id: Address,
    pub balance: Balance,
    pub details: UpdateDetails,
    pub alice_signature: Option<Signature>,
    pub bob_signature: Option<Signature>,
}

impl ChannelUpdate {
    pub fn update_type(&self) -> UpdateType {
        self.details.update_type()
    }

    pub fn signature_count(&self) -> usize {
        self.alice_signature.is_some() as usize + self.bob_signature.is_some() as usize
    }

    pub fn is_double_signed(&self) -> bool {
        self.signature_count() == 2
    }

    /// Same update with both signatures removed, used to compare a received
    /// proposal against a locally derived one.
    pub fn unsigned(&self) -> Self {
        Self {
            alice_signature: None,
            bob_signature: None,
            ..self.clone()
        }
    }
}
