use super::{Balance, NetworkContext, UpdateType};
use crate::{
    abiencode::types::{Address, Hash},
    sig::Identifier,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupParams {
    pub channel_address: Address,
    pub counterparty_identifier: Identifier,
    pub timeout: u64,
    pub network_context: NetworkContext,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositParams {
    pub channel_address: Address,
    pub asset_id: Address,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateParams {
    pub channel_address: Address,
    /// Value locked by the transfer, `[initiator, responder]`.
    pub balance: Balance,
    pub asset_id: Address,
    pub transfer_definition: Address,
    pub transfer_initial_state: Vec<u8>,
    pub timeout: u64,
    /// Encodings of the transfer state and the resolver.
    pub encodings: [String; 2],
    pub meta: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveParams {
    pub channel_address: Address,
    pub transfer_id: Hash,
    pub transfer_resolver: Vec<u8>,
    pub meta: Option<String>,
}

/// Request to produce an update of the given type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateParams {
    Setup(SetupParams),
    Deposit(DepositParams),
    Create(CreateParams),
    Resolve(ResolveParams),
}

impl UpdateParams {
    pub fn update_type(&self) -> UpdateType {
        match self {
            UpdateParams::Setup(_) => UpdateType::Setup,
            UpdateParams::Deposit(_) => UpdateType::Deposit,
            UpdateParams::Create(_) => UpdateType::Create,
            UpdateParams::Resolve(_) => UpdateType::Resolve,
        }
    }

    pub fn channel_address(&self) -> Address {
        match self {
            UpdateParams::Setup(p) => p.channel_address,
            UpdateParams::Deposit(p) => p.channel_address,
            UpdateParams::Create(p) => p.channel_address,
            UpdateParams::Resolve(p) => p.channel_address,
        }
    }
}
