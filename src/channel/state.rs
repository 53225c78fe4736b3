use serde::Serialize;

use super::{ChannelUpdate, PartIdx, ALICE, BOB};
use crate::{
    abiencode::types::{Address, Hash, U256},
    sig::Identifier,
};

/// Chain the channel lives on together with the factory/registry contracts.
#[derive(Serialize, Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct NetworkContext {
    pub chain_id: U256,
    pub channel_factory_address: Address,
    pub transfer_registry_address: Address,
}

/// Balance of one asset, `to[i]` owns `amount[i]`.
///
/// In a channel the order is always `[alice, bob]`. Transfers use their own
/// order `[initiator, responder]`.
#[derive(Serialize, Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct Balance {
    pub to: [Address; 2],
    pub amount: [U256; 2],
}

impl Balance {
    pub fn zero(to: [Address; 2]) -> Self {
        Self {
            to,
            amount: [U256::zero(); 2],
        }
    }

    /// Sum of both amounts, `None` on overflow.
    pub fn total(&self) -> Option<U256> {
        self.amount[0].checked_add(self.amount[1])
    }
}

/// The part of the channel state both participants sign.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct CoreChannelState {
    pub channel_address: Address,
    pub alice: Address,
    pub bob: Address,
    pub asset_ids: Vec<Address>,
    pub balances: Vec<Balance>,
    pub locked_balance: Vec<U256>,
    pub latest_deposit_nonces: Vec<u64>,
    pub nonce: u64,
    pub merkle_root: Hash,
    pub timeout: u64,
}

/// Everything known about a channel after the update with `nonce` has been
/// applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullChannelState {
    pub channel_address: Address,
    pub alice: Address,
    pub bob: Address,
    pub alice_identifier: Identifier,
    pub bob_identifier: Identifier,
    pub network_context: NetworkContext,
    pub asset_ids: Vec<Address>,
    pub balances: Vec<Balance>,
    pub locked_balance: Vec<U256>,
    pub latest_deposit_nonces: Vec<u64>,
    pub nonce: u64,
    pub merkle_root: Hash,
    pub timeout: u64,
    pub latest_update: ChannelUpdate,
}

impl FullChannelState {
    pub fn core(&self) -> CoreChannelState {
        CoreChannelState {
            channel_address: self.channel_address,
            alice: self.alice,
            bob: self.bob,
            asset_ids: self.asset_ids.clone(),
            balances: self.balances.clone(),
            locked_balance: self.locked_balance.clone(),
            latest_deposit_nonces: self.latest_deposit_nonces.clone(),
            nonce: self.nonce,
            merkle_root: self.merkle_root,
            timeout: self.timeout,
        }
    }

    pub fn asset_index(&self, asset_id: &Address) -> Option<usize> {
        self.asset_ids.iter().position(|a| a == asset_id)
    }

    pub fn balance_of(&self, asset_id: &Address) -> Option<&Balance> {
        self.asset_index(asset_id)
            .and_then(|i| self.balances.get(i))
    }

    pub fn participants(&self) -> [Address; 2] {
        [self.alice, self.bob]
    }

    pub fn identifiers(&self) -> [Identifier; 2] {
        [self.alice_identifier, self.bob_identifier]
    }

    pub fn participant_index(&self, identifier: &Identifier) -> Option<PartIdx> {
        if *identifier == self.alice_identifier {
            Some(ALICE)
        } else if *identifier == self.bob_identifier {
            Some(BOB)
        } else {
            None
        }
    }

    pub fn participant_by_address(&self, address: &Address) -> Option<PartIdx> {
        if *address == self.alice {
            Some(ALICE)
        } else if *address == self.bob {
            Some(BOB)
        } else {
            None
        }
    }

    /// All per-asset arrays describe the same assets.
    pub fn has_consistent_arrays(&self) -> bool {
        let n = self.asset_ids.len();
        self.balances.len() == n
            && self.locked_balance.len() == n
            && self.latest_deposit_nonces.len() == n
    }
}
