//! Read access to the chain and the transfer definition contracts.

use core::fmt;

use async_trait::async_trait;
use thiserror::Error;

use crate::{
    abiencode::types::{Address, U256},
    channel::{Balance, FullTransferState, NetworkContext},
    sig::Identifier,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("chain reader unavailable: {0}")]
    Unavailable(String),

    #[error("transfer definition {definition} failed: {reason}")]
    TransferDefinition { definition: Address, reason: String },

    #[error("{0}")]
    Other(String),
}

/// Latest deposit made by alice into the channel contract for one asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LatestDeposit {
    pub nonce: u64,
    pub amount: U256,
}

#[async_trait]
pub trait ChainReader: Send + Sync + fmt::Debug {
    /// Total amount of `asset_id` held by the channel contract.
    async fn get_channel_onchain_balance(
        &self,
        channel_address: Address,
        chain_id: U256,
        asset_id: Address,
    ) -> Result<U256, ChainError>;

    async fn get_latest_deposit_by_asset_id(
        &self,
        channel_address: Address,
        chain_id: U256,
        asset_id: Address,
        latest_deposit_nonce: u64,
    ) -> Result<LatestDeposit, ChainError>;

    /// Counterfactual address of the channel between `alice` and `bob`.
    async fn get_channel_address(
        &self,
        alice: Identifier,
        bob: Identifier,
        network_context: &NetworkContext,
    ) -> Result<Address, ChainError>;

    /// Whether the transfer definition accepts the initial state.
    async fn create(
        &self,
        transfer: &FullTransferState,
        chain_id: U256,
    ) -> Result<bool, ChainError>;

    /// Final balance of the transfer given its resolver.
    async fn resolve(
        &self,
        transfer: &FullTransferState,
        resolver: &[u8],
        chain_id: U256,
    ) -> Result<Balance, ChainError>;
}
