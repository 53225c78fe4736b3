//! Persistence of channel and transfer states.

use std::collections::HashMap;

use async_trait::async_trait;
use core::fmt;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

use crate::{
    abiencode::types::{Address, Hash},
    channel::{ChannelCommitment, FullChannelState, FullTransferState},
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store backend failure: {0}")]
    Backend(String),

    #[error("inconsistent store content: {0}")]
    Inconsistent(String),
}

/// Must provide read-your-writes consistency per channel.
#[async_trait]
pub trait Store: Send + Sync + fmt::Debug {
    async fn get_channel_state(
        &self,
        channel_address: Address,
    ) -> Result<Option<FullChannelState>, StoreError>;

    /// Saves `state` together with its commitment. `transfer` is the transfer
    /// created (active) or resolved (no longer active) by the update that
    /// produced `state`.
    async fn save_channel_state(
        &self,
        state: &FullChannelState,
        commitment: &ChannelCommitment,
        transfer: Option<&FullTransferState>,
    ) -> Result<(), StoreError>;

    async fn get_active_transfers(
        &self,
        channel_address: Address,
    ) -> Result<Vec<FullTransferState>, StoreError>;

    async fn get_transfer_state(
        &self,
        transfer_id: Hash,
    ) -> Result<Option<FullTransferState>, StoreError>;
}

#[derive(Debug, Default)]
struct Inner {
    channels: HashMap<Address, (FullChannelState, ChannelCommitment)>,
    transfers: HashMap<Hash, FullTransferState>,
    // Ids of the active transfers per channel, in creation order.
    active: HashMap<Address, Vec<Hash>>,
}

/// [Store] keeping everything in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_commitment(&self, channel_address: Address) -> Option<ChannelCommitment> {
        let inner = self.inner.read().await;
        inner
            .channels
            .get(&channel_address)
            .map(|(_, commitment)| commitment.clone())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_channel_state(
        &self,
        channel_address: Address,
    ) -> Result<Option<FullChannelState>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .channels
            .get(&channel_address)
            .map(|(state, _)| state.clone()))
    }

    async fn save_channel_state(
        &self,
        state: &FullChannelState,
        commitment: &ChannelCommitment,
        transfer: Option<&FullTransferState>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;

        if let Some(transfer) = transfer {
            if transfer.channel_address != state.channel_address {
                return Err(StoreError::Inconsistent(format!(
                    "transfer {} belongs to channel {}, not {}",
                    transfer.transfer_id, transfer.channel_address, state.channel_address
                )));
            }
            let active = inner.active.entry(state.channel_address).or_default();
            active.retain(|id| *id != transfer.transfer_id);
            if !transfer.is_resolved() {
                active.push(transfer.transfer_id);
            }
            inner.transfers.insert(transfer.transfer_id, transfer.clone());
        }

        debug!(
            channel = %state.channel_address,
            nonce = state.nonce,
            "saved channel state"
        );
        inner
            .channels
            .insert(state.channel_address, (state.clone(), commitment.clone()));
        Ok(())
    }

    async fn get_active_transfers(
        &self,
        channel_address: Address,
    ) -> Result<Vec<FullTransferState>, StoreError> {
        let inner = self.inner.read().await;
        let Some(ids) = inner.active.get(&channel_address) else {
            return Ok(vec![]);
        };
        ids.iter()
            .map(|id| {
                inner.transfers.get(id).cloned().ok_or_else(|| {
                    StoreError::Inconsistent(format!("active transfer {id} not found"))
                })
            })
            .collect()
    }

    async fn get_transfer_state(
        &self,
        transfer_id: Hash,
    ) -> Result<Option<FullTransferState>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.transfers.get(&transfer_id).cloned())
    }
}
