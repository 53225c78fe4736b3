//! Application specific checks on top of the protocol rules.

use core::fmt;

use async_trait::async_trait;
use thiserror::Error;

use crate::channel::{ChannelUpdate, FullChannelState, FullTransferState, UpdateParams};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("rejected by policy: {0}")]
pub struct PolicyRejection(pub String);

#[async_trait]
pub trait ExternalValidation: Send + Sync + fmt::Debug {
    /// Called before a self-initiated update is generated.
    async fn validate_outbound(
        &self,
        params: &UpdateParams,
        state: Option<&FullChannelState>,
        active_transfers: &[FullTransferState],
    ) -> Result<(), PolicyRejection>;

    /// Called before a proposal of the counterparty is accepted.
    async fn validate_inbound(
        &self,
        update: &ChannelUpdate,
        state: Option<&FullChannelState>,
        active_transfers: &[FullTransferState],
    ) -> Result<(), PolicyRejection>;
}

/// Policy without additional rules.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

#[async_trait]
impl ExternalValidation for AcceptAll {
    async fn validate_outbound(
        &self,
        _params: &UpdateParams,
        _state: Option<&FullChannelState>,
        _active_transfers: &[FullTransferState],
    ) -> Result<(), PolicyRejection> {
        Ok(())
    }

    async fn validate_inbound(
        &self,
        _update: &ChannelUpdate,
        _state: Option<&FullChannelState>,
        _active_transfers: &[FullTransferState],
    ) -> Result<(), PolicyRejection> {
        Ok(())
    }
}
