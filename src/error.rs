//! Error types of the update protocol, one per phase.
//!
//! Every error carries a `reason` plus the params/update and state it was
//! raised for. All of them are cloneable so an inbound rejection can be
//! returned to the counterparty unchanged.

use thiserror::Error;

use crate::channel::{ChannelUpdate, FullChannelState, UpdateParams};

fn context_suffix(context: &Option<String>) -> String {
    match context {
        Some(context) => format!(": {context}"),
        None => String::new(),
    }
}

macro_rules! impl_with_context {
    ($T:ident) => {
        impl $T {
            pub fn with_context(mut self, context: impl Into<String>) -> Self {
                self.context = Some(context.into());
                self
            }

            pub fn with_state(mut self, state: Option<&FullChannelState>) -> Self {
                self.state = state.cloned().map(Box::new);
                self
            }
        }
    };
}

/// Why a set of params (or the params derived from a received update) was
/// rejected.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationReason {
    /// Setup on a channel that already has a state
    #[error("channel is already set up")]
    ChannelAlreadySetup,

    /// Non-setup params for a channel without state
    #[error("channel not found")]
    ChannelNotFound,

    /// Channel address does not match the counterfactual address
    #[error("invalid channel address")]
    InvalidChannelAddress,

    /// Counterparty is the signer itself or not part of the channel
    #[error("invalid counterparty")]
    InvalidCounterparty,

    #[error("channel timeout out of bounds")]
    InvalidChannelTimeout,

    /// Asset is not tracked by the channel (or not a valid asset id)
    #[error("asset not found")]
    AssetNotFound,

    #[error("duplicate transfer id")]
    DuplicateTransferId,

    /// A participant cannot cover its part of the locked value
    #[error("insufficient funds")]
    InsufficientFunds,

    #[error("transfer timeout must be below the channel timeout")]
    TransferTimeoutAboveChannel,

    #[error("transfer timeout out of bounds")]
    InvalidTransferTimeout,

    /// Transfer definition rejected the initial state
    #[error("invalid initial transfer state")]
    InvalidInitialState,

    #[error("transfer not active")]
    TransferNotActive,

    /// Resolver does not match the transfer's resolver encoding
    #[error("invalid resolver")]
    InvalidResolver,

    #[error("only the responder can resolve a transfer")]
    OnlyResponderCanInitiateResolve,

    #[error("transfer already resolved")]
    TransferResolved,

    /// Per-asset arrays of the channel state differ in length
    #[error("invalid array length")]
    InvalidArrayLength,

    #[error("external validation failed")]
    ExternalValidationFailed,

    #[error("chain service failure")]
    ChainServiceFailure,

    /// Initiator is not a participant of the channel
    #[error("invalid initiator")]
    InvalidInitiator,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid {} params: {reason}{}", .params.update_type(), context_suffix(.context))]
pub struct ValidationError {
    pub reason: ValidationReason,
    pub params: Box<UpdateParams>,
    pub state: Option<Box<FullChannelState>>,
    pub context: Option<String>,
}

impl ValidationError {
    pub fn new(reason: ValidationReason, params: &UpdateParams) -> Self {
        Self {
            reason,
            params: Box::new(params.clone()),
            state: None,
            context: None,
        }
    }
}

impl_with_context!(ValidationError);

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateUpdateReason {
    #[error("channel not found")]
    ChannelNotFound,

    #[error("transfer not active")]
    TransferNotActive,

    #[error("chain service failure")]
    ChainServiceFailure,

    /// On-chain balance is lower than what the channel already accounts for
    #[error("failed to reconcile deposit")]
    FailedToReconcileDeposit,

    /// Transfer definition did not pay out exactly what was locked
    #[error("invalid final transfer balance")]
    InvalidFinalBalance,

    #[error("balance overflow")]
    BalanceOverflow,

    #[error("insufficient funds")]
    InsufficientFunds,

    #[error("could not sign")]
    CouldNotSign,

    #[error("encoding failure")]
    EncodingFailure,

    #[error("unknown participant")]
    UnknownParticipant,
}

/// Failure while generating an update from valid params.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("could not create {} update: {reason}{}", .params.update_type(), context_suffix(.context))]
pub struct CreateUpdateError {
    pub reason: CreateUpdateReason,
    pub params: Box<UpdateParams>,
    pub state: Option<Box<FullChannelState>>,
    pub context: Option<String>,
}

impl CreateUpdateError {
    pub fn new(reason: CreateUpdateReason, params: &UpdateParams) -> Self {
        Self {
            reason,
            params: Box::new(params.clone()),
            state: None,
            context: None,
        }
    }
}

impl_with_context!(CreateUpdateError);

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyUpdateReason {
    #[error("channel not found")]
    ChannelNotFound,

    #[error("channel is already set up")]
    ChannelAlreadySetup,

    #[error("transfer not active")]
    TransferNotActive,

    /// Resolve applied without the transfer's final balance
    #[error("missing final transfer balance")]
    MissingFinalBalance,

    /// Final transfer balance does not add up to the locked amount
    #[error("invalid final transfer balance")]
    InvalidFinalBalance,

    #[error("balance overflow")]
    BalanceOverflow,

    #[error("encoding failure")]
    EncodingFailure,

    #[error("asset not found")]
    AssetNotFound,

    /// Update is not sent by a channel participant
    #[error("unknown participant")]
    UnknownParticipant,
}

/// Failure of the state reducer. Indicates an inconsistent base state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("could not apply {} update: {reason}{}", .update.update_type(), context_suffix(.context))]
pub struct ApplyUpdateError {
    pub reason: ApplyUpdateReason,
    pub update: Box<ChannelUpdate>,
    pub state: Option<Box<FullChannelState>>,
    pub context: Option<String>,
}

impl ApplyUpdateError {
    pub fn new(reason: ApplyUpdateReason, update: &ChannelUpdate) -> Self {
        Self {
            reason,
            update: Box::new(update.clone()),
            state: None,
            context: None,
        }
    }
}

impl_with_context!(ApplyUpdateError);

/// Any failure of the validate, generate, apply pipeline.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpdateError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Create(#[from] CreateUpdateError),
    #[error(transparent)]
    Apply(#[from] ApplyUpdateError),
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundReason {
    /// Update does not have the shape required for its type
    #[error("malformed update")]
    MalformedUpdate,

    #[error("invalid update nonce")]
    InvalidUpdateNonce,

    /// Nonce is not above ours, the attached state is our latest one
    #[error("stale update")]
    StaleUpdate,

    /// Too far behind to catch up incrementally
    #[error("restore needed")]
    RestoreNeeded,

    #[error("bad signatures")]
    BadSignatures,

    #[error("channel not found")]
    ChannelNotFound,

    #[error("chain service failure")]
    ChainServiceFailure,

    #[error("external validation failed")]
    ExternalValidationFailed,

    #[error("validation failed")]
    ValidationFailed,

    #[error("could not apply update")]
    ApplyUpdateFailed,

    /// Update differs from the one derived from its params
    #[error("update does not match derived update")]
    UpdateMismatch,

    #[error("could not sign")]
    CouldNotSign,

    #[error("store failure")]
    StoreFailure,

    #[error("cancelled")]
    Cancelled,

    #[error("transfer not active")]
    TransferNotActive,

    #[error("queue failure")]
    QueueFailure,
}

/// Rejection of an update received from the counterparty.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("inbound {} update rejected: {reason}{}", .update.update_type(), context_suffix(.context))]
pub struct InboundChannelUpdateError {
    pub reason: InboundReason,
    pub update: Box<ChannelUpdate>,
    pub state: Option<Box<FullChannelState>>,
    pub context: Option<String>,
}

impl InboundChannelUpdateError {
    pub fn new(reason: InboundReason, update: &ChannelUpdate) -> Self {
        Self {
            reason,
            update: Box::new(update.clone()),
            state: None,
            context: None,
        }
    }

    /// Maps a pipeline failure on an inbound update to its inbound reason.
    pub fn from_update_error(err: UpdateError, update: &ChannelUpdate) -> Self {
        let reason = match &err {
            UpdateError::Validation(e) => match e.reason {
                ValidationReason::ExternalValidationFailed => InboundReason::ExternalValidationFailed,
                ValidationReason::ChainServiceFailure => InboundReason::ChainServiceFailure,
                ValidationReason::TransferNotActive => InboundReason::TransferNotActive,
                ValidationReason::ChannelNotFound => InboundReason::ChannelNotFound,
                _ => InboundReason::ValidationFailed,
            },
            UpdateError::Create(e) => match e.reason {
                CreateUpdateReason::ChainServiceFailure => InboundReason::ChainServiceFailure,
                CreateUpdateReason::CouldNotSign => InboundReason::CouldNotSign,
                CreateUpdateReason::TransferNotActive => InboundReason::TransferNotActive,
                _ => InboundReason::ValidationFailed,
            },
            UpdateError::Apply(_) => InboundReason::ApplyUpdateFailed,
        };
        Self::new(reason, update).with_context(err.to_string())
    }
}

impl_with_context!(InboundChannelUpdateError);

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundReason {
    #[error("validation failed")]
    ValidationFailed,

    #[error("could not generate update")]
    GenerationFailed,

    /// No response within the message timeout
    #[error("counterparty offline")]
    CounterpartyOffline,

    /// Counterparty rejected the update for a reason other than staleness
    #[error("counterparty failure")]
    CounterpartyFailure,

    #[error("failed to sync with counterparty")]
    SyncFailure,

    #[error("restore needed")]
    RestoreNeeded,

    #[error("bad signatures")]
    BadSignatures,

    /// Counterparty answered with a different update than the one sent
    #[error("invalid response")]
    InvalidResponse,

    #[error("store failure")]
    StoreFailure,

    #[error("cancelled")]
    Cancelled,

    /// Channel was advanced by the counterparty, the intent was not applied
    #[error("channel synced, update not applied")]
    StaleChannel,
}

/// Failure while driving a self-initiated update.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("outbound {} update failed: {reason}{}", .params.update_type(), context_suffix(.context))]
pub struct OutboundChannelUpdateError {
    pub reason: OutboundReason,
    pub params: Box<UpdateParams>,
    pub state: Option<Box<FullChannelState>>,
    pub context: Option<String>,
}

impl OutboundChannelUpdateError {
    pub fn new(reason: OutboundReason, params: &UpdateParams) -> Self {
        Self {
            reason,
            params: Box::new(params.clone()),
            state: None,
            context: None,
        }
    }
}

impl_with_context!(OutboundChannelUpdateError);
