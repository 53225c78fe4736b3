use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::FutureExt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    abiencode::types::{Address, Hash},
    chain::{ChainError, ChainReader},
    channel::{
        ChannelUpdate, CreateParams, DepositParams, FullChannelState, FullTransferState,
        NetworkContext, ResolveParams, SetupParams, UpdateParams,
    },
    config::Config,
    error::{
        InboundChannelUpdateError, InboundReason, OutboundChannelUpdateError, OutboundReason,
    },
    policy::ExternalValidation,
    queue::{ArbitrationView, Job, NonceView, QueueError, SerializedQueue},
    sig::{Identifier, Signer},
    store::{Store, StoreError},
    sync::{self, InboundOutcome, OutboundOutcome, SyncContext},
    wire::Messaging,
};

pub type ChannelQueue = SerializedQueue<
    Result<OutboundOutcome, OutboundChannelUpdateError>,
    Result<InboundOutcome, InboundChannelUpdateError>,
>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error(transparent)]
    Outbound(#[from] OutboundChannelUpdateError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A channel update both participants signed and we persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedUpdate {
    pub update: ChannelUpdate,
    pub channel: FullChannelState,
    pub active_transfers: Vec<FullTransferState>,
    /// Transfer created or resolved by the update.
    pub transfer: Option<FullTransferState>,
}

/// The main object of a channel participant.
///
/// Updates we initiate and updates the counterparty sends us go through a
/// [SerializedQueue] per channel, so at most one of them modifies a channel
/// at a time. Different channels are independent.
#[derive(Debug)]
pub struct ChannelClient {
    ctx: Arc<SyncContext>,
    queues: DashMap<Address, Arc<ChannelQueue>>,
}

impl ChannelClient {
    pub fn new(
        signer: Signer,
        store: Arc<dyn Store>,
        messaging: Arc<dyn Messaging>,
        chain: Arc<dyn ChainReader>,
        external: Arc<dyn ExternalValidation>,
        config: Config,
    ) -> Self {
        ChannelClient {
            ctx: Arc::new(SyncContext {
                signer: Arc::new(signer),
                store,
                messaging,
                chain,
                external,
                config: Arc::new(config),
            }),
            queues: DashMap::new(),
        }
    }

    pub fn identifier(&self) -> Identifier {
        self.ctx.signer.identifier()
    }

    pub fn address(&self) -> Address {
        self.ctx.signer.address()
    }

    pub fn config(&self) -> &Config {
        &self.ctx.config
    }

    /// Opens a channel with `counterparty`, we become alice.
    pub async fn setup(
        &self,
        counterparty: Identifier,
        timeout: u64,
        network_context: NetworkContext,
    ) -> Result<CommittedUpdate, ClientError> {
        let channel_address = self
            .ctx
            .chain
            .get_channel_address(self.identifier(), counterparty, &network_context)
            .await?;
        let params = UpdateParams::Setup(SetupParams {
            channel_address,
            counterparty_identifier: counterparty,
            timeout,
            network_context,
        });
        self.run_outbound(params, true).await
    }

    /// Reconciles the channel's balance of `asset_id` with the deposits made
    /// on chain.
    pub async fn deposit(
        &self,
        channel_address: Address,
        asset_id: Address,
    ) -> Result<CommittedUpdate, ClientError> {
        let params = UpdateParams::Deposit(DepositParams {
            channel_address,
            asset_id,
        });
        self.run_outbound(params, false).await
    }

    pub async fn create(&self, params: CreateParams) -> Result<CommittedUpdate, ClientError> {
        self.run_outbound(UpdateParams::Create(params), false).await
    }

    pub async fn resolve(&self, params: ResolveParams) -> Result<CommittedUpdate, ClientError> {
        self.run_outbound(UpdateParams::Resolve(params), false).await
    }

    /// Entry point for updates of the counterparty. The result, the
    /// countersigned update or the rejection, goes back to the sender.
    pub async fn handle_inbound(
        &self,
        update: ChannelUpdate,
        previous_update: Option<ChannelUpdate>,
    ) -> Result<ChannelUpdate, InboundChannelUpdateError> {
        let queue = self.queue(update.channel_address, false);
        let ctx = self.ctx.clone();
        let job_update = update.clone();
        let job: Job<Result<InboundOutcome, InboundChannelUpdateError>> =
            Box::new(move |cancel: CancellationToken| {
                async move {
                    sync::inbound(&ctx, &job_update, previous_update.as_ref(), &cancel).await
                }
                .boxed()
            });

        match queue.execute_other(job).await {
            Ok(result) => result.map(|outcome| outcome.update),
            Err(e) => Err(
                InboundChannelUpdateError::new(InboundReason::QueueFailure, &update)
                    .with_context(e.to_string()),
            ),
        }
    }

    pub async fn channel_state(
        &self,
        channel_address: Address,
    ) -> Result<Option<FullChannelState>, StoreError> {
        self.ctx.store.get_channel_state(channel_address).await
    }

    pub async fn active_transfers(
        &self,
        channel_address: Address,
    ) -> Result<Vec<FullTransferState>, StoreError> {
        self.ctx.store.get_active_transfers(channel_address).await
    }

    pub async fn transfer_state(
        &self,
        transfer_id: Hash,
    ) -> Result<Option<FullTransferState>, StoreError> {
        self.ctx.store.get_transfer_state(transfer_id).await
    }

    /// Runs `params` through the channel's queue. If we had to catch up with
    /// the counterparty first, or lost against a concurrent update of the
    /// counterparty, the params are retried on top of the new state.
    async fn run_outbound(
        &self,
        params: UpdateParams,
        alice_hint: bool,
    ) -> Result<CommittedUpdate, ClientError> {
        let channel_address = params.channel_address();
        let queue = self.queue(channel_address, alice_hint);
        let mut retries = 0;

        loop {
            let ctx = self.ctx.clone();
            let job_params = params.clone();
            let job: Job<Result<OutboundOutcome, OutboundChannelUpdateError>> =
                Box::new(move |cancel: CancellationToken| {
                    async move { sync::outbound(&ctx, &job_params, &cancel).await }.boxed()
                });

            let can_retry = retries < self.ctx.config.max_sync_attempts;
            match queue.execute_self(job).await? {
                Ok(OutboundOutcome::Applied {
                    update,
                    channel,
                    active_transfers,
                    transfer,
                }) => {
                    return Ok(CommittedUpdate {
                        update,
                        channel,
                        active_transfers,
                        transfer,
                    })
                }
                Ok(OutboundOutcome::Synced { channel, .. }) if can_retry => {
                    info!(
                        channel = %channel_address,
                        nonce = channel.nonce,
                        update_type = %params.update_type(),
                        "retrying update after sync"
                    );
                }
                Ok(OutboundOutcome::Synced { channel, .. }) => {
                    return Err(OutboundChannelUpdateError::new(OutboundReason::StaleChannel, &params)
                        .with_state(Some(&channel))
                        .into());
                }
                Err(e) if e.reason == OutboundReason::Cancelled && can_retry => {
                    info!(
                        channel = %channel_address,
                        update_type = %params.update_type(),
                        "retrying cancelled update"
                    );
                }
                Err(e) => return Err(e.into()),
            }
            retries += 1;
        }
    }

    fn queue(&self, channel_address: Address, alice_hint: bool) -> Arc<ChannelQueue> {
        self.queues
            .entry(channel_address)
            .or_insert_with(|| {
                let view = ChannelView {
                    store: self.ctx.store.clone(),
                    channel_address,
                    own_address: self.address(),
                    alice_hint,
                };
                Arc::new(SerializedQueue::spawn(
                    Arc::new(view),
                    self.ctx.config.queue_backlog,
                ))
            })
            .clone()
    }
}

/// Arbitration input read from the store. Before the channel exists the
/// roles follow from who proposes the setup.
#[derive(Debug)]
struct ChannelView {
    store: Arc<dyn Store>,
    channel_address: Address,
    own_address: Address,
    alice_hint: bool,
}

#[async_trait]
impl NonceView for ChannelView {
    async fn arbitration_view(&self) -> Result<ArbitrationView, StoreError> {
        let view = match self.store.get_channel_state(self.channel_address).await? {
            Some(state) => ArbitrationView {
                nonce: state.nonce,
                self_is_alice: state.alice == self.own_address,
            },
            None => ArbitrationView {
                nonce: 0,
                self_is_alice: self.alice_hint,
            },
        };
        Ok(view)
    }
}
