//! Collaborators and fixtures shared by the tests.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, OnceLock, Weak},
    time::Duration,
};

use async_trait::async_trait;
use rand::{rngs::StdRng, SeedableRng};
use tracing_subscriber::EnvFilter;

use crate::{
    abiencode::{
        keccak256,
        types::{Address, U256},
    },
    chain::{ChainError, ChainReader, LatestDeposit},
    channel::{
        Balance, ChannelUpdate, CreateParams, DepositParams, FullChannelState, FullTransferState,
        NetworkContext, ResolveParams, SetupParams, UpdateParams,
    },
    client::ChannelClient,
    config::Config,
    policy::{AcceptAll, ExternalValidation, PolicyRejection},
    sig::{Identifier, Signer},
    store::MemoryStore,
    update::{generate_update, GeneratedUpdate},
    wire::{Messaging, MessagingError},
};

pub const CHANNEL_TIMEOUT: u64 = 172_800;
pub const TRANSFER_TIMEOUT: u64 = 86_400;
pub const ASSET: Address = Address([0xa5; 20]);
/// Transfer definition of [MockChain]'s hashlock transfer.
pub const HASHLOCK: Address = Address([0x11; 20]);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn signer(seed: u64) -> Signer {
    Signer::new(&mut StdRng::seed_from_u64(seed))
}

pub fn network_context() -> NetworkContext {
    NetworkContext {
        chain_id: U256::from(1337),
        channel_factory_address: Address([0xfa; 20]),
        transfer_registry_address: Address([0x7e; 20]),
    }
}

pub fn amount(value: u64) -> U256 {
    U256::from(value)
}

/// Counterfactual channel address as computed by [MockChain].
pub fn channel_address(alice: &Identifier, bob: &Identifier, ctx: &NetworkContext) -> Address {
    let mut chain_id = [0u8; 32];
    ctx.chain_id.to_big_endian(&mut chain_id);

    let mut data = Vec::new();
    data.extend_from_slice(&alice.0);
    data.extend_from_slice(&bob.0);
    data.extend_from_slice(&chain_id);
    data.extend_from_slice(&ctx.channel_factory_address.0);

    let hash = keccak256(&data);
    let mut address = [0u8; 20];
    address.copy_from_slice(&hash.0[12..]);
    Address(address)
}

/// Initial state of a hashlock transfer unlocked by `preimage`.
pub fn hashlock(preimage: &[u8; 32]) -> Vec<u8> {
    keccak256(preimage).0.to_vec()
}

/// Hashlock transfer of `value` paid by `initiator`.
pub fn create_params(
    channel_address: Address,
    initiator: Address,
    responder: Address,
    value: u64,
    preimage: &[u8; 32],
) -> CreateParams {
    CreateParams {
        channel_address,
        balance: Balance {
            to: [initiator, responder],
            amount: [amount(value), U256::zero()],
        },
        asset_id: ASSET,
        transfer_definition: HASHLOCK,
        transfer_initial_state: hashlock(preimage),
        timeout: TRANSFER_TIMEOUT,
        encodings: [
            "tuple(bytes32 lockHash)".to_string(),
            "tuple(bytes32 preImage)".to_string(),
        ],
        meta: None,
    }
}

pub fn resolve_params(
    channel_address: Address,
    transfer: &FullTransferState,
    preimage: &[u8; 32],
) -> ResolveParams {
    ResolveParams {
        channel_address,
        transfer_id: transfer.transfer_id,
        transfer_resolver: preimage.to_vec(),
        meta: None,
    }
}

#[derive(Debug, Default)]
struct ChainState {
    onchain: HashMap<(Address, Address), U256>,
    deposits: HashMap<(Address, Address), LatestDeposit>,
    payout: Option<Balance>,
    unavailable: bool,
}

/// In-memory chain with a hashlock transfer definition: a 32 byte non-zero
/// lock hash as initial state, paid to the responder if the resolver hashes
/// to it, refunded otherwise.
#[derive(Debug, Default)]
pub struct MockChain {
    state: Mutex<ChainState>,
}

impl MockChain {
    /// Deposit by alice, tracked with a deposit nonce.
    pub fn alice_deposit(&self, channel: Address, asset: Address, value: u64) {
        let mut state = self.state.lock().unwrap();
        *state.onchain.entry((channel, asset)).or_default() += amount(value);
        let latest = state.deposits.entry((channel, asset)).or_default();
        latest.nonce += 1;
        latest.amount = amount(value);
    }

    /// Plain transfer to the channel, which is how bob deposits.
    pub fn bob_deposit(&self, channel: Address, asset: Address, value: u64) {
        let mut state = self.state.lock().unwrap();
        *state.onchain.entry((channel, asset)).or_default() += amount(value);
    }

    /// Makes every resolve return `payout`, whatever the resolver.
    pub fn force_payout(&self, payout: Balance) {
        self.state.lock().unwrap().payout = Some(payout);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unwrap().unavailable = unavailable;
    }

    fn check_available(&self) -> Result<(), ChainError> {
        if self.state.lock().unwrap().unavailable {
            return Err(ChainError::Unavailable("mock chain switched off".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ChainReader for MockChain {
    async fn get_channel_onchain_balance(
        &self,
        channel_address: Address,
        _chain_id: U256,
        asset_id: Address,
    ) -> Result<U256, ChainError> {
        self.check_available()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .onchain
            .get(&(channel_address, asset_id))
            .copied()
            .unwrap_or_default())
    }

    async fn get_latest_deposit_by_asset_id(
        &self,
        channel_address: Address,
        _chain_id: U256,
        asset_id: Address,
        _latest_deposit_nonce: u64,
    ) -> Result<LatestDeposit, ChainError> {
        self.check_available()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .deposits
            .get(&(channel_address, asset_id))
            .copied()
            .unwrap_or_default())
    }

    async fn get_channel_address(
        &self,
        alice: Identifier,
        bob: Identifier,
        network_context: &NetworkContext,
    ) -> Result<Address, ChainError> {
        self.check_available()?;
        Ok(channel_address(&alice, &bob, network_context))
    }

    async fn create(
        &self,
        transfer: &FullTransferState,
        _chain_id: U256,
    ) -> Result<bool, ChainError> {
        self.check_available()?;
        if transfer.transfer_definition != HASHLOCK {
            return Err(ChainError::TransferDefinition {
                definition: transfer.transfer_definition,
                reason: "unknown definition".into(),
            });
        }
        let lock = &transfer.transfer_state;
        Ok(lock.len() == 32 && lock.iter().any(|b| *b != 0))
    }

    async fn resolve(
        &self,
        transfer: &FullTransferState,
        resolver: &[u8],
        _chain_id: U256,
    ) -> Result<Balance, ChainError> {
        self.check_available()?;
        if let Some(payout) = self.state.lock().unwrap().payout {
            return Ok(payout);
        }
        if keccak256(resolver).0[..] != transfer.transfer_state[..] {
            return Ok(transfer.initial_balance);
        }
        let total = transfer
            .initial_balance
            .total()
            .ok_or_else(|| ChainError::Other("balance overflow".into()))?;
        Ok(Balance {
            to: transfer.initial_balance.to,
            amount: [U256::zero(), total],
        })
    }
}

/// Rejects every proposal of the counterparty.
#[derive(Debug, Default)]
pub struct DenyInbound;

#[async_trait]
impl ExternalValidation for DenyInbound {
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
        Err(PolicyRejection("inbound updates disabled".into()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Delivery {
    #[default]
    Deliver,
    /// Nothing arrives, the sender runs into its timeout.
    Offline,
    /// The update arrives and is processed, the answer is lost.
    DropResponse,
}

/// Messaging straight into the counterparty's [ChannelClient].
#[derive(Debug, Default)]
pub struct Loopback {
    peer: OnceLock<Weak<ChannelClient>>,
    delivery: Mutex<Delivery>,
}

impl Loopback {
    pub fn connect(&self, peer: &Arc<ChannelClient>) {
        let _ = self.peer.set(Arc::downgrade(peer));
    }

    pub fn set_delivery(&self, delivery: Delivery) {
        *self.delivery.lock().unwrap() = delivery;
    }
}

#[async_trait]
impl Messaging for Loopback {
    async fn send(
        &self,
        to: Identifier,
        update: ChannelUpdate,
        previous_update: Option<ChannelUpdate>,
        timeout: Duration,
    ) -> Result<ChannelUpdate, MessagingError> {
        let delivery = *self.delivery.lock().unwrap();
        if delivery == Delivery::Offline {
            tokio::time::sleep(timeout).await;
            return Err(MessagingError::Timeout);
        }

        let peer = self
            .peer
            .get()
            .and_then(Weak::upgrade)
            .ok_or_else(|| MessagingError::Transport("not connected".into()))?;
        if peer.identifier() != to {
            return Err(MessagingError::Transport(format!("unknown recipient {to}")));
        }

        let response = tokio::time::timeout(timeout, peer.handle_inbound(update, previous_update))
            .await
            .map_err(|_| MessagingError::Timeout)?;
        match delivery {
            Delivery::DropResponse => Err(MessagingError::Timeout),
            _ => response.map_err(|e| MessagingError::Rejected(Box::new(e))),
        }
    }
}

pub struct Party {
    pub client: Arc<ChannelClient>,
    pub store: Arc<MemoryStore>,
    pub messaging: Arc<Loopback>,
}

impl Party {
    pub async fn state(&self, channel_address: Address) -> FullChannelState {
        self.client
            .channel_state(channel_address)
            .await
            .unwrap()
            .expect("channel exists")
    }
}

fn party(
    seed: u64,
    chain: Arc<MockChain>,
    external: Arc<dyn ExternalValidation>,
    config: Config,
) -> Party {
    let store = Arc::new(MemoryStore::new());
    let messaging = Arc::new(Loopback::default());
    let client = Arc::new(ChannelClient::new(
        signer(seed),
        store.clone(),
        messaging.clone(),
        chain,
        external,
        config,
    ));
    Party {
        client,
        store,
        messaging,
    }
}

/// Two connected clients sharing a [MockChain].
pub struct Pair {
    pub alice: Party,
    pub bob: Party,
    pub chain: Arc<MockChain>,
}

impl Pair {
    pub fn new(config: Config) -> Self {
        Self::with_policies(config, Arc::new(AcceptAll), Arc::new(AcceptAll))
    }

    pub fn with_policies(
        config: Config,
        alice_policy: Arc<dyn ExternalValidation>,
        bob_policy: Arc<dyn ExternalValidation>,
    ) -> Self {
        init_tracing();
        let chain = Arc::new(MockChain::default());
        let alice = party(1, chain.clone(), alice_policy, config.clone());
        let bob = party(2, chain.clone(), bob_policy, config);
        alice.messaging.connect(&bob.client);
        bob.messaging.connect(&alice.client);
        Self { alice, bob, chain }
    }

    pub async fn setup(&self) -> Address {
        self.alice
            .client
            .setup(self.bob.client.identifier(), CHANNEL_TIMEOUT, network_context())
            .await
            .unwrap()
            .channel
            .channel_address
    }

    /// Set up channel with the given deposits of [ASSET], at nonce 3.
    pub async fn funded(&self, alice: u64, bob: u64) -> Address {
        let channel = self.setup().await;
        self.chain.alice_deposit(channel, ASSET, alice);
        self.alice.client.deposit(channel, ASSET).await.unwrap();
        self.chain.bob_deposit(channel, ASSET, bob);
        self.bob.client.deposit(channel, ASSET).await.unwrap();
        channel
    }
}

/// Generates updates directly, without validation or protocol. Each update is
/// signed by its initiator only.
pub struct Fixture {
    pub alice: Signer,
    pub bob: Signer,
    pub chain: MockChain,
    pub config: Config,
}

impl Fixture {
    pub fn new() -> Self {
        init_tracing();
        Self {
            alice: signer(1),
            bob: signer(2),
            chain: MockChain::default(),
            config: Config::default(),
        }
    }

    pub fn channel_address(&self) -> Address {
        channel_address(
            &self.alice.identifier(),
            &self.bob.identifier(),
            &network_context(),
        )
    }

    pub fn setup_params(&self, timeout: u64) -> UpdateParams {
        UpdateParams::Setup(SetupParams {
            channel_address: self.channel_address(),
            counterparty_identifier: self.bob.identifier(),
            timeout,
            network_context: network_context(),
        })
    }

    pub fn deposit_params(&self) -> UpdateParams {
        UpdateParams::Deposit(DepositParams {
            channel_address: self.channel_address(),
            asset_id: ASSET,
        })
    }

    pub async fn generate(
        &self,
        initiator: &Signer,
        params: &UpdateParams,
        state: Option<&FullChannelState>,
        active: &[FullTransferState],
    ) -> GeneratedUpdate {
        generate_update(
            initiator,
            &self.chain,
            params,
            state,
            active,
            &initiator.identifier(),
        )
        .await
        .unwrap()
    }

    /// Channel at nonce 3 holding the given deposits of [ASSET].
    pub async fn funded(&self, alice: u64, bob: u64) -> FullChannelState {
        let setup = self
            .generate(&self.alice, &self.setup_params(CHANNEL_TIMEOUT), None, &[])
            .await;
        self.chain.alice_deposit(self.channel_address(), ASSET, alice);
        let deposit = self
            .generate(
                &self.alice,
                &self.deposit_params(),
                Some(&setup.applied.channel),
                &[],
            )
            .await;
        self.chain.bob_deposit(self.channel_address(), ASSET, bob);
        self.generate(
            &self.bob,
            &self.deposit_params(),
            Some(&deposit.applied.channel),
            &[],
        )
        .await
        .applied
        .channel
    }
}
