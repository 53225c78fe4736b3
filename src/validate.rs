//! Admission checks for params and received updates.

use tracing::debug;

use crate::{
    chain::ChainReader,
    channel::{
        transfer_id, validate_channel_signatures, ChannelUpdate, CreateParams, DepositParams,
        FullChannelState, FullTransferState, ResolveParams, SetupParams, SignatureRequirement,
        UpdateDetails, UpdateParams,
    },
    config::Config,
    error::{
        InboundChannelUpdateError, InboundReason, UpdateError, ValidationError, ValidationReason,
    },
    merkle::{verify_proof, MerkleTree},
    policy::ExternalValidation,
    sig::{Identifier, Signer},
    update::{
        apply_update, create_details_from_params, generate_update, transfer_from_details,
        GeneratedUpdate,
    },
};

const RESOLVER_WORD_SIZE: usize = 32;

/// The collaborators needed to admit and derive updates for one signer.
#[derive(Debug, Clone, Copy)]
pub struct Validator<'a> {
    pub signer: &'a Signer,
    pub chain: &'a dyn ChainReader,
    pub external: &'a dyn ExternalValidation,
    pub config: &'a Config,
}

impl<'a> Validator<'a> {
    /// Checks whether `params` proposed by `initiator` may be applied on top
    /// of `previous`. Never mutates anything.
    pub async fn validate_update_params(
        &self,
        params: &UpdateParams,
        previous: Option<&FullChannelState>,
        active_transfers: &[FullTransferState],
        initiator: &Identifier,
    ) -> Result<(), ValidationError> {
        let result = self
            .check_params(params, previous, active_transfers, initiator)
            .await;
        if let Err(e) = &result {
            debug!(
                channel = %params.channel_address(),
                update_type = %params.update_type(),
                reason = %e.reason,
                "params rejected"
            );
        }
        result
    }

    async fn check_params(
        &self,
        params: &UpdateParams,
        previous: Option<&FullChannelState>,
        active_transfers: &[FullTransferState],
        initiator: &Identifier,
    ) -> Result<(), ValidationError> {
        let err = |reason| ValidationError::new(reason, params).with_state(previous);

        if let Some(state) = previous {
            if !state.has_consistent_arrays() {
                return Err(err(ValidationReason::InvalidArrayLength));
            }
            if state.channel_address != params.channel_address() {
                return Err(err(ValidationReason::InvalidChannelAddress));
            }
        }

        match params {
            UpdateParams::Setup(p) => self.check_setup(params, p, previous, initiator).await?,
            _ => {
                let state = previous.ok_or_else(|| err(ValidationReason::ChannelNotFound))?;
                if state.participant_index(initiator).is_none() {
                    return Err(err(ValidationReason::InvalidInitiator));
                }
                match params {
                    UpdateParams::Setup(_) => {}
                    // Asset ids are addresses by construction, any asset can
                    // be deposited.
                    UpdateParams::Deposit(_) => {}
                    UpdateParams::Create(p) => {
                        self.check_create(params, p, state, active_transfers, initiator)
                            .await?
                    }
                    UpdateParams::Resolve(p) => {
                        check_resolve(params, p, state, active_transfers, initiator)?
                    }
                }
            }
        }

        if *initiator == self.signer.identifier() {
            self.external
                .validate_outbound(params, previous, active_transfers)
                .await
                .map_err(|e| {
                    err(ValidationReason::ExternalValidationFailed).with_context(e.to_string())
                })?;
        }
        Ok(())
    }

    async fn check_setup(
        &self,
        params: &UpdateParams,
        p: &SetupParams,
        previous: Option<&FullChannelState>,
        initiator: &Identifier,
    ) -> Result<(), ValidationError> {
        let err = |reason| ValidationError::new(reason, params).with_state(previous);

        if previous.is_some() {
            return Err(err(ValidationReason::ChannelAlreadySetup));
        }
        let own = self.signer.identifier();
        if p.counterparty_identifier == *initiator
            || (p.counterparty_identifier != own && *initiator != own)
        {
            return Err(err(ValidationReason::InvalidCounterparty));
        }
        if p.timeout < self.config.min_channel_timeout || p.timeout > self.config.max_channel_timeout
        {
            return Err(err(ValidationReason::InvalidChannelTimeout)
                .with_context(format!("timeout {}", p.timeout)));
        }

        let derived = self
            .chain
            .get_channel_address(*initiator, p.counterparty_identifier, &p.network_context)
            .await
            .map_err(|e| err(ValidationReason::ChainServiceFailure).with_context(e.to_string()))?;
        if derived != p.channel_address {
            return Err(err(ValidationReason::InvalidChannelAddress)
                .with_context(format!("expected {derived}")));
        }
        Ok(())
    }

    async fn check_create(
        &self,
        params: &UpdateParams,
        p: &CreateParams,
        state: &FullChannelState,
        active_transfers: &[FullTransferState],
        initiator: &Identifier,
    ) -> Result<(), ValidationError> {
        let err = |reason| ValidationError::new(reason, params).with_state(Some(state));

        let balance = state
            .balance_of(&p.asset_id)
            .ok_or_else(|| err(ValidationReason::AssetNotFound))?;

        let nonce = state.nonce + 1;
        let id = transfer_id(state.channel_address, nonce, p.transfer_definition, p.timeout)
            .map_err(|e| err(ValidationReason::InvalidInitialState).with_context(e.to_string()))?;
        if active_transfers.iter().any(|t| t.transfer_id == id) {
            return Err(err(ValidationReason::DuplicateTransferId));
        }

        let initiator_idx = state
            .participant_index(initiator)
            .ok_or_else(|| err(ValidationReason::InvalidInitiator))?;
        let responder_idx = 1 - initiator_idx;
        if balance.amount[initiator_idx] < p.balance.amount[0]
            || balance.amount[responder_idx] < p.balance.amount[1]
        {
            return Err(err(ValidationReason::InsufficientFunds));
        }

        if p.timeout >= state.timeout {
            return Err(err(ValidationReason::TransferTimeoutAboveChannel));
        }
        if p.timeout < self.config.min_transfer_timeout
            || p.timeout > self.config.max_transfer_timeout
        {
            return Err(err(ValidationReason::InvalidTransferTimeout)
                .with_context(format!("timeout {}", p.timeout)));
        }

        let details = create_details_from_params(p, id);
        let transfer = transfer_from_details(state, initiator, nonce, p.asset_id, &details)
            .ok_or_else(|| err(ValidationReason::InvalidInitiator))?;
        let valid = self
            .chain
            .create(&transfer, state.network_context.chain_id)
            .await
            .map_err(|e| err(ValidationReason::ChainServiceFailure).with_context(e.to_string()))?;
        if !valid {
            return Err(err(ValidationReason::InvalidInitialState));
        }
        Ok(())
    }

    /// Validates `params`, then generates and applies the update.
    pub async fn validate_params_and_apply_update(
        &self,
        params: &UpdateParams,
        previous: Option<&FullChannelState>,
        active_transfers: &[FullTransferState],
        initiator: &Identifier,
    ) -> Result<GeneratedUpdate, UpdateError> {
        self.validate_update_params(params, previous, active_transfers, initiator)
            .await?;
        generate_update(
            self.signer,
            self.chain,
            params,
            previous,
            active_transfers,
            initiator,
        )
        .await
    }

    /// Admits an update received from the counterparty, `previous` must be
    /// the state right before it.
    ///
    /// Double-signed updates are applied and only their signatures are
    /// checked. Single-signed ones are re-derived from their params and must
    /// match exactly. The returned update is the received one (no signature
    /// is added).
    pub async fn validate_and_apply_inbound_update(
        &self,
        update: &ChannelUpdate,
        previous: Option<&FullChannelState>,
        active_transfers: &[FullTransferState],
    ) -> Result<GeneratedUpdate, InboundChannelUpdateError> {
        let err = |reason| InboundChannelUpdateError::new(reason, update).with_state(previous);

        validate_update_shape(update, previous, active_transfers)?;

        let expected_nonce = previous.map_or(0, |s| s.nonce) + 1;
        if update.nonce != expected_nonce {
            return Err(err(InboundReason::InvalidUpdateNonce)
                .with_context(format!("expected {expected_nonce}, got {}", update.nonce)));
        }

        if update.is_double_signed() {
            if let UpdateDetails::Setup(_) = &update.details {
                self.validate_update_params(
                    &params_from_update(update),
                    previous,
                    active_transfers,
                    &update.from_identifier,
                )
                .await
                .map_err(|e| {
                    InboundChannelUpdateError::from_update_error(e.into(), update)
                        .with_state(previous)
                })?;
            }
            let final_balance = match (&update.details, previous) {
                (UpdateDetails::Resolve(details), Some(state)) => {
                    let transfer = active_transfers
                        .iter()
                        .find(|t| t.transfer_id == details.transfer_id)
                        .ok_or_else(|| err(InboundReason::TransferNotActive))?;
                    let balance = self
                        .chain
                        .resolve(
                            transfer,
                            &details.transfer_resolver,
                            state.network_context.chain_id,
                        )
                        .await
                        .map_err(|e| {
                            err(InboundReason::ChainServiceFailure).with_context(e.to_string())
                        })?;
                    Some(balance)
                }
                _ => None,
            };

            let applied = apply_update(update, previous, active_transfers, final_balance)
                .map_err(|e| err(InboundReason::ApplyUpdateFailed).with_context(e.to_string()))?;
            validate_channel_signatures(
                &applied.channel,
                update.alice_signature,
                update.bob_signature,
                SignatureRequirement::Both,
            )
            .map_err(|e| err(InboundReason::BadSignatures).with_context(e.to_string()))?;

            return Ok(GeneratedUpdate {
                update: update.clone(),
                applied,
            });
        }

        self.external
            .validate_inbound(update, previous, active_transfers)
            .await
            .map_err(|e| err(InboundReason::ExternalValidationFailed).with_context(e.to_string()))?;

        let params = params_from_update(update);
        let mut generated = self
            .validate_params_and_apply_update(
                &params,
                previous,
                active_transfers,
                &update.from_identifier,
            )
            .await
            .map_err(|e| {
                InboundChannelUpdateError::from_update_error(e, update).with_state(previous)
            })?;

        if generated.update != update.unsigned() {
            return Err(err(InboundReason::UpdateMismatch));
        }

        let initiator_idx = generated
            .applied
            .channel
            .participant_index(&update.from_identifier)
            .ok_or_else(|| err(InboundReason::MalformedUpdate))?;
        validate_channel_signatures(
            &generated.applied.channel,
            update.alice_signature,
            update.bob_signature,
            SignatureRequirement::Only(initiator_idx),
        )
        .map_err(|e| err(InboundReason::BadSignatures).with_context(e.to_string()))?;

        generated.update = update.clone();
        generated.applied.channel.latest_update = update.clone();
        Ok(generated)
    }
}

fn check_resolve(
    params: &UpdateParams,
    p: &ResolveParams,
    state: &FullChannelState,
    active_transfers: &[FullTransferState],
    initiator: &Identifier,
) -> Result<(), ValidationError> {
    let err = |reason| ValidationError::new(reason, params).with_state(Some(state));

    let transfer = active_transfers
        .iter()
        .find(|t| t.transfer_id == p.transfer_id)
        .ok_or_else(|| err(ValidationReason::TransferNotActive))?;
    if transfer.is_resolved() {
        return Err(err(ValidationReason::TransferResolved));
    }
    if p.transfer_resolver.is_empty() || p.transfer_resolver.len() % RESOLVER_WORD_SIZE != 0 {
        return Err(err(ValidationReason::InvalidResolver).with_context(format!(
            "{} bytes for encoding {}",
            p.transfer_resolver.len(),
            transfer.transfer_encodings[1]
        )));
    }
    if *initiator != transfer.responder_identifier {
        return Err(err(ValidationReason::OnlyResponderCanInitiateResolve));
    }
    Ok(())
}

/// The params the sender of `update` must have used.
pub fn params_from_update(update: &ChannelUpdate) -> UpdateParams {
    match &update.details {
        UpdateDetails::Setup(d) => UpdateParams::Setup(SetupParams {
            channel_address: update.channel_address,
            counterparty_identifier: update.to_identifier,
            timeout: d.timeout,
            network_context: d.network_context,
        }),
        UpdateDetails::Deposit(_) => UpdateParams::Deposit(DepositParams {
            channel_address: update.channel_address,
            asset_id: update.asset_id,
        }),
        UpdateDetails::Create(d) => UpdateParams::Create(CreateParams {
            channel_address: update.channel_address,
            balance: d.balance,
            asset_id: update.asset_id,
            transfer_definition: d.transfer_definition,
            transfer_initial_state: d.transfer_initial_state.clone(),
            timeout: d.transfer_timeout,
            encodings: d.transfer_encodings.clone(),
            meta: d.meta.clone(),
        }),
        UpdateDetails::Resolve(d) => UpdateParams::Resolve(ResolveParams {
            channel_address: update.channel_address,
            transfer_id: d.transfer_id,
            transfer_resolver: d.transfer_resolver.clone(),
            meta: d.meta.clone(),
        }),
    }
}

/// Structural checks of a received update against the state it claims to
/// follow.
pub fn validate_update_shape(
    update: &ChannelUpdate,
    previous: Option<&FullChannelState>,
    active_transfers: &[FullTransferState],
) -> Result<(), InboundChannelUpdateError> {
    let malformed = |context: &str| {
        InboundChannelUpdateError::new(InboundReason::MalformedUpdate, update)
            .with_state(previous)
            .with_context(context)
    };

    if update.from_identifier == update.to_identifier {
        return Err(malformed("sender and receiver are equal"));
    }
    if update.signature_count() == 0 {
        return Err(malformed("update carries no signature"));
    }

    let state = match (&update.details, previous) {
        (UpdateDetails::Setup(_), None) => {
            let alice = update
                .from_identifier
                .to_address()
                .map_err(|e| malformed(&e.to_string()))?;
            let bob = update
                .to_identifier
                .to_address()
                .map_err(|e| malformed(&e.to_string()))?;
            if update.balance.to != [alice, bob] {
                return Err(malformed("setup balance not addressed to [alice, bob]"));
            }
            if !update.balance.amount.iter().all(|a| a.is_zero()) {
                return Err(malformed("setup with non-zero balance"));
            }
            if update.signature_count() == 1 && update.alice_signature.is_none() {
                return Err(malformed("setup signed by the receiver only"));
            }
            return Ok(());
        }
        // The nonce check reports the stale setup.
        (UpdateDetails::Setup(_), Some(_)) => return Ok(()),
        (_, None) => {
            return Err(
                InboundChannelUpdateError::new(InboundReason::ChannelNotFound, update)
                    .with_context("update for unknown channel"),
            )
        }
        (_, Some(state)) => state,
    };

    if update.channel_address != state.channel_address {
        return Err(malformed("update for another channel"));
    }
    let ids = state.identifiers();
    let (from, to) = (update.from_identifier, update.to_identifier);
    if !((from == ids[0] && to == ids[1]) || (from == ids[1] && to == ids[0])) {
        return Err(malformed("sender or receiver not a participant"));
    }
    if update.balance.to != state.participants() {
        return Err(malformed("balance not addressed to [alice, bob]"));
    }
    if update.signature_count() == 1 {
        let sender_signed = if from == ids[0] {
            update.alice_signature.is_some()
        } else {
            update.bob_signature.is_some()
        };
        if !sender_signed {
            return Err(malformed("signed by the receiver only"));
        }
    }

    match &update.details {
        UpdateDetails::Create(details) => {
            let expected_id = transfer_id(
                state.channel_address,
                update.nonce,
                details.transfer_definition,
                details.transfer_timeout,
            )
            .map_err(|e| malformed(&e.to_string()))?;
            if details.transfer_id != expected_id {
                return Err(malformed("unexpected transfer id"));
            }
            let transfer =
                transfer_from_details(state, &from, update.nonce, update.asset_id, details)
                    .ok_or_else(|| malformed("unknown transfer initiator"))?;
            let leaf = transfer
                .core()
                .leaf()
                .map_err(|e| malformed(&e.to_string()))?;
            let leaves = active_transfers
                .iter()
                .map(|t| t.core().leaf())
                .chain(core::iter::once(Ok(leaf)))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| malformed(&e.to_string()))?;
            let root = MerkleTree::new(leaves).root();
            if root != details.merkle_root
                || !verify_proof(&details.merkle_proof_data, &details.merkle_root, &leaf)
            {
                return Err(malformed("merkle root does not cover the new transfer"));
            }
        }
        UpdateDetails::Resolve(details) => {
            // An unknown transfer is reported by the later stages.
            if active_transfers
                .iter()
                .any(|t| t.transfer_id == details.transfer_id)
            {
                let remaining = active_transfers
                    .iter()
                    .filter(|t| t.transfer_id != details.transfer_id)
                    .map(FullTransferState::core)
                    .collect::<Vec<_>>();
                let root = MerkleTree::from_transfers(&remaining)
                    .map_err(|e| malformed(&e.to_string()))?
                    .root();
                if root != details.merkle_root {
                    return Err(malformed("merkle root still covers the resolved transfer"));
                }
            }
        }
        UpdateDetails::Setup(_) | UpdateDetails::Deposit(_) => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        abiencode::types::Address,
        channel::sign_channel_state,
        policy::AcceptAll,
        test_utils::*,
    };

    const PREIMAGE: [u8; 32] = [3; 32];

    fn validator<'a>(f: &'a Fixture, signer: &'a Signer) -> Validator<'a> {
        Validator {
            signer,
            chain: &f.chain,
            external: &AcceptAll,
            config: &f.config,
        }
    }

    fn create(f: &Fixture, value: u64) -> CreateParams {
        create_params(
            f.channel_address(),
            f.alice.address(),
            f.bob.address(),
            value,
            &PREIMAGE,
        )
    }

    async fn params_error(
        f: &Fixture,
        params: UpdateParams,
        state: Option<&FullChannelState>,
        active: &[FullTransferState],
        initiator: &Signer,
    ) -> ValidationReason {
        validator(f, &f.alice)
            .validate_update_params(&params, state, active, &initiator.identifier())
            .await
            .unwrap_err()
            .reason
    }

    #[tokio::test]
    async fn setup_params() {
        let f = Fixture::new();
        let v = validator(&f, &f.alice);
        let alice = f.alice.identifier();

        v.validate_update_params(&f.setup_params(CHANNEL_TIMEOUT), None, &[], &alice)
            .await
            .unwrap();

        let mut params = f.setup_params(CHANNEL_TIMEOUT);
        if let UpdateParams::Setup(p) = &mut params {
            p.channel_address = Address::ZERO;
        }
        let reason = params_error(&f, params, None, &[], &f.alice).await;
        assert_eq!(reason, ValidationReason::InvalidChannelAddress);

        let reason = params_error(&f, f.setup_params(10), None, &[], &f.alice).await;
        assert_eq!(reason, ValidationReason::InvalidChannelTimeout);

        let mut params = f.setup_params(CHANNEL_TIMEOUT);
        if let UpdateParams::Setup(p) = &mut params {
            p.counterparty_identifier = alice;
        }
        let reason = params_error(&f, params, None, &[], &f.alice).await;
        assert_eq!(reason, ValidationReason::InvalidCounterparty);

        let state = f.funded(1, 1).await;
        let reason = params_error(&f, f.setup_params(CHANNEL_TIMEOUT), Some(&state), &[], &f.alice)
            .await;
        assert_eq!(reason, ValidationReason::ChannelAlreadySetup);
    }

    #[tokio::test]
    async fn create_params_checks() {
        let f = Fixture::new();
        let state = f.funded(50, 50).await;
        let v = validator(&f, &f.alice);

        v.validate_update_params(
            &UpdateParams::Create(create(&f, 50)),
            Some(&state),
            &[],
            &f.alice.identifier(),
        )
        .await
        .unwrap();

        let cases = [
            (create(&f, 51), ValidationReason::InsufficientFunds),
            (
                CreateParams {
                    timeout: CHANNEL_TIMEOUT,
                    ..create(&f, 1)
                },
                ValidationReason::TransferTimeoutAboveChannel,
            ),
            (
                CreateParams {
                    timeout: 10,
                    ..create(&f, 1)
                },
                ValidationReason::InvalidTransferTimeout,
            ),
            (
                CreateParams {
                    transfer_initial_state: vec![0; 32],
                    ..create(&f, 1)
                },
                ValidationReason::InvalidInitialState,
            ),
            (
                CreateParams {
                    asset_id: Address([0xee; 20]),
                    ..create(&f, 1)
                },
                ValidationReason::AssetNotFound,
            ),
        ];
        for (params, expected) in cases {
            let reason =
                params_error(&f, UpdateParams::Create(params), Some(&state), &[], &f.alice).await;
            assert_eq!(reason, expected);
        }

        let reason = params_error(
            &f,
            UpdateParams::Create(create(&f, 1)),
            None,
            &[],
            &f.alice,
        )
        .await;
        assert_eq!(reason, ValidationReason::ChannelNotFound);
    }

    #[tokio::test]
    async fn resolve_params_checks() {
        let f = Fixture::new();
        let state = f.funded(50, 50).await;
        let created = f
            .generate(&f.alice, &UpdateParams::Create(create(&f, 10)), Some(&state), &[])
            .await;
        let channel = &created.applied.channel;
        let active = &created.applied.active_transfers;
        let transfer = &active[0];
        let resolve = resolve_params(f.channel_address(), transfer, &PREIMAGE);

        validator(&f, &f.bob)
            .validate_update_params(
                &UpdateParams::Resolve(resolve.clone()),
                Some(channel),
                active,
                &f.bob.identifier(),
            )
            .await
            .unwrap();

        let reason = params_error(
            &f,
            UpdateParams::Resolve(resolve.clone()),
            Some(channel),
            active,
            &f.alice,
        )
        .await;
        assert_eq!(reason, ValidationReason::OnlyResponderCanInitiateResolve);

        let bad_resolver = ResolveParams {
            transfer_resolver: vec![1; 5],
            ..resolve.clone()
        };
        let reason = params_error(
            &f,
            UpdateParams::Resolve(bad_resolver),
            Some(channel),
            active,
            &f.bob,
        )
        .await;
        assert_eq!(reason, ValidationReason::InvalidResolver);

        let unknown = ResolveParams {
            transfer_id: Default::default(),
            ..resolve
        };
        let reason = params_error(&f, UpdateParams::Resolve(unknown), Some(channel), active, &f.bob)
            .await;
        assert_eq!(reason, ValidationReason::TransferNotActive);
    }

    /// Alice's create on top of a funded channel, as bob receives it.
    async fn proposed_create(f: &Fixture) -> (FullChannelState, GeneratedUpdate) {
        let state = f.funded(50, 50).await;
        let created = f
            .generate(&f.alice, &UpdateParams::Create(create(f, 10)), Some(&state), &[])
            .await;
        (state, created)
    }

    async fn inbound_error(
        f: &Fixture,
        update: &ChannelUpdate,
        state: &FullChannelState,
    ) -> InboundReason {
        validator(f, &f.bob)
            .validate_and_apply_inbound_update(update, Some(state), &[])
            .await
            .unwrap_err()
            .reason
    }

    #[tokio::test]
    async fn inbound_single_signed_is_rederived() {
        let f = Fixture::new();
        let (state, created) = proposed_create(&f).await;

        let accepted = validator(&f, &f.bob)
            .validate_and_apply_inbound_update(&created.update, Some(&state), &[])
            .await
            .unwrap();
        assert_eq!(accepted.update, created.update);
        assert_eq!(accepted.applied, created.applied);

        let mut tampered = created.update.clone();
        tampered.balance.amount[0] = amount(45);
        assert_eq!(
            inbound_error(&f, &tampered, &state).await,
            InboundReason::UpdateMismatch
        );

        let mut unsigned = created.update.clone();
        unsigned.alice_signature = None;
        assert_eq!(
            inbound_error(&f, &unsigned, &state).await,
            InboundReason::MalformedUpdate
        );

        // signed by the receiver instead of the sender
        let mut wrong_signer = created.update.unsigned();
        wrong_signer.bob_signature =
            Some(sign_channel_state(&f.bob, &created.applied.channel).unwrap());
        assert_eq!(
            inbound_error(&f, &wrong_signer, &state).await,
            InboundReason::MalformedUpdate
        );

        // the sender's slot holding someone else's signature
        let mut foreign = created.update.clone();
        foreign.alice_signature =
            Some(sign_channel_state(&signer(9), &created.applied.channel).unwrap());
        assert_eq!(
            inbound_error(&f, &foreign, &state).await,
            InboundReason::BadSignatures
        );
    }

    #[tokio::test]
    async fn inbound_double_signed_is_checked_by_signature() {
        let f = Fixture::new();
        let (state, created) = proposed_create(&f).await;

        let mut countersigned = created.update.clone();
        countersigned.bob_signature =
            Some(sign_channel_state(&f.bob, &created.applied.channel).unwrap());
        let accepted = validator(&f, &f.bob)
            .validate_and_apply_inbound_update(&countersigned, Some(&state), &[])
            .await
            .unwrap();
        assert_eq!(accepted.applied.channel.nonce, state.nonce + 1);
        assert_eq!(accepted.applied.channel.latest_update, countersigned);

        let mut forged = created.update.clone();
        forged.bob_signature = forged.alice_signature;
        assert_eq!(
            inbound_error(&f, &forged, &state).await,
            InboundReason::BadSignatures
        );
    }

    #[tokio::test]
    async fn inbound_shape_and_nonce() {
        let f = Fixture::new();
        let state = f.funded(50, 50).await;
        f.chain.alice_deposit(f.channel_address(), ASSET, 5);
        let deposit = f
            .generate(&f.alice, &f.deposit_params(), Some(&state), &[])
            .await;

        let mut skipped = deposit.update.clone();
        skipped.nonce += 1;
        assert_eq!(
            inbound_error(&f, &skipped, &state).await,
            InboundReason::InvalidUpdateNonce
        );

        let mut to_self = deposit.update.clone();
        to_self.to_identifier = to_self.from_identifier;
        assert_eq!(
            inbound_error(&f, &to_self, &state).await,
            InboundReason::MalformedUpdate
        );

        let mut swapped = deposit.update.clone();
        swapped.balance.to.reverse();
        assert_eq!(
            inbound_error(&f, &swapped, &state).await,
            InboundReason::MalformedUpdate
        );

        let mut other_channel = deposit.update.clone();
        other_channel.channel_address = Address([0x01; 20]);
        assert_eq!(
            inbound_error(&f, &other_channel, &state).await,
            InboundReason::MalformedUpdate
        );
    }

    #[tokio::test]
    async fn inbound_create_with_wrong_merkle_root() {
        let f = Fixture::new();
        let (state, created) = proposed_create(&f).await;

        let mut update = created.update.clone();
        if let UpdateDetails::Create(details) = &mut update.details {
            details.merkle_root = Default::default();
        }
        let err = validate_update_shape(&update, Some(&state), &[]).unwrap_err();
        assert_eq!(err.reason, InboundReason::MalformedUpdate);
        assert_eq!(err.state.as_deref(), Some(&state));
    }

    /// A setup between `initiator` and `counterparty`, signed by both.
    async fn double_signed_setup(
        f: &Fixture,
        initiator: &Signer,
        counterparty: &Signer,
        channel_address: Address,
        timeout: u64,
    ) -> ChannelUpdate {
        let params = UpdateParams::Setup(SetupParams {
            channel_address,
            counterparty_identifier: counterparty.identifier(),
            timeout,
            network_context: network_context(),
        });
        let generated = generate_update(
            initiator,
            &f.chain,
            &params,
            None,
            &[],
            &initiator.identifier(),
        )
        .await
        .unwrap();
        let mut update = generated.update;
        update.bob_signature =
            Some(sign_channel_state(counterparty, &generated.applied.channel).unwrap());
        update
    }

    #[tokio::test]
    async fn double_signed_setup_is_checked_like_params() {
        let f = Fixture::new();
        let v = validator(&f, &f.bob);
        let admit = |update: ChannelUpdate| {
            let v = v;
            async move {
                v.validate_and_apply_inbound_update(&update, None, &[])
                    .await
                    .map_err(|e| e.reason)
            }
        };

        let update =
            double_signed_setup(&f, &f.alice, &f.bob, f.channel_address(), CHANNEL_TIMEOUT).await;
        let accepted = admit(update.clone()).await.unwrap();
        assert_eq!(accepted.applied.channel.bob, f.bob.address());

        let (stranger, other) = (signer(3), signer(4));
        let foreign = double_signed_setup(&f, &stranger, &other, Address([0x42; 20]), 1).await;
        assert_eq!(admit(foreign).await, Err(InboundReason::ValidationFailed));

        let short =
            double_signed_setup(&f, &f.alice, &f.bob, f.channel_address(), 1).await;
        assert_eq!(admit(short).await, Err(InboundReason::ValidationFailed));

        let elsewhere =
            double_signed_setup(&f, &f.alice, &f.bob, Address([0x42; 20]), CHANNEL_TIMEOUT).await;
        assert_eq!(admit(elsewhere).await, Err(InboundReason::ValidationFailed));

        let mut misaddressed = update;
        misaddressed.balance.to[1] = Address([0x42; 20]);
        assert_eq!(admit(misaddressed).await, Err(InboundReason::MalformedUpdate));
    }

    #[tokio::test]
    async fn chain_outage_is_reported() {
        let f = Fixture::new();
        let (state, created) = proposed_create(&f).await;
        f.chain.set_unavailable(true);

        let reason = params_error(&f, f.setup_params(CHANNEL_TIMEOUT), None, &[], &f.alice).await;
        assert_eq!(reason, ValidationReason::ChainServiceFailure);

        let reason =
            params_error(&f, UpdateParams::Create(create(&f, 1)), Some(&state), &[], &f.alice)
                .await;
        assert_eq!(reason, ValidationReason::ChainServiceFailure);

        assert_eq!(
            inbound_error(&f, &created.update, &state).await,
            InboundReason::ChainServiceFailure
        );
    }

    #[test]
    fn params_are_recovered_from_updates() {
        let details = crate::channel::DepositDetails {
            latest_deposit_nonce: 2,
        };
        let update = ChannelUpdate {
            channel_address: Address([9; 20]),
            from_identifier: signer(1).identifier(),
            to_identifier: signer(2).identifier(),
            nonce: 5,
            asset_id: Address([8; 20]),
            balance: Default::default(),
            details: UpdateDetails::Deposit(details),
            alice_signature: None,
            bob_signature: None,
        };
        assert_eq!(
            params_from_update(&update),
            UpdateParams::Deposit(DepositParams {
                channel_address: Address([9; 20]),
                asset_id: Address([8; 20]),
            })
        );
    }
}
