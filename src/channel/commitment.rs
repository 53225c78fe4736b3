use super::{CoreChannelState, FullChannelState, PartIdx, ALICE, BOB};
use crate::{
    abiencode::{
        self,
        types::{Address, Hash, Signature},
    },
    sig::{self, recover_signer, Signer},
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommitmentError {
    #[error("could not encode channel state: {0}")]
    Encoding(#[from] abiencode::Error),
    #[error(transparent)]
    Signature(#[from] sig::Error),
    #[error("missing signature of participant {0}")]
    MissingSignature(PartIdx),
    #[error("signature of participant {participant} recovers to {recovered}")]
    WrongSigner {
        participant: PartIdx,
        recovered: Address,
    },
}

/// Which signatures a state must carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureRequirement {
    Both,
    Only(PartIdx),
}

impl SignatureRequirement {
    fn requires(&self, participant: PartIdx) -> bool {
        match self {
            SignatureRequirement::Both => true,
            SignatureRequirement::Only(p) => *p == participant,
        }
    }
}

/// The signed core state, as handed to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelCommitment {
    pub state: CoreChannelState,
    pub alice_signature: Option<Signature>,
    pub bob_signature: Option<Signature>,
}

impl ChannelCommitment {
    /// Commitment carrying the signatures of the update that produced
    /// `state`.
    pub fn from_state(state: &FullChannelState) -> Self {
        Self {
            state: state.core(),
            alice_signature: state.latest_update.alice_signature,
            bob_signature: state.latest_update.bob_signature,
        }
    }
}

/// `keccak256(abi.encode(state))`, the digest both participants sign.
pub fn hash_channel_commitment(state: &CoreChannelState) -> Result<Hash, abiencode::Error> {
    abiencode::to_hash(state)
}

pub fn sign_channel_state(
    signer: &Signer,
    state: &FullChannelState,
) -> Result<Signature, CommitmentError> {
    let hash = hash_channel_commitment(&state.core())?;
    Ok(signer.sign_eth(hash)?)
}

/// Checks that all present signatures belong to their participant and that
/// the required ones are present.
pub fn validate_channel_signatures(
    state: &FullChannelState,
    alice_signature: Option<Signature>,
    bob_signature: Option<Signature>,
    required: SignatureRequirement,
) -> Result<(), CommitmentError> {
    let hash = hash_channel_commitment(&state.core())?;
    let signatures = [(ALICE, alice_signature), (BOB, bob_signature)];
    let participants = state.participants();

    for (participant, signature) in signatures {
        match signature {
            Some(signature) => {
                let recovered = recover_signer(hash, signature)?;
                if recovered != participants[participant] {
                    return Err(CommitmentError::WrongSigner {
                        participant,
                        recovered,
                    });
                }
            }
            None if required.requires(participant) => {
                return Err(CommitmentError::MissingSignature(participant));
            }
            None => {}
        }
    }
    Ok(())
}
