//! Merkle tree over the active transfers of a channel.
//!
//! Leaves are the keccak256 hashes of the abi encoded [CoreTransferState]s.
//! They are sorted before building the tree and every pair is hashed in sorted
//! order, so the root only depends on the set of active transfers and proofs
//! do not need to carry left/right information. A node without a sibling is
//! promoted to the next layer unchanged. The root of an empty tree is the zero
//! hash.

use sha3::{Digest, Keccak256};

use crate::{abiencode, channel::CoreTransferState, Hash};

fn hash_pair(a: &Hash, b: &Hash) -> Hash {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let mut hasher = Keccak256::new();
    hasher.update(lo.0);
    hasher.update(hi.0);
    Hash(hasher.finalize().into())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleTree {
    // layers[0] are the sorted leaves, the last layer holds the root.
    layers: Vec<Vec<Hash>>,
}

impl MerkleTree {
    pub fn new<I: IntoIterator<Item = Hash>>(leaves: I) -> Self {
        let mut leaves: Vec<Hash> = leaves.into_iter().collect();
        leaves.sort();
        leaves.dedup();

        let mut layers = vec![leaves];
        while let Some(layer) = layers.last() {
            if layer.len() <= 1 {
                break;
            }
            let next = layer
                .chunks(2)
                .filter_map(|pair| pair.iter().copied().reduce(|a, b| hash_pair(&a, &b)))
                .collect();
            layers.push(next);
        }
        Self { layers }
    }

    pub fn from_transfers<'a, I>(transfers: I) -> Result<Self, abiencode::Error>
    where
        I: IntoIterator<Item = &'a CoreTransferState>,
    {
        let leaves = transfers
            .into_iter()
            .map(CoreTransferState::leaf)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(leaves))
    }

    pub fn root(&self) -> Hash {
        self.layers
            .last()
            .and_then(|layer| layer.first())
            .copied()
            .unwrap_or(Hash::ZERO)
    }

    pub fn len(&self) -> usize {
        self.layers[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sibling hashes from the leaf up to (excluding) the root. `None` if the
    /// leaf is not part of the tree.
    pub fn proof(&self, leaf: &Hash) -> Option<Vec<Hash>> {
        let mut index = self.layers[0].binary_search(leaf).ok()?;
        let mut proof = Vec::new();
        for layer in &self.layers[..self.layers.len() - 1] {
            let sibling = index ^ 1;
            if let Some(hash) = layer.get(sibling) {
                proof.push(*hash);
            }
            index /= 2;
        }
        Some(proof)
    }
}

pub fn verify_proof(proof: &[Hash], root: &Hash, leaf: &Hash) -> bool {
    let computed = proof
        .iter()
        .fold(*leaf, |node, sibling| hash_pair(&node, sibling));
    computed == *root
}
