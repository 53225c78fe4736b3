//! Off-chain core of a two-party payment channel: update validation,
//! generation and application, the sync protocol between both participants
//! and the per-channel update queue.

/// Solidity ABI encoding via serde, used for commitments, transfer ids and
/// merkle leaves. Transfer states and resolvers are encoded with it, too.
pub mod abiencode {
    mod error;
    mod hashing;
    mod ser;
    mod token;

    pub mod as_bytes;
    pub mod types;

    pub use error::{Error, Result};
    pub use hashing::{keccak256, to_bytes, to_hash};

    #[cfg(test)]
    mod tests;
}
pub mod sig;

pub mod chain;
pub mod channel;
pub mod client;
pub mod config;
pub mod error;
pub mod merkle;
pub mod policy;
pub mod queue;
pub mod store;
pub mod sync;
pub mod update;
pub mod validate;
pub mod wire;

#[cfg(test)]
mod test_utils;

pub use abiencode::types::{Address, Hash, U256};
pub use client::{ChannelClient, ClientError, CommittedUpdate};
pub use config::Config;
