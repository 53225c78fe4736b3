//! Channel, transfer and update types.

mod commitment;
mod params;
mod state;
mod transfer;
mod update;

pub use commitment::*;
pub use params::*;
pub use state::*;
pub use transfer::*;
pub use update::*;

/// Index of a participant in the channel.
///
/// `0` is alice (the party that proposed the channel), `1` is bob.
pub type PartIdx = usize;

pub const ALICE: PartIdx = 0;
pub const BOB: PartIdx = 1;
