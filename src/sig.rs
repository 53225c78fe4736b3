//! Handles the creation and verification of (Ethereum) Signatures.
//!
//! Participants are identified by their compressed secp256k1 public key
//! ([Identifier]). The on-chain [Address] is derived from it and is what
//! [recover_signer] returns.

use core::{fmt, str::FromStr};

use crate::abiencode::types::{Address, Hash};
use sha3::{Digest, Keccak256};

#[cfg(feature = "secp256k1")]
mod secp256k1;
#[cfg(feature = "secp256k1")]
pub use self::secp256k1::{identifier_to_address, recover_signer, Signer};

#[cfg(all(feature = "k256", not(feature = "secp256k1")))]
mod k256;
#[cfg(all(feature = "k256", not(feature = "secp256k1")))]
pub use self::k256::{identifier_to_address, recover_signer, Signer};


const IDENTIFIER_PREFIX: &str = "vector";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("could not sign: {0}")]
    SigningFailed(String),
    #[error("malformed identifier: {0}")]
    MalformedIdentifier(String),
}

/// Public identifier of a channel participant: its compressed (33 byte)
/// secp256k1 public key, displayed as `vector` followed by the hex encoding.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Identifier(pub [u8; 33]);

impl Identifier {
    pub fn to_address(&self) -> Result<Address, Error> {
        identifier_to_address(self)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{IDENTIFIER_PREFIX}{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for Identifier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let body = s
            .strip_prefix(IDENTIFIER_PREFIX)
            .ok_or_else(|| Error::MalformedIdentifier(s.to_string()))?;
        let bytes = hex::decode(body).map_err(|e| Error::MalformedIdentifier(e.to_string()))?;
        let bytes: [u8; 33] = bytes
            .try_into()
            .map_err(|_| Error::MalformedIdentifier(s.to_string()))?;
        Ok(Identifier(bytes))
    }
}

impl Default for Identifier {
    fn default() -> Self {
        Identifier([0; 33])
    }
}

/// Add the `\x19Ethereum Signed Message\n<length>` prefix to hash.
///
/// This is the format expected by the Solidity contracts.
fn hash_to_eth_signed_msg_hash(hash: Hash) -> Hash {
    // Packed encoding => We can't use the serializer
    let mut hasher = Keccak256::new();
    hasher.update(b"\x19Ethereum Signed Message:\n32");
    hasher.update(hash.0);
    Hash(hasher.finalize().into())
}
