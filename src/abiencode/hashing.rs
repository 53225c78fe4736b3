use super::{ser::to_token, token, types::Hash, Result};

use serde::Serialize;
use sha3::{Digest, Keccak256};

/// `abi.encode(value)`
pub fn to_bytes<T>(value: &T) -> Result<Vec<u8>>
where
    T: Serialize + ?Sized,
{
    Ok(token::encode(&to_token(value)?))
}

/// `keccak256(abi.encode(value))`
pub fn to_hash<T>(value: &T) -> Result<Hash>
where
    T: Serialize + ?Sized,
{
    Ok(keccak256(&to_bytes(value)?))
}

/// Hash raw bytes without any encoding (e.g. opaque transfer states).
pub fn keccak256(data: &[u8]) -> Hash {
    Hash(Keccak256::digest(data).into())
}
