//! Serialize any `&[u8]` as solidity `bytes` (dynamic length bytes).
//!
//! Without this, it would be serialized to a `uint8[]` of fixed or dynamic
//! length.
//!
//! # Example usage
//! ```
//! # use serde::Serialize;
//! # use vector_core::abiencode::as_bytes;
//!
//! #[derive(Serialize, Debug)]
//! pub struct TransferState {
//!     #[serde(with = "as_bytes")]
//!     pub data: Vec<u8>,
//! }
//! ```

use super::ser::MARK_DYNAMIC_BYTES;
use serde::{Serialize, Serializer};

/// Internal data structure allowing us to serialize the data using
/// `serialize_bytes`, which unfortunately cannot be specified when calling
/// `serialize_newtype_struct`.
struct Bytes<'a>(&'a [u8]);

impl<'a> Serialize for Bytes<'a> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bytes(self.0)
    }
}

pub fn serialize<S>(v: &[u8], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_newtype_struct(MARK_DYNAMIC_BYTES, &Bytes(v))
}
