//! Error type and Return values used by the Serialization.

use core::fmt::Display;

use serde::ser;

/// Represents all possible errors that can happen during Serialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The struct contains a type that is not directly representable in
    /// Solidity types.
    ///
    /// For example floating point numbers, options, enums and maps. Commitment
    /// types are expected to use plain structs, fixed-size arrays, `Vec<T>`
    /// and the newtypes in [types][super::types] only.
    TypeNotRepresentable(&'static str),
    /// Error raised by a `Serialize` implementation via [ser::Error::custom].
    Custom(String),
}

impl ser::Error for Error {
    fn custom<T>(msg: T) -> Self
    where
        T: Display,
    {
        Error::Custom(msg.to_string())
    }
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::TypeNotRepresentable(type_name) => {
                f.write_str("type is not representable in abi encoding: ")?;
                f.write_str(type_name)
            }
            Error::Custom(msg) => f.write_str(msg),
        }
    }
}

/// Alias for `Result` using the [Error] returned by the Serializer.
pub type Result<T> = core::result::Result<T, Error>;
