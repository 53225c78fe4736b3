use super::{
    error::{Error, Result},
    token::Token,
};
use serde::{
    ser::{
        self, Impossible, SerializeSeq, SerializeStruct, SerializeTuple, SerializeTupleStruct,
    },
    Serialize,
};

/// Newtype name used for marking a value as dynamic `bytes`.
///
/// Due to limitations of the [serde::Serializer] trait we cannot represent the
/// solidity types `bytes` and `bytes32` at the same time: `serialize_bytes` is
/// used by the fixed-size types in [types][super::types] to write static
/// slots. Dynamic `bytes` are wrapped in a newtype struct with this name (see
/// [as_bytes][super::as_bytes]), which switches the next `serialize_bytes` call
/// to the dynamic representation. The characters have no special meaning, they
/// have just been chosen in a way that normal Rust types will never have this
/// name.
pub(super) const MARK_DYNAMIC_BYTES: &str = ":$&_DYNAMIC_BYTES";

/// Serializes a value into a [Token] tree.
///
/// - Integers and `bool` become one right-aligned slot.
/// - `serialize_bytes` writes left-aligned static slots (`bytesN`), unless
///   the value is marked as dynamic bytes.
/// - Strings become dynamic `bytes`.
/// - Sequences (`Vec<T>`, slices) become dynamic arrays `T[]`.
/// - Structs, tuples and fixed-size arrays become tuples.
/// - Newtype structs are single-member tuples.
#[derive(Default)]
pub struct Serializer {
    dynamic_bytes: bool,
}

pub fn to_token<T>(value: &T) -> Result<Token>
where
    T: Serialize + ?Sized,
{
    value.serialize(Serializer::default())
}

pub struct SequenceBuilder {
    members: Vec<Token>,
    dynamic: bool,
}

impl SequenceBuilder {
    fn push<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<()> {
        self.members.push(to_token(value)?);
        Ok(())
    }

    fn finish(self) -> Token {
        if self.dynamic {
            Token::Array(self.members)
        } else {
            Token::Tuple(self.members)
        }
    }
}

macro_rules! unsigned {
    ($name:ident, $T:ty) => {
        fn $name(self, v: $T) -> Result<Token> {
            Ok(Token::word_right_aligned(&v.to_be_bytes()))
        }
    };
}

macro_rules! signed {
    ($name:ident, $T:ty) => {
        fn $name(self, v: $T) -> Result<Token> {
            Ok(Token::word_signed(v < 0, &v.to_be_bytes()))
        }
    };
}

impl ser::Serializer for Serializer {
    type Ok = Token;
    type Error = Error;

    type SerializeSeq = SequenceBuilder;
    type SerializeTuple = SequenceBuilder;
    type SerializeTupleStruct = SequenceBuilder;
    type SerializeTupleVariant = Impossible<Token, Error>;
    type SerializeMap = Impossible<Token, Error>;
    type SerializeStruct = SequenceBuilder;
    type SerializeStructVariant = Impossible<Token, Error>;

    fn serialize_bool(self, v: bool) -> Result<Token> {
        self.serialize_u8(u8::from(v))
    }

    signed!(serialize_i8, i8);
    signed!(serialize_i16, i16);
    signed!(serialize_i32, i32);
    signed!(serialize_i64, i64);
    signed!(serialize_i128, i128);
    unsigned!(serialize_u8, u8);
    unsigned!(serialize_u16, u16);
    unsigned!(serialize_u32, u32);
    unsigned!(serialize_u64, u64);
    unsigned!(serialize_u128, u128);

    fn serialize_f32(self, _: f32) -> Result<Token> {
        Err(Error::TypeNotRepresentable("f32"))
    }

    fn serialize_f64(self, _: f64) -> Result<Token> {
        Err(Error::TypeNotRepresentable("f64"))
    }

    fn serialize_char(self, _: char) -> Result<Token> {
        Err(Error::TypeNotRepresentable("char"))
    }

    fn serialize_str(self, v: &str) -> Result<Token> {
        Ok(Token::Bytes(v.as_bytes().to_vec()))
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<Token> {
        if self.dynamic_bytes {
            Ok(Token::Bytes(v.to_vec()))
        } else {
            Ok(Token::static_bytes(v))
        }
    }

    fn serialize_none(self) -> Result<Token> {
        Err(Error::TypeNotRepresentable("none"))
    }

    fn serialize_some<T: ?Sized + Serialize>(self, _: &T) -> Result<Token> {
        Err(Error::TypeNotRepresentable("some"))
    }

    fn serialize_unit(self) -> Result<Token> {
        Err(Error::TypeNotRepresentable("unit"))
    }

    fn serialize_unit_struct(self, _: &'static str) -> Result<Token> {
        Err(Error::TypeNotRepresentable("unit struct"))
    }

    fn serialize_unit_variant(self, _: &'static str, _: u32, _: &'static str) -> Result<Token> {
        Err(Error::TypeNotRepresentable("unit variant (enum)"))
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        name: &'static str,
        value: &T,
    ) -> Result<Token> {
        if name == MARK_DYNAMIC_BYTES {
            return value.serialize(Serializer {
                dynamic_bytes: true,
            });
        }
        // Solidity has no newtypes, a tuple struct with a single member is
        // still a struct. Use `#[serde(transparent)]` to flatten it.
        Ok(Token::Tuple(vec![to_token(value)?]))
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: &T,
    ) -> Result<Token> {
        Err(Error::TypeNotRepresentable("newtype variant (enum)"))
    }

    fn serialize_seq(self, len: Option<usize>) -> Result<SequenceBuilder> {
        Ok(SequenceBuilder {
            members: Vec::with_capacity(len.unwrap_or_default()),
            dynamic: true,
        })
    }

    fn serialize_tuple(self, len: usize) -> Result<SequenceBuilder> {
        Ok(SequenceBuilder {
            members: Vec::with_capacity(len),
            dynamic: false,
        })
    }

    fn serialize_tuple_struct(self, _: &'static str, len: usize) -> Result<SequenceBuilder> {
        self.serialize_tuple(len)
    }

    fn serialize_tuple_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> Result<Self::SerializeTupleVariant> {
        Err(Error::TypeNotRepresentable("tuple variant (enum)"))
    }

    fn serialize_map(self, _: Option<usize>) -> Result<Self::SerializeMap> {
        Err(Error::TypeNotRepresentable("map"))
    }

    fn serialize_struct(self, _: &'static str, len: usize) -> Result<SequenceBuilder> {
        self.serialize_tuple(len)
    }

    fn serialize_struct_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> Result<Self::SerializeStructVariant> {
        Err(Error::TypeNotRepresentable("struct variant"))
    }
}

impl SerializeSeq for SequenceBuilder {
    type Ok = Token;
    type Error = Error;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<()> {
        self.push(value)
    }

    fn end(self) -> Result<Token> {
        Ok(self.finish())
    }
}

impl SerializeTuple for SequenceBuilder {
    type Ok = Token;
    type Error = Error;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<()> {
        self.push(value)
    }

    fn end(self) -> Result<Token> {
        Ok(self.finish())
    }
}

impl SerializeTupleStruct for SequenceBuilder {
    type Ok = Token;
    type Error = Error;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<()> {
        self.push(value)
    }

    fn end(self) -> Result<Token> {
        Ok(self.finish())
    }
}

impl SerializeStruct for SequenceBuilder {
    type Ok = Token;
    type Error = Error;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        _name: &'static str,
        value: &T,
    ) -> Result<()> {
        self.push(value)
    }

    fn end(self) -> Result<Token> {
        Ok(self.finish())
    }
}
