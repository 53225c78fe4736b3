//! Intermediate representation between serde and the byte encoding.
//!
//! The [Serializer][super::ser::Serializer] turns a value into a tree of [Token]s,
//! which knows for every node whether it is static or dynamic. Encoding the
//! tree is then a single pass that writes the head of each tuple and appends
//! the tails of its dynamic members, like `abi.encode` does in Solidity.

pub(super) const SLOT_SIZE: usize = 32; // bytes

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// A single static 32 byte slot (uintN, intN, bool, address, bytesN).
    Word([u8; SLOT_SIZE]),
    /// Dynamic `bytes` or `string`.
    Bytes(Vec<u8>),
    /// Dynamic array `T[]`.
    Array(Vec<Token>),
    /// Structs and fixed-size arrays `T[N]`, encoded in place if all members
    /// are static.
    Tuple(Vec<Token>),
}

impl Token {
    pub fn word_right_aligned(v: &[u8]) -> Self {
        let mut slot = [0u8; SLOT_SIZE];
        slot[SLOT_SIZE - v.len()..].copy_from_slice(v);
        Token::Word(slot)
    }

    pub fn word_signed(negative: bool, v: &[u8]) -> Self {
        let filler = if negative { 0xff } else { 0x00 };
        let mut slot = [filler; SLOT_SIZE];
        slot[SLOT_SIZE - v.len()..].copy_from_slice(v);
        Token::Word(slot)
    }

    /// Static bytes are split into left-aligned slots, the last one padded
    /// with zeroes.
    pub fn static_bytes(v: &[u8]) -> Self {
        let words = v
            .chunks(SLOT_SIZE)
            .map(|chunk| {
                let mut slot = [0u8; SLOT_SIZE];
                slot[..chunk.len()].copy_from_slice(chunk);
                Token::Word(slot)
            })
            .collect::<Vec<_>>();
        match words.len() {
            1 => words.into_iter().next().unwrap_or(Token::Tuple(vec![])),
            _ => Token::Tuple(words),
        }
    }

    pub fn is_dynamic(&self) -> bool {
        match self {
            Token::Word(_) => false,
            Token::Bytes(_) | Token::Array(_) => true,
            Token::Tuple(members) => members.iter().any(Token::is_dynamic),
        }
    }

    /// Size of this token inside the head of the enclosing tuple.
    fn head_size(&self) -> usize {
        if self.is_dynamic() {
            return SLOT_SIZE;
        }
        match self {
            Token::Tuple(members) => members.iter().map(Token::head_size).sum(),
            _ => SLOT_SIZE,
        }
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Token::Word(slot) => out.extend_from_slice(slot),
            Token::Bytes(data) => {
                out.extend_from_slice(&Self::length_slot(data.len()));
                let rem = data.len() % SLOT_SIZE;
                out.extend_from_slice(data);
                if rem != 0 {
                    out.extend(core::iter::repeat(0u8).take(SLOT_SIZE - rem));
                }
            }
            Token::Array(items) => {
                out.extend_from_slice(&Self::length_slot(items.len()));
                encode_sequence(items, out);
            }
            Token::Tuple(members) => encode_sequence(members, out),
        }
    }

    fn length_slot(len: usize) -> [u8; SLOT_SIZE] {
        let mut slot = [0u8; SLOT_SIZE];
        slot[SLOT_SIZE - 8..].copy_from_slice(&(len as u64).to_be_bytes());
        slot
    }
}

/// Writes heads first, then the tails of all dynamic members. Offsets are
/// relative to the start of this sequence (after the length slot for
/// arrays).
fn encode_sequence(members: &[Token], out: &mut Vec<u8>) {
    let head_size: usize = members.iter().map(Token::head_size).sum();
    let mut tail = Vec::new();
    for member in members {
        if member.is_dynamic() {
            out.extend_from_slice(&Token::length_slot(head_size + tail.len()));
            member.encode_into(&mut tail);
        } else {
            member.encode_into(out);
        }
    }
    out.extend_from_slice(&tail);
}

/// Equivalent of `abi.encode(value)` for a single value.
///
/// Dynamic values are prefixed with the offset to their data (always one
/// slot), exactly like Solidity does for a single dynamic parameter.
pub fn encode(token: &Token) -> Vec<u8> {
    let mut out = Vec::new();
    encode_sequence(core::slice::from_ref(token), &mut out);
    out
}
