//! Signer using the secp256k1 crate (bindings to libsecp256k1).

use crate::abiencode::types::{Address, Hash, Signature};
use secp256k1::{
    ecdsa::{RecoverableSignature, RecoveryId},
    All, Message, PublicKey, Secp256k1, SecretKey,
};

use super::{hash_to_eth_signed_msg_hash, Error, Identifier};

fn key_to_address(pk: &PublicKey) -> Address {
    // Throw away the first byte, which is not part of the public key. It is
    // added by serialize_uncompressed due to the encoding used.
    let mut bytes = [0u8; 64];
    bytes.copy_from_slice(&pk.serialize_uncompressed()[1..]);
    Address::from_uncompressed_key(&bytes)
}

#[derive(Debug)]
pub struct Signer {
    secp: Secp256k1<All>,
    sk: SecretKey,
    addr: Address,
    identifier: Identifier,
}

impl Signer {
    pub fn new<R: rand::Rng + rand::CryptoRng>(rng: &mut R) -> Self {
        Self::from_key(SecretKey::new(rng))
    }

    pub fn from_secret_bytes(secret: &[u8; 32]) -> Result<Self, Error> {
        let sk = SecretKey::from_slice(secret).map_err(|e| Error::InvalidKey(e.to_string()))?;
        Ok(Self::from_key(sk))
    }

    fn from_key(sk: SecretKey) -> Self {
        let secp = Secp256k1::new();
        let pk = PublicKey::from_secret_key(&secp, &sk);
        Self {
            secp,
            sk,
            addr: key_to_address(&pk),
            identifier: Identifier(pk.serialize()),
        }
    }

    pub fn address(&self) -> Address {
        self.addr
    }

    pub fn identifier(&self) -> Identifier {
        self.identifier
    }

    /// Sign a hash using a Ethereum 65-byte recoverable signature.
    ///
    /// Note that this differs from transaction signatures, as it does not
    /// include the length.
    pub fn sign_eth(&self, msg: Hash) -> Result<Signature, Error> {
        // "\x19Ethereum Signed Message:\n32" format
        let hash = hash_to_eth_signed_msg_hash(msg);
        let message =
            Message::from_slice(&hash.0).map_err(|e| Error::SigningFailed(e.to_string()))?;

        // We have to use sign_ecdsa_recoverable because the smart contract must
        // be able to recover the address. This gives us the additional
        // information needed for v.
        let sig = self.secp.sign_ecdsa_recoverable(&message, &self.sk);
        let (v, rs) = sig.serialize_compact();

        // EIP-2 makes signatures with a non-canonical s invalid. The library
        // already produces canonical signatures, fail early if that changes.
        debug_assert!(rs[32] & 0x80 == 0);

        // The yParity (v) is offset by 27, see EIP-2098. Neither compact
        // signatures nor EIP-155 chain ids are used here.
        let v: u8 = 27 + v.to_i32() as u8;

        Ok(Signature::new(&rs, v))
    }
}

/// Recover the address that produced `eth_sig` over `msg` (without the
/// `Ethereum Signed Message` prefix).
pub fn recover_signer(msg: Hash, eth_sig: Signature) -> Result<Address, Error> {
    let secp = Secp256k1::verification_only();
    let hash = hash_to_eth_signed_msg_hash(msg);
    let message = Message::from_slice(&hash.0).map_err(|e| Error::InvalidSignature(e.to_string()))?;

    let rs = &eth_sig.0[..64];
    let v = eth_sig.0[64]
        .checked_sub(27)
        .ok_or_else(|| Error::InvalidSignature(format!("invalid v: {}", eth_sig.0[64])))?;

    let recid =
        RecoveryId::from_i32(v.into()).map_err(|e| Error::InvalidSignature(e.to_string()))?;
    let sig = RecoverableSignature::from_compact(rs, recid)
        .map_err(|e| Error::InvalidSignature(e.to_string()))?;

    let pk = secp
        .recover_ecdsa(&message, &sig)
        .map_err(|e| Error::InvalidSignature(e.to_string()))?;
    Ok(key_to_address(&pk))
}

pub fn identifier_to_address(identifier: &Identifier) -> Result<Address, Error> {
    let pk = PublicKey::from_slice(&identifier.0)
        .map_err(|_| Error::MalformedIdentifier(identifier.to_string()))?;
    Ok(key_to_address(&pk))
}
