//! Signer using the k256 Rust crate (implementation of ecdsa in Rust).

use crate::abiencode::types::{Address, Hash, Signature};
use k256::{
    ecdsa::{
        recoverable,
        signature::{hazmat::PrehashSigner, Signature as k256Signature},
        SigningKey, VerifyingKey,
    },
    elliptic_curve::sec1::ToEncodedPoint,
};

use super::{hash_to_eth_signed_msg_hash, Error, Identifier};

fn key_to_address(key: &VerifyingKey) -> Address {
    // See https://ethereum.stackexchange.com/questions/65233/goethereum-getting-public-key-from-private-key-hex-formatting
    //
    // Throw away the first byte, which is not part of the public key. It is
    // added by the uncompressed sec1 encoding.
    let point = key.to_encoded_point(false);
    let mut pk = [0u8; 64];
    pk.copy_from_slice(&point.as_bytes()[1..]);
    Address::from_uncompressed_key(&pk)
}

fn key_to_identifier(key: &VerifyingKey) -> Identifier {
    let point = key.to_encoded_point(true);
    let mut id = [0u8; 33];
    id.copy_from_slice(point.as_bytes());
    Identifier(id)
}

#[derive(Debug)]
pub struct Signer {
    key: SigningKey,
    addr: Address,
    identifier: Identifier,
}

impl Signer {
    pub fn new<R: rand::Rng + rand::CryptoRng>(rng: &mut R) -> Self {
        Self::from_key(SigningKey::random(rng))
    }

    pub fn from_secret_bytes(secret: &[u8; 32]) -> Result<Self, Error> {
        let key = SigningKey::from_bytes(secret).map_err(|e| Error::InvalidKey(e.to_string()))?;
        Ok(Self::from_key(key))
    }

    fn from_key(key: SigningKey) -> Self {
        let verifying = key.verifying_key();
        Self {
            addr: key_to_address(&verifying),
            identifier: key_to_identifier(&verifying),
            key,
        }
    }

    pub fn address(&self) -> Address {
        self.addr
    }

    pub fn identifier(&self) -> Identifier {
        self.identifier
    }

    pub fn sign_eth(&self, msg: Hash) -> Result<Signature, Error> {
        // "\x19Ethereum Signed Message:\n32" format
        let hash = hash_to_eth_signed_msg_hash(msg);

        let sig: recoverable::Signature = self
            .key
            .sign_prehash(&hash.0)
            .map_err(|e| Error::SigningFailed(e.to_string()))?;

        // This Signature type already has the format we need: 65 bytes
        // containing r, s and v in this order. We still have to add 27 to v
        // for the signature to be valid in the EVM.
        let mut sig_bytes = [0u8; 65];
        sig_bytes.copy_from_slice(sig.as_bytes());
        debug_assert!(sig_bytes[32] & 0x80 == 0);
        sig_bytes[64] += 27;

        Ok(Signature(sig_bytes))
    }
}

/// Recover the address that produced `eth_sig` over `msg` (without the
/// `Ethereum Signed Message` prefix).
pub fn recover_signer(msg: Hash, eth_sig: Signature) -> Result<Address, Error> {
    let hash = hash_to_eth_signed_msg_hash(msg);

    // Undo adding the 27, to go back to the format expected below
    let mut sig_bytes: [u8; 65] = eth_sig.0;
    sig_bytes[64] = sig_bytes[64]
        .checked_sub(27)
        .ok_or_else(|| Error::InvalidSignature(format!("invalid v: {}", eth_sig.0[64])))?;

    let sig = recoverable::Signature::from_bytes(&sig_bytes)
        .map_err(|e| Error::InvalidSignature(e.to_string()))?;

    let verifying_key = sig
        .recover_verifying_key_from_digest_bytes(&hash.0.into())
        .map_err(|e| Error::InvalidSignature(e.to_string()))?;
    Ok(key_to_address(&verifying_key))
}

pub fn identifier_to_address(identifier: &Identifier) -> Result<Address, Error> {
    let key = VerifyingKey::from_sec1_bytes(&identifier.0)
        .map_err(|_| Error::MalformedIdentifier(identifier.to_string()))?;
    Ok(key_to_address(&key))
}
