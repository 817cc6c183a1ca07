//! Sponsor wallet derivation.
//!
//! The oracle node publishes an extended public key; the wallet that pays for
//! fulfilling a requester's requests sits at a non-hardened path computed from
//! the requester (sponsor) address. The node can only sign for wallets at that
//! exact path, so funding any other address loses the funds.

use crate::error::{Error, Result};
use crate::utils::address_from_public_key;
use bip32::{ChildNumber, XPub};
use std::str::FromStr;
use web3::types::{Address, U256};

/// Protocol id of the request-response protocol, first path segment.
pub const PROTOCOL_ID: u32 = 1;

const SEGMENT_BITS: usize = 31;
const SEGMENTS: usize = 6;

/// Path segments below the xpub for `sponsor`: `PROTOCOL_ID` followed by the
/// address split into six 31-bit chunks, least significant first.
pub fn wallet_path(sponsor: &Address) -> Vec<u32> {
    let value = U256::from_big_endian(sponsor.as_bytes());
    let mask = U256::from((1u64 << SEGMENT_BITS) - 1);
    let mut path = Vec::with_capacity(SEGMENTS + 1);
    path.push(PROTOCOL_ID);
    for i in 0..SEGMENTS {
        path.push(((value >> (SEGMENT_BITS * i)) & mask).low_u32());
    }
    path
}

fn parse_xpub(extended_public_key: &str) -> Result<XPub> {
    XPub::from_str(extended_public_key.trim())
        .map_err(|e| Error::InvalidInput(format!("malformed extended public key: {}", e)))
}

fn derive(xpub: &XPub, path: &[u32]) -> Result<XPub> {
    let mut node = xpub.clone();
    for index in path {
        node = node.derive_child(ChildNumber::new(*index, false)?)?;
    }
    Ok(node)
}

fn node_address(node: &XPub) -> Result<Address> {
    let public = secp256k1::PublicKey::from_slice(&node.to_bytes())?;
    Ok(address_from_public_key(&public))
}

/// Address the oracle node signs from; it sits at `0/0` below its xpub.
pub fn node_address_of(extended_public_key: &str) -> Result<Address> {
    node_address(&derive(&parse_xpub(extended_public_key)?, &[0, 0])?)
}

/// Derives the sponsor wallet that the oracle node uses to fulfill requests
/// made by `sponsor`.
///
/// Fails with [`Error::InvalidInput`] when the key is malformed or does not
/// belong to `oracle_node_id`.
pub fn derive_sponsor_wallet(extended_public_key: &str, oracle_node_id: &Address, sponsor: &Address) -> Result<Address> {
    let xpub = parse_xpub(extended_public_key)?;
    let node = node_address(&derive(&xpub, &[0, 0])?)?;
    if &node != oracle_node_id {
        return Err(Error::InvalidInput(format!(
            "extended public key belongs to {:?}, not oracle node {:?}",
            node, oracle_node_id
        )));
    }
    node_address(&derive(&xpub, &wallet_path(sponsor))?)
}
