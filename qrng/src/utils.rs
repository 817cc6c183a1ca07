use crate::error::{Error, Result};
use sha3::{Digest, Keccak256};
use std::path::Path;
use std::str::FromStr;
use web3::signing::{Key, SecretKey, SecretKeyRef};
use web3::types::{Address, H256, U256};

const WEI_DECIMALS: usize = 18;

/// Ethereum address of an uncompressed or compressed secp256k1 public key.
pub fn address_from_public_key(public: &secp256k1::PublicKey) -> Address {
    let mut res = [0u8; 64];
    res.copy_from_slice(&public.serialize_uncompressed()[1..65]);
    Address::from(H256::from_slice(Keccak256::digest(res).as_slice()))
}

/// Signing key and its address. The key is web3's own secp256k1 type, the one
/// `Accounts::sign_transaction` accepts.
#[inline(always)]
pub fn extract_keypair_from_str(sk_str: &str) -> Result<(SecretKey, Address)> {
    let trimmed = sk_str.trim();
    let hex_key = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    let root_sk = SecretKey::from_str(hex_key)
        .map_err(|e| Error::Configuration(format!("malformed signing key: {}", e)))?;
    let address = SecretKeyRef::new(&root_sk).address();
    Ok((root_sk, address))
}

/// EIP-55 form of an address, used for anything a human reads or a document stores.
pub fn checksum(address: &Address) -> String {
    eth_checksum::checksum(&format!("{:?}", address))
}

pub fn parse_address(raw: &str) -> Result<Address> {
    let trimmed = raw.trim();
    let hex_part = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    if hex_part.len() != 40 {
        return Err(Error::InvalidInput(format!("not an address: {:?}", raw)));
    }
    Address::from_str(hex_part).map_err(|_| Error::InvalidInput(format!("not an address: {:?}", raw)))
}

/// Converts a decimal ether amount ("0.008", "10") into wei.
pub fn parse_ether(amount: &str) -> Result<U256> {
    let bad = || Error::InvalidInput(format!("not an ether amount: {:?}", amount));
    let amount = amount.trim();
    let (whole, fraction) = amount.split_once('.').unwrap_or((amount, ""));
    if whole.is_empty() && fraction.is_empty() {
        return Err(bad());
    }
    if fraction.len() > WEI_DECIMALS || !whole.chars().chain(fraction.chars()).all(|c| c.is_ascii_digit()) {
        return Err(bad());
    }
    let digits = format!("{}{:0<width$}", whole, fraction, width = WEI_DECIMALS);
    U256::from_dec_str(digits.trim_start_matches('0'))
        .or_else(|_| if digits.chars().all(|c| c == '0') { Ok(U256::zero()) } else { Err(bad()) })
}

/// Reads the first column of a header-less CSV file as addresses.
pub fn load_address_column<P: AsRef<Path>>(path: P) -> Result<Vec<Address>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;
    let mut addresses = Vec::new();
    for record in reader.records() {
        let record = record?;
        match record.get(0).map(str::trim) {
            Some(field) if !field.is_empty() => addresses.push(parse_address(field)?),
            _ => continue,
        }
    }
    Ok(addresses)
}
