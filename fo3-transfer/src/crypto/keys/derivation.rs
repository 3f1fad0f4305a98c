//! Common key derivation functionality

use std::fmt;
use std::str::FromStr;

use hmac::{Hmac, Mac};
use secp256k1::{PublicKey as Secp256k1PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use sha2::Sha512;

use crate::error::{Error, Result};

type HmacSha512 = Hmac<Sha512>;

/// Offset added to an index to mark it hardened
pub const HARDENED_OFFSET: u32 = 0x8000_0000;

/// Supported chains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Chain {
    /// Bitcoin (SegWit, testnet)
    Bitcoin,
    /// Ethereum and EVM compatible chains
    Ethereum,
    /// Solana
    Solana,
}

impl Chain {
    /// Native token symbol
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Bitcoin => "BTC",
            Self::Ethereum => "ETH",
            Self::Solana => "SOL",
        }
    }

    /// Decimal places of the native token's smallest unit
    pub fn decimals(&self) -> u32 {
        match self {
            Self::Bitcoin => 8,
            Self::Ethereum => 18,
            Self::Solana => 9,
        }
    }

    /// Look up a chain by token symbol, case-insensitively
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol.trim().to_uppercase().as_str() {
            "BTC" => Some(Self::Bitcoin),
            "ETH" => Some(Self::Ethereum),
            "SOL" => Some(Self::Solana),
            _ => None,
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// A parsed BIP-32 style derivation path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivationPath {
    indices: Vec<u32>,
}

impl DerivationPath {
    /// Child indices, hardened ones carrying [`HARDENED_OFFSET`]
    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    /// Whether every component is hardened (required for ed25519)
    pub fn is_fully_hardened(&self) -> bool {
        self.indices.iter().all(|index| *index >= HARDENED_OFFSET)
    }
}

impl FromStr for DerivationPath {
    type Err = Error;

    fn from_str(path: &str) -> Result<Self> {
        let rest = path
            .strip_prefix("m/")
            .ok_or_else(|| Error::Derivation(format!("Invalid derivation path: {}", path)))?;

        let mut indices = Vec::new();
        for component in rest.split('/') {
            let (digits, hardened) = match component.strip_suffix('\'') {
                Some(digits) => (digits, true),
                None => (component, false),
            };

            let index = digits
                .parse::<u32>()
                .ok()
                .filter(|index| *index < HARDENED_OFFSET)
                .ok_or_else(|| {
                    Error::Derivation(format!("Invalid derivation path component: {}", component))
                })?;

            indices.push(if hardened { index + HARDENED_OFFSET } else { index });
        }

        Ok(Self { indices })
    }
}

impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("m")?;
        for index in &self.indices {
            if *index >= HARDENED_OFFSET {
                write!(f, "/{}'", index - HARDENED_OFFSET)?;
            } else {
                write!(f, "/{}", index)?;
            }
        }
        Ok(())
    }
}

/// Signing capability shared by every derived chain key
pub trait ChainSigner: Send + Sync {
    /// The chain this key belongs to
    fn chain(&self) -> Chain;

    /// Address in the chain's canonical text form
    fn address(&self) -> String;

    /// Sign an arbitrary message with the chain's native scheme
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>>;
}

/// Derive a secp256k1 secret key with BIP-32 from a seed
pub(crate) fn derive_secp256k1_secret(seed: &[u8], path: &DerivationPath) -> Result<SecretKey> {
    let (mut secret_key, mut chain_code) = derive_master_key(seed, b"Bitcoin seed")?;
    let secp = Secp256k1::signing_only();

    for index in path.indices() {
        let parent = SecretKey::from_slice(&secret_key)
            .map_err(|e| Error::Derivation(format!("Invalid parent key: {}", e)))?;

        let mut data = Vec::with_capacity(37);
        if *index >= HARDENED_OFFSET {
            data.push(0);
            data.extend_from_slice(&secret_key);
        } else {
            data.extend_from_slice(&Secp256k1PublicKey::from_secret_key(&secp, &parent).serialize());
        }
        data.extend_from_slice(&index.to_be_bytes());

        let (tweak, child_chain_code) = hmac_split(&chain_code, &data)?;

        // child = parse256(IL) + parent (mod n)
        let child = SecretKey::from_slice(&tweak)
            .map_err(|e| Error::Derivation(format!("Invalid child key: {}", e)))?
            .add_tweak(&parent.into())
            .map_err(|e| Error::Derivation(format!("Key addition error: {}", e)))?;

        secret_key = child.secret_bytes();
        chain_code = child_chain_code;
    }

    SecretKey::from_slice(&secret_key)
        .map_err(|e| Error::Derivation(format!("Invalid secret key: {}", e)))
}

/// Derive the master key and chain code from a seed
pub(crate) fn derive_master_key(seed: &[u8], curve_key: &[u8]) -> Result<([u8; 32], [u8; 32])> {
    hmac_split(curve_key, seed)
}

/// HMAC-SHA512 the data and split the output into (IL, IR)
pub(crate) fn hmac_split(key: &[u8], data: &[u8]) -> Result<([u8; 32], [u8; 32])> {
    let mut hmac = HmacSha512::new_from_slice(key)
        .map_err(|_| Error::Derivation("HMAC error".to_string()))?;
    hmac.update(data);
    let result = hmac.finalize().into_bytes();

    let mut left = [0u8; 32];
    let mut right = [0u8; 32];
    left.copy_from_slice(&result[0..32]);
    right.copy_from_slice(&result[32..64]);

    Ok((left, right))
}
