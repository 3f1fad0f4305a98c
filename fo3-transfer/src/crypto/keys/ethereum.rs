//! Ethereum key derivation

use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, H256};
use ethers::utils::{keccak256, to_checksum};

use crate::error::{Error, Result};
use super::derivation::{derive_secp256k1_secret, Chain, ChainSigner, DerivationPath};

/// Default BIP-44 Ethereum account path
pub const DEFAULT_ETHEREUM_PATH: &str = "m/44'/60'/0'/0/0";

/// A derived Ethereum account
pub struct EthereumKey {
    wallet: LocalWallet,
}

impl EthereumKey {
    /// The account address
    pub fn account(&self) -> Address {
        self.wallet.address()
    }

    /// The wallet used for raw transaction signing
    pub fn wallet(&self) -> &LocalWallet {
        &self.wallet
    }
}

impl ChainSigner for EthereumKey {
    fn chain(&self) -> Chain {
        Chain::Ethereum
    }

    fn address(&self) -> String {
        to_checksum(&self.wallet.address(), None)
    }

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        let signature = self
            .wallet
            .sign_hash(H256::from(keccak256(message)))
            .map_err(|e| Error::Derivation(format!("Ethereum signing failed: {}", e)))?;
        Ok(signature.to_vec())
    }
}

/// Derive an Ethereum account bound to `chain_id` from a seed
pub fn derive_ethereum_key(seed: &[u8], path: &DerivationPath, chain_id: u64) -> Result<EthereumKey> {
    let secret_key = derive_secp256k1_secret(seed, path)?;

    let wallet = LocalWallet::from_bytes(&secret_key.secret_bytes())
        .map_err(|e| Error::Derivation(format!("Invalid Ethereum key: {}", e)))?
        .with_chain_id(chain_id);

    Ok(EthereumKey { wallet })
}

/// Parse and validate a hex account address
pub fn parse_address(address: &str) -> Result<Address> {
    let trimmed = address.trim();
    let hex_part = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .ok_or_else(|| Error::InvalidAddress(format!("{} is missing the 0x prefix", address)))?;

    if hex_part.len() != 40 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::InvalidAddress(format!("{} is not a 20-byte hex address", address)));
    }

    let parsed: Address = trimmed
        .parse()
        .map_err(|e| Error::InvalidAddress(format!("{}: {}", address, e)))?;

    // Mixed case means an EIP-55 checksum was supplied and must match
    let has_lower = hex_part.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = hex_part.chars().any(|c| c.is_ascii_uppercase());
    if has_lower && has_upper && to_checksum(&parsed, None) != trimmed {
        return Err(Error::InvalidAddress(format!("{} fails its EIP-55 checksum", address)));
    }

    Ok(parsed)
}
