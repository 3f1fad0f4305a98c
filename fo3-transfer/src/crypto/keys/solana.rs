//! Solana key derivation

use ed25519_dalek::{Signer, SigningKey};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use super::derivation::{derive_master_key, hmac_split, Chain, ChainSigner, DerivationPath};

/// Default SLIP-0010 Solana account path
pub const DEFAULT_SOLANA_PATH: &str = "m/44'/501'/0'/0'";

/// How the ed25519 seed is obtained from the BIP-39 seed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SolanaDerivation {
    /// SLIP-0010 hardened derivation along the configured path
    #[default]
    Slip10,
    /// First 32 bytes of the BIP-39 seed used directly (legacy addresses)
    SeedTruncation,
}

/// A derived Solana keypair
pub struct SolanaKey {
    signing_key: SigningKey,
}

impl SolanaKey {
    /// Raw 32-byte public key
    pub fn pubkey_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }
}

impl ChainSigner for SolanaKey {
    fn chain(&self) -> Chain {
        Chain::Solana
    }

    fn address(&self) -> String {
        bs58::encode(self.pubkey_bytes()).into_string()
    }

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        Ok(self.signing_key.sign(message).to_bytes().to_vec())
    }
}

/// Derive a Solana keypair from a seed
pub fn derive_solana_key(seed: &[u8], path: &DerivationPath, scheme: SolanaDerivation) -> Result<SolanaKey> {
    let secret = match scheme {
        SolanaDerivation::Slip10 => derive_slip10_ed25519(seed, path)?,
        SolanaDerivation::SeedTruncation => {
            let mut secret = [0u8; 32];
            let head = seed
                .get(..32)
                .ok_or_else(|| Error::Derivation("Seed shorter than 32 bytes".to_string()))?;
            secret.copy_from_slice(head);
            secret
        }
    };

    Ok(SolanaKey {
        signing_key: SigningKey::from_bytes(&secret),
    })
}

/// SLIP-0010 ed25519 derivation; only hardened children exist on this curve
fn derive_slip10_ed25519(seed: &[u8], path: &DerivationPath) -> Result<[u8; 32]> {
    if !path.is_fully_hardened() {
        return Err(Error::Derivation(format!(
            "ed25519 derivation requires hardened components: {}",
            path
        )));
    }

    let (mut secret_key, mut chain_code) = derive_master_key(seed, b"ed25519 seed")?;

    for index in path.indices() {
        let mut data = Vec::with_capacity(37);
        data.push(0);
        data.extend_from_slice(&secret_key);
        data.extend_from_slice(&index.to_be_bytes());

        (secret_key, chain_code) = hmac_split(&chain_code, &data)?;
    }

    Ok(secret_key)
}

/// Decode and validate a base58 account address
pub fn parse_pubkey(address: &str) -> Result<[u8; 32]> {
    let bytes = bs58::decode(address.trim())
        .into_vec()
        .map_err(|e| Error::InvalidAddress(format!("{}: {}", address, e)))?;

    <[u8; 32]>::try_from(bytes.as_slice())
        .map_err(|_| Error::InvalidAddress(format!("{} does not decode to 32 bytes", address)))
}
