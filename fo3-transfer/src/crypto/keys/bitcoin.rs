//! Bitcoin key derivation

use bitcoin::hashes::{sha256d, Hash};
use bitcoin::secp256k1::{ecdsa::Signature, Message, Secp256k1, SecretKey};
use bitcoin::{Address, PublicKey, ScriptBuf};
pub use bitcoin::Network;

use crate::error::{Error, Result};
use super::derivation::{derive_secp256k1_secret, Chain, ChainSigner, DerivationPath};

/// Default BIP-84 path (native SegWit, testnet coin type)
pub const DEFAULT_BITCOIN_PATH: &str = "m/84'/1'/0'/0/0";

/// A derived Bitcoin signing key with its P2WPKH address
pub struct BitcoinKey {
    secret_key: SecretKey,
    public_key: PublicKey,
    address: Address,
}

impl BitcoinKey {
    /// The P2WPKH address controlled by this key
    pub fn p2wpkh_address(&self) -> &Address {
        &self.address
    }

    /// The compressed public key
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Locking script of the P2WPKH address
    pub fn script_pubkey(&self) -> ScriptBuf {
        self.address.script_pubkey()
    }

    /// BIP-143 script code for spending this key's P2WPKH outputs
    pub fn script_code(&self) -> ScriptBuf {
        ScriptBuf::new_p2pkh(&self.public_key.pubkey_hash())
    }

    /// Sign a 32-byte digest
    pub fn sign_digest(&self, digest: &[u8]) -> Result<Signature> {
        let message = Message::from_digest_slice(digest)
            .map_err(|e| Error::Derivation(format!("Invalid digest: {}", e)))?;
        Ok(Secp256k1::signing_only().sign_ecdsa(&message, &self.secret_key))
    }
}

impl ChainSigner for BitcoinKey {
    fn chain(&self) -> Chain {
        Chain::Bitcoin
    }

    fn address(&self) -> String {
        self.address.to_string()
    }

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        let digest = sha256d::Hash::hash(message);
        Ok(self.sign_digest(digest.as_byte_array())?.serialize_der().to_vec())
    }
}

/// Derive a Bitcoin key and its P2WPKH address from a seed
pub fn derive_bitcoin_key(seed: &[u8], path: &DerivationPath, network: Network) -> Result<BitcoinKey> {
    let secret_key = derive_secp256k1_secret(seed, path)?;
    let secp = Secp256k1::signing_only();
    let public_key = PublicKey::new(secret_key.public_key(&secp));

    let address = Address::p2wpkh(&public_key, network)
        .map_err(|e| Error::Derivation(format!("Failed to create P2WPKH address: {}", e)))?;

    Ok(BitcoinKey {
        secret_key,
        public_key,
        address,
    })
}
