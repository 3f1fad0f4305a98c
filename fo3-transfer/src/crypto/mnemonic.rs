//! Mnemonic phrase handling

use bip39::Mnemonic;
use zeroize::Zeroizing;

use crate::error::{Error, Result};

/// A BIP-39 seed that is wiped from memory when dropped
pub type Seed = Zeroizing<[u8; 64]>;

/// Validate a mnemonic phrase
pub fn validate_mnemonic(phrase: &str) -> Result<()> {
    Mnemonic::parse_normalized(phrase)
        .map(|_| ())
        .map_err(|e| Error::Derivation(format!("Invalid mnemonic: {}", e)))
}

/// Generate a seed from a mnemonic phrase and optional passphrase
pub fn mnemonic_to_seed(phrase: &str, passphrase: Option<&str>) -> Result<Seed> {
    let mnemonic = Mnemonic::parse_normalized(phrase)
        .map_err(|e| Error::Derivation(format!("Invalid mnemonic: {}", e)))?;

    Ok(Zeroizing::new(mnemonic.to_seed(passphrase.unwrap_or(""))))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PHRASE: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    #[test]
    fn test_validate_mnemonic() {
        let invalid = "invalid mnemonic phrase test test test test test test test test test";

        assert!(validate_mnemonic(PHRASE).is_ok());
        assert!(matches!(validate_mnemonic(invalid), Err(Error::Derivation(_))));
    }

    #[test]
    fn test_mnemonic_to_seed() {
        let seed = mnemonic_to_seed(PHRASE, None).unwrap();

        // BIP-39 reference seed for the all-abandon phrase with an empty passphrase
        assert_eq!(
            hex::encode(&seed[..]),
            "5eb00bbddcf069084889a8ab9155568165f5c453ccb85e70811aaed6f6da5fc19a5ac40b389cd370d086206dec8aa6c43daea6690f20ad3d8d48b2d2ce9e38e4"
        );
    }

    #[test]
    fn test_passphrase_changes_seed() {
        let plain = mnemonic_to_seed(PHRASE, None).unwrap();
        let salted = mnemonic_to_seed(PHRASE, Some("TREZOR")).unwrap();
        assert_ne!(plain[..], salted[..]);
    }
}
