//! P2WPKH spend planning, signing and serialization

use std::str::FromStr;

use bitcoin::absolute::LockTime;
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::ecdsa::Signature;
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::transaction::Version;
use bitcoin::{
    Address, Amount, OutPoint, PublicKey, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness,
};
use tracing::debug;

use crate::crypto::keys::bitcoin::BitcoinKey;
use crate::error::{Error, Result};
use crate::transaction::amount::format_btc;
use crate::transaction::types::{FeeEstimate, Utxo};

/// Estimated vbytes per P2WPKH input
pub const INPUT_VBYTES: u64 = 110;
/// Estimated vbytes per output
pub const OUTPUT_VBYTES: u64 = 34;
/// Fixed transaction overhead
pub const OVERHEAD_VBYTES: u64 = 10;

/// Fee rules applied when planning a spend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeePolicy {
    pub rate_sat_per_vb: u64,
    pub min_fee_sat: u64,
    pub dust_threshold_sat: u64,
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self {
            rate_sat_per_vb: 2,
            min_fee_sat: 300,
            dust_threshold_sat: 546,
        }
    }
}

/// Size estimate for `inputs` inputs, always budgeting for a change output
pub fn estimate_vsize(inputs: usize) -> u64 {
    inputs as u64 * INPUT_VBYTES + 2 * OUTPUT_VBYTES + OVERHEAD_VBYTES
}

/// Fee for spending `inputs` inputs under `policy`
pub fn estimate_fee(inputs: usize, policy: &FeePolicy) -> FeeEstimate {
    let total = (estimate_vsize(inputs) * policy.rate_sat_per_vb).max(policy.min_fee_sat);
    FeeEstimate {
        rate: policy.rate_sat_per_vb as u128,
        total: total as u128,
    }
}

/// A funded spend: every input, the payment, and the change decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpendPlan {
    pub inputs: Vec<Utxo>,
    pub amount_sat: u64,
    /// Includes any remainder too small for a change output
    pub fee_sat: u64,
    pub change_sat: Option<u64>,
    pub available_sat: u64,
}

/// Plan a spend-all transfer of `amount_sat` from `utxos`
pub fn plan_spend(utxos: Vec<Utxo>, amount_sat: u64, policy: &FeePolicy) -> Result<SpendPlan> {
    let available_sat = utxos
        .iter()
        .try_fold(0u64, |total, utxo| total.checked_add(utxo.value_sat))
        .ok_or_else(|| Error::Network(format!("Providers reported an implausible UTXO total over {} outputs", utxos.len())))?;
    let fee = estimate_fee(utxos.len(), policy).total as u64;

    let needed = amount_sat
        .checked_add(fee)
        .ok_or_else(|| Error::InvalidAmount(format!("{} sat is too large", amount_sat)))?;
    if available_sat < needed {
        return Err(Error::InsufficientFunds {
            available: format_btc(available_sat),
            needed: format_btc(needed),
            shortfall: format_btc(needed - available_sat),
        });
    }

    let remainder = available_sat - needed;
    let (fee_sat, change_sat) = if remainder > policy.dust_threshold_sat {
        (fee, Some(remainder))
    } else {
        (fee + remainder, None)
    };

    debug!(
        inputs = utxos.len(),
        available_sat,
        amount_sat,
        fee_sat,
        change_sat = change_sat.unwrap_or(0),
        "Planned spend"
    );

    Ok(SpendPlan {
        inputs: utxos,
        amount_sat,
        fee_sat,
        change_sat,
        available_sat,
    })
}

/// Build the unsigned version-2 transaction for a plan
pub fn build_unsigned(plan: &SpendPlan, recipient: &Address, change_address: &Address) -> Result<Transaction> {
    let input = plan
        .inputs
        .iter()
        .map(|utxo| {
            let txid = Txid::from_str(&utxo.txid)
                .map_err(|e| Error::Network(format!("Malformed UTXO txid {}: {}", utxo.txid, e)))?;
            Ok(TxIn {
                previous_output: OutPoint::new(txid, utxo.output_index),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                witness: Witness::new(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut output = vec![TxOut {
        value: Amount::from_sat(plan.amount_sat),
        script_pubkey: recipient.script_pubkey(),
    }];
    if let Some(change) = plan.change_sat {
        output.push(TxOut {
            value: Amount::from_sat(change),
            script_pubkey: change_address.script_pubkey(),
        });
    }

    Ok(Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input,
        output,
    })
}

/// Signs P2WPKH inputs for one key
pub trait InputSigner {
    fn public_key(&self) -> &PublicKey;

    /// BIP-143 script code for the key's outputs
    fn script_code(&self) -> ScriptBuf;

    fn sign_digest(&self, digest: &[u8]) -> Result<Signature>;
}

impl InputSigner for BitcoinKey {
    fn public_key(&self) -> &PublicKey {
        BitcoinKey::public_key(self)
    }

    fn script_code(&self) -> ScriptBuf {
        BitcoinKey::script_code(self)
    }

    fn sign_digest(&self, digest: &[u8]) -> Result<Signature> {
        BitcoinKey::sign_digest(self, digest)
    }
}

/// Produce one witness per input, stopping at the first input that fails.
///
/// `tx` is left untouched; apply the witnesses with [`finalize`].
pub fn sign_inputs<S: InputSigner>(tx: &Transaction, plan: &SpendPlan, signer: &S) -> Result<Vec<Witness>> {
    let script_code = signer.script_code();
    let public_key = signer.public_key().to_bytes();
    let mut cache = SighashCache::new(tx);
    let mut witnesses = Vec::with_capacity(plan.inputs.len());

    for (input_index, utxo) in plan.inputs.iter().enumerate() {
        let sighash = cache
            .segwit_signature_hash(
                input_index,
                &script_code,
                Amount::from_sat(utxo.value_sat),
                EcdsaSighashType::All,
            )
            .map_err(|e| Error::Signing {
                input_index,
                reason: e.to_string(),
            })?;

        let signature = signer
            .sign_digest(sighash.as_byte_array())
            .map_err(|e| Error::Signing {
                input_index,
                reason: e.to_string(),
            })?;

        let mut encoded = signature.serialize_der().to_vec();
        encoded.push(EcdsaSighashType::All as u8);

        let mut witness = Witness::new();
        witness.push(encoded);
        witness.push(&public_key);
        witnesses.push(witness);

        debug!(input_index, "Signed input");
    }

    Ok(witnesses)
}

/// Attach witnesses to their inputs
pub fn finalize(mut tx: Transaction, witnesses: Vec<Witness>) -> Result<Transaction> {
    if witnesses.len() != tx.input.len() {
        return Err(Error::Signing {
            input_index: witnesses.len().min(tx.input.len()),
            reason: format!("{} witnesses for {} inputs", witnesses.len(), tx.input.len()),
        });
    }

    for (input, witness) in tx.input.iter_mut().zip(witnesses) {
        input.witness = witness;
    }
    Ok(tx)
}

/// Raw transaction hex ready for broadcast
pub fn to_raw_hex(tx: &Transaction) -> String {
    serialize_hex(tx)
}

#[cfg(test)]
mod tests {
    use bitcoin::consensus::encode::deserialize;
    use bitcoin::secp256k1::{Message, Secp256k1};
    use bitcoin::Network;

    use super::*;
    use crate::crypto::keys::bitcoin::{derive_bitcoin_key, DEFAULT_BITCOIN_PATH};
    use crate::crypto::keys::DerivationPath;
    use crate::crypto::mnemonic::mnemonic_to_seed;

    const PHRASE: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
    const RECIPIENT: &str = "tb1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsx";

    fn utxo(byte: char, output_index: u32, value_sat: u64) -> Utxo {
        Utxo {
            txid: byte.to_string().repeat(64),
            output_index,
            value_sat,
        }
    }

    fn test_key() -> BitcoinKey {
        let seed = mnemonic_to_seed(PHRASE, None).unwrap();
        let path: DerivationPath = DEFAULT_BITCOIN_PATH.parse().unwrap();
        derive_bitcoin_key(&seed[..], &path, Network::Testnet).unwrap()
    }

    fn recipient() -> Address {
        Address::from_str(RECIPIENT).unwrap().require_network(Network::Testnet).unwrap()
    }

    struct FailingSigner {
        inner: BitcoinKey,
        fail_at: usize,
        calls: std::cell::Cell<usize>,
    }

    impl InputSigner for FailingSigner {
        fn public_key(&self) -> &PublicKey {
            self.inner.public_key()
        }

        fn script_code(&self) -> ScriptBuf {
            self.inner.script_code()
        }

        fn sign_digest(&self, digest: &[u8]) -> Result<Signature> {
            let call = self.calls.get();
            self.calls.set(call + 1);
            if call == self.fail_at {
                return Err(Error::Derivation("hardware signer unplugged".to_string()));
            }
            self.inner.sign_digest(digest)
        }
    }

    #[test]
    fn test_overflowing_utxo_total_is_rejected() {
        let half = u64::MAX / 2 + 1;
        let err = plan_spend(vec![utxo('a', 0, half), utxo('b', 1, half)], 1_000, &FeePolicy::default()).unwrap_err();

        assert!(matches!(err, Error::Network(_)));
        assert!(err.to_string().contains("implausible UTXO total"));
    }

    #[test]
    fn test_fee_example_three_inputs() {
        assert_eq!(estimate_vsize(3), 408);
        assert_eq!(estimate_fee(3, &FeePolicy::default()).total, 816);
        // Floor applies to small transactions
        assert_eq!(estimate_fee(1, &FeePolicy::default()).total, 376);
        assert_eq!(
            estimate_fee(0, &FeePolicy::default()).total,
            300
        );
    }

    #[test]
    fn test_insufficient_funds_reports_decimal_btc() {
        let err = plan_spend(vec![utxo('a', 0, 50_000)], 100_000, &FeePolicy::default()).unwrap_err();
        match err {
            Error::InsufficientFunds { available, needed, shortfall } => {
                assert_eq!(available, "0.00050000");
                assert_eq!(needed, "0.00100376");
                assert_eq!(shortfall, "0.00050376");
            }
            other => panic!("expected insufficient funds, got {:?}", other),
        }
    }

    #[test]
    fn test_change_only_above_dust() {
        let policy = FeePolicy::default();

        // 547 sat left over becomes change
        let plan = plan_spend(vec![utxo('a', 0, 100_000 + 376 + 547)], 100_000, &policy).unwrap();
        assert_eq!(plan.change_sat, Some(547));
        assert_eq!(plan.fee_sat, 376);

        // Exactly the threshold goes to the fee
        let plan = plan_spend(vec![utxo('a', 0, 100_000 + 376 + 546)], 100_000, &policy).unwrap();
        assert_eq!(plan.change_sat, None);
        assert_eq!(plan.fee_sat, 376 + 546);
        assert_eq!(plan.available_sat, plan.amount_sat + plan.fee_sat);
    }

    #[test]
    fn test_signed_transaction_round_trips() {
        let key = test_key();
        let plan = plan_spend(
            vec![utxo('a', 0, 40_000), utxo('b', 1, 40_000), utxo('c', 2, 40_000)],
            100_000,
            &FeePolicy::default(),
        )
        .unwrap();
        assert_eq!(plan.fee_sat, 816);
        assert_eq!(plan.change_sat, Some(120_000 - 100_000 - 816));

        let unsigned = build_unsigned(&plan, &recipient(), key.p2wpkh_address()).unwrap();
        let witnesses = sign_inputs(&unsigned, &plan, &key).unwrap();
        let signed = finalize(unsigned, witnesses).unwrap();

        let decoded: Transaction = deserialize(&hex::decode(to_raw_hex(&signed)).unwrap()).unwrap();
        assert_eq!(decoded, signed);
        assert_eq!(decoded.input.len(), 3);
        assert_eq!(decoded.input[2].previous_output.vout, 2);
        assert!(decoded.input.iter().all(|input| input.witness.len() == 2));

        let addresses: Vec<String> = decoded
            .output
            .iter()
            .map(|out| Address::from_script(&out.script_pubkey, Network::Testnet).unwrap().to_string())
            .collect();
        assert_eq!(addresses, vec![RECIPIENT.to_string(), key.p2wpkh_address().to_string()]);
        assert_eq!(decoded.output[0].value, Amount::from_sat(100_000));
        assert_eq!(decoded.output[1].value, Amount::from_sat(19_184));
    }

    #[test]
    fn test_witness_signature_verifies() {
        let key = test_key();
        let plan = plan_spend(vec![utxo('d', 0, 10_000)], 5_000, &FeePolicy::default()).unwrap();
        let unsigned = build_unsigned(&plan, &recipient(), key.p2wpkh_address()).unwrap();
        let witnesses = sign_inputs(&unsigned, &plan, &key).unwrap();

        let sighash = SighashCache::new(&unsigned)
            .segwit_signature_hash(0, &key.script_code(), Amount::from_sat(10_000), EcdsaSighashType::All)
            .unwrap();
        let encoded = witnesses[0].nth(0).unwrap();
        assert_eq!(*encoded.last().unwrap(), 0x01);
        let signature = Signature::from_der(&encoded[..encoded.len() - 1]).unwrap();
        let message = Message::from_digest_slice(sighash.as_byte_array()).unwrap();

        assert!(Secp256k1::verification_only()
            .verify_ecdsa(&message, &signature, &key.public_key().inner)
            .is_ok());
    }

    #[test]
    fn test_signing_failure_names_input() {
        let signer = FailingSigner {
            inner: test_key(),
            fail_at: 1,
            calls: std::cell::Cell::new(0),
        };
        let plan = plan_spend(
            vec![utxo('a', 0, 40_000), utxo('b', 0, 40_000)],
            50_000,
            &FeePolicy::default(),
        )
        .unwrap();
        let unsigned = build_unsigned(&plan, &recipient(), signer.inner.p2wpkh_address()).unwrap();

        match sign_inputs(&unsigned, &plan, &signer) {
            Err(Error::Signing { input_index, reason }) => {
                assert_eq!(input_index, 1);
                assert!(reason.contains("unplugged"));
            }
            other => panic!("expected signing error, got {:?}", other),
        }
    }
}
