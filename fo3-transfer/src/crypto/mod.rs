//! Cryptographic primitives and operations
//!
//! This module turns a mnemonic into chain-specific signing material: the
//! BIP-39 seed, BIP-32/SLIP-0010 key derivation, and the per-chain keys the
//! transaction adapters sign with.

pub mod mnemonic;
pub mod keys;

pub use mnemonic::*;
pub use keys::*;
