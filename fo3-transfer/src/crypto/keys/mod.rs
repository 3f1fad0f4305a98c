//! Key derivation and management
//!
//! This module provides functionality for deriving signing keys for
//! the supported blockchains.

pub mod ethereum;
pub mod solana;
pub mod bitcoin;
mod derivation;

pub use derivation::*;
