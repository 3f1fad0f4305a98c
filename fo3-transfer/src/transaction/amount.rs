//! Decimal amount conversion between major and minor units

use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::error::{Error, Result};

/// Convert a decimal string to integer minor units, flooring extra precision.
///
/// Zero after flooring is rejected: every transfer must move a positive amount.
pub fn to_minor_units(amount: &str, decimals: u32) -> Result<u128> {
    let trimmed = amount.trim();
    if trimmed.starts_with('+') {
        return Err(Error::InvalidAmount(format!("{} is not a plain decimal", amount)));
    }

    let value = Decimal::from_str(trimmed)
        .map_err(|e| Error::InvalidAmount(format!("{}: {}", amount, e)))?;
    if value.is_sign_negative() || value.is_zero() {
        return Err(Error::InvalidAmount(format!("{} must be greater than zero", amount)));
    }

    // Scale in steps so each factor fits a u64
    let mut scaled = value;
    let mut remaining = decimals;
    while remaining > 0 {
        let step = remaining.min(9);
        scaled = scaled
            .checked_mul(Decimal::from(10u64.pow(step)))
            .ok_or_else(|| Error::InvalidAmount(format!("{} is too large", amount)))?;
        remaining -= step;
    }

    let units = scaled
        .floor()
        .to_u128()
        .ok_or_else(|| Error::InvalidAmount(format!("{} is out of range", amount)))?;
    if units == 0 {
        return Err(Error::InvalidAmount(format!(
            "{} is smaller than the chain's smallest unit",
            amount
        )));
    }

    Ok(units)
}

/// Satoshis as an eight-place decimal BTC string
pub fn format_btc(sats: u64) -> String {
    Decimal::from_i128_with_scale(i128::from(sats), 8).to_string()
}
