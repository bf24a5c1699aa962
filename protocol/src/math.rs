//! Share-price arithmetic.
//!
//! All conversions go through [`mul_div`], which widens to 256 bits so that
//! `amount * supply` never overflows for 18-decimal balances. Results round
//! down, against the caller, for both deposits and redemptions.

use primitive_types::U256;
use thiserror::Error;

use crate::types::Amount;

/// Arithmetic failures.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum MathError {
    #[error("division by zero")]
    DivisionByZero,

    #[error("arithmetic overflow")]
    Overflow,
}

/// Computes `floor(value * numerator / denominator)` with a 256-bit
/// intermediate.
pub fn mul_div(value: Amount, numerator: Amount, denominator: Amount) -> Result<Amount, MathError> {
    if denominator == 0 {
        return Err(MathError::DivisionByZero);
    }

    let product = U256::from(value) * U256::from(numerator);
    let quotient = product / U256::from(denominator);
    if quotient > U256::from(u128::MAX) {
        return Err(MathError::Overflow);
    }
    Ok(quotient.as_u128())
}

/// Receipt units to mint for `assets` deposited into a vault that currently
/// manages `total_assets` backing `total_supply` receipt units.
///
/// The first deposit (either total is zero) mints 1:1.
pub fn assets_to_shares(
    assets: Amount,
    total_assets: Amount,
    total_supply: Amount,
) -> Result<Amount, MathError> {
    if total_assets == 0 || total_supply == 0 {
        return Ok(assets);
    }
    mul_div(assets, total_supply, total_assets)
}

/// Base-asset value of `shares` receipt units.
pub fn shares_to_assets(
    shares: Amount,
    total_assets: Amount,
    total_supply: Amount,
) -> Result<Amount, MathError> {
    if total_supply == 0 {
        return Ok(0);
    }
    mul_div(shares, total_assets, total_supply)
}
