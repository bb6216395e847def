// Copyright 2025 chenjjiaa
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Fixed-point helpers for moving between human amounts and on-chain base units.
//!
//! Every conversion multiplies before it divides and stays in 256-bit integers,
//! so nothing passes through floating point.

use ethers::types::U256;
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::error::CoreError;

/// Largest decimals count whose unit `10^decimals` fits in a U256.
pub const MAX_DECIMALS: u8 = 77;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rounding {
    Down,
    Up,
}

/// Splits a non-negative decimal into `(mantissa, 10^scale)`.
fn decimal_parts(value: Decimal) -> Result<(U256, U256), CoreError> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(CoreError::invalid(format!("negative amount: {}", value)));
    }
    let mantissa = U256::from(value.mantissa().unsigned_abs());
    let denominator = pow10(value.scale())?;
    Ok((mantissa, denominator))
}

/// `10^exp`, or an error when it does not fit in 256 bits.
pub fn pow10(exp: u32) -> Result<U256, CoreError> {
    if exp > MAX_DECIMALS as u32 {
        return Err(CoreError::invalid(format!("10^{} exceeds 256 bits", exp)));
    }
    Ok(U256::exp10(exp as usize))
}

fn div_rounded(numerator: U256, denominator: U256, rounding: Rounding) -> U256 {
    let quotient = numerator / denominator;
    match rounding {
        Rounding::Up if !(numerator % denominator).is_zero() => quotient + 1,
        _ => quotient,
    }
}

/// `value × 10^decimals`, rounded as requested.
pub fn to_base_units(value: Decimal, decimals: u8, rounding: Rounding) -> Result<U256, CoreError> {
    let (mantissa, denominator) = decimal_parts(value)?;
    let numerator = mantissa
        .checked_mul(pow10(decimals as u32)?)
        .ok_or_else(|| CoreError::invalid(format!("amount {} overflows", value)))?;
    Ok(div_rounded(numerator, denominator, rounding))
}

/// `amount × factor`, rounded as requested.
pub fn mul_decimal(amount: U256, factor: Decimal, rounding: Rounding) -> Result<U256, CoreError> {
    let (mantissa, denominator) = decimal_parts(factor)?;
    let numerator = amount
        .checked_mul(mantissa)
        .ok_or_else(|| CoreError::invalid(format!("{} × {} overflows", amount, factor)))?;
    Ok(div_rounded(numerator, denominator, rounding))
}

/// Shrinks an amount by the slippage fraction: `floor(amount × (1 − slippage))`.
pub fn minus_slippage(amount: U256, slippage: Decimal) -> Result<U256, CoreError> {
    mul_decimal(amount, Decimal::ONE - slippage, Rounding::Down)
}

/// Grows an amount by the slippage fraction: `ceil(amount × (1 + slippage))`.
pub fn plus_slippage(amount: U256, slippage: Decimal) -> Result<U256, CoreError> {
    mul_decimal(amount, Decimal::ONE + slippage, Rounding::Up)
}

/// Parses a human amount such as `"0.5"`.
pub fn parse_amount(amount: &str) -> Result<Decimal, CoreError> {
    let value = Decimal::from_str(amount.trim())
        .map_err(|e| CoreError::invalid(format!("invalid amount '{}': {}", amount, e)))?;
    if value <= Decimal::ZERO {
        return Err(CoreError::invalid(format!("amount must be positive, got {}", amount)));
    }
    Ok(value)
}

/// Renders base units as a human amount with trailing zeros trimmed.
pub fn format_units(amount: U256, decimals: u8) -> String {
    let digits = amount.to_string();
    let decimals = decimals as usize;
    if decimals == 0 {
        return digits;
    }
    let padded = format!("{:0>width$}", digits, width = decimals + 1);
    let (whole, fraction) = padded.split_at(padded.len() - decimals);
    let fraction = fraction.trim_end_matches('0');
    if fraction.is_empty() {
        whole.to_string()
    } else {
        format!("{}.{}", whole, fraction)
    }
}
