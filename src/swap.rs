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

use anyhow::Context;
use ethabi::{Function, Param, ParamType, StateMutability, Token};
use ethers::types::{Address, Bytes, U256};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::chain::TokenRef;
use crate::error::CoreError;
use crate::units::{minus_slippage, plus_slippage, to_base_units, Rounding};

pub const UNISWAP_SWAP_ROUTER_02: &str = "0x68b3465833fb72A70ecDF485E0e4C7bD8665Fc45";
pub const WETH_ADDRESS: &str = "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2";
pub const SQRT_PRICE_LIMIT_X96: u64 = 0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, schemars::JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExactSide {
    /// The amount names what is spent; the received amount floats.
    Input,
    /// The amount names what is received; the spent amount floats.
    Output,
}

impl Default for ExactSide {
    fn default() -> Self {
        ExactSide::Input
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SwapParameters {
    /// Base units of token_in. For exact-output swaps this is the most the
    /// swap may spend.
    pub amount_in: U256,
    /// Base units of token_out. For exact-input swaps this is the least the
    /// swap may return.
    pub amount_out: U256,
    pub exact_side: ExactSide,
}

/// Turns a human amount and a quoted price into slippage-protected swap bounds.
///
/// `price` is units of token_out per unit of token_in.
pub fn compute_swap_params(
    amount: Decimal,
    token_in: &TokenRef,
    token_out: &TokenRef,
    price: Decimal,
    exact_side: ExactSide,
    slippage: Decimal,
) -> Result<SwapParameters, CoreError> {
    if amount <= Decimal::ZERO {
        return Err(CoreError::invalid(format!("swap amount must be positive, got {}", amount)));
    }
    if price <= Decimal::ZERO {
        return Err(CoreError::invalid(format!("price must be positive, got {}", price)));
    }
    if slippage < Decimal::ZERO || slippage >= Decimal::ONE {
        return Err(CoreError::invalid(format!(
            "slippage must be within [0, 1), got {}",
            slippage
        )));
    }

    let params = match exact_side {
        ExactSide::Input => {
            let ratio = amount
                .checked_mul(price)
                .ok_or_else(|| CoreError::invalid("amount × price overflows"))?;
            let theoretical_out = to_base_units(ratio, token_out.decimals, Rounding::Down)?;
            SwapParameters {
                amount_in: to_base_units(amount, token_in.decimals, Rounding::Down)?,
                amount_out: minus_slippage(theoretical_out, slippage)?,
                exact_side,
            }
        }
        ExactSide::Output => {
            let ratio = amount
                .checked_div(price)
                .ok_or_else(|| CoreError::invalid("amount / price overflows"))?;
            let theoretical_in = to_base_units(ratio, token_in.decimals, Rounding::Up)?;
            SwapParameters {
                amount_in: plus_slippage(theoretical_in, slippage)?,
                amount_out: to_base_units(amount, token_out.decimals, Rounding::Down)?,
                exact_side,
            }
        }
    };

    debug!(
        "Swap parameters for {} {} -> {}: in={}, out={}, side={:?}",
        amount, token_in.symbol, token_out.symbol, params.amount_in, params.amount_out, exact_side
    );
    Ok(params)
}

/// Where a swap goes once its amounts are known.
#[derive(Debug, Clone)]
pub struct SwapRoute {
    pub token_in: TokenRef,
    pub token_out: TokenRef,
    pub fee_tier: u32,
    pub router: Address,
    pub recipient: Address,
    /// Pay with native ETH; the router wraps it into token_in (WETH).
    pub native_in: bool,
}

fn swap_params_tuple() -> ParamType {
    ParamType::Tuple(vec![
        ParamType::Address,
        ParamType::Address,
        ParamType::Uint(24),
        ParamType::Address,
        ParamType::Uint(256),
        ParamType::Uint(256),
        ParamType::Uint(160),
    ])
}

/// SwapRouter02 `exactInputSingle((tokenIn, tokenOut, fee, recipient, amountIn, amountOutMinimum, sqrtPriceLimitX96))`
pub fn exact_input_single_function() -> Function {
    Function {
        name: "exactInputSingle".to_string(),
        inputs: vec![Param {
            name: "params".to_string(),
            kind: swap_params_tuple(),
            internal_type: None,
        }],
        outputs: vec![Param {
            name: "amountOut".to_string(),
            kind: ParamType::Uint(256),
            internal_type: None,
        }],
        constant: None,
        state_mutability: StateMutability::Payable,
    }
}

/// SwapRouter02 `exactOutputSingle((tokenIn, tokenOut, fee, recipient, amountOut, amountInMaximum, sqrtPriceLimitX96))`
pub fn exact_output_single_function() -> Function {
    Function {
        name: "exactOutputSingle".to_string(),
        inputs: vec![Param {
            name: "params".to_string(),
            kind: swap_params_tuple(),
            internal_type: None,
        }],
        outputs: vec![Param {
            name: "amountIn".to_string(),
            kind: ParamType::Uint(256),
            internal_type: None,
        }],
        constant: None,
        state_mutability: StateMutability::Payable,
    }
}

/// SwapRouter02 `multicall(bytes[])`
pub fn multicall_function() -> Function {
    Function {
        name: "multicall".to_string(),
        inputs: vec![Param {
            name: "data".to_string(),
            kind: ParamType::Array(Box::new(ParamType::Bytes)),
            internal_type: None,
        }],
        outputs: vec![Param {
            name: "results".to_string(),
            kind: ParamType::Array(Box::new(ParamType::Bytes)),
            internal_type: None,
        }],
        constant: None,
        state_mutability: StateMutability::Payable,
    }
}

/// SwapRouter02 `refundETH()`: returns the router's ETH balance to the caller.
pub fn refund_eth_function() -> Function {
    Function {
        name: "refundETH".to_string(),
        inputs: vec![],
        outputs: vec![],
        constant: None,
        state_mutability: StateMutability::Payable,
    }
}

/// Router calldata for the swap described by `params` and `route`.
///
/// A native exact-output swap sends the slippage-padded maximum as value, so
/// it is paired with `refundETH` in one multicall; otherwise the unspent ETH
/// stays in the router.
pub fn encode_swap_call(params: &SwapParameters, route: &SwapRoute) -> anyhow::Result<Bytes> {
    let (function, exact_amount, limit_amount) = match params.exact_side {
        ExactSide::Input => (exact_input_single_function(), params.amount_in, params.amount_out),
        ExactSide::Output => (exact_output_single_function(), params.amount_out, params.amount_in),
    };

    let params_tokens = vec![
        Token::Address(route.token_in.address),
        Token::Address(route.token_out.address),
        Token::Uint(U256::from(route.fee_tier)),
        Token::Address(route.recipient),
        Token::Uint(exact_amount),
        Token::Uint(limit_amount),
        Token::Uint(U256::from(SQRT_PRICE_LIMIT_X96)),
    ];

    let data = function
        .encode_input(&[Token::Tuple(params_tokens)])
        .with_context(|| format!("Failed to encode {}", function.name))?;

    if !(route.native_in && params.exact_side == ExactSide::Output) {
        return Ok(data.into());
    }

    let refund = refund_eth_function()
        .encode_input(&[])
        .context("Failed to encode refundETH")?;
    let batched = multicall_function()
        .encode_input(&[Token::Array(vec![Token::Bytes(data), Token::Bytes(refund)])])
        .context("Failed to encode multicall")?;
    Ok(batched.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::token;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn one_eth_to_usdc_at_3000_with_five_percent_slippage() {
        let weth = token(0xee, "WETH", 18);
        let usdc = token(0xcc, "USDC", 6);

        let params =
            compute_swap_params(dec("1"), &weth, &usdc, dec("3000"), ExactSide::Input, dec("0.05"))
                .unwrap();

        assert_eq!(params.amount_out, U256::from(2_850_000_000u64));
        assert_eq!(params.amount_in, U256::exp10(18));
        assert_eq!(params.exact_side, ExactSide::Input);
    }

    #[test]
    fn minimum_output_strictly_decreases_with_slippage() {
        let weth = token(0xee, "WETH", 18);
        let usdc = token(0xcc, "USDC", 6);
        let mut previous = None;
        for s in ["0.001", "0.01", "0.05", "0.1", "0.5", "0.9"] {
            let out = compute_swap_params(dec("2.5"), &weth, &usdc, dec("3000"), ExactSide::Input, dec(s))
                .unwrap()
                .amount_out;
            // floor(2.5 × 3000 × 10^6 × (1 − s))
            let expected = (dec("7500000000") * (Decimal::ONE - dec(s))).floor().normalize();
            assert_eq!(out.to_string(), expected.to_string());
            if let Some(prev) = previous {
                assert!(out < prev, "slippage {} did not lower the minimum", s);
            }
            previous = Some(out);
        }
    }

    #[test]
    fn exact_output_never_under_allows() {
        let usdc = token(0xcc, "USDC", 6);
        let wbtc = token(0xbb, "WBTC", 8);
        for (amount, price) in [("100", "3000"), ("0.05", "0.0000151"), ("1", "7"), ("33.3", "0.3333")] {
            let params =
                compute_swap_params(dec(amount), &usdc, &wbtc, dec(price), ExactSide::Output, dec("0.05"))
                    .unwrap();
            // theoretical input in base units, exactly
            let theoretical = dec(amount) / dec(price) * dec("1000000");
            let allowed = Decimal::from_str(&params.amount_in.to_string()).unwrap();
            assert!(allowed >= theoretical * dec("1.05"), "{} / {}", amount, price);
            assert_eq!(params.amount_out, to_base_units(dec(amount), 8, Rounding::Down).unwrap());
        }
    }

    #[test]
    fn exact_output_example() {
        // 100 USDC at 3000 USDC/WETH: 1/30 WETH, +5 %
        let weth = token(0xee, "WETH", 18);
        let usdc = token(0xcc, "USDC", 6);
        let params =
            compute_swap_params(dec("100"), &weth, &usdc, dec("3000"), ExactSide::Output, dec("0.05"))
                .unwrap();
        assert_eq!(params.amount_out, U256::from(100_000_000u64));
        // ceil(33333333333333333.33…) = 33333333333333334, × 1.05 rounded up
        assert_eq!(params.amount_in, U256::from(35_000_000_000_000_001u64));
    }

    #[test]
    fn rejects_out_of_range_inputs() {
        let a = token(1, "AAA", 18);
        let b = token(2, "BBB", 18);
        for (amount, price, slippage) in [("0", "1", "0.05"), ("1", "0", "0.05"), ("1", "1", "1"), ("1", "1", "-0.1")] {
            let result = compute_swap_params(dec(amount), &a, &b, dec(price), ExactSide::Input, dec(slippage));
            assert!(matches!(result, Err(CoreError::InvalidRequest(_))));
        }
    }

    #[test]
    fn swap_calldata_orders_amounts_by_side() {
        let route = SwapRoute {
            token_in: token(1, "AAA", 18),
            token_out: token(2, "BBB", 6),
            fee_tier: 500,
            router: Address::from_low_u64_be(9),
            recipient: Address::from_low_u64_be(8),
            native_in: false,
        };
        let params = SwapParameters {
            amount_in: U256::from(111),
            amount_out: U256::from(222),
            exact_side: ExactSide::Output,
        };

        let data = encode_swap_call(&params, &route).unwrap();
        let function = exact_output_single_function();
        assert_eq!(&data[..4], &function.short_signature()[..]);

        let decoded = function.decode_input(&data[4..]).unwrap();
        let Token::Tuple(fields) = &decoded[0] else {
            panic!("expected tuple");
        };
        assert_eq!(fields[2], Token::Uint(U256::from(500)));
        // exactOutputSingle takes amountOut before amountInMaximum
        assert_eq!(fields[4], Token::Uint(U256::from(222)));
        assert_eq!(fields[5], Token::Uint(U256::from(111)));
    }

    #[test]
    fn native_exact_output_refunds_unspent_eth() {
        let route = SwapRoute {
            token_in: token(1, "WETH", 18),
            token_out: token(2, "USDC", 6),
            fee_tier: 500,
            router: Address::from_low_u64_be(9),
            recipient: Address::from_low_u64_be(8),
            native_in: true,
        };
        let params = SwapParameters {
            amount_in: U256::from(35_000_000_000_000_001u64),
            amount_out: U256::from(100_000_000u64),
            exact_side: ExactSide::Output,
        };

        let data = encode_swap_call(&params, &route).unwrap();
        assert_eq!(hex::encode(&data[..4]), "ac9650d8");

        let decoded = multicall_function().decode_input(&data[4..]).unwrap();
        let Token::Array(calls) = &decoded[0] else {
            panic!("expected array");
        };
        assert_eq!(calls.len(), 2);
        let (Token::Bytes(swap), Token::Bytes(refund)) = (&calls[0], &calls[1]) else {
            panic!("expected bytes");
        };
        assert_eq!(&swap[..4], &exact_output_single_function().short_signature()[..]);
        assert_eq!(hex::encode(refund), "12210e8a");
    }

    #[test]
    fn native_exact_input_spends_all_value_without_multicall() {
        let route = SwapRoute {
            token_in: token(1, "WETH", 18),
            token_out: token(2, "USDC", 6),
            fee_tier: 500,
            router: Address::from_low_u64_be(9),
            recipient: Address::from_low_u64_be(8),
            native_in: true,
        };
        let params = SwapParameters {
            amount_in: U256::exp10(18),
            amount_out: U256::from(2_850_000_000u64),
            exact_side: ExactSide::Input,
        };

        let data = encode_swap_call(&params, &route).unwrap();
        assert_eq!(&data[..4], &exact_input_single_function().short_signature()[..]);
    }
}
