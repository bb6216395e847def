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

use async_trait::async_trait;
use ethers::types::{Address, U256, U512};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::chain::TokenRef;
use crate::error::CoreError;

pub const UNISWAP_V3_SUBGRAPH: &str = "https://api.thegraph.com/subgraphs/name/uniswap/uniswap-v3";

/// Fractional digits kept when turning a pool price into a decimal.
const PRICE_PRECISION: u32 = 18;

const POOLS_QUERY: &str = r#"
    query GetPools($token0: String, $token1: String) {
        pools(where: { token0: $token0, token1: $token1 }) {
            id
            feeTier
            sqrtPrice
            liquidity
            token0 { id symbol }
            token1 { id symbol }
        }
    }
"#;

#[derive(Debug, Clone, Deserialize)]
pub struct PoolToken {
    pub id: String,
    #[serde(default)]
    pub symbol: String,
}

/// A pool as reported by the liquidity index. Numeric fields arrive as strings.
#[derive(Debug, Clone, Deserialize)]
pub struct Pool {
    pub id: String,
    #[serde(rename = "feeTier")]
    pub fee_tier: String,
    #[serde(rename = "sqrtPrice")]
    pub sqrt_price: String,
    pub liquidity: String,
    pub token0: PoolToken,
    pub token1: PoolToken,
}

impl Pool {
    pub fn liquidity(&self) -> Result<u128, CoreError> {
        self.liquidity
            .parse::<u128>()
            .map_err(|e| CoreError::quote(format!("pool {} has invalid liquidity: {}", self.id, e)))
    }

    pub fn fee_tier(&self) -> Result<u32, CoreError> {
        self.fee_tier
            .parse::<u32>()
            .map_err(|e| CoreError::quote(format!("pool {} has invalid fee tier: {}", self.id, e)))
    }

    pub fn sqrt_price_x96(&self) -> Result<U256, CoreError> {
        U256::from_dec_str(&self.sqrt_price)
            .map_err(|e| CoreError::quote(format!("pool {} has invalid sqrtPrice: {}", self.id, e)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SwapQuote {
    /// Units of token_out per unit of token_in.
    pub price: Decimal,
    pub fee_tier: u32,
    pub pool_liquidity: u128,
}

/// Source of pools for a canonically ordered token pair.
#[async_trait]
pub trait LiquidityIndex: Send + Sync {
    async fn pools(&self, token0: Address, token1: Address) -> Result<Vec<Pool>, CoreError>;
}

/// Uniswap v3 subgraph over GraphQL.
pub struct SubgraphIndex {
    client: reqwest::Client,
    url: String,
}

impl SubgraphIndex {
    pub fn new(url: String, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl LiquidityIndex for SubgraphIndex {
    #[instrument(skip(self))]
    async fn pools(&self, token0: Address, token1: Address) -> Result<Vec<Pool>, CoreError> {
        let body = json!({
            "query": POOLS_QUERY,
            "variables": {
                "token0": format!("{:?}", token0),
                "token1": format!("{:?}", token1),
            }
        });

        debug!("Querying pools from {}", self.url);

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::quote(format!("liquidity index request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(CoreError::quote(format!(
                "liquidity index returned status {}",
                response.status()
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CoreError::quote(format!("failed to parse liquidity index response: {}", e)))?;

        parse_pools_response(json)
    }
}

/// Extracts `data.pools` from a GraphQL response body.
pub fn parse_pools_response(json: serde_json::Value) -> Result<Vec<Pool>, CoreError> {
    let pools = json
        .get("data")
        .and_then(|data| data.get("pools"))
        .ok_or_else(|| CoreError::quote(format!("liquidity index response has no data: {}", json)))?;

    serde_json::from_value(pools.clone())
        .map_err(|e| CoreError::quote(format!("malformed pools payload: {}", e)))
}

/// Orders a pair the way the index stores it: smaller address first.
pub fn canonical_pair(a: Address, b: Address) -> (Address, Address) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Picks the pool with the most liquidity. On ties the first pool seen wins.
pub fn select_best_pool(pools: &[Pool]) -> Result<&Pool, CoreError> {
    let mut best: Option<(&Pool, u128)> = None;
    for pool in pools {
        let liquidity = pool.liquidity()?;
        match best {
            Some((_, current)) if liquidity <= current => {}
            _ => best = Some((pool, liquidity)),
        }
    }
    best.map(|(pool, _)| pool)
        .ok_or_else(|| CoreError::quote("no pools found for pair"))
}

/// Converts a Q64.96 pool price into units of the output token per input token.
///
/// The raw pool price is `token1 / token0 = sqrtPrice² / 2^192` in base units;
/// the decimals difference turns it into whole-token units.
pub fn price_from_sqrt(
    sqrt_price_x96: U256,
    token_in_is_token0: bool,
    decimals0: u8,
    decimals1: u8,
) -> Result<Decimal, CoreError> {
    if sqrt_price_x96.is_zero() {
        return Err(CoreError::quote("pool reports a zero price"));
    }
    let squared = sqrt_price_x96.full_mul(sqrt_price_x96);
    let q192 = U512::one() << 192usize;
    let overflow = || CoreError::quote("pool price overflows 512 bits");
    let exp10 = |n: u32| -> Result<U512, CoreError> {
        // 10^154 is the largest power of ten below 2^512
        if n > 154 {
            return Err(overflow());
        }
        Ok(U512::exp10(n as usize))
    };

    let (numerator, denominator) = if token_in_is_token0 {
        (
            squared.checked_mul(exp10(PRICE_PRECISION + decimals0 as u32)?),
            q192.checked_mul(exp10(decimals1 as u32)?),
        )
    } else {
        (
            q192.checked_mul(exp10(PRICE_PRECISION + decimals1 as u32)?),
            squared.checked_mul(exp10(decimals0 as u32)?),
        )
    };
    let scaled = numerator.ok_or_else(overflow)? / denominator.ok_or_else(overflow)?;

    scaled_to_decimal(scaled, PRICE_PRECISION)
}

fn scaled_to_decimal(mut value: U512, mut scale: u32) -> Result<Decimal, CoreError> {
    // rust_decimal mantissas are 96 bits wide
    let max_mantissa = (U512::one() << 96usize) - U512::one();
    while value > max_mantissa && scale > 0 {
        value /= U512::from(10u8);
        scale -= 1;
    }
    if value > max_mantissa {
        return Err(CoreError::quote("price exceeds decimal range"));
    }
    if value.is_zero() {
        return Err(CoreError::quote("price rounds to zero"));
    }
    Decimal::try_from_i128_with_scale(value.as_u128() as i128, scale)
        .map(|d| d.normalize())
        .map_err(CoreError::quote)
}

pub struct QuoteResolver {
    index: Arc<dyn LiquidityIndex>,
}

impl QuoteResolver {
    pub fn new(index: Arc<dyn LiquidityIndex>) -> Self {
        Self { index }
    }

    /// Prices `token_in` in `token_out` using the deepest pool of the pair.
    #[instrument(skip(self), fields(token_in = %token_in.symbol, token_out = %token_out.symbol))]
    pub async fn resolve_quote(
        &self,
        token_in: &TokenRef,
        token_out: &TokenRef,
    ) -> Result<SwapQuote, CoreError> {
        if token_in.address == token_out.address {
            return Err(CoreError::invalid(format!(
                "cannot quote {} against itself",
                token_in.symbol
            )));
        }

        let (token0, token1) = canonical_pair(token_in.address, token_out.address);
        let pools = self.index.pools(token0, token1).await?;
        let pool = select_best_pool(&pools)?;

        let token_in_is_token0 = token_in.address == token0;
        let (decimals0, decimals1) = if token_in_is_token0 {
            (token_in.decimals, token_out.decimals)
        } else {
            (token_out.decimals, token_in.decimals)
        };

        let price = price_from_sqrt(pool.sqrt_price_x96()?, token_in_is_token0, decimals0, decimals1)?;
        let quote = SwapQuote {
            price,
            fee_tier: pool.fee_tier()?,
            pool_liquidity: pool.liquidity()?,
        };

        info!(
            "Resolved quote via pool {}: 1 {} = {} {} (fee tier {})",
            pool.id, token_in.symbol, quote.price, token_out.symbol, quote.fee_tier
        );
        Ok(quote)
    }
}
