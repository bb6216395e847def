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

use ethabi::Token;
use ethers::types::{Address, TransactionRequest, U256};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::batch::PreparedTx;
use crate::chain::{erc20_approve, erc20_transfer, Asset, ChainReader, TokenRef};
use crate::error::CoreError;
use crate::swap::{encode_swap_call, ExactSide, SwapParameters, SwapRoute};
use crate::units::{format_units, mul_decimal, Rounding};

pub const DEFAULT_GAS_PRICE_MULTIPLIER: &str = "1.1";

/// Builds unsigned transactions. Nonces are left for the signer to fill in.
pub struct TxBuilder {
    chain: Arc<dyn ChainReader>,
    gas_price_multiplier: Decimal,
}

impl TxBuilder {
    pub fn new(chain: Arc<dyn ChainReader>, gas_price_multiplier: Decimal) -> Self {
        Self {
            chain,
            gas_price_multiplier,
        }
    }

    /// Current network gas price, padded by the multiplier because the batch
    /// may sit waiting for approval before it is broadcast.
    pub async fn gas_price(&self) -> Result<U256, CoreError> {
        let network = self.chain.gas_price().await.map_err(CoreError::build)?;
        mul_decimal(network, self.gas_price_multiplier, Rounding::Up).map_err(CoreError::build)
    }

    #[instrument(skip(self, asset), fields(asset = asset.symbol()))]
    pub async fn build_transfer(
        &self,
        asset: &Asset,
        to: Address,
        amount: U256,
    ) -> Result<PreparedTx, CoreError> {
        let gas_price = self.gas_price().await?;
        let description = format!(
            "Transfer {} {} to {:?}",
            format_units(amount, asset.decimals()),
            asset.symbol(),
            to
        );

        let tx = match asset {
            Asset::Native => TransactionRequest::new().to(to).value(amount),
            Asset::Token(token) => {
                let data = erc20_transfer()
                    .encode_input(&[Token::Address(to), Token::Uint(amount)])
                    .map_err(|e| CoreError::build(format!("Failed to encode transfer: {}", e)))?;
                TransactionRequest::new().to(token.address).data(data)
            }
        };

        Ok(PreparedTx::new(description, tx.gas_price(gas_price)))
    }

    #[instrument(skip(self, token), fields(token = %token.symbol))]
    pub async fn build_approve(
        &self,
        token: &TokenRef,
        spender: Address,
        amount: U256,
    ) -> Result<PreparedTx, CoreError> {
        let gas_price = self.gas_price().await?;
        let data = erc20_approve()
            .encode_input(&[Token::Address(spender), Token::Uint(amount)])
            .map_err(|e| CoreError::build(format!("Failed to encode approve: {}", e)))?;

        let description = format!(
            "Approve {} {} for spender {:?}",
            format_units(amount, token.decimals),
            token.symbol,
            spender
        );
        let tx = TransactionRequest::new()
            .to(token.address)
            .data(data)
            .gas_price(gas_price);

        Ok(PreparedTx::new(description, tx))
    }

    /// Builds the router call for a swap.
    ///
    /// With `estimate_from` set, the gas limit is estimated from that address
    /// and an estimation failure fails the build. Without it the limit is left
    /// for the signer.
    #[instrument(skip(self, params, route), fields(token_in = %route.token_in.symbol, token_out = %route.token_out.symbol))]
    pub async fn build_swap(
        &self,
        params: &SwapParameters,
        route: &SwapRoute,
        estimate_from: Option<Address>,
    ) -> Result<PreparedTx, CoreError> {
        let gas_price = self.gas_price().await?;
        let data = encode_swap_call(params, route).map_err(CoreError::build)?;

        let mut tx = TransactionRequest::new()
            .to(route.router)
            .data(data)
            .gas_price(gas_price);
        if route.native_in {
            tx = tx.value(params.amount_in);
        }

        if let Some(from) = estimate_from {
            let request = tx.clone().from(from);
            let gas = self.chain.estimate_gas(&request).await.map_err(|e| {
                warn!("Swap gas estimation failed: {:#}", e);
                CoreError::build(format!("{:#}", e))
            })?;
            info!("Estimated swap gas: {}", gas);
            tx = tx.gas(gas);
        }

        Ok(PreparedTx::new(describe_swap(params, route), tx))
    }
}

fn describe_swap(params: &SwapParameters, route: &SwapRoute) -> String {
    let symbol_in = if route.native_in {
        crate::chain::NATIVE_SYMBOL
    } else {
        route.token_in.symbol.as_str()
    };
    let amount_in = format_units(params.amount_in, route.token_in.decimals);
    let amount_out = format_units(params.amount_out, route.token_out.decimals);

    match params.exact_side {
        ExactSide::Input => format!(
            "Swap {} {} for at least {} {}",
            amount_in, symbol_in, amount_out, route.token_out.symbol
        ),
        ExactSide::Output => format!(
            "Swap at most {} {} for {} {}",
            amount_in, symbol_in, amount_out, route.token_out.symbol
        ),
    }
}
