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

use anyhow::{Context, Result};
use async_trait::async_trait;
use ethabi::{Function, Param, ParamType, StateMutability, Token};
use ethers::{
    prelude::*,
    types::{Address, TransactionRequest, U256},
};
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::error::CoreError;

/// Decimals of the chain's native asset.
pub const NATIVE_DECIMALS: u8 = 18;
pub const NATIVE_SYMBOL: &str = "ETH";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenRef {
    pub address: Address,
    pub symbol: String,
    pub decimals: u8,
}

/// What a tool call refers to before any chain lookups happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetId {
    Native,
    Token(Address),
}

impl FromStr for AssetId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        if lower == "eth" || lower == "ethereum" {
            return Ok(AssetId::Native);
        }
        if lower.starts_with("0x") && lower.len() == 42 {
            let address = Address::from_str(&lower)
                .map_err(|e| CoreError::invalid(format!("invalid token address {}: {}", s, e)))?;
            return Ok(AssetId::Token(address));
        }
        Err(CoreError::invalid(format!(
            "invalid token '{}': expected ETH or a 0x-prefixed contract address",
            s
        )))
    }
}

/// An asset after its metadata has been resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Asset {
    Native,
    Token(TokenRef),
}

impl Asset {
    pub fn symbol(&self) -> &str {
        match self {
            Asset::Native => NATIVE_SYMBOL,
            Asset::Token(token) => &token.symbol,
        }
    }

    pub fn decimals(&self) -> u8 {
        match self {
            Asset::Native => NATIVE_DECIMALS,
            Asset::Token(token) => token.decimals,
        }
    }
}

/// Chain reads the core depends on.
#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn gas_price(&self) -> Result<U256>;
    async fn token_decimals(&self, token: Address) -> Result<u8>;
    async fn token_symbol(&self, token: Address) -> Result<String>;
    async fn allowance(&self, token: Address, owner: Address, spender: Address) -> Result<U256>;
    async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<U256>;
}

pub struct RpcChain {
    provider: Arc<Provider<Http>>,
}

impl RpcChain {
    pub fn new(provider: Arc<Provider<Http>>) -> Self {
        Self { provider }
    }

    async fn call_view(&self, to: Address, function: &Function, args: &[Token]) -> Result<Vec<Token>> {
        let input = function
            .encode_input(args)
            .with_context(|| format!("Failed to encode {} call", function.name))?;

        let tx_request = TransactionRequest::new().to(to).data(input);
        let result = self
            .provider
            .call(&tx_request.into(), None)
            .await
            .with_context(|| format!("Failed to call {}", function.name))?;

        function
            .decode_output(&result)
            .with_context(|| format!("Failed to decode {} result", function.name))
    }
}

#[async_trait]
impl ChainReader for RpcChain {
    async fn gas_price(&self) -> Result<U256> {
        self.provider
            .get_gas_price()
            .await
            .context("Failed to get gas price")
    }

    #[instrument(skip(self))]
    async fn token_decimals(&self, token: Address) -> Result<u8> {
        let decoded = self.call_view(token, &erc20_decimals(), &[]).await?;
        match decoded.first() {
            Some(Token::Uint(val)) => {
                if *val > U256::from(u8::MAX) {
                    anyhow::bail!("decimals() returned {}", val);
                }
                Ok(val.low_u32() as u8)
            }
            _ => anyhow::bail!("Unexpected decimals result format"),
        }
    }

    #[instrument(skip(self))]
    async fn token_symbol(&self, token: Address) -> Result<String> {
        let decoded = self.call_view(token, &erc20_symbol(), &[]).await?;
        match decoded.into_iter().next() {
            Some(Token::String(symbol)) => Ok(symbol),
            _ => anyhow::bail!("Unexpected symbol result format"),
        }
    }

    #[instrument(skip(self))]
    async fn allowance(&self, token: Address, owner: Address, spender: Address) -> Result<U256> {
        let decoded = self
            .call_view(
                token,
                &erc20_allowance(),
                &[Token::Address(owner), Token::Address(spender)],
            )
            .await?;
        match decoded.first() {
            Some(Token::Uint(val)) => Ok(*val),
            _ => anyhow::bail!("Unexpected allowance result format"),
        }
    }

    async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<U256> {
        debug!("Estimating gas: to={:?}, from={:?}", tx.to, tx.from);
        self.provider
            .estimate_gas(&tx.clone().into(), None)
            .await
            .context("Gas estimation failed")
    }
}

fn uint_output() -> Vec<Param> {
    vec![Param {
        name: "".to_string(),
        kind: ParamType::Uint(256),
        internal_type: None,
    }]
}

fn address_param(name: &str) -> Param {
    Param {
        name: name.to_string(),
        kind: ParamType::Address,
        internal_type: None,
    }
}

fn uint_param(name: &str) -> Param {
    Param {
        name: name.to_string(),
        kind: ParamType::Uint(256),
        internal_type: None,
    }
}

pub fn erc20_decimals() -> Function {
    Function {
        name: "decimals".to_string(),
        inputs: vec![],
        outputs: vec![Param {
            name: "".to_string(),
            kind: ParamType::Uint(8),
            internal_type: None,
        }],
        constant: None,
        state_mutability: StateMutability::View,
    }
}

pub fn erc20_symbol() -> Function {
    Function {
        name: "symbol".to_string(),
        inputs: vec![],
        outputs: vec![Param {
            name: "".to_string(),
            kind: ParamType::String,
            internal_type: None,
        }],
        constant: None,
        state_mutability: StateMutability::View,
    }
}

pub fn erc20_allowance() -> Function {
    Function {
        name: "allowance".to_string(),
        inputs: vec![address_param("owner"), address_param("spender")],
        outputs: uint_output(),
        constant: None,
        state_mutability: StateMutability::View,
    }
}

pub fn erc20_approve() -> Function {
    Function {
        name: "approve".to_string(),
        inputs: vec![address_param("spender"), uint_param("amount")],
        outputs: vec![Param {
            name: "".to_string(),
            kind: ParamType::Bool,
            internal_type: None,
        }],
        constant: None,
        state_mutability: StateMutability::NonPayable,
    }
}

pub fn erc20_transfer() -> Function {
    Function {
        name: "transfer".to_string(),
        inputs: vec![address_param("to"), uint_param("amount")],
        outputs: vec![Param {
            name: "".to_string(),
            kind: ParamType::Bool,
            internal_type: None,
        }],
        constant: None,
        state_mutability: StateMutability::NonPayable,
    }
}
