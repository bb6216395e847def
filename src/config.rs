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
use ethers::types::Address;
use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::builder::DEFAULT_GAS_PRICE_MULTIPLIER;
use crate::quote::UNISWAP_V3_SUBGRAPH;
use crate::swap::{UNISWAP_SWAP_ROUTER_02, WETH_ADDRESS};
use crate::wallet::MULTISEND_CALL_ONLY;

const DEFAULT_RPC_URL: &str = "https://eth.llamarpc.com";
const DEFAULT_SLIPPAGE: &str = "0.05";
const DEFAULT_SUBGRAPH_TIMEOUT_SECS: u64 = 20;

#[derive(Debug, Clone)]
pub struct Config {
    pub rpc_url: String,
    pub subgraph_url: String,
    pub subgraph_timeout: Duration,
    pub smart_wallet: Address,
    pub agent_private_key: String,
    pub router: Address,
    pub weth: Address,
    pub multisend: Address,
    pub slippage: Decimal,
    pub gas_price_multiplier: Decimal,
    pub non_interactive: bool,
    pub server_host: String,
    pub server_port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads every setting through `lookup`, applying defaults and validation.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let required = |key: &str| lookup(key).with_context(|| format!("{} must be set", key));

        let slippage = parse_decimal("SLIPPAGE", &get("SLIPPAGE", DEFAULT_SLIPPAGE))?;
        if slippage < Decimal::ZERO || slippage >= Decimal::ONE {
            anyhow::bail!("SLIPPAGE must be within [0, 1), got {}", slippage);
        }

        let gas_price_multiplier = parse_decimal(
            "GAS_PRICE_MULTIPLIER",
            &get("GAS_PRICE_MULTIPLIER", DEFAULT_GAS_PRICE_MULTIPLIER),
        )?;
        if gas_price_multiplier <= Decimal::ONE {
            anyhow::bail!(
                "GAS_PRICE_MULTIPLIER must be greater than 1, got {}",
                gas_price_multiplier
            );
        }

        let subgraph_timeout = get(
            "SUBGRAPH_TIMEOUT_SECS",
            &DEFAULT_SUBGRAPH_TIMEOUT_SECS.to_string(),
        )
        .parse::<u64>()
        .context("Invalid SUBGRAPH_TIMEOUT_SECS")?;

        let non_interactive = match get("NON_INTERACTIVE", "false").to_lowercase().as_str() {
            "1" | "true" | "yes" => true,
            "0" | "false" | "no" | "" => false,
            other => anyhow::bail!("Invalid NON_INTERACTIVE value: {}", other),
        };

        Ok(Self {
            rpc_url: get("ETH_RPC_URL", DEFAULT_RPC_URL),
            subgraph_url: get("SUBGRAPH_URL", UNISWAP_V3_SUBGRAPH),
            subgraph_timeout: Duration::from_secs(subgraph_timeout),
            smart_wallet: parse_address("SMART_WALLET_ADDRESS", &required("SMART_WALLET_ADDRESS")?)?,
            agent_private_key: required("AGENT_PRIVATE_KEY")?,
            router: parse_address("UNISWAP_ROUTER", &get("UNISWAP_ROUTER", UNISWAP_SWAP_ROUTER_02))?,
            weth: parse_address("WETH_ADDRESS", &get("WETH_ADDRESS", WETH_ADDRESS))?,
            multisend: parse_address(
                "MULTISEND_ADDRESS",
                &get("MULTISEND_ADDRESS", MULTISEND_CALL_ONLY),
            )?,
            slippage,
            gas_price_multiplier,
            non_interactive,
            server_host: get("SERVER_HOST", "127.0.0.1"),
            server_port: get("SERVER_PORT", "0")
                .parse::<u16>()
                .context("Invalid SERVER_PORT")?,
        })
    }
}

fn parse_address(key: &str, value: &str) -> Result<Address> {
    Address::from_str(value.trim()).with_context(|| format!("Invalid {}: {}", key, value))
}

fn parse_decimal(key: &str, value: &str) -> Result<Decimal> {
    Decimal::from_str(value.trim()).with_context(|| format!("Invalid {}: {}", key, value))
}
