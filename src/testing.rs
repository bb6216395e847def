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

//! In-memory stand-ins for the chain, the liquidity index and the wallet.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use ethers::types::{Address, TransactionRequest, H256, U256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::batch::PreparedTx;
use crate::chain::{ChainReader, TokenRef};
use crate::error::CoreError;
use crate::quote::{LiquidityIndex, Pool, PoolToken};
use crate::wallet::{SubmissionReceipt, WalletService};

pub fn token(n: u64, symbol: &str, decimals: u8) -> TokenRef {
    TokenRef {
        address: Address::from_low_u64_be(n),
        symbol: symbol.to_string(),
        decimals,
    }
}

pub fn pool(id: &str, fee_tier: u32, sqrt_price_x96: U256, liquidity: u128) -> Pool {
    Pool {
        id: id.to_string(),
        fee_tier: fee_tier.to_string(),
        sqrt_price: sqrt_price_x96.to_string(),
        liquidity: liquidity.to_string(),
        token0: PoolToken {
            id: "0x0".to_string(),
            symbol: String::new(),
        },
        token1: PoolToken {
            id: "0x1".to_string(),
            symbol: String::new(),
        },
    }
}

pub struct StaticIndex {
    pools: Vec<Pool>,
    queried: Mutex<Vec<(Address, Address)>>,
}

impl StaticIndex {
    pub fn new(pools: Vec<Pool>) -> Self {
        Self {
            pools,
            queried: Mutex::new(Vec::new()),
        }
    }

    pub fn queried(&self) -> Vec<(Address, Address)> {
        self.queried.lock().unwrap().clone()
    }
}

#[async_trait]
impl LiquidityIndex for StaticIndex {
    async fn pools(&self, token0: Address, token1: Address) -> Result<Vec<Pool>, CoreError> {
        self.queried.lock().unwrap().push((token0, token1));
        Ok(self.pools.clone())
    }
}

pub struct MockChain {
    gas_price: U256,
    gas_estimate: Result<U256, String>,
    tokens: HashMap<Address, (String, u8)>,
    allowances: HashMap<(Address, Address, Address), U256>,
    allowance_fails: bool,
    decimals_calls: AtomicUsize,
    estimate_calls: AtomicUsize,
}

impl MockChain {
    pub fn new() -> Self {
        Self {
            gas_price: U256::from(20_000_000_000u64),
            gas_estimate: Ok(U256::from(150_000u64)),
            tokens: HashMap::new(),
            allowances: HashMap::new(),
            allowance_fails: false,
            decimals_calls: AtomicUsize::new(0),
            estimate_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_gas_price(mut self, gas_price: U256) -> Self {
        self.gas_price = gas_price;
        self
    }

    pub fn with_gas_estimate(mut self, estimate: Result<U256, String>) -> Self {
        self.gas_estimate = estimate;
        self
    }

    pub fn with_token(mut self, token: &TokenRef) -> Self {
        self.tokens
            .insert(token.address, (token.symbol.clone(), token.decimals));
        self
    }

    pub fn with_allowance(mut self, token: Address, owner: Address, spender: Address, amount: U256) -> Self {
        self.allowances.insert((token, owner, spender), amount);
        self
    }

    pub fn failing_allowance(mut self) -> Self {
        self.allowance_fails = true;
        self
    }

    pub fn decimals_calls(&self) -> usize {
        self.decimals_calls.load(Ordering::SeqCst)
    }

    pub fn estimate_calls(&self) -> usize {
        self.estimate_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainReader for MockChain {
    async fn gas_price(&self) -> Result<U256> {
        Ok(self.gas_price)
    }

    async fn token_decimals(&self, token: Address) -> Result<u8> {
        self.decimals_calls.fetch_add(1, Ordering::SeqCst);
        self.tokens
            .get(&token)
            .map(|(_, decimals)| *decimals)
            .ok_or_else(|| anyhow!("execution reverted: no code at {:?}", token))
    }

    async fn token_symbol(&self, token: Address) -> Result<String> {
        self.tokens
            .get(&token)
            .map(|(symbol, _)| symbol.clone())
            .ok_or_else(|| anyhow!("execution reverted: no code at {:?}", token))
    }

    async fn allowance(&self, token: Address, owner: Address, spender: Address) -> Result<U256> {
        if self.allowance_fails {
            return Err(anyhow!("connection refused"));
        }
        Ok(self
            .allowances
            .get(&(token, owner, spender))
            .copied()
            .unwrap_or_default())
    }

    async fn estimate_gas(&self, _tx: &TransactionRequest) -> Result<U256> {
        self.estimate_calls.fetch_add(1, Ordering::SeqCst);
        self.gas_estimate.clone().map_err(|e| anyhow!(e))
    }
}

pub struct RecordingWallet {
    rejection: Option<String>,
    submissions: Mutex<Vec<Vec<String>>>,
    approval_flags: Mutex<Vec<bool>>,
}

impl RecordingWallet {
    pub fn accepting() -> Self {
        Self {
            rejection: None,
            submissions: Mutex::new(Vec::new()),
            approval_flags: Mutex::new(Vec::new()),
        }
    }

    pub fn rejecting(reason: &str) -> Self {
        Self {
            rejection: Some(reason.to_string()),
            ..Self::accepting()
        }
    }

    /// Descriptions of every batch handed over, in submission order.
    pub fn submissions(&self) -> Vec<Vec<String>> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn approval_flags(&self) -> Vec<bool> {
        self.approval_flags.lock().unwrap().clone()
    }
}

#[async_trait]
impl WalletService for RecordingWallet {
    async fn submit_batch(
        &self,
        transactions: &[PreparedTx],
        require_approval: bool,
    ) -> Result<SubmissionReceipt, CoreError> {
        self.submissions.lock().unwrap().push(
            transactions
                .iter()
                .map(|tx| tx.description().to_string())
                .collect(),
        );
        self.approval_flags.lock().unwrap().push(require_approval);

        match &self.rejection {
            Some(reason) => Err(CoreError::rejected(reason)),
            None => Ok(SubmissionReceipt {
                tx_hash: H256::from_low_u64_be(0xbeef),
                transaction_count: transactions.len(),
            }),
        }
    }
}
