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

use ethers::types::Address;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::approval::{ensure_allowance, AllowanceLedger};
use crate::batch::{Batch, BatchState, PreparedTx, SubmitOutcome};
use crate::builder::TxBuilder;
use crate::chain::{Asset, AssetId, ChainReader, TokenRef};
use crate::error::CoreError;
use crate::quote::{QuoteResolver, SwapQuote};
use crate::swap::{compute_swap_params, ExactSide, SwapRoute};
use crate::units::{to_base_units, Rounding, MAX_DECIMALS};
use crate::wallet::WalletService;

/// One step a planner can ask for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Transfer {
        asset: AssetId,
        to: Address,
        amount: Decimal,
    },
    Swap {
        token_in: AssetId,
        token_out: AssetId,
        amount: Decimal,
        exact_side: ExactSide,
    },
    Approve {
        token: Address,
        spender: Address,
        amount: Decimal,
    },
}

#[derive(Debug, Clone)]
pub struct RunSettings {
    /// The smart wallet every transaction executes from.
    pub wallet: Address,
    pub router: Address,
    pub weth: Address,
    pub slippage: Decimal,
    pub require_approval: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub queued: Vec<String>,
    pub batch_size: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReview {
    pub state: BatchState,
    pub last_outcome: Option<BatchState>,
    pub transactions: Vec<PreparedTx>,
}

/// State of a single agent run: the pending batch, the token metadata
/// fetched so far and the allowances the batch will leave behind.
pub struct RunContext {
    chain: Arc<dyn ChainReader>,
    resolver: Arc<QuoteResolver>,
    builder: Arc<TxBuilder>,
    wallet: Arc<dyn WalletService>,
    settings: RunSettings,
    tokens: HashMap<Address, TokenRef>,
    allowances: AllowanceLedger,
    batch: Batch,
}

impl RunContext {
    pub fn new(
        chain: Arc<dyn ChainReader>,
        resolver: Arc<QuoteResolver>,
        builder: Arc<TxBuilder>,
        wallet: Arc<dyn WalletService>,
        settings: RunSettings,
    ) -> Self {
        Self {
            chain,
            resolver,
            builder,
            wallet,
            settings,
            tokens: HashMap::new(),
            allowances: AllowanceLedger::default(),
            batch: Batch::new(),
        }
    }

    /// A new, empty run sharing this run's services.
    pub fn fork(&self) -> Self {
        Self::new(
            self.chain.clone(),
            self.resolver.clone(),
            self.builder.clone(),
            self.wallet.clone(),
            self.settings.clone(),
        )
    }

    pub fn batch(&self) -> &Batch {
        &self.batch
    }

    /// Builds the transactions for one step and appends them to the batch.
    /// A failing step leaves the batch untouched.
    #[instrument(skip(self))]
    pub async fn execute(&mut self, action: Action) -> Result<StepReport, CoreError> {
        let prepared = match action {
            Action::Transfer { asset, to, amount } => vec![self.transfer(asset, to, amount).await?],
            Action::Swap {
                token_in,
                token_out,
                amount,
                exact_side,
            } => self.swap(token_in, token_out, amount, exact_side).await?,
            Action::Approve {
                token,
                spender,
                amount,
            } => vec![self.approve(token, spender, amount).await?],
        };

        let queued = prepared.iter().map(|tx| tx.description().to_string()).collect();
        self.batch.extend(prepared);
        Ok(StepReport {
            queued,
            batch_size: self.batch.len(),
        })
    }

    /// Read-only price lookup, nothing is queued.
    pub async fn quote(&mut self, token_in: AssetId, token_out: AssetId) -> Result<(TokenRef, TokenRef, SwapQuote), CoreError> {
        let (token_in, _) = self.swap_side(token_in).await?;
        let (token_out, _) = self.swap_side(token_out).await?;
        let quote = self.resolver.resolve_quote(&token_in, &token_out).await?;
        Ok((token_in, token_out, quote))
    }

    pub fn review(&self) -> BatchReview {
        BatchReview {
            state: self.batch.state(),
            last_outcome: self.batch.last_terminal_state(),
            transactions: self.batch.transactions().to_vec(),
        }
    }

    /// Ends the run: submits whatever was queued and starts over with an
    /// empty batch and token cache.
    pub async fn finish(&mut self) -> Result<SubmitOutcome, CoreError> {
        self.tokens.clear();
        self.allowances.clear();
        self.batch
            .submit(self.wallet.as_ref(), self.settings.require_approval)
            .await
    }

    /// Drops the pending batch without any on-chain effect.
    pub fn abort(&mut self) -> usize {
        self.tokens.clear();
        self.allowances.clear();
        let dropped = self.batch.discard();
        info!("Run aborted, discarded {} transactions", dropped);
        dropped
    }

    async fn token(&mut self, address: Address) -> Result<TokenRef, CoreError> {
        if let Some(token) = self.tokens.get(&address) {
            return Ok(token.clone());
        }

        let decimals = self
            .chain
            .token_decimals(address)
            .await
            .map_err(|e| CoreError::build(format!("decimals() of {:?}: {:#}", address, e)))?;
        if decimals > MAX_DECIMALS {
            return Err(CoreError::build(format!(
                "token {:?} reports {} decimals, at most {} are supported",
                address, decimals, MAX_DECIMALS
            )));
        }
        let symbol = self
            .chain
            .token_symbol(address)
            .await
            .map_err(|e| CoreError::build(format!("symbol() of {:?}: {:#}", address, e)))?;

        let token = TokenRef {
            address,
            symbol,
            decimals,
        };
        self.tokens.insert(address, token.clone());
        Ok(token)
    }

    /// Swaps trade the native asset as its wrapped token. The flag tells
    /// whether the side was given as native.
    async fn swap_side(&mut self, asset: AssetId) -> Result<(TokenRef, bool), CoreError> {
        match asset {
            AssetId::Native => Ok((self.token(self.settings.weth).await?, true)),
            AssetId::Token(address) => Ok((self.token(address).await?, false)),
        }
    }

    async fn transfer(&mut self, asset: AssetId, to: Address, amount: Decimal) -> Result<PreparedTx, CoreError> {
        let asset = match asset {
            AssetId::Native => Asset::Native,
            AssetId::Token(address) => Asset::Token(self.token(address).await?),
        };
        let amount = to_base_units(amount, asset.decimals(), Rounding::Down)?;
        if amount.is_zero() {
            return Err(CoreError::invalid("transfer amount rounds to zero"));
        }
        self.builder.build_transfer(&asset, to, amount).await
    }

    async fn approve(&mut self, token: Address, spender: Address, amount: Decimal) -> Result<PreparedTx, CoreError> {
        let token = self.token(token).await?;
        let amount = to_base_units(amount, token.decimals, Rounding::Down)?;
        let tx = self.builder.build_approve(&token, spender, amount).await?;
        self.allowances
            .record_approval(token.address, self.settings.wallet, spender, amount);
        Ok(tx)
    }

    async fn swap(
        &mut self,
        token_in: AssetId,
        token_out: AssetId,
        amount: Decimal,
        exact_side: ExactSide,
    ) -> Result<Vec<PreparedTx>, CoreError> {
        let (token_in, native_in) = self.swap_side(token_in).await?;
        let (token_out, _) = self.swap_side(token_out).await?;
        if token_in.address == token_out.address {
            return Err(CoreError::invalid(format!(
                "cannot swap {} for {}",
                token_in.symbol, token_out.symbol
            )));
        }

        let quote = self.resolver.resolve_quote(&token_in, &token_out).await?;
        let params = compute_swap_params(
            amount,
            &token_in,
            &token_out,
            quote.price,
            exact_side,
            self.settings.slippage,
        )?;

        let mut prepared = Vec::new();
        if !native_in {
            let approval = ensure_allowance(
                self.chain.as_ref(),
                &self.builder,
                &mut self.allowances,
                &token_in,
                self.settings.wallet,
                self.settings.router,
                params.amount_in,
            )
            .await?;
            prepared.extend(approval);
        }

        let estimate_from = if self.batch.is_empty() && prepared.is_empty() {
            Some(self.settings.wallet)
        } else {
            warn!("Swap depends on earlier batch entries, leaving gas limit to the signer");
            None
        };

        let approved = !prepared.is_empty();
        let route = SwapRoute {
            token_in,
            token_out,
            fee_tier: quote.fee_tier,
            router: self.settings.router,
            recipient: self.settings.wallet,
            native_in,
        };
        prepared.push(self.builder.build_swap(&params, &route, estimate_from).await?);

        if !native_in {
            let (token, owner, spender) = (route.token_in.address, self.settings.wallet, self.settings.router);
            if approved {
                self.allowances.record_approval(token, owner, spender, params.amount_in);
            }
            self.allowances.record_spend(token, owner, spender, params.amount_in);
        }
        Ok(prepared)
    }
}
