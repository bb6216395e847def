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

use ethers::types::{Address, U256};
use std::collections::HashMap;
use tracing::{debug, info, instrument};

use crate::batch::PreparedTx;
use crate::builder::TxBuilder;
use crate::chain::{ChainReader, TokenRef};
use crate::error::CoreError;

/// Allowances as they will stand once the queued batch has executed, keyed
/// by `(token, owner, spender)`.
///
/// Entries are seeded from chain reads and then follow the approvals and
/// swaps queued in the run.
#[derive(Debug, Default)]
pub struct AllowanceLedger {
    projected: HashMap<(Address, Address, Address), U256>,
}

impl AllowanceLedger {
    pub fn projected(&self, token: Address, owner: Address, spender: Address) -> Option<U256> {
        self.projected.get(&(token, owner, spender)).copied()
    }

    fn observe(&mut self, token: Address, owner: Address, spender: Address, allowance: U256) {
        self.projected.entry((token, owner, spender)).or_insert(allowance);
    }

    /// A queued `approve` overwrites the allowance.
    pub fn record_approval(&mut self, token: Address, owner: Address, spender: Address, amount: U256) {
        self.projected.insert((token, owner, spender), amount);
    }

    /// A queued spend lowers it.
    pub fn record_spend(&mut self, token: Address, owner: Address, spender: Address, amount: U256) {
        let remaining = self.projected.entry((token, owner, spender)).or_default();
        *remaining = remaining.saturating_sub(amount);
    }

    pub fn clear(&mut self) {
        self.projected.clear();
    }
}

/// Returns an approval for exactly `required` when the allowance of `spender`
/// over `owner`'s tokens falls short, and nothing otherwise.
///
/// The allowance is the one projected by `ledger` when the run already
/// touched the pair, else the on-chain value. Chain state is never changed;
/// the caller queues the returned transaction ahead of whatever spends it and
/// records both in the ledger.
#[instrument(skip(chain, builder, token, ledger), fields(token = %token.symbol))]
pub async fn ensure_allowance(
    chain: &dyn ChainReader,
    builder: &TxBuilder,
    ledger: &mut AllowanceLedger,
    token: &TokenRef,
    owner: Address,
    spender: Address,
    required: U256,
) -> Result<Option<PreparedTx>, CoreError> {
    let allowance = match ledger.projected(token.address, owner, spender) {
        Some(projected) => {
            debug!("Using allowance projected from the batch: {}", projected);
            projected
        }
        None => {
            let on_chain = chain
                .allowance(token.address, owner, spender)
                .await
                .map_err(|e| CoreError::build(format!("{:#}", e)))?;
            ledger.observe(token.address, owner, spender, on_chain);
            on_chain
        }
    };

    if allowance >= required {
        debug!("Sufficient allowance: {} >= {}", allowance, required);
        return Ok(None);
    }

    info!(
        "Allowance {} below required {}, queueing approval",
        allowance, required
    );
    builder.build_approve(token, spender, required).await.map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::erc20_approve;
    use crate::testing::{token, MockChain};
    use ethabi::Token;
    use rust_decimal::Decimal;
    use std::sync::Arc;

    const OWNER: u64 = 0x55;
    const SPENDER: u64 = 0x99;

    fn setup(allowance: u64) -> (Arc<MockChain>, TxBuilder, TokenRef) {
        let usdc = token(0xcc, "USDC", 6);
        let chain = Arc::new(MockChain::new().with_allowance(
            usdc.address,
            Address::from_low_u64_be(OWNER),
            Address::from_low_u64_be(SPENDER),
            U256::from(allowance),
        ));
        let builder = TxBuilder::new(chain.clone(), Decimal::ONE);
        (chain, builder, usdc)
    }

    async fn gate(chain: &MockChain, builder: &TxBuilder, usdc: &TokenRef, required: u64) -> Option<PreparedTx> {
        ensure_allowance(
            chain,
            builder,
            &mut AllowanceLedger::default(),
            usdc,
            Address::from_low_u64_be(OWNER),
            Address::from_low_u64_be(SPENDER),
            U256::from(required),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn sufficient_allowance_needs_no_transaction() {
        let (chain, builder, usdc) = setup(1_000_000);
        assert!(gate(&chain, &builder, &usdc, 1_000_000).await.is_none());
        assert!(gate(&chain, &builder, &usdc, 999_999).await.is_none());
    }

    #[tokio::test]
    async fn shortfall_approves_exactly_the_required_amount() {
        let (chain, builder, usdc) = setup(0);

        let tx = gate(&chain, &builder, &usdc, 1_000_000).await.expect("approval");

        assert_eq!(tx.to(), Some(usdc.address));
        let decoded = erc20_approve().decode_input(&tx.data()[4..]).unwrap();
        assert_eq!(decoded[0], Token::Address(Address::from_low_u64_be(SPENDER)));
        assert_eq!(decoded[1], Token::Uint(U256::from(1_000_000u64)));
    }

    #[tokio::test]
    async fn decision_is_idempotent() {
        let (chain, builder, usdc) = setup(500);

        let first = gate(&chain, &builder, &usdc, 1_000).await.map(|t| t.data());
        let second = gate(&chain, &builder, &usdc, 1_000).await.map(|t| t.data());
        assert!(first.is_some());
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn allowance_read_failure_is_a_build_failure() {
        let usdc = token(0xcc, "USDC", 6);
        let chain = MockChain::new().failing_allowance();
        let builder = TxBuilder::new(Arc::new(MockChain::new()), Decimal::ONE);

        let err = ensure_allowance(
            &chain,
            &builder,
            &mut AllowanceLedger::default(),
            &usdc,
            Address::from_low_u64_be(OWNER),
            Address::from_low_u64_be(SPENDER),
            U256::one(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CoreError::BuildFailed(_)));
    }

    #[tokio::test]
    async fn queued_spends_count_against_the_allowance() {
        // on-chain allowance covers one swap of 600 but not two
        let (chain, builder, usdc) = setup(1_000);
        let owner = Address::from_low_u64_be(OWNER);
        let spender = Address::from_low_u64_be(SPENDER);
        let mut ledger = AllowanceLedger::default();

        let first = ensure_allowance(chain.as_ref(), &builder, &mut ledger, &usdc, owner, spender, U256::from(600))
            .await
            .unwrap();
        assert!(first.is_none());
        ledger.record_spend(usdc.address, owner, spender, U256::from(600));

        let second = ensure_allowance(chain.as_ref(), &builder, &mut ledger, &usdc, owner, spender, U256::from(600))
            .await
            .unwrap()
            .expect("second swap needs an approval");
        let decoded = erc20_approve().decode_input(&second.data()[4..]).unwrap();
        assert_eq!(decoded[1], Token::Uint(U256::from(600)));

        ledger.record_approval(usdc.address, owner, spender, U256::from(600));
        ledger.record_spend(usdc.address, owner, spender, U256::from(600));
        assert_eq!(ledger.projected(usdc.address, owner, spender), Some(U256::zero()));
    }

    #[tokio::test]
    async fn projected_allowance_skips_the_chain_read() {
        let usdc = token(0xcc, "USDC", 6);
        let owner = Address::from_low_u64_be(OWNER);
        let spender = Address::from_low_u64_be(SPENDER);
        let chain = MockChain::new().failing_allowance();
        let builder = TxBuilder::new(Arc::new(MockChain::new()), Decimal::ONE);
        let mut ledger = AllowanceLedger::default();
        ledger.record_approval(usdc.address, owner, spender, U256::from(5_000));

        let approval = ensure_allowance(&chain, &builder, &mut ledger, &usdc, owner, spender, U256::from(5_000))
            .await
            .unwrap();
        assert!(approval.is_none());
    }
}
