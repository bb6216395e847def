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

use ethers::types::{Address, Bytes, TransactionRequest, U256};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::CoreError;
use crate::wallet::{SubmissionReceipt, WalletService};

/// A built, unsigned transaction plus the line a human reviews before signing.
#[derive(Debug, Clone, Serialize)]
pub struct PreparedTx {
    description: String,
    transaction: TransactionRequest,
}

impl PreparedTx {
    pub fn new(description: impl Into<String>, transaction: TransactionRequest) -> Self {
        Self {
            description: description.into(),
            transaction,
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn transaction(&self) -> &TransactionRequest {
        &self.transaction
    }

    pub fn to(&self) -> Option<Address> {
        self.transaction.to.as_ref().and_then(|to| to.as_address().copied())
    }

    pub fn value(&self) -> U256 {
        self.transaction.value.unwrap_or_default()
    }

    pub fn data(&self) -> Bytes {
        self.transaction.data.clone().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    Empty,
    Accumulating,
    Submitting,
    Committed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    NothingToSubmit,
    Committed(SubmissionReceipt),
}

/// Ordered transactions of one run.
///
/// Insertion order is execution order: an approval appended before a swap
/// executes before it inside the multi-send.
#[derive(Debug)]
pub struct Batch {
    transactions: Vec<PreparedTx>,
    state: BatchState,
    last_terminal: Option<BatchState>,
}

impl Default for Batch {
    fn default() -> Self {
        Self::new()
    }
}

impl Batch {
    pub fn new() -> Self {
        Self {
            transactions: Vec::new(),
            state: BatchState::Empty,
            last_terminal: None,
        }
    }

    pub fn push(&mut self, tx: PreparedTx) {
        info!("Queued transaction #{}: {}", self.transactions.len() + 1, tx.description());
        self.transactions.push(tx);
        self.state = BatchState::Accumulating;
    }

    pub fn extend(&mut self, txs: impl IntoIterator<Item = PreparedTx>) {
        for tx in txs {
            self.push(tx);
        }
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    pub fn transactions(&self) -> &[PreparedTx] {
        &self.transactions
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    /// Outcome of the most recent submission, `Committed` or `Failed`.
    pub fn last_terminal_state(&self) -> Option<BatchState> {
        self.last_terminal
    }

    /// Drops everything queued so far without touching the chain.
    pub fn discard(&mut self) -> usize {
        let dropped = self.transactions.len();
        self.transactions.clear();
        self.state = BatchState::Empty;
        dropped
    }

    /// Hands the whole batch to the wallet as one atomic multi-send.
    ///
    /// The batch is empty afterwards whatever the wallet answered.
    pub async fn submit(
        &mut self,
        wallet: &dyn WalletService,
        require_approval: bool,
    ) -> Result<SubmitOutcome, CoreError> {
        if self.transactions.is_empty() {
            info!("No transactions to submit");
            return Ok(SubmitOutcome::NothingToSubmit);
        }

        self.state = BatchState::Submitting;
        let transactions = std::mem::take(&mut self.transactions);
        info!(
            "Submitting batch of {} transactions (approval required: {})",
            transactions.len(),
            require_approval
        );

        let result = wallet.submit_batch(&transactions, require_approval).await;
        let terminal = match &result {
            Ok(receipt) => {
                info!("Batch submitted in transaction {:?}", receipt.tx_hash);
                BatchState::Committed
            }
            Err(e) => {
                warn!("Batch submission failed: {}", e);
                BatchState::Failed
            }
        };

        self.last_terminal = Some(terminal);
        self.state = BatchState::Empty;
        result.map(SubmitOutcome::Committed)
    }
}
