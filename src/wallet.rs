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
    types::{Address, Bytes, TransactionRequest, H256, U256},
};
use serde::Serialize;
use std::io::{BufRead, BufReader, Write};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::batch::PreparedTx;
use crate::error::CoreError;

/// MultiSendCallOnly v1.3.0
pub const MULTISEND_CALL_ONLY: &str = "0x40A2aCCbd92BCA938b02010E17A5b8929b49130D";

const OPERATION_CALL: u8 = 0;
const OPERATION_DELEGATE_CALL: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmissionReceipt {
    pub tx_hash: H256,
    pub transaction_count: usize,
}

/// Executes an ordered batch atomically on behalf of the smart wallet.
#[async_trait]
pub trait WalletService: Send + Sync {
    async fn submit_batch(
        &self,
        transactions: &[PreparedTx],
        require_approval: bool,
    ) -> Result<SubmissionReceipt, CoreError>;
}

/// Asks a human whether a batch may go out.
#[async_trait]
pub trait Approver: Send + Sync {
    async fn approve(&self, transactions: &[PreparedTx]) -> Result<bool, CoreError>;
}

/// Prompts on the controlling terminal. Stdin may be carrying MCP traffic, so
/// the prompt goes through `/dev/tty` instead.
pub struct TerminalApprover;

#[async_trait]
impl Approver for TerminalApprover {
    async fn approve(&self, transactions: &[PreparedTx]) -> Result<bool, CoreError> {
        let descriptions: Vec<String> = transactions
            .iter()
            .map(|tx| tx.description().to_string())
            .collect();

        tokio::task::spawn_blocking(move || -> std::io::Result<bool> {
            let tty = std::fs::OpenOptions::new()
                .read(true)
                .write(true)
                .open("/dev/tty")?;
            let mut output = tty.try_clone()?;
            confirm(&descriptions, &mut BufReader::new(tty), &mut output)
        })
        .await
        .map_err(CoreError::rejected)?
        .map_err(|e| CoreError::rejected(format!("no terminal available for approval: {}", e)))
    }
}

/// Lists the batch and reads a yes/no answer.
pub fn confirm<R: BufRead, W: Write>(
    descriptions: &[String],
    input: &mut R,
    output: &mut W,
) -> std::io::Result<bool> {
    writeln!(output, "Prepared transactions:")?;
    for (i, description) in descriptions.iter().enumerate() {
        writeln!(output, "  {}. {}", i + 1, description)?;
    }
    write!(output, "Do you want to execute these transactions? (yes/no): ")?;
    output.flush()?;

    let mut answer = String::new();
    input.read_line(&mut answer)?;
    let answer = answer.trim().to_lowercase();
    Ok(answer == "yes" || answer == "y")
}

/// Packs calls for `MultiSendCallOnly.multiSend(bytes)`:
/// `operation (1) ‖ to (20) ‖ value (32) ‖ data length (32) ‖ data` per call.
pub fn encode_multisend(transactions: &[PreparedTx]) -> Result<Bytes> {
    let mut packed = Vec::new();
    for tx in transactions {
        let to = tx
            .to()
            .with_context(|| format!("transaction '{}' has no recipient", tx.description()))?;
        let data = tx.data();

        let mut word = [0u8; 32];
        packed.push(OPERATION_CALL);
        packed.extend_from_slice(to.as_bytes());
        tx.value().to_big_endian(&mut word);
        packed.extend_from_slice(&word);
        U256::from(data.len()).to_big_endian(&mut word);
        packed.extend_from_slice(&word);
        packed.extend_from_slice(&data);
    }

    let call = multisend_function()
        .encode_input(&[Token::Bytes(packed)])
        .context("Failed to encode multiSend")?;
    Ok(call.into())
}

/// Highest gas price among the batch entries. Entries carry the padded price
/// from the builder, and the outer transaction must pay at least as much.
pub fn batch_gas_price(transactions: &[PreparedTx]) -> Option<U256> {
    transactions
        .iter()
        .filter_map(|tx| tx.transaction().gas_price)
        .max()
}

/// The `execTransaction` call that carries the batch on chain.
fn exec_transaction_request(
    safe: Address,
    input: Vec<u8>,
    transactions: &[PreparedTx],
) -> TransactionRequest {
    let request = TransactionRequest::new().to(safe).data(input);
    match batch_gas_price(transactions) {
        Some(gas_price) => request.gas_price(gas_price),
        None => request,
    }
}

/// A single-owner-threshold Safe driven by the agent key.
pub struct SafeWallet {
    provider: Arc<Provider<Http>>,
    signer: LocalWallet,
    safe: Address,
    multisend: Address,
    approver: Arc<dyn Approver>,
}

impl SafeWallet {
    pub fn new(
        provider: Arc<Provider<Http>>,
        signer: LocalWallet,
        safe: Address,
        multisend: Address,
        approver: Arc<dyn Approver>,
    ) -> Self {
        Self {
            provider,
            signer,
            safe,
            multisend,
            approver,
        }
    }

    async fn call_safe(&self, function: &Function, args: &[Token]) -> Result<Vec<Token>> {
        let input = function
            .encode_input(args)
            .with_context(|| format!("Failed to encode {} call", function.name))?;
        let tx_request = TransactionRequest::new().to(self.safe).data(input);
        let result = self
            .provider
            .call(&tx_request.into(), None)
            .await
            .with_context(|| format!("Failed to call {}", function.name))?;
        function
            .decode_output(&result)
            .with_context(|| format!("Failed to decode {} result", function.name))
    }

    async fn ensure_authority(&self) -> Result<()> {
        let signer = self.signer.address();

        let is_owner = match self
            .call_safe(&safe_is_owner(), &[Token::Address(signer)])
            .await?
            .first()
        {
            Some(Token::Bool(v)) => *v,
            _ => anyhow::bail!("Unexpected isOwner result format"),
        };
        if !is_owner {
            anyhow::bail!("signer {:?} is not an owner of safe {:?}", signer, self.safe);
        }

        let threshold = match self.call_safe(&safe_get_threshold(), &[]).await?.first() {
            Some(Token::Uint(v)) => *v,
            _ => anyhow::bail!("Unexpected getThreshold result format"),
        };
        if threshold > U256::one() {
            anyhow::bail!(
                "safe {:?} needs {} signatures, only the agent key is available",
                self.safe,
                threshold
            );
        }
        Ok(())
    }

    async fn safe_tx_hash(&self, data: &Bytes, nonce: U256) -> Result<H256> {
        let decoded = self
            .call_safe(
                &safe_get_transaction_hash(),
                &safe_tx_tokens(self.multisend, data, nonce),
            )
            .await?;
        match decoded.first() {
            Some(Token::FixedBytes(bytes)) if bytes.len() == 32 => Ok(H256::from_slice(bytes)),
            _ => anyhow::bail!("Unexpected getTransactionHash result format"),
        }
    }

    async fn nonce(&self) -> Result<U256> {
        match self.call_safe(&safe_nonce(), &[]).await?.first() {
            Some(Token::Uint(v)) => Ok(*v),
            _ => anyhow::bail!("Unexpected nonce result format"),
        }
    }

    async fn execute(&self, transactions: &[PreparedTx]) -> Result<H256> {
        self.ensure_authority().await?;

        let data = encode_multisend(transactions)?;
        let nonce = self.nonce().await?;
        let hash = self.safe_tx_hash(&data, nonce).await?;
        let signature = self
            .signer
            .sign_hash(hash)
            .context("Failed to sign safe transaction")?;

        let mut args = safe_tx_tokens(self.multisend, &data, nonce);
        args.pop(); // execTransaction takes signatures where getTransactionHash takes the nonce
        args.push(Token::Bytes(signature.to_vec()));
        let input = safe_exec_transaction()
            .encode_input(&args)
            .context("Failed to encode execTransaction")?;

        let chain_id = self
            .provider
            .get_chainid()
            .await
            .context("Failed to get chain id")?;
        let client = SignerMiddleware::new(
            self.provider.as_ref().clone(),
            self.signer.clone().with_chain_id(chain_id.as_u64()),
        );

        let tx_request = exec_transaction_request(self.safe, input, transactions);
        let pending = client
            .send_transaction(tx_request, None)
            .await
            .context("Failed to send execTransaction")?;
        Ok(pending.tx_hash())
    }
}

#[async_trait]
impl WalletService for SafeWallet {
    #[instrument(skip(self, transactions), fields(count = transactions.len()))]
    async fn submit_batch(
        &self,
        transactions: &[PreparedTx],
        require_approval: bool,
    ) -> Result<SubmissionReceipt, CoreError> {
        if require_approval && !self.approver.approve(transactions).await? {
            warn!("Batch declined by user");
            return Err(CoreError::rejected("declined by user"));
        }

        let tx_hash = self
            .execute(transactions)
            .await
            .map_err(|e| CoreError::rejected(format!("{:#}", e)))?;

        info!("Safe {:?} executed multi-send {:?}", self.safe, tx_hash);
        Ok(SubmissionReceipt {
            tx_hash,
            transaction_count: transactions.len(),
        })
    }
}

/// `(to, value, data, operation, safeTxGas, baseGas, gasPrice, gasToken, refundReceiver, nonce)`
fn safe_tx_tokens(multisend: Address, data: &Bytes, nonce: U256) -> Vec<Token> {
    vec![
        Token::Address(multisend),
        Token::Uint(U256::zero()),
        Token::Bytes(data.to_vec()),
        Token::Uint(U256::from(OPERATION_DELEGATE_CALL)),
        Token::Uint(U256::zero()),
        Token::Uint(U256::zero()),
        Token::Uint(U256::zero()),
        Token::Address(Address::zero()),
        Token::Address(Address::zero()),
        Token::Uint(nonce),
    ]
}

fn param(name: &str, kind: ParamType) -> Param {
    Param {
        name: name.to_string(),
        kind,
        internal_type: None,
    }
}

fn safe_tx_params() -> Vec<Param> {
    vec![
        param("to", ParamType::Address),
        param("value", ParamType::Uint(256)),
        param("data", ParamType::Bytes),
        param("operation", ParamType::Uint(8)),
        param("safeTxGas", ParamType::Uint(256)),
        param("baseGas", ParamType::Uint(256)),
        param("gasPrice", ParamType::Uint(256)),
        param("gasToken", ParamType::Address),
        param("refundReceiver", ParamType::Address),
    ]
}

fn multisend_function() -> Function {
    Function {
        name: "multiSend".to_string(),
        inputs: vec![param("transactions", ParamType::Bytes)],
        outputs: vec![],
        constant: None,
        state_mutability: StateMutability::Payable,
    }
}

fn safe_get_transaction_hash() -> Function {
    let mut inputs = safe_tx_params();
    inputs.push(param("_nonce", ParamType::Uint(256)));
    Function {
        name: "getTransactionHash".to_string(),
        inputs,
        outputs: vec![param("", ParamType::FixedBytes(32))],
        constant: None,
        state_mutability: StateMutability::View,
    }
}

fn safe_exec_transaction() -> Function {
    let mut inputs = safe_tx_params();
    inputs.push(param("signatures", ParamType::Bytes));
    Function {
        name: "execTransaction".to_string(),
        inputs,
        outputs: vec![param("success", ParamType::Bool)],
        constant: None,
        state_mutability: StateMutability::Payable,
    }
}

fn safe_nonce() -> Function {
    Function {
        name: "nonce".to_string(),
        inputs: vec![],
        outputs: vec![param("", ParamType::Uint(256))],
        constant: None,
        state_mutability: StateMutability::View,
    }
}

fn safe_get_threshold() -> Function {
    Function {
        name: "getThreshold".to_string(),
        inputs: vec![],
        outputs: vec![param("", ParamType::Uint(256))],
        constant: None,
        state_mutability: StateMutability::View,
    }
}

fn safe_is_owner() -> Function {
    Function {
        name: "isOwner".to_string(),
        inputs: vec![param("owner", ParamType::Address)],
        outputs: vec![param("", ParamType::Bool)],
        constant: None,
        state_mutability: StateMutability::View,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn tx(description: &str, to: u64, value: u64, data: Vec<u8>) -> PreparedTx {
        PreparedTx::new(
            description,
            TransactionRequest::new()
                .to(Address::from_low_u64_be(to))
                .value(value)
                .data(data),
        )
    }

    #[test]
    fn multisend_packs_calls_in_order() {
        let txs = vec![
            tx("approve", 0xaa, 0, vec![0x09, 0x5e, 0xa7, 0xb3]),
            tx("swap", 0xbb, 5, vec![]),
        ];

        let call = encode_multisend(&txs).unwrap();
        let function = multisend_function();
        assert_eq!(hex::encode(&call[..4]), "8d80ff0a");

        let decoded = function.decode_input(&call[4..]).unwrap();
        let Token::Bytes(packed) = &decoded[0] else {
            panic!("expected bytes");
        };

        // first entry: 1 + 20 + 32 + 32 + 4 bytes
        assert_eq!(packed.len(), (85 + 4) + 85);
        assert_eq!(packed[0], OPERATION_CALL);
        assert_eq!(&packed[1..21], Address::from_low_u64_be(0xaa).as_bytes());
        assert_eq!(U256::from_big_endian(&packed[53..85]), U256::from(4));
        assert_eq!(&packed[85..89], &[0x09, 0x5e, 0xa7, 0xb3]);

        let second = &packed[89..];
        assert_eq!(&second[1..21], Address::from_low_u64_be(0xbb).as_bytes());
        assert_eq!(U256::from_big_endian(&second[21..53]), U256::from(5));
        assert_eq!(U256::from_big_endian(&second[53..85]), U256::zero());
    }

    #[test]
    fn outer_transaction_pays_the_padded_batch_price() {
        let priced = |gwei: u64| {
            PreparedTx::new(
                "priced",
                TransactionRequest::new()
                    .to(Address::from_low_u64_be(1))
                    .gas_price(U256::from(gwei) * U256::exp10(9)),
            )
        };
        let txs = vec![priced(22), priced(33), tx("unpriced", 2, 0, vec![])];

        let request = exec_transaction_request(Address::from_low_u64_be(0x5afe), vec![0x6a], &txs);

        assert_eq!(request.gas_price, Some(U256::from(33_000_000_000u64)));
        assert_eq!(request.to, Some(Address::from_low_u64_be(0x5afe).into()));
        assert_eq!(batch_gas_price(&txs[2..]), None);
    }

    #[test]
    fn safe_selectors_match_the_contract() {
        assert_eq!(hex::encode(safe_exec_transaction().short_signature()), "6a761202");
        assert_eq!(hex::encode(safe_get_transaction_hash().short_signature()), "d8d11f78");
    }

    #[test]
    fn confirmation_lists_the_plan_and_accepts_yes() {
        let descriptions = vec![
            "Approve 1 USDC for spender 0x…".to_string(),
            "Swap 1 USDC for at least 0.0003 WETH".to_string(),
        ];
        let mut output = Vec::new();

        let approved = confirm(&descriptions, &mut Cursor::new("Yes\n"), &mut output).unwrap();

        assert!(approved);
        let shown = String::from_utf8(output).unwrap();
        assert!(shown.contains("1. Approve 1 USDC"));
        assert!(shown.contains("2. Swap 1 USDC"));
    }

    #[test]
    fn anything_but_yes_declines() {
        for answer in ["no\n", "\n", "later\n"] {
            let mut output = Vec::new();
            let approved = confirm(&["Transfer 1 ETH".to_string()], &mut Cursor::new(answer), &mut output).unwrap();
            assert!(!approved, "answer {:?}", answer);
        }
    }
}
