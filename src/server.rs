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
use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, instrument};

use crate::batch::{BatchState, SubmitOutcome};
use crate::chain::{AssetId, TokenRef};
use crate::run::{Action, RunContext};
use crate::swap::ExactSide;
use crate::units::parse_amount;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PrepareTransferInput {
    /// "ETH" or an ERC20 contract address (0x...)
    pub asset: String,
    /// Recipient address
    pub to: String,
    /// Human-readable amount, e.g. "1.5"
    pub amount: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PrepareSwapInput {
    /// Token to sell: "ETH" or an ERC20 contract address
    pub token_in: String,
    /// Token to buy: "ETH" or an ERC20 contract address
    pub token_out: String,
    /// Human-readable amount of the exact side
    pub amount: String,
    /// "input" when `amount` is what is sold, "output" when it is what is bought
    #[serde(default)]
    pub exact: ExactSide,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PrepareApproveInput {
    /// ERC20 contract address
    pub token: String,
    /// Address allowed to spend the tokens
    pub spender: String,
    /// Human-readable amount
    pub amount: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GetSwapQuoteInput {
    pub token_in: String,
    pub token_out: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuoteOutput {
    pub token_in: TokenRef,
    pub token_out: TokenRef,
    /// Units of token_out per unit of token_in
    pub price: String,
    pub fee_tier: u32,
    pub pool_liquidity: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReviewedTx {
    pub description: String,
    pub to: Option<String>,
    pub value: String,
    pub data: String,
    pub gas: Option<String>,
    pub gas_price: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReviewOutput {
    pub state: BatchState,
    pub last_outcome: Option<BatchState>,
    pub transactions: Vec<ReviewedTx>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitOutput {
    pub status: &'static str,
    pub tx_hash: Option<String>,
    pub transaction_count: usize,
}

/// MCP front end of one agent run.
#[derive(Clone)]
pub struct AutoTxServer {
    run: Arc<Mutex<RunContext>>,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl AutoTxServer {
    pub fn new(run: RunContext) -> Self {
        let tool_router = Self::tool_router();
        info!("Tool router initialized");

        Self {
            run: Arc::new(Mutex::new(run)),
            tool_router,
        }
    }

    /// A server for a new connection: same services, empty run.
    pub async fn fork_session(&self) -> Self {
        let run = self.run.lock().await.fork();
        Self::new(run)
    }

    #[tool(description = "Queue a transfer of ETH or an ERC20 token from the smart wallet. Nothing is sent until submit_batch.")]
    #[instrument(skip(self))]
    async fn prepare_transfer(
        &self,
        params: Parameters<PrepareTransferInput>,
    ) -> Result<CallToolResult, McpError> {
        let input = params.0;
        let action = Action::Transfer {
            asset: AssetId::from_str(&input.asset)?,
            to: parse_address("recipient", &input.to)?,
            amount: parse_amount(&input.amount)?,
        };

        let report = self.run.lock().await.execute(action).await?;
        to_json(&report)
    }

    #[tool(description = "Queue a Uniswap V3 swap. An exact approval for the router is queued first when the allowance is too low. Nothing is sent until submit_batch.")]
    #[instrument(skip(self))]
    async fn prepare_swap(&self, params: Parameters<PrepareSwapInput>) -> Result<CallToolResult, McpError> {
        let input = params.0;
        let action = Action::Swap {
            token_in: AssetId::from_str(&input.token_in)?,
            token_out: AssetId::from_str(&input.token_out)?,
            amount: parse_amount(&input.amount)?,
            exact_side: input.exact,
        };

        let report = self.run.lock().await.execute(action).await?;
        to_json(&report)
    }

    #[tool(description = "Queue an ERC20 approval of an exact amount for a spender")]
    #[instrument(skip(self))]
    async fn prepare_approve(
        &self,
        params: Parameters<PrepareApproveInput>,
    ) -> Result<CallToolResult, McpError> {
        let input = params.0;
        let action = Action::Approve {
            token: parse_address("token", &input.token)?,
            spender: parse_address("spender", &input.spender)?,
            amount: parse_amount(&input.amount)?,
        };

        let report = self.run.lock().await.execute(action).await?;
        to_json(&report)
    }

    #[tool(description = "Spot price and fee tier of the deepest Uniswap V3 pool for a token pair")]
    #[instrument(skip(self))]
    async fn get_swap_quote(
        &self,
        params: Parameters<GetSwapQuoteInput>,
    ) -> Result<CallToolResult, McpError> {
        let input = params.0;
        let token_in = AssetId::from_str(&input.token_in)?;
        let token_out = AssetId::from_str(&input.token_out)?;

        let (token_in, token_out, quote) = self.run.lock().await.quote(token_in, token_out).await?;
        to_json(&QuoteOutput {
            token_in,
            token_out,
            price: quote.price.to_string(),
            fee_tier: quote.fee_tier,
            pool_liquidity: quote.pool_liquidity.to_string(),
        })
    }

    #[tool(description = "List the transactions queued in the current batch")]
    #[instrument(skip(self))]
    async fn review_batch(&self) -> Result<CallToolResult, McpError> {
        let review = self.run.lock().await.review();
        let transactions = review
            .transactions
            .iter()
            .map(|tx| ReviewedTx {
                description: tx.description().to_string(),
                to: tx.to().map(|to| format!("{:?}", to)),
                value: tx.value().to_string(),
                data: format!("0x{}", hex::encode(tx.data())),
                gas: tx.transaction().gas.map(|g| g.to_string()),
                gas_price: tx.transaction().gas_price.map(|g| g.to_string()),
            })
            .collect();

        to_json(&ReviewOutput {
            state: review.state,
            last_outcome: review.last_outcome,
            transactions,
        })
    }

    #[tool(description = "Execute every queued transaction as one atomic multi-send from the smart wallet, then clear the batch")]
    #[instrument(skip(self))]
    async fn submit_batch(&self) -> Result<CallToolResult, McpError> {
        let outcome = self.run.lock().await.finish().await?;
        let output = match outcome {
            SubmitOutcome::NothingToSubmit => SubmitOutput {
                status: "nothing_to_submit",
                tx_hash: None,
                transaction_count: 0,
            },
            SubmitOutcome::Committed(receipt) => SubmitOutput {
                status: "committed",
                tx_hash: Some(format!("{:?}", receipt.tx_hash)),
                transaction_count: receipt.transaction_count,
            },
        };
        to_json(&output)
    }

    #[tool(description = "Drop every queued transaction without sending anything")]
    #[instrument(skip(self))]
    async fn discard_batch(&self) -> Result<CallToolResult, McpError> {
        let discarded = self.run.lock().await.abort();
        to_json(&serde_json::json!({ "discarded": discarded }))
    }
}

fn parse_address(field: &str, value: &str) -> Result<Address, McpError> {
    Address::from_str(value.trim())
        .map_err(|e| McpError::invalid_params(format!("Invalid {} address: {}", field, e), None))
}

fn to_json<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let json_result = serde_json::to_string_pretty(value)
        .map_err(|e| McpError::internal_error(format!("Error serializing result: {}", e), None))?;
    Ok(CallToolResult::success(vec![Content::text(json_result)]))
}

#[tool_handler]
impl ServerHandler for AutoTxServer {
    fn get_info(&self) -> ServerInfo {
        let tools = self.tool_router.list_all();
        info!("get_info called, router has {} tools", tools.len());
        ServerInfo {
            instructions: Some(
                "Prepares transfers, approvals and Uniswap swaps into one batch and executes it atomically from a smart wallet"
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}
