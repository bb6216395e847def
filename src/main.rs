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

mod approval;
mod batch;
mod builder;
mod chain;
mod config;
mod error;
mod quote;
mod run;
mod server;
mod swap;
mod units;
mod wallet;

#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use dotenv::dotenv;
use ethers::prelude::*;
use rmcp::ServiceExt;
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

use builder::TxBuilder;
use chain::{ChainReader, RpcChain};
use config::Config;
use quote::{QuoteResolver, SubgraphIndex};
use run::{RunContext, RunSettings};
use server::AutoTxServer;
use wallet::{SafeWallet, TerminalApprover, WalletService};

async fn run_server(server: AutoTxServer, server_host: String, server_port: u16) -> Result<()> {
    // TCP if a port is set, otherwise stdio
    if server_port > 0 {
        let addr: SocketAddr = format!("{}:{}", server_host, server_port)
            .parse()
            .context("Invalid server address")?;

        let listener = TcpListener::bind(&addr)
            .await
            .context("Failed to bind TCP listener")?;

        let actual_addr = listener
            .local_addr()
            .context("Failed to get local address")?;

        info!(
            "MCP server listening on {}:{}",
            actual_addr.ip(),
            actual_addr.port()
        );

        // Every connection is its own run with its own batch
        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    info!("New connection from {}", peer_addr);
                    let session = server.fork_session().await;

                    tokio::spawn(async move {
                        let (read, write) = tokio::io::split(stream);
                        match session.serve((read, write)).await {
                            Ok(running) => {
                                if let Err(e) = running.waiting().await {
                                    warn!("Connection {} closed with error: {}", peer_addr, e);
                                } else {
                                    info!("Connection {} closed gracefully", peer_addr);
                                }
                            }
                            Err(e) => warn!("Connection {} failed to initialize: {}", peer_addr, e),
                        }
                    });
                }
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                }
            }
        }
    } else {
        info!("Starting MCP server on stdio");
        let running_service = server
            .serve((tokio::io::stdin(), tokio::io::stdout()))
            .await?;
        running_service.waiting().await?;
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

    // stdout carries the MCP protocol, logs go to stderr
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    info!("Log level: {}", log_level);

    let config = Config::from_env()?;
    info!(
        "Starting AutoTx MCP server with RPC {} for smart wallet {:?}",
        config.rpc_url, config.smart_wallet
    );

    let provider = Arc::new(
        Provider::<Http>::try_from(config.rpc_url.as_str())
            .context("Failed to create HTTP provider")?,
    );
    let signer = config
        .agent_private_key
        .trim_start_matches("0x")
        .parse::<LocalWallet>()
        .context("Invalid AGENT_PRIVATE_KEY")?;
    info!("Agent signer: {:?}", signer.address());

    let chain: Arc<dyn ChainReader> = Arc::new(RpcChain::new(provider.clone()));
    let index = Arc::new(SubgraphIndex::new(
        config.subgraph_url.clone(),
        config.subgraph_timeout,
    )?);
    let wallet: Arc<dyn WalletService> = Arc::new(SafeWallet::new(
        provider,
        signer,
        config.smart_wallet,
        config.multisend,
        Arc::new(TerminalApprover),
    ));

    let run = RunContext::new(
        chain.clone(),
        Arc::new(QuoteResolver::new(index)),
        Arc::new(TxBuilder::new(chain, config.gas_price_multiplier)),
        wallet,
        RunSettings {
            wallet: config.smart_wallet,
            router: config.router,
            weth: config.weth,
            slippage: config.slippage,
            require_approval: !config.non_interactive,
        },
    );

    run_server(AutoTxServer::new(run), config.server_host, config.server_port).await?;

    Ok(())
}
