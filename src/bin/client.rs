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

use anyhow::Result;
use dotenv::dotenv;
use rmcp::{
    model::{CallToolRequestParam, CallToolResult, RawContent},
    service::{RoleClient, RunningService, ServiceExt},
    transport::TokioChildProcess,
};
use serde_json::{json, Value};
use std::env;
use std::path::PathBuf;
use tokio::process::Command;

async fn call(
    service: &RunningService<RoleClient, ()>,
    name: &'static str,
    arguments: Value,
) -> Result<CallToolResult> {
    println!("-> {} {}", name, arguments);
    let result = service
        .call_tool(CallToolRequestParam {
            name: name.into(),
            arguments: arguments.as_object().cloned(),
        })
        .await?;

    for content in &result.content {
        match &content.raw {
            RawContent::Text(text) => println!("{}", text.text),
            _ => println!("{:#?}", content),
        }
    }
    println!();
    Ok(result)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt::init();

    let usdc = env::var("TOKEN_ADDRESS")
        .unwrap_or_else(|_| "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48".to_string());
    let recipient = env::var("RECIPIENT_ADDRESS")
        .unwrap_or_else(|_| "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045".to_string());
    let submit = env::var("CLIENT_SUBMIT").map(|v| v == "1").unwrap_or(false);

    let server_path = if PathBuf::from("target/debug/server").exists() {
        "target/debug/server"
    } else {
        "target/release/server"
    };

    println!("Starting MCP client...");
    println!("Connecting to server at: {}", server_path);

    let mut cmd = Command::new(server_path);
    cmd.stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::inherit());

    let service = ().serve(TokioChildProcess::new(cmd)?).await?;
    println!("\nConnected to server!");

    let tools = service.list_tools(Default::default()).await?;
    println!("Available tools:");
    for tool in tools.tools {
        println!("  - {}: {}", tool.name, tool.description.unwrap_or_default());
    }
    println!();

    call(&service, "get_swap_quote", json!({ "token_in": "ETH", "token_out": usdc })).await?;
    call(
        &service,
        "prepare_swap",
        json!({ "token_in": "ETH", "token_out": usdc, "amount": "0.01", "exact": "input" }),
    )
    .await?;
    call(
        &service,
        "prepare_swap",
        json!({ "token_in": usdc, "token_out": "ETH", "amount": "5", "exact": "input" }),
    )
    .await?;
    call(
        &service,
        "prepare_transfer",
        json!({ "asset": usdc, "to": recipient, "amount": "1" }),
    )
    .await?;
    call(&service, "review_batch", json!({})).await?;

    if submit {
        call(&service, "submit_batch", json!({})).await?;
    } else {
        call(&service, "discard_batch", json!({})).await?;
    }

    service.cancel().await?;
    println!("Client disconnected.");

    Ok(())
}
