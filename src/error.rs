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

use rmcp::ErrorData as McpError;
use thiserror::Error;

/// Failures surfaced by the batching core.
///
/// A missing allowance is not represented here: the approval gate resolves it
/// by queueing an approval transaction ahead of the swap.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Quote unavailable: {0}")]
    QuoteUnavailable(String),

    #[error("Failed to build transaction: {0}")]
    BuildFailed(String),

    #[error("Batch submission rejected: {0}")]
    SubmissionRejected(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl CoreError {
    pub fn quote(err: impl std::fmt::Display) -> Self {
        CoreError::QuoteUnavailable(err.to_string())
    }

    pub fn build(err: impl std::fmt::Display) -> Self {
        CoreError::BuildFailed(err.to_string())
    }

    pub fn rejected(err: impl std::fmt::Display) -> Self {
        CoreError::SubmissionRejected(err.to_string())
    }

    pub fn invalid(err: impl std::fmt::Display) -> Self {
        CoreError::InvalidRequest(err.to_string())
    }
}

impl From<CoreError> for McpError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidRequest(_) => McpError::invalid_params(err.to_string(), None),
            _ => McpError::internal_error(err.to_string(), None),
        }
    }
}
