// Copyright 2025 Rubric Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Model-client abstraction consumed by the adapter and the metrics.

use crate::template::PromptValue;
use async_trait::async_trait;
use thiserror::Error;

/// Errors from model clients
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("API error: {0}")]
    Api(String),

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Text-generation collaborator.
///
/// Both entry points must return exactly `n` completions, in a stable order;
/// the repeated-sampling aggregators and the translation protocol depend on
/// positional correspondence. Retry and backoff belong to the implementation,
/// not to callers.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Generate `n` independent completions for the prompt.
    async fn generate(&self, prompt: &PromptValue, n: usize) -> Result<Vec<String>, LlmError>;

    /// Blocking form of [`generate`], behaviorally identical.
    ///
    /// Must not be called from inside an async runtime.
    ///
    /// [`generate`]: LlmClient::generate
    fn generate_blocking(&self, prompt: &PromptValue, n: usize) -> Result<Vec<String>, LlmError>;
}
