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

//! Embedding-provider abstraction used by similarity-based scoring.

use async_trait::async_trait;
use thiserror::Error;

/// Errors from embedding providers
#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("API error: {0}")]
    Api(String),

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Vector-generation collaborator. All vectors returned by one provider
/// share a fixed dimension; `embed_many` preserves input order.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed_one(&self, text: &str) -> Result<Vec<f64>, EmbedError>;

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f64>>, EmbedError>;

    /// Blocking form of [`embed_one`], behaviorally identical.
    ///
    /// [`embed_one`]: EmbeddingClient::embed_one
    fn embed_one_blocking(&self, text: &str) -> Result<Vec<f64>, EmbedError>;

    /// Blocking form of [`embed_many`], behaviorally identical.
    ///
    /// [`embed_many`]: EmbeddingClient::embed_many
    fn embed_many_blocking(&self, texts: &[String]) -> Result<Vec<Vec<f64>>, EmbedError>;
}
