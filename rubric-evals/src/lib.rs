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

//! # Rubric evaluation metrics
//!
//! Scores machine-generated answers against reference material using a
//! language model as judge. Built on the `rubric-prompts` template engine.
//!
//! ## Metrics
//!
//! - **Answer relevancy**: reverse question generation plus embedding
//!   similarity, gated on noncommittal answers
//! - **Faithfulness**: statement extraction plus NLI verdicts, scored as a
//!   verdict ratio
//! - **Aspect critique**: binary criteria judgments with majority voting
//!   over repeated samples
//!
//! ## Example
//!
//! ```rust,ignore
//! use rubric_evals::{AnswerRelevancy, Metric, OpenAiClient, Sample};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = Arc::new(OpenAiClient::new(
//!         std::env::var("OPENAI_API_KEY").unwrap(),
//!         "gpt-4o-mini".to_string(),
//!     ));
//!     let relevancy = AnswerRelevancy::new(client.clone(), client);
//!
//!     let sample = Sample::new(
//!         "Where was Albert Einstein born?",
//!         "Einstein was born in Germany.",
//!         vec!["Albert Einstein was a German-born physicist.".to_string()],
//!     );
//!     let score = relevancy.score(&sample).await.unwrap();
//!     println!("answer_relevancy = {score:.3}");
//! }
//! ```

use thiserror::Error;

pub mod aggregate;
pub mod embedding;
pub mod metrics;
pub mod openai;

pub use aggregate::{
    cosine_similarity, majority_vote, normalize_strictness, similarity_gated_mean,
    verdict_ratio_mean,
};
pub use embedding::{EmbedError, EmbeddingClient};
pub use metrics::critique::{
    coherence, conciseness, correctness, harmfulness, maliciousness, AspectCritique,
};
pub use metrics::faithfulness::Faithfulness;
pub use metrics::relevancy::AnswerRelevancy;
pub use metrics::{Metric, Sample};
pub use openai::OpenAiClient;

use rubric_prompts::{CacheError, CoerceError, LlmError, PromptError};

/// Errors that can occur while computing a metric score
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Prompt(#[from] PromptError),

    #[error("model client error: {0}")]
    Llm(#[from] LlmError),

    #[error("embedding client error: {0}")]
    Embed(#[from] EmbedError),

    #[error("JSON repair error: {0}")]
    Coerce(#[from] CoerceError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}
