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

//! # Rubric prompt engine
//!
//! Structured, example-grounded prompt templates for LLM-as-judge scoring,
//! plus cross-language adaptation of those templates via model-mediated
//! translation round-trips, memoized on disk.
//!
//! ## Example
//!
//! ```rust,ignore
//! use rubric_prompts::{OutputKind, Prompt, PromptCache, Adapter};
//! use serde_json::json;
//! use std::collections::HashMap;
//!
//! let prompt = Prompt::builder("question_generation")
//!     .instruction("Generate a question for the given answer")
//!     .example(json!({
//!         "answer": "Everest",
//!         "output": "{\"question\":\"What is the tallest mountain on Earth?\"}",
//!     }))
//!     .input_keys(["answer"])
//!     .output_key("output")
//!     .output_kind(OutputKind::Json)
//!     .build()?;
//!
//! let vars = HashMap::from([("answer".to_string(), "K2".to_string())]);
//! let rendered = prompt.format(&vars)?;
//!
//! // Offline, one-time translation of the template's examples:
//! let adapter = Adapter::new(PromptCache::new("/var/cache/rubric"));
//! let hindi = adapter.adapt_blocking(&prompt, "hindi", &llm, &coercer)?;
//! adapter.cache().save(&hindi)?;
//! ```

use thiserror::Error;

pub mod adapt;
pub mod cache;
pub mod client;
pub mod repair;
pub mod template;

pub use adapt::Adapter;
pub use cache::{CacheError, PromptCache};
pub use client::{LlmClient, LlmError};
pub use repair::{CoerceError, JsonCoercer, LenientJson};
pub use template::{
    ChatMessage, ChatRole, Example, OutputKind, Prompt, PromptBuilder, PromptSpec, PromptValue,
    ValidationReport, Violation,
};

/// Errors raised by the prompt engine
#[derive(Debug, Error)]
pub enum PromptError {
    /// The template definition violates one or more construction invariants
    #[error("invalid prompt definition: {0}")]
    Validation(#[from] ValidationReport),

    /// The variables supplied to `format` do not match the declared input keys
    #[error("input variables {expected:?} do not match the given parameters {received:?}")]
    ParameterMismatch {
        expected: Vec<String>,
        received: Vec<String>,
    },

    /// An example lookup used an index past the end of the example list
    #[error("example number {index} is out of range ({len} examples)")]
    ExampleOutOfRange { index: usize, len: usize },

    /// A lone `{` or `}` was found while substituting variables
    #[error("unmatched brace at byte {0} of the rendered prompt")]
    UnmatchedBrace(usize),

    /// A substitution slot named a variable that was not supplied
    #[error("unknown substitution variable '{0}'")]
    UnknownVariable(String),

    /// The translation protocol lost sync between requests and results
    #[error(
        "translation protocol desync: {results} results cannot rebuild \
         {examples} examples of {per_example} fields each"
    )]
    AdaptationDesync {
        examples: usize,
        per_example: usize,
        results: usize,
    },

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("model client error: {0}")]
    Llm(#[from] LlmError),

    #[error("JSON repair error: {0}")]
    Coerce(#[from] CoerceError),
}
