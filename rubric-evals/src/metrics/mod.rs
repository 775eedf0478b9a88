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

//! Built-in LLM-as-judge metrics.

use crate::EvalError;
use async_trait::async_trait;
use rubric_prompts::LlmError;
use serde::{Deserialize, Serialize};

pub mod critique;
pub mod faithfulness;
pub mod relevancy;

/// One evaluation row: the question asked, the generated answer under
/// judgment, and the retrieved contexts it was generated from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub contexts: Vec<String>,
}

impl Sample {
    pub fn new(
        question: impl Into<String>,
        answer: impl Into<String>,
        contexts: Vec<String>,
    ) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
            contexts,
        }
    }
}

/// A scalar score for one evaluation row.
///
/// Undefined judgments score NaN, they never raise. The two entry points are
/// behaviorally identical apart from how they await the model and embedding
/// collaborators.
#[async_trait]
pub trait Metric: Send + Sync {
    fn name(&self) -> &str;

    async fn score(&self, sample: &Sample) -> Result<f64, EvalError>;

    /// Blocking form of [`score`].
    ///
    /// [`score`]: Metric::score
    fn score_blocking(&self, sample: &Sample) -> Result<f64, EvalError>;
}

pub(crate) fn first_completion(completions: Vec<String>) -> Result<String, EvalError> {
    completions.into_iter().next().ok_or_else(|| {
        EvalError::Llm(LlmError::InvalidResponse(
            "model returned no completions".to_string(),
        ))
    })
}
