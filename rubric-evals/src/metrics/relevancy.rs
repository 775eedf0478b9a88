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

//! Answer relevancy: reverse question generation plus embedding similarity.

use crate::aggregate::similarity_gated_mean;
use crate::embedding::EmbeddingClient;
use crate::metrics::{Metric, Sample};
use crate::EvalError;
use async_trait::async_trait;
use rubric_prompts::{
    Adapter, JsonCoercer, LenientJson, LlmClient, OutputKind, Prompt, PromptCache, PromptValue,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Scores how well the answer addresses the question, 0 to 1.
///
/// The model generates `strictness` candidate questions from the answer,
/// each tagged with a noncommittal flag; the score is the mean cosine
/// similarity between the original question's embedding and the generated
/// questions' embeddings, collapsed to 0 when any generation was judged
/// noncommittal. Incomplete or evasive answers are penalized.
pub struct AnswerRelevancy {
    llm: Arc<dyn LlmClient>,
    embeddings: Arc<dyn EmbeddingClient>,
    coercer: Arc<dyn JsonCoercer>,
    question_generation: Prompt,
    strictness: usize,
}

impl AnswerRelevancy {
    pub fn new(llm: Arc<dyn LlmClient>, embeddings: Arc<dyn EmbeddingClient>) -> Self {
        Self {
            llm,
            embeddings,
            coercer: Arc::new(LenientJson),
            question_generation: question_generation_prompt(),
            strictness: 3,
        }
    }

    /// Number of questions generated per answer. The ideal range is 3 to 5.
    pub fn with_strictness(mut self, strictness: usize) -> Self {
        self.strictness = strictness.max(1);
        self
    }

    pub fn with_coercer(mut self, coercer: Arc<dyn JsonCoercer>) -> Self {
        self.coercer = coercer;
        self
    }

    /// Swap the question-generation prompt for an adapted translation.
    pub async fn adapt(&mut self, language: &str, adapter: &Adapter) -> Result<(), EvalError> {
        info!(language, "adapting answer relevancy prompt");
        self.question_generation = adapter
            .adapt(
                &self.question_generation,
                language,
                self.llm.as_ref(),
                self.coercer.as_ref(),
            )
            .await?;
        Ok(())
    }

    /// Blocking form of [`adapt`].
    ///
    /// [`adapt`]: AnswerRelevancy::adapt
    pub fn adapt_blocking(&mut self, language: &str, adapter: &Adapter) -> Result<(), EvalError> {
        info!(language, "adapting answer relevancy prompt");
        self.question_generation = adapter.adapt_blocking(
            &self.question_generation,
            language,
            self.llm.as_ref(),
            self.coercer.as_ref(),
        )?;
        Ok(())
    }

    pub fn save(&self, cache: &PromptCache) -> Result<(), EvalError> {
        cache.save(&self.question_generation)?;
        Ok(())
    }

    fn row_prompt(&self, sample: &Sample) -> Result<PromptValue, EvalError> {
        let vars = HashMap::from([
            ("answer".to_string(), sample.answer.clone()),
            ("context".to_string(), sample.contexts.join("\n")),
        ]);
        Ok(self.question_generation.format(&vars)?)
    }

    fn gated_score(parsed: &[Value], question_vec: &[f64], generated_vecs: &[Vec<f64>]) -> f64 {
        let noncommittal: Vec<bool> = parsed
            .iter()
            .map(|item| {
                item.get("noncommittal")
                    .and_then(Value::as_bool)
                    .unwrap_or(false)
            })
            .collect();
        similarity_gated_mean(question_vec, generated_vecs, &noncommittal)
    }

    fn generated_questions(parsed: &[Value]) -> Vec<String> {
        parsed
            .iter()
            .map(|item| {
                item.get("question")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string()
            })
            .collect()
    }
}

#[async_trait]
impl Metric for AnswerRelevancy {
    fn name(&self) -> &str {
        "answer_relevancy"
    }

    async fn score(&self, sample: &Sample) -> Result<f64, EvalError> {
        let prompt = self.row_prompt(sample)?;
        let completions = self.llm.generate(&prompt, self.strictness).await?;

        let mut parsed = Vec::with_capacity(completions.len());
        for completion in &completions {
            parsed.push(self.coercer.coerce(completion, self.llm.as_ref()).await?);
        }

        let generated = Self::generated_questions(&parsed);
        let question_vec = self.embeddings.embed_one(&sample.question).await?;
        let generated_vecs = self.embeddings.embed_many(&generated).await?;

        Ok(Self::gated_score(&parsed, &question_vec, &generated_vecs))
    }

    fn score_blocking(&self, sample: &Sample) -> Result<f64, EvalError> {
        let prompt = self.row_prompt(sample)?;
        let completions = self.llm.generate_blocking(&prompt, self.strictness)?;

        let mut parsed = Vec::with_capacity(completions.len());
        for completion in &completions {
            parsed.push(self.coercer.coerce_blocking(completion, self.llm.as_ref())?);
        }

        let generated = Self::generated_questions(&parsed);
        let question_vec = self.embeddings.embed_one_blocking(&sample.question)?;
        let generated_vecs = self.embeddings.embed_many_blocking(&generated)?;

        Ok(Self::gated_score(&parsed, &question_vec, &generated_vecs))
    }
}

/// Seed prompt: generate a question for the given answer and identify
/// whether the answer is noncommittal.
fn question_generation_prompt() -> Prompt {
    Prompt::builder("question_generation")
        .instruction("Generate a question for the given answer and Identify if answer is noncommittal")
        .example(json!({
            "answer": "Albert Einstein was born in Germany.",
            "context": "Albert Einstein was a German-born theoretical physicist who is widely held to be one of the greatest and most influential scientists of all time",
            "output": "{\"question\":\"Where was Albert Einstein born?\",\"noncommittal\":false}",
        }))
        .example(json!({
            "answer": "It can change its skin color based on the temperature of its environment.",
            "context": "A recent scientific study has discovered a new species of frog in the Amazon rainforest that has the unique ability to change its skin color based on the temperature of its environment.",
            "output": "{\"question\":\"What unique ability does the newly discovered species of frog have?\",\"noncommittal\":false}",
        }))
        .example(json!({
            "answer": "Everest",
            "context": "The tallest mountain on Earth, measured from sea level, is a renowned peak located in the Himalayas.",
            "output": "{\"question\":\"What is the tallest mountain on Earth?\",\"noncommittal\":false}",
        }))
        .example(json!({
            "answer": "I don't know about the groundbreaking feature of the smartphone invented in 2023 as am unaware of information beyond 2022.",
            "context": "In 2023, a groundbreaking invention was announced: a smartphone with a battery life of one month, revolutionizing the way people use mobile technology.",
            "output": "{\"question\":\"What was the groundbreaking feature of the smartphone invented in 2023?\",\"noncommittal\":true}",
        }))
        .input_keys(["answer", "context"])
        .output_key("output")
        .output_kind(OutputKind::Json)
        .build()
        .expect("built-in question generation prompt is valid")
}
