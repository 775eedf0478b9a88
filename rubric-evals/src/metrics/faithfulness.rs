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

//! Faithfulness: statement extraction followed by NLI verdicts against the
//! retrieved contexts.

use crate::aggregate::verdict_ratio_mean;
use crate::metrics::{first_completion, Metric, Sample};
use crate::EvalError;
use async_trait::async_trait;
use rubric_prompts::{
    Adapter, JsonCoercer, LenientJson, LlmClient, OutputKind, Prompt, PromptCache, PromptValue,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Scores whether every claim in the answer is supported by the contexts.
///
/// Two model round-trips per row: the answer is decomposed into standalone
/// statements, then each statement gets an NLI verdict against the joined
/// contexts. The score is the fraction of supporting verdicts; an invalid
/// verdict makes the row's score undefined (NaN).
pub struct Faithfulness {
    llm: Arc<dyn LlmClient>,
    coercer: Arc<dyn JsonCoercer>,
    statement_prompt: Prompt,
    nli_prompt: Prompt,
}

impl Faithfulness {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            coercer: Arc::new(LenientJson),
            statement_prompt: long_form_answer_prompt(),
            nli_prompt: nli_statements_prompt(),
        }
    }

    pub fn with_coercer(mut self, coercer: Arc<dyn JsonCoercer>) -> Self {
        self.coercer = coercer;
        self
    }

    /// Swap both prompts for adapted translations.
    pub async fn adapt(&mut self, language: &str, adapter: &Adapter) -> Result<(), EvalError> {
        info!(language, "adapting faithfulness prompts");
        self.statement_prompt = adapter
            .adapt(
                &self.statement_prompt,
                language,
                self.llm.as_ref(),
                self.coercer.as_ref(),
            )
            .await?;
        self.nli_prompt = adapter
            .adapt(
                &self.nli_prompt,
                language,
                self.llm.as_ref(),
                self.coercer.as_ref(),
            )
            .await?;
        Ok(())
    }

    /// Blocking form of [`adapt`].
    ///
    /// [`adapt`]: Faithfulness::adapt
    pub fn adapt_blocking(&mut self, language: &str, adapter: &Adapter) -> Result<(), EvalError> {
        info!(language, "adapting faithfulness prompts");
        self.statement_prompt = adapter.adapt_blocking(
            &self.statement_prompt,
            language,
            self.llm.as_ref(),
            self.coercer.as_ref(),
        )?;
        self.nli_prompt = adapter.adapt_blocking(
            &self.nli_prompt,
            language,
            self.llm.as_ref(),
            self.coercer.as_ref(),
        )?;
        Ok(())
    }

    pub fn save(&self, cache: &PromptCache) -> Result<(), EvalError> {
        cache.save(&self.statement_prompt)?;
        cache.save(&self.nli_prompt)?;
        Ok(())
    }

    fn statement_row_prompt(&self, sample: &Sample) -> Result<PromptValue, EvalError> {
        let vars = HashMap::from([
            ("question".to_string(), sample.question.clone()),
            ("answer".to_string(), sample.answer.clone()),
        ]);
        Ok(self.statement_prompt.format(&vars)?)
    }

    fn nli_row_prompt(
        &self,
        sample: &Sample,
        statements_value: &Value,
    ) -> Result<PromptValue, EvalError> {
        let statements = extracted_statements(statements_value);
        let statements_str: String = statements
            .iter()
            .enumerate()
            .map(|(i, statement)| format!("statement_{}: {}", i + 1, statement))
            .collect::<Vec<_>>()
            .join("\n");

        let vars = HashMap::from([
            ("context".to_string(), sample.contexts.join("\n")),
            ("statements".to_string(), statements_str),
        ]);
        Ok(self.nli_prompt.format(&vars)?)
    }

    fn compute_score(verdicts_value: &Value) -> f64 {
        let items: Vec<&Value> = match verdicts_value {
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        };
        let verdicts: Vec<String> = items
            .iter()
            .map(|item| {
                item.get("verdict")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_lowercase()
            })
            .collect();
        verdict_ratio_mean(&verdicts)
    }
}

/// Statements extracted by the first round-trip; an empty list is replaced
/// by the single literal statement `Nil` so the NLI step always has input.
fn extracted_statements(value: &Value) -> Vec<String> {
    let statements: Vec<String> = value
        .get("statements")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    if statements.is_empty() {
        vec!["Nil".to_string()]
    } else {
        statements
    }
}

#[async_trait]
impl Metric for Faithfulness {
    fn name(&self) -> &str {
        "faithfulness"
    }

    async fn score(&self, sample: &Sample) -> Result<f64, EvalError> {
        let prompt = self.statement_row_prompt(sample)?;
        let raw = first_completion(self.llm.generate(&prompt, 1).await?)?;
        let statements = self.coercer.coerce(&raw, self.llm.as_ref()).await?;

        let prompt = self.nli_row_prompt(sample, &statements)?;
        let raw = first_completion(self.llm.generate(&prompt, 1).await?)?;
        let verdicts = self.coercer.coerce(&raw, self.llm.as_ref()).await?;

        Ok(Self::compute_score(&verdicts))
    }

    fn score_blocking(&self, sample: &Sample) -> Result<f64, EvalError> {
        let prompt = self.statement_row_prompt(sample)?;
        let raw = first_completion(self.llm.generate_blocking(&prompt, 1)?)?;
        let statements = self.coercer.coerce_blocking(&raw, self.llm.as_ref())?;

        let prompt = self.nli_row_prompt(sample, &statements)?;
        let raw = first_completion(self.llm.generate_blocking(&prompt, 1)?)?;
        let verdicts = self.coercer.coerce_blocking(&raw, self.llm.as_ref())?;

        Ok(Self::compute_score(&verdicts))
    }
}

/// Seed prompt: decompose each sentence of the answer into standalone
/// statements.
fn long_form_answer_prompt() -> Prompt {
    Prompt::builder("long_form_answer")
        .instruction("Create one or more statements from each sentence in the given answer.")
        .example(json!({
            "question": "Who was Albert Einstein and what is he best known for?",
            "answer": "He was a German-born theoretical physicist, widely acknowledged to be one of the greatest and most influential physicists of all time. He was best known for developing the theory of relativity, he also made important contributions to the development of the theory of quantum mechanics.",
            "statements": {
                "statements": [
                    "Albert Einstein, a German-born theoretical physicist, is renowned for being one of the most influential physicists in history.",
                    "Albert Einstein was best known for his theory of relativity.",
                    "Einstein's contributions significantly advanced the field of quantum mechanics",
                ]
            },
        }))
        .example(json!({
            "question": "Cadmium Chloride is slightly soluble in this chemical, it is also called what?",
            "answer": "alcohol",
            "statements": {"statements": ["Cadmium Chloride is slightly soluble in alcohol."]},
        }))
        .example(json!({
            "question": "Were Hitler and Benito Mussolini of the same nationality?",
            "answer": "Sorry, I can't provide answer to that question.",
            "statements": {"statements": []},
        }))
        .input_keys(["question", "answer"])
        .output_key("statements")
        .output_kind(OutputKind::Json)
        .build()
        .expect("built-in statement extraction prompt is valid")
}

/// Seed prompt: natural language inference over the extracted statements.
fn nli_statements_prompt() -> Prompt {
    Prompt::builder("nli_statements")
        .instruction(
            "Natural language inference. Use only 'Yes' (1), 'No' (0) and 'Null' (-1) as verdict.",
        )
        .example(json!({
            "context": "John is a student at XYZ University. He is pursuing a degree in Computer Science. He is enrolled in several courses this semester, including Data Structures, Algorithms, and Database Management. John is a diligent student and spends a significant amount of time studying and completing assignments. He often stays late in the library to work on his projects.",
            "statements": "statement_1: John is majoring in Biology.\nstatement_2: John is taking a course on Artificial Intelligence.\nstatement_3: John is a dedicated student.\nstatement_4: John has a part-time job.",
            "answer": [
                {
                    "statement_1": "John is majoring in Biology.",
                    "reason": "John's major is explicitly mentioned as Computer Science. There is no information suggesting he is majoring in Biology.",
                    "verdict": "0",
                },
                {
                    "statement_2": "John is taking a course on Artificial Intelligence.",
                    "reason": "The context mentions the courses John is currently enrolled in, and Artificial Intelligence is not mentioned.",
                    "verdict": "0",
                },
                {
                    "statement_3": "John is a dedicated student.",
                    "reason": "The context states that he spends a significant amount of time studying and often stays late in the library to work on his projects, which implies dedication.",
                    "verdict": "1",
                },
                {
                    "statement_4": "John has a part-time job.",
                    "reason": "There is no information given in the context about John having a part-time job.",
                    "verdict": "0",
                },
            ],
        }))
        .example(json!({
            "context": "Photosynthesis is a process used by plants, algae, and certain bacteria to convert light energy into chemical energy.",
            "statements": "statement_1: Albert Einstein was a genius.",
            "answer": {
                "statement_1": "Albert Einstein was a genius.",
                "reason": "The context and statement are unrelated",
                "verdict": "0",
            },
        }))
        .example(json!({
            "context": "Albert Einstein was a German-born theoretical physicist who is widely held to be one of the greatest and most influential scientists of all time.",
            "statements": "statement_1: Nil",
            "answer": {
                "statement_1": "Nil",
                "reason": "The statement is invalid",
                "verdict": "-1",
            },
        }))
        .input_keys(["context", "statements"])
        .output_key("answer")
        .output_kind(OutputKind::Json)
        .build()
        .expect("built-in NLI prompt is valid")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rubric_prompts::LlmError;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedLlm {
        responses: Mutex<VecDeque<String>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedLlm {
        fn new(responses: &[&str]) -> Self {
            Self {
                responses: Mutex::new(responses.iter().map(|s| s.to_string()).collect()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn next(&self, prompt: &PromptValue) -> Result<Vec<String>, LlmError> {
            self.prompts.lock().unwrap().push(prompt.as_str().to_string());
            let response = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| LlmError::Api("script exhausted".to_string()))?;
            Ok(vec![response])
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn generate(&self, prompt: &PromptValue, _: usize) -> Result<Vec<String>, LlmError> {
            self.next(prompt)
        }

        fn generate_blocking(
            &self,
            prompt: &PromptValue,
            _: usize,
        ) -> Result<Vec<String>, LlmError> {
            self.next(prompt)
        }
    }

    fn sample() -> Sample {
        Sample::new(
            "Who was Albert Einstein?",
            "Einstein was a physicist born in Germany. He invented the telephone.",
            vec!["Albert Einstein was a German-born theoretical physicist.".to_string()],
        )
    }

    #[tokio::test]
    async fn score_is_the_fraction_of_supported_statements() {
        let llm = Arc::new(ScriptedLlm::new(&[
            r#"{"statements": ["Einstein was a physicist.", "Einstein was born in Germany.", "Einstein invented the telephone."]}"#,
            r#"[
                {"statement_1": "Einstein was a physicist.", "reason": "stated", "verdict": "1"},
                {"statement_2": "Einstein was born in Germany.", "reason": "stated", "verdict": "1"},
                {"statement_3": "Einstein invented the telephone.", "reason": "unsupported", "verdict": "0"}
            ]"#,
        ]));
        let metric = Faithfulness::new(llm);

        let score = metric.score(&sample()).await.unwrap();
        assert!((score - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn blocking_score_matches_async_path() {
        let llm = Arc::new(ScriptedLlm::new(&[
            r#"{"statements": ["Einstein was a physicist."]}"#,
            r#"[{"statement_1": "Einstein was a physicist.", "reason": "stated", "verdict": "1"}]"#,
        ]));
        let metric = Faithfulness::new(llm);

        let score = metric.score_blocking(&sample()).unwrap();
        assert_eq!(score, 1.0);
    }

    #[tokio::test]
    async fn empty_statement_list_falls_back_to_nil() {
        let llm = Arc::new(ScriptedLlm::new(&[
            r#"{"statements": []}"#,
            r#"{"statement_1": "Nil", "reason": "The statement is invalid", "verdict": "-1"}"#,
        ]));
        let metric = Faithfulness::new(llm.clone());

        let score = metric.score(&sample()).await.unwrap();
        // a null verdict leaves the score undefined, not zero
        assert!(score.is_nan());

        let prompts = llm.prompts.lock().unwrap();
        assert!(prompts[1].contains("statement_1: Nil"));
    }

    #[tokio::test]
    async fn single_verdict_object_is_accepted() {
        let llm = Arc::new(ScriptedLlm::new(&[
            r#"{"statements": ["Einstein was a physicist."]}"#,
            r#"{"statement_1": "Einstein was a physicist.", "reason": "stated", "verdict": "1"}"#,
        ]));
        let metric = Faithfulness::new(llm);

        let score = metric.score(&sample()).await.unwrap();
        assert_eq!(score, 1.0);
    }

    #[tokio::test]
    async fn nli_prompt_enumerates_statements_in_order() {
        let llm = Arc::new(ScriptedLlm::new(&[
            r#"{"statements": ["first", "second"]}"#,
            r#"[{"verdict": "1"}, {"verdict": "1"}]"#,
        ]));
        let metric = Faithfulness::new(llm.clone());
        metric.score(&sample()).await.unwrap();

        let prompts = llm.prompts.lock().unwrap();
        assert!(prompts[1].contains("statement_1: first\nstatement_2: second"));
    }

    #[test]
    fn seed_prompts_declare_expected_variables() {
        let statements = long_form_answer_prompt();
        assert_eq!(statements.input_keys(), ["question", "answer"]);
        assert_eq!(statements.output_key(), "statements");
        assert_eq!(statements.examples().len(), 3);

        let nli = nli_statements_prompt();
        assert_eq!(nli.input_keys(), ["context", "statements"]);
        assert_eq!(nli.output_key(), "answer");
        assert_eq!(nli.examples().len(), 3);
    }
}
