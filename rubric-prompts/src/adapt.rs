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

//! Cross-language adaptation: translating a prompt's examples into a target
//! language through model-mediated round-trips, memoized by the prompt cache.

use crate::cache::PromptCache;
use crate::client::{LlmClient, LlmError};
use crate::repair::JsonCoercer;
use crate::template::{canonical_text, Example, OutputKind, Prompt, PromptValue};
use crate::PromptError;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{debug, info};

/// Translates prompt examples into a target language.
///
/// Holds the two built-in seed translation prompts and the cache that
/// memoizes finished adaptations. Adaptation never mutates its input; it
/// returns a new [`Prompt`] with the examples translated and the language
/// tag swapped. Persisting the result is the caller's explicit step:
///
/// ```rust,ignore
/// let hindi = adapter.adapt_blocking(&prompt, "hindi", &llm, &coercer)?;
/// adapter.cache().save(&hindi)?;
/// ```
pub struct Adapter {
    cache: PromptCache,
    str_translation: Prompt,
    json_translation: Prompt,
    max_in_flight: usize,
}

impl Adapter {
    pub fn new(cache: PromptCache) -> Self {
        Self {
            cache,
            str_translation: str_translation_prompt(),
            json_translation: json_translation_prompt(),
            max_in_flight: 1,
        }
    }

    /// Allow up to `n` concurrent translation calls on the async path.
    /// Result order is preserved regardless of completion order.
    pub fn with_max_in_flight(mut self, n: usize) -> Self {
        self.max_in_flight = n.max(1);
        self
    }

    pub fn cache(&self) -> &PromptCache {
        &self.cache
    }

    /// Translate `prompt` into `language`, consulting the cache first.
    ///
    /// On a cache hit the stored prompt is returned without any model calls.
    pub async fn adapt(
        &self,
        prompt: &Prompt,
        language: &str,
        llm: &dyn LlmClient,
        coercer: &dyn JsonCoercer,
    ) -> Result<Prompt, PromptError> {
        if self.cache.exists(language, prompt.name()) {
            info!(name = prompt.name(), language, "loading adapted prompt from cache");
            return Ok(self.cache.load(language, prompt.name())?);
        }

        let requests = self.translation_requests(prompt, language)?;
        debug!(
            name = prompt.name(),
            language,
            requests = requests.len(),
            "dispatching translation requests"
        );
        let results: Vec<String> = stream::iter(requests.iter())
            .map(|request| async move { first_completion(llm.generate(request, 1).await?) })
            .buffered(self.max_in_flight)
            .try_collect()
            .await?;

        let chunks = regroup(results, prompt.input_keys().len() + 1, prompt.examples().len())?;
        let mut examples = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            examples.push(self.rebuild_example(prompt, chunk, llm, coercer).await?);
        }
        finish(prompt, language, examples)
    }

    /// Blocking form of [`adapt`]: strictly sequential dispatch, otherwise
    /// behaviorally identical.
    ///
    /// [`adapt`]: Adapter::adapt
    pub fn adapt_blocking(
        &self,
        prompt: &Prompt,
        language: &str,
        llm: &dyn LlmClient,
        coercer: &dyn JsonCoercer,
    ) -> Result<Prompt, PromptError> {
        if self.cache.exists(language, prompt.name()) {
            info!(name = prompt.name(), language, "loading adapted prompt from cache");
            return Ok(self.cache.load(language, prompt.name())?);
        }

        let requests = self.translation_requests(prompt, language)?;
        debug!(
            name = prompt.name(),
            language,
            requests = requests.len(),
            "dispatching translation requests"
        );
        let mut results = Vec::with_capacity(requests.len());
        for request in &requests {
            results.push(first_completion(llm.generate_blocking(request, 1)?)?);
        }

        let chunks = regroup(results, prompt.input_keys().len() + 1, prompt.examples().len())?;
        let mut examples = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            examples.push(self.rebuild_example_blocking(prompt, chunk, llm, coercer)?);
        }
        finish(prompt, language, examples)
    }

    /// Per example, one string-translation request per input key in declared
    /// order, then exactly one output request: structured-JSON translation
    /// for JSON prompts, plain string translation otherwise. Flattened in
    /// example order; the regrouping step depends on this exact emission
    /// order.
    fn translation_requests(
        &self,
        prompt: &Prompt,
        language: &str,
    ) -> Result<Vec<PromptValue>, PromptError> {
        let mut requests = Vec::new();
        for example in prompt.examples() {
            for key in prompt.input_keys() {
                let text = example.get(key).map(canonical_text).unwrap_or_default();
                requests.push(self.str_translation.format(&translation_vars(language, text))?);
            }
            let output = example
                .get(prompt.output_key())
                .map(canonical_text)
                .unwrap_or_default();
            let template = match prompt.output_kind() {
                OutputKind::Json => &self.json_translation,
                OutputKind::Str => &self.str_translation,
            };
            requests.push(template.format(&translation_vars(language, output))?);
        }
        Ok(requests)
    }

    async fn rebuild_example(
        &self,
        prompt: &Prompt,
        chunk: Vec<String>,
        llm: &dyn LlmClient,
        coercer: &dyn JsonCoercer,
    ) -> Result<Example, PromptError> {
        let (inputs, output) = split_chunk(chunk);
        let output_value = match prompt.output_kind() {
            OutputKind::Json => coercer.coerce(&output, llm).await?,
            OutputKind::Str => Value::String(output),
        };
        Ok(assemble_example(prompt, inputs, output_value))
    }

    fn rebuild_example_blocking(
        &self,
        prompt: &Prompt,
        chunk: Vec<String>,
        llm: &dyn LlmClient,
        coercer: &dyn JsonCoercer,
    ) -> Result<Example, PromptError> {
        let (inputs, output) = split_chunk(chunk);
        let output_value = match prompt.output_kind() {
            OutputKind::Json => coercer.coerce_blocking(&output, llm)?,
            OutputKind::Str => Value::String(output),
        };
        Ok(assemble_example(prompt, inputs, output_value))
    }
}

fn translation_vars(language: &str, input: String) -> HashMap<String, String> {
    HashMap::from([
        ("translate_to".to_string(), language.to_string()),
        ("input".to_string(), input),
    ])
}

fn first_completion(completions: Vec<String>) -> Result<String, PromptError> {
    completions.into_iter().next().ok_or_else(|| {
        PromptError::Llm(LlmError::InvalidResponse(
            "model returned no completions".to_string(),
        ))
    })
}

/// Partition the flat result list back into per-example chunks. The chunk
/// count must equal the example count; anything else is a protocol desync,
/// not a user error.
fn regroup(
    results: Vec<String>,
    per_example: usize,
    examples: usize,
) -> Result<Vec<Vec<String>>, PromptError> {
    if results.len() != per_example * examples {
        return Err(PromptError::AdaptationDesync {
            examples,
            per_example,
            results: results.len(),
        });
    }
    Ok(results
        .chunks(per_example)
        .map(<[String]>::to_vec)
        .collect())
}

fn split_chunk(mut chunk: Vec<String>) -> (Vec<String>, String) {
    // chunk length is per_example = input_keys + 1, guaranteed by regroup
    let output = chunk.pop().unwrap_or_default();
    (chunk, output)
}

fn assemble_example(prompt: &Prompt, inputs: Vec<String>, output: Value) -> Example {
    let mut example = Example::new();
    for (key, text) in prompt.input_keys().iter().zip(inputs) {
        example.insert(key.clone(), Value::String(text));
    }
    example.insert(prompt.output_key().to_string(), output);
    example
}

fn finish(prompt: &Prompt, language: &str, examples: Vec<Example>) -> Result<Prompt, PromptError> {
    let mut spec = prompt.spec().clone();
    spec.examples = examples;
    spec.language = language.to_string();
    Ok(Prompt::from_spec(spec)?)
}

/// Seed prompt for translating plain text fields. Never itself adapted.
fn str_translation_prompt() -> Prompt {
    Prompt::builder("str_translation")
        .instruction("Language translation")
        .example(json!({
            "translate_to": "hindi",
            "input": "Who was Albert Einstein and what is he best known for?",
            "output": "अल्बर्ट आइंस्टीन कौन थे और वे किसके लिए सबसे ज्यादा प्रसिद्ध हैं?",
        }))
        .input_keys(["translate_to", "input"])
        .output_key("output")
        .output_kind(OutputKind::Str)
        .build()
        .expect("built-in string translation prompt is valid")
}

/// Seed prompt for translating JSON values while preserving keys and
/// structure. Never itself adapted.
fn json_translation_prompt() -> Prompt {
    Prompt::builder("json_translation")
        .instruction("Translate values in given json to target language")
        .example(json!({
            "translate_to": "hindi",
            "input": "{\"statements\": [\"Albert Einstein was born in Germany.\", \"Albert Einstein was best known for his theory of relativity.\"]}",
            "output": "{\"statements\": [\"अल्बर्ट आइंस्टीन का जन्म जर्मनी में हुआ था।\", \"अल्बर्ट आइंस्टीन अपने सापेक्षता के सिद्धांत के लिए सबसे अधिक प्रसिद्ध थे।\"]}",
        }))
        .input_keys(["translate_to", "input"])
        .output_key("output")
        .output_kind(OutputKind::Json)
        .build()
        .expect("built-in JSON translation prompt is valid")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repair::LenientJson;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replays a scripted list of completions and counts calls.
    struct ScriptedLlm {
        responses: Mutex<VecDeque<String>>,
        calls: AtomicUsize,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedLlm {
        fn new<const N: usize>(responses: [&str; N]) -> Self {
            Self {
                responses: Mutex::new(responses.iter().map(|s| s.to_string()).collect()),
                calls: AtomicUsize::new(0),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn next(&self, prompt: &PromptValue) -> Result<Vec<String>, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(prompt.as_str().to_string());
            let response = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| LlmError::Api("script exhausted".to_string()))?;
            Ok(vec![response])
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl LlmClient for ScriptedLlm {
        async fn generate(
            &self,
            prompt: &PromptValue,
            _n: usize,
        ) -> Result<Vec<String>, LlmError> {
            self.next(prompt)
        }

        fn generate_blocking(
            &self,
            prompt: &PromptValue,
            _n: usize,
        ) -> Result<Vec<String>, LlmError> {
            self.next(prompt)
        }
    }

    fn question_prompt() -> Prompt {
        Prompt::builder("question_generation")
            .instruction("Generate a question for the given answer")
            .example(json!({
                "answer": "Everest",
                "context": "The tallest mountain on Earth is in the Himalayas.",
                "output": "{\"question\":\"What is the tallest mountain on Earth?\"}",
            }))
            .input_keys(["answer", "context"])
            .output_key("output")
            .output_kind(OutputKind::Json)
            .build()
            .unwrap()
    }

    fn adapter(dir: &tempfile::TempDir) -> Adapter {
        Adapter::new(PromptCache::new(dir.path()))
    }

    #[test]
    fn adapt_blocking_translates_examples_and_swaps_language() {
        let dir = tempfile::tempdir().unwrap();
        let prompt = question_prompt();
        let llm = ScriptedLlm::new([
            "एवरेस्ट",
            "पृथ्वी का सबसे ऊँचा पर्वत हिमालय में है।",
            "{\"question\":\"पृथ्वी का सबसे ऊँचा पर्वत कौन सा है?\"}",
        ]);

        let adapted = adapter(&dir)
            .adapt_blocking(&prompt, "hindi", &llm, &LenientJson)
            .unwrap();

        assert_eq!(adapted.language(), "hindi");
        assert_eq!(llm.call_count(), 3);
        let example = &adapted.examples()[0];
        assert_eq!(example["answer"], "एवरेस्ट");
        assert_eq!(
            example["output"]["question"],
            "पृथ्वी का सबसे ऊँचा पर्वत कौन सा है?"
        );
        // the source prompt is untouched
        assert_eq!(prompt.language(), "en");
        assert_eq!(prompt.examples()[0]["answer"], "Everest");
    }

    #[tokio::test]
    async fn adapt_async_matches_blocking_behavior() {
        let dir = tempfile::tempdir().unwrap();
        let prompt = question_prompt();
        let llm = ScriptedLlm::new([
            "एवरेस्ट",
            "पृथ्वी का सबसे ऊँचा पर्वत हिमालय में है।",
            "{\"question\":\"पृथ्वी का सबसे ऊँचा पर्वत कौन सा है?\"}",
        ]);

        let adapted = adapter(&dir)
            .adapt(&prompt, "hindi", &llm, &LenientJson)
            .await
            .unwrap();

        assert_eq!(adapted.language(), "hindi");
        assert_eq!(adapted.examples()[0]["answer"], "एवरेस्ट");
        assert_eq!(llm.call_count(), 3);
    }

    #[test]
    fn adapt_requests_follow_emission_order() {
        let dir = tempfile::tempdir().unwrap();
        let prompt = question_prompt();
        let llm = ScriptedLlm::new(["a", "b", "{\"q\":\"c\"}"]);

        adapter(&dir)
            .adapt_blocking(&prompt, "spanish", &llm, &LenientJson)
            .unwrap();

        let prompts = llm.prompts.lock().unwrap();
        // input keys first, in declared order, then the output request
        assert!(prompts[0].contains("input: Everest"));
        assert!(prompts[1].contains("input: The tallest mountain on Earth is in the Himalayas."));
        assert!(prompts[2].contains("Translate values in given json"));
    }

    #[test]
    fn adapt_is_memoized_by_the_cache() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = adapter(&dir);
        let prompt = question_prompt();

        // simulate a previous adaptation persisted by the caller
        let mut spec = prompt.spec().clone();
        spec.language = "hindi".to_string();
        adapter.cache().save(&Prompt::from_spec(spec).unwrap()).unwrap();

        let llm = ScriptedLlm::new([]);
        let adapted = adapter
            .adapt_blocking(&prompt, "hindi", &llm, &LenientJson)
            .unwrap();

        assert_eq!(adapted.language(), "hindi");
        assert_eq!(llm.call_count(), 0);
    }

    #[test]
    fn adapt_does_not_persist_automatically() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = adapter(&dir);
        let llm = ScriptedLlm::new(["a", "b", "{\"q\":\"c\"}"]);

        adapter
            .adapt_blocking(&question_prompt(), "spanish", &llm, &LenientJson)
            .unwrap();

        assert!(!adapter.cache().exists("spanish", "question_generation"));
    }

    #[test]
    fn regroup_rejects_non_multiple_result_counts() {
        let results = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        match regroup(results, 2, 2) {
            Err(PromptError::AdaptationDesync {
                examples,
                per_example,
                results,
            }) => {
                assert_eq!((examples, per_example, results), (2, 2, 3));
            }
            other => panic!("expected desync error, got {other:?}"),
        }
    }

    #[test]
    fn regroup_rejects_wrong_chunk_count() {
        let results = vec!["a".to_string(), "b".to_string()];
        assert!(matches!(
            regroup(results, 2, 2),
            Err(PromptError::AdaptationDesync { .. })
        ));
    }

    #[test]
    fn seed_translation_prompts_validate() {
        let str_seed = str_translation_prompt();
        assert_eq!(str_seed.output_kind(), OutputKind::Str);
        assert!(str_seed.render().contains("translate_to: hindi"));

        let json_seed = json_translation_prompt();
        assert_eq!(json_seed.output_kind(), OutputKind::Json);
        // JSON mode doubles braces in the example block
        assert!(json_seed.render().contains("{{\"statements\""));
    }
}
