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

//! OpenAI-compatible model and embedding client.

use crate::embedding::{EmbedError, EmbeddingClient};
use async_trait::async_trait;
use rubric_prompts::{LlmClient, LlmError, PromptValue};
use serde_json::{json, Value};
use std::sync::OnceLock;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Client for OpenAI-compatible chat-completion and embedding endpoints.
///
/// Implements both the model-client and embedding-provider contracts. The
/// blocking forms use a dedicated `reqwest::blocking::Client`, created on
/// first use; they must not be called from inside an async runtime.
pub struct OpenAiClient {
    api_key: String,
    model: String,
    embedding_model: String,
    base_url: String,
    http: reqwest::Client,
    http_blocking: OnceLock<reqwest::blocking::Client>,
}

impl OpenAiClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            api_key,
            model,
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            http: reqwest::Client::new(),
            http_blocking: OnceLock::new(),
        }
    }

    /// Point at a compatible server (Azure, vLLM, Ollama, ...).
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_embedding_model(mut self, model: String) -> Self {
        self.embedding_model = model;
        self
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }

    fn blocking_client(&self) -> &reqwest::blocking::Client {
        self.http_blocking
            .get_or_init(reqwest::blocking::Client::new)
    }

    fn chat_body(&self, prompt: &PromptValue, n: usize) -> Value {
        json!({
            "model": self.model,
            "messages": [prompt.to_message()],
            "temperature": 0.0,
            "n": n,
        })
    }

    fn embeddings_body(&self, texts: &[String]) -> Value {
        json!({
            "model": self.embedding_model,
            "input": texts,
        })
    }
}

fn chat_error(status: reqwest::StatusCode, body: String) -> LlmError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        LlmError::RateLimited
    } else {
        LlmError::Api(body)
    }
}

fn embed_error(status: reqwest::StatusCode, body: String) -> EmbedError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        EmbedError::RateLimited
    } else {
        EmbedError::Api(body)
    }
}

fn parse_chat(response: Value, n: usize) -> Result<Vec<String>, LlmError> {
    let choices = response["choices"]
        .as_array()
        .ok_or_else(|| LlmError::InvalidResponse("missing choices".to_string()))?;
    let completions: Vec<String> = choices
        .iter()
        .map(|choice| {
            choice["message"]["content"]
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| LlmError::InvalidResponse("missing message content".to_string()))
        })
        .collect::<Result<_, _>>()?;
    if completions.len() != n {
        return Err(LlmError::InvalidResponse(format!(
            "expected {n} completions, got {}",
            completions.len()
        )));
    }
    Ok(completions)
}

fn parse_embeddings(response: Value, expected: usize) -> Result<Vec<Vec<f64>>, EmbedError> {
    let data = response["data"]
        .as_array()
        .ok_or_else(|| EmbedError::InvalidResponse("missing data".to_string()))?;
    let mut embeddings = Vec::with_capacity(data.len());
    for item in data {
        let vector: Vec<f64> = item["embedding"]
            .as_array()
            .ok_or_else(|| EmbedError::InvalidResponse("missing embedding".to_string()))?
            .iter()
            .filter_map(Value::as_f64)
            .collect();
        embeddings.push(vector);
    }
    if embeddings.len() != expected {
        return Err(EmbedError::InvalidResponse(format!(
            "expected {expected} embeddings, got {}",
            embeddings.len()
        )));
    }
    Ok(embeddings)
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn generate(&self, prompt: &PromptValue, n: usize) -> Result<Vec<String>, LlmError> {
        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&self.chat_body(prompt, n))
            .send()
            .await
            .map_err(|err| LlmError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .map_err(|err| LlmError::Transport(err.to_string()))?;
            return Err(chat_error(status, body));
        }

        let value: Value = response
            .json()
            .await
            .map_err(|err| LlmError::Transport(err.to_string()))?;
        parse_chat(value, n)
    }

    fn generate_blocking(&self, prompt: &PromptValue, n: usize) -> Result<Vec<String>, LlmError> {
        let response = self
            .blocking_client()
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&self.chat_body(prompt, n))
            .send()
            .map_err(|err| LlmError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .map_err(|err| LlmError::Transport(err.to_string()))?;
            return Err(chat_error(status, body));
        }

        let value: Value = response
            .json()
            .map_err(|err| LlmError::Transport(err.to_string()))?;
        parse_chat(value, n)
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiClient {
    async fn embed_one(&self, text: &str) -> Result<Vec<f64>, EmbedError> {
        let embeddings = self.embed_many(&[text.to_string()]).await?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbedError::InvalidResponse("no embedding returned".to_string()))
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f64>>, EmbedError> {
        let response = self
            .http
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&self.embeddings_body(texts))
            .send()
            .await
            .map_err(|err| EmbedError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .map_err(|err| EmbedError::Transport(err.to_string()))?;
            return Err(embed_error(status, body));
        }

        let value: Value = response
            .json()
            .await
            .map_err(|err| EmbedError::Transport(err.to_string()))?;
        parse_embeddings(value, texts.len())
    }

    fn embed_one_blocking(&self, text: &str) -> Result<Vec<f64>, EmbedError> {
        let embeddings = self.embed_many_blocking(&[text.to_string()])?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbedError::InvalidResponse("no embedding returned".to_string()))
    }

    fn embed_many_blocking(&self, texts: &[String]) -> Result<Vec<Vec<f64>>, EmbedError> {
        let response = self
            .blocking_client()
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&self.embeddings_body(texts))
            .send()
            .map_err(|err| EmbedError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .map_err(|err| EmbedError::Transport(err.to_string()))?;
            return Err(embed_error(status, body));
        }

        let value: Value = response
            .json()
            .map_err(|err| EmbedError::Transport(err.to_string()))?;
        parse_embeddings(value, texts.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_chat_extracts_completions_in_order() {
        let response = json!({
            "choices": [
                {"message": {"role": "assistant", "content": "first"}},
                {"message": {"role": "assistant", "content": "second"}},
            ],
        });
        let completions = parse_chat(response, 2).unwrap();
        assert_eq!(completions, vec!["first", "second"]);
    }

    #[test]
    fn parse_chat_rejects_wrong_completion_count() {
        let response = json!({
            "choices": [{"message": {"content": "only one"}}],
        });
        assert!(matches!(
            parse_chat(response, 3),
            Err(LlmError::InvalidResponse(_))
        ));
    }

    #[test]
    fn parse_embeddings_preserves_order_and_count() {
        let response = json!({
            "data": [
                {"embedding": [1.0, 0.0]},
                {"embedding": [0.0, 1.0]},
            ],
        });
        let embeddings = parse_embeddings(response, 2).unwrap();
        assert_eq!(embeddings, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn parse_embeddings_rejects_count_mismatch() {
        let response = json!({"data": []});
        assert!(matches!(
            parse_embeddings(response, 1),
            Err(EmbedError::InvalidResponse(_))
        ));
    }
}
