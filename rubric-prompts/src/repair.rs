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

//! Coercing free-form model text into structured JSON.

use crate::client::{LlmClient, LlmError};
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Errors from JSON coercion
#[derive(Debug, Error)]
pub enum CoerceError {
    #[error("could not coerce model output into JSON: {0}")]
    Unparseable(String),

    #[error(transparent)]
    Llm(#[from] LlmError),
}

/// Collaborator that turns raw model text into a structured value.
///
/// Implementations are allowed to consult the model client to repair
/// malformed output, issuing their own follow-up generation calls.
#[async_trait]
pub trait JsonCoercer: Send + Sync {
    async fn coerce(&self, raw: &str, llm: &dyn LlmClient) -> Result<Value, CoerceError>;

    /// Blocking form of [`coerce`], behaviorally identical.
    ///
    /// [`coerce`]: JsonCoercer::coerce
    fn coerce_blocking(&self, raw: &str, llm: &dyn LlmClient) -> Result<Value, CoerceError>;
}

/// Default coercer: direct parse, then the first balanced `{...}` or `[...]`
/// block in the text. Never consults the model.
#[derive(Debug, Clone, Copy, Default)]
pub struct LenientJson;

impl LenientJson {
    fn parse(raw: &str) -> Result<Value, CoerceError> {
        if let Ok(value) = serde_json::from_str(raw.trim()) {
            return Ok(value);
        }
        if let Some(snippet) = first_balanced(raw) {
            if let Ok(value) = serde_json::from_str(snippet) {
                return Ok(value);
            }
        }
        Err(CoerceError::Unparseable(preview(raw)))
    }
}

#[async_trait]
impl JsonCoercer for LenientJson {
    async fn coerce(&self, raw: &str, _llm: &dyn LlmClient) -> Result<Value, CoerceError> {
        Self::parse(raw)
    }

    fn coerce_blocking(&self, raw: &str, _llm: &dyn LlmClient) -> Result<Value, CoerceError> {
        Self::parse(raw)
    }
}

/// First balanced object or array in the text, quote- and escape-aware.
fn first_balanced(raw: &str) -> Option<&str> {
    let start = raw.find(['{', '['])?;
    let bytes = raw.as_bytes();
    let open = bytes[start];
    let close = if open == b'{' { b'}' } else { b']' };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        if b == b'"' {
            in_string = true;
        } else if b == open {
            depth += 1;
        } else if b == close {
            depth -= 1;
            if depth == 0 {
                return Some(&raw[start..=i]);
            }
        }
    }
    None
}

fn preview(raw: &str) -> String {
    const LIMIT: usize = 120;
    let trimmed = raw.trim();
    if trimmed.len() <= LIMIT {
        trimmed.to_string()
    } else {
        let mut end = LIMIT;
        while !trimmed.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &trimmed[..end])
    }
}
