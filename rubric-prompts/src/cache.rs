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

//! On-disk cache for adapted prompts, keyed by (language, prompt name).

use crate::template::{Prompt, PromptSpec};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors from the prompt cache
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The stored file no longer reconstructs a valid prompt. Callers may
    /// fall back to re-adaptation instead of failing hard.
    #[error("cached prompt at {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

/// On-disk serialization wrapper: the constructor arguments live under
/// `kwargs`, keeping them separate from any future metadata.
#[derive(Debug, Serialize, Deserialize)]
struct CachedPrompt {
    kwargs: PromptSpec,
}

/// Filesystem store mapping (language, prompt name) to a serialized prompt.
///
/// Presence of a file is treated as "already adapted"; there is no
/// invalidation and no locking. Concurrent writers race with last-write-wins
/// semantics, which is acceptable for an offline, operator-driven step.
#[derive(Debug, Clone)]
pub struct PromptCache {
    root: PathBuf,
}

impl PromptCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deterministic location of one cached prompt.
    pub fn path_for(&self, language: &str, name: &str) -> PathBuf {
        self.root.join(language).join(name)
    }

    pub fn exists(&self, language: &str, name: &str) -> bool {
        self.path_for(language, name).is_file()
    }

    /// Serialize the prompt's full state, creating intermediate directories
    /// as needed. Overwrites unconditionally.
    pub fn save(&self, prompt: &Prompt) -> Result<(), CacheError> {
        let path = self.path_for(prompt.language(), prompt.name());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let payload = serde_json::to_string_pretty(&CachedPrompt {
            kwargs: prompt.spec().clone(),
        })?;
        fs::write(&path, payload)?;
        Ok(())
    }

    /// Reconstruct a prompt, re-running construction-time validation.
    pub fn load(&self, language: &str, name: &str) -> Result<Prompt, CacheError> {
        let path = self.path_for(language, name);
        let raw = fs::read_to_string(&path)?;
        let cached: CachedPrompt =
            serde_json::from_str(&raw).map_err(|err| CacheError::Corrupt {
                path: path.clone(),
                reason: err.to_string(),
            })?;
        Prompt::from_spec(cached.kwargs).map_err(|report| CacheError::Corrupt {
            path,
            reason: report.to_string(),
        })
    }
}
