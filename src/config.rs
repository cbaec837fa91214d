// Copyright 2026 Lectern Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use serde::Deserialize;
use serde::Serialize;

use crate::chunk::Chunker;
use crate::chunk::DEFAULT_SENTENCE_LOOKBACK;
use crate::embed::DEFAULT_EMBEDDING_DIM;
use crate::embed::EMBEDDING_HTTP;
use crate::embed::EMBEDDING_MOCK;
use crate::error::RagError;
use crate::score::DEFAULT_SIMILARITY_THRESHOLD;
use crate::score::SCORING_KEYWORD;
use crate::score::SCORING_VECTOR;

pub const CONFIG_FILE: &str = "lectern.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store_path: PathBuf,
    pub chunk_size: usize,
    pub overlap: usize,
    pub sentence_lookback: usize,
    pub scoring: String,
    pub embedding: String,
    pub embedding_dim: usize,
    pub similarity_threshold: f32,
    pub top_k: usize,
    pub max_context_length: usize,
    pub embedding_url: String,
    pub embedding_model: String,
    pub api_key_env: String,
    pub timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("lectern.db"),
            chunk_size: 1000,
            overlap: 200,
            sentence_lookback: DEFAULT_SENTENCE_LOOKBACK,
            scoring: SCORING_KEYWORD.to_string(),
            embedding: EMBEDDING_MOCK.to_string(),
            embedding_dim: DEFAULT_EMBEDDING_DIM,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            top_k: 5,
            max_context_length: 4000,
            embedding_url: "https://api.openai.com/v1/embeddings".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_ms: 5000,
        }
    }
}

impl Config {
    pub fn validate(&self) -> std::result::Result<(), RagError> {
        self.chunker()?;
        let scoring = self.scoring.trim().to_lowercase();
        if scoring != SCORING_KEYWORD && scoring != SCORING_VECTOR {
            return Err(RagError::InvalidConfiguration(format!(
                "unsupported scoring '{}'; supported: {SCORING_KEYWORD} or {SCORING_VECTOR}",
                self.scoring
            )));
        }
        let embedding = self.embedding.trim().to_lowercase();
        if embedding != EMBEDDING_MOCK && embedding != EMBEDDING_HTTP {
            return Err(RagError::InvalidConfiguration(format!(
                "unsupported embedding '{}'; supported: {EMBEDDING_MOCK} or {EMBEDDING_HTTP}",
                self.embedding
            )));
        }
        if self.embedding_dim == 0 {
            return Err(RagError::InvalidConfiguration(
                "embedding_dim must be greater than 0".to_string(),
            ));
        }
        if !(-1.0..=1.0).contains(&self.similarity_threshold) {
            return Err(RagError::InvalidConfiguration(format!(
                "similarity_threshold {} is outside [-1, 1]",
                self.similarity_threshold
            )));
        }
        Ok(())
    }

    pub fn chunker(&self) -> std::result::Result<Chunker, RagError> {
        Ok(Chunker::new(self.chunk_size, self.overlap)?
            .with_sentence_lookback(self.sentence_lookback))
    }

    pub fn uses_vectors(&self) -> bool {
        self.scoring.trim().eq_ignore_ascii_case(SCORING_VECTOR)
    }
}

#[derive(Debug, Clone)]
pub struct ConfigCtx {
    pub root: PathBuf,
    pub config: Config,
}

impl ConfigCtx {
    pub fn load_from_cwd() -> Result<Self> {
        let cwd = std::env::current_dir().context("get current dir")?;
        Self::load_from(&cwd)
    }

    pub fn load_from(start: &Path) -> Result<Self> {
        let config = load_global_config()?;
        let root = find_store_root(start, &config.store_path)
            .ok_or_else(|| anyhow::anyhow!("store not found; run `lectern init` first"))?;
        Ok(Self { root, config })
    }

    pub fn store_path(&self) -> PathBuf {
        if self.config.store_path.is_absolute() {
            self.config.store_path.clone()
        } else {
            self.root.join(&self.config.store_path)
        }
    }
}

fn config_dir() -> Option<PathBuf> {
    if cfg!(target_os = "windows") {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return Some(PathBuf::from(appdata));
        }
        if let Ok(profile) = std::env::var("USERPROFILE") {
            return Some(PathBuf::from(profile).join("AppData").join("Roaming"));
        }
        return None;
    }

    if cfg!(target_os = "macos") {
        let home = std::env::var("HOME").ok()?;
        return Some(
            PathBuf::from(home)
                .join("Library")
                .join("Application Support"),
        );
    }

    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg));
    }
    let home = std::env::var("HOME").ok()?;
    Some(PathBuf::from(home).join(".config"))
}

pub fn global_config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("lectern").join(CONFIG_FILE))
}

pub fn load_global_config() -> Result<Config> {
    let Some(path) = global_config_path() else {
        return Ok(Config::default());
    };
    if !path.exists() {
        return Ok(Config::default());
    }
    read_config(&path)
}

pub fn find_store_root(start: &Path, store_path: &Path) -> Option<PathBuf> {
    if store_path.is_absolute() {
        return store_path
            .exists()
            .then(|| store_path.parent().unwrap_or(store_path).to_path_buf());
    }

    let mut cur = start.canonicalize().unwrap_or_else(|_| start.to_path_buf());
    loop {
        let candidate = cur.join(store_path);
        if candidate.exists() {
            return Some(cur);
        }
        match cur.parent() {
            Some(parent) => cur = parent.to_path_buf(),
            None => return None,
        }
    }
}

pub fn read_config(path: &Path) -> Result<Config> {
    let text = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let config: Config = toml::from_str(&text).context("parse lectern.toml")?;
    config
        .validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(config)
}
