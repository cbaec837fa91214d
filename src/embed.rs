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

use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use tracing::debug;

use crate::config::Config;
use crate::error::RagError;
use crate::error::Result;

pub const EMBEDDING_MOCK: &str = "mock";
pub const EMBEDDING_HTTP: &str = "http";
pub const DEFAULT_EMBEDDING_DIM: usize = 1536;

const HTTP_BACKEND: &str = "embedding endpoint";

pub trait Embedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn dim(&self) -> usize;
}

pub fn build_embedder(config: &Config) -> Result<Box<dyn Embedder>> {
    let dim = config.embedding_dim;
    if dim == 0 {
        return Err(RagError::InvalidConfiguration(
            "embedding_dim must be greater than 0".to_string(),
        ));
    }
    match config.embedding.trim().to_lowercase().as_str() {
        EMBEDDING_MOCK => Ok(Box::new(MockEmbedder::new(dim))),
        EMBEDDING_HTTP => {
            let api_key = std::env::var(&config.api_key_env)
                .ok()
                .filter(|key| !key.trim().is_empty());
            let embedder = HttpEmbedder::new(
                &config.embedding_url,
                &config.embedding_model,
                api_key,
                dim,
                Duration::from_millis(config.timeout_ms),
            )?;
            Ok(Box::new(embedder))
        }
        other => Err(RagError::InvalidConfiguration(format!(
            "unsupported embedding '{other}'; supported: {EMBEDDING_MOCK} or {EMBEDDING_HTTP}"
        ))),
    }
}

/// Deterministic stand-in for a real embedding model: the text's SHA-256
/// seeds a splitmix64 stream of floats in `[0, 1]`.
#[derive(Debug, Clone, Copy)]
pub struct MockEmbedder {
    dim: usize,
}

impl MockEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }
}

impl Embedder for MockEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let seed = text_seed(text);
        let vec = (0..self.dim as u64)
            .map(|idx| {
                let x = splitmix64(seed ^ idx.wrapping_mul(0x9E37_79B9_7F4A_7C15));
                ((x >> 11) as f64 / (1u64 << 53) as f64) as f32
            })
            .collect();
        Ok(vec)
    }

    fn dim(&self) -> usize {
        self.dim
    }
}

fn text_seed(text: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash[..8]);
    u64::from_le_bytes(bytes)
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Client for an OpenAI-compatible `/v1/embeddings` endpoint.
pub struct HttpEmbedder {
    client: reqwest::blocking::Client,
    url: String,
    model: String,
    api_key: Option<String>,
    dim: usize,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
    dimensions: usize,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl HttpEmbedder {
    pub fn new(
        url: &str,
        model: &str,
        api_key: Option<String>,
        dim: usize,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RagError::unavailable(HTTP_BACKEND, format!("build client: {e}")))?;
        Ok(Self {
            client,
            url: url.to_string(),
            model: model.to_string(),
            api_key,
            dim,
        })
    }
}

impl Embedder for HttpEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let Some(api_key) = &self.api_key else {
            return Err(RagError::unavailable(HTTP_BACKEND, "API key not set"));
        };
        debug!(url = %self.url, text_len = text.len(), "requesting embedding");

        let request = EmbeddingRequest {
            model: &self.model,
            input: vec![text],
            dimensions: self.dim,
        };
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .map_err(|e| {
                debug!(error = %e, "embedding request failed");
                RagError::unavailable(HTTP_BACKEND, format!("request failed: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(RagError::unavailable(
                HTTP_BACKEND,
                format!("returned {status}: {body}"),
            ));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .map_err(|e| RagError::unavailable(HTTP_BACKEND, format!("parse response: {e}")))?;
        let embedding = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| RagError::unavailable(HTTP_BACKEND, "empty response"))?;
        if embedding.len() != self.dim {
            return Err(RagError::unavailable(
                HTTP_BACKEND,
                format!("expected {} dims, got {}", self.dim, embedding.len()),
            ));
        }
        Ok(embedding)
    }

    fn dim(&self) -> usize {
        self.dim
    }
}

/// Returns 0.0 when either side is all zeros or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

pub fn to_bytes(vec: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(vec.len() * 4);
    for v in vec {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

pub fn from_bytes(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}
