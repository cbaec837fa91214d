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

//! Relevance scoring strategies. Each strategy owns its cutoff; keyword
//! fractions and cosine similarities are not comparable.

use std::collections::HashSet;

use crate::config::Config;
use crate::embed::Embedder;
use crate::embed::build_embedder;
use crate::embed::cosine_similarity;
use crate::error::RagError;
use crate::error::Result;
use crate::model::Candidate;

pub const SCORING_KEYWORD: &str = "keyword";
pub const SCORING_VECTOR: &str = "vector";
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.7;

const VECTOR_INDEX: &str = "vector index";

pub trait Scorer {
    fn name(&self) -> &'static str;

    /// One score per candidate, in order. A backend failure fails the batch.
    fn score_all(&self, query: &str, candidates: &[Candidate]) -> Result<Vec<f32>>;

    fn passes(&self, score: f32) -> bool;
}

pub fn build_scorer(config: &Config) -> Result<Box<dyn Scorer>> {
    match config.scoring.trim().to_lowercase().as_str() {
        SCORING_KEYWORD => Ok(Box::new(KeywordScorer)),
        SCORING_VECTOR => Ok(Box::new(VectorScorer::new(
            build_embedder(config)?,
            config.similarity_threshold,
        ))),
        other => Err(RagError::InvalidConfiguration(format!(
            "unsupported scoring '{other}'; supported: {SCORING_KEYWORD} or {SCORING_VECTOR}"
        ))),
    }
}

/// Fraction of distinct query words that also occur in the chunk.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordScorer;

impl KeywordScorer {
    pub fn score(&self, query: &str, chunk_text: &str) -> f32 {
        keyword_overlap(&words(query), chunk_text)
    }
}

impl Scorer for KeywordScorer {
    fn name(&self) -> &'static str {
        SCORING_KEYWORD
    }

    fn score_all(&self, query: &str, candidates: &[Candidate]) -> Result<Vec<f32>> {
        let query_words = words(query);
        Ok(candidates
            .iter()
            .map(|c| keyword_overlap(&query_words, &c.chunk.text))
            .collect())
    }

    fn passes(&self, score: f32) -> bool {
        score > 0.0
    }
}

fn words(text: &str) -> HashSet<String> {
    text.split_whitespace().map(str::to_lowercase).collect()
}

fn keyword_overlap(query_words: &HashSet<String>, chunk_text: &str) -> f32 {
    if query_words.is_empty() {
        return 0.0;
    }
    let chunk_words = words(chunk_text);
    let shared = query_words.intersection(&chunk_words).count();
    shared as f32 / query_words.len() as f32
}

/// Cosine similarity between the embedded query and each chunk's stored vector.
pub struct VectorScorer {
    embedder: Box<dyn Embedder>,
    threshold: f32,
}

impl VectorScorer {
    pub fn new(embedder: Box<dyn Embedder>, threshold: f32) -> Self {
        Self {
            embedder,
            threshold,
        }
    }
}

impl Scorer for VectorScorer {
    fn name(&self) -> &'static str {
        SCORING_VECTOR
    }

    fn score_all(&self, query: &str, candidates: &[Candidate]) -> Result<Vec<f32>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let query_vec = self.embedder.embed(query)?;
        candidates
            .iter()
            .map(|c| {
                let Some(vec) = &c.embedding else {
                    return Err(RagError::unavailable(
                        VECTOR_INDEX,
                        format!(
                            "chunk {} of {} has no embedding",
                            c.chunk.chunk_index, c.document.filename
                        ),
                    ));
                };
                if vec.len() != query_vec.len() {
                    return Err(RagError::unavailable(
                        VECTOR_INDEX,
                        format!(
                            "chunk {} of {} has {} dims, query has {}",
                            c.chunk.chunk_index,
                            c.document.filename,
                            vec.len(),
                            query_vec.len()
                        ),
                    ));
                }
                Ok(cosine_similarity(&query_vec, vec))
            })
            .collect()
    }

    fn passes(&self, score: f32) -> bool {
        score > 0.0 && score >= self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::MockEmbedder;
    use crate::model::Chunk;
    use crate::model::DocumentRef;

    fn candidate(text: &str, embedding: Option<Vec<f32>>) -> Candidate {
        Candidate {
            document: DocumentRef {
                file_id: "f1".to_string(),
                user_id: "u1".to_string(),
                subject_id: None,
                filename: "doc.txt".to_string(),
            },
            chunk: Chunk::new("f1", 0, text, 0, text.chars().count()).expect("chunk"),
            embedding,
        }
    }

    #[test]
    fn keyword_score_is_fraction_of_query_words() {
        let scorer = KeywordScorer;
        let score = scorer.score(
            "What is machine learning?",
            "Machine learning is a subset of AI.",
        );
        assert!((score - 0.5).abs() < 1e-6);
        assert_eq!(scorer.score("quantum computing", "Machine learning"), 0.0);
        assert_eq!(scorer.score("   ", "anything"), 0.0);
        assert!(!scorer.passes(0.0));
        assert!(scorer.passes(0.01));
    }

    #[test]
    fn keyword_query_words_are_deduplicated() {
        let score = KeywordScorer.score("cell cell CELL wall", "the cell membrane");
        assert!((score - 0.5).abs() < 1e-6);
    }

    #[test]
    fn vector_scorer_matches_identical_text() -> Result<()> {
        let embedder = MockEmbedder::new(64);
        let vec = embedder.embed("osmosis")?;
        let scorer = VectorScorer::new(Box::new(embedder), DEFAULT_SIMILARITY_THRESHOLD);
        let scores = scorer.score_all("osmosis", &[candidate("osmosis", Some(vec))])?;
        assert!((scores[0] - 1.0).abs() < 1e-5);
        assert!(scorer.passes(scores[0]));
        assert!(!scorer.passes(0.5));
        Ok(())
    }

    #[test]
    fn vector_scorer_without_stored_vectors_is_unavailable() {
        let scorer = VectorScorer::new(Box::new(MockEmbedder::new(8)), 0.7);
        let err = scorer
            .score_all("osmosis", &[candidate("osmosis", None)])
            .unwrap_err();
        assert!(err.is_backend_unavailable());

        let err = scorer
            .score_all("osmosis", &[candidate("osmosis", Some(vec![0.5; 4]))])
            .unwrap_err();
        assert!(err.is_backend_unavailable());
    }

    #[test]
    fn build_scorer_rejects_unknown_strategy() {
        let config = Config {
            scoring: "bm25".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            build_scorer(&config),
            Err(RagError::InvalidConfiguration(_))
        ));
    }
}
