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

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::error::Result;
use crate::model::Hit;
use crate::model::Scope;
use crate::score::Scorer;
use crate::source::ChunkSource;

/// Outcome of one retrieval. An empty, non-degraded result means nothing
/// matched; a degraded one means a backend could not be reached.
#[derive(Debug, Clone, Default)]
pub struct Retrieval {
    pub hits: Vec<Hit>,
    pub degraded: bool,
    pub reason: Option<String>,
}

impl Retrieval {
    pub fn degraded(reason: impl Into<String>) -> Self {
        Self {
            hits: Vec::new(),
            degraded: true,
            reason: Some(reason.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

pub struct Retriever<'a> {
    source: &'a dyn ChunkSource,
    scorer: &'a dyn Scorer,
}

impl<'a> Retriever<'a> {
    pub fn new(source: &'a dyn ChunkSource, scorer: &'a dyn Scorer) -> Self {
        Self { source, scorer }
    }

    /// Never fails: backend errors come back as a degraded, empty retrieval.
    pub fn retrieve(&self, query: &str, scope: &Scope, top_k: usize) -> Retrieval {
        match self.ranked_hits(query, scope, top_k) {
            Ok(hits) => Retrieval {
                hits,
                degraded: false,
                reason: None,
            },
            Err(err) => Retrieval::degraded(err.to_string()),
        }
    }

    fn ranked_hits(&self, query: &str, scope: &Scope, top_k: usize) -> Result<Vec<Hit>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let candidates: Vec<_> = self
            .source
            .candidates(scope)?
            .into_iter()
            .filter(|c| scope.admits(&c.document))
            .collect();
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let scores = self.scorer.score_all(query, &candidates)?;
        let mut seen = HashSet::new();
        let mut hits: Vec<Hit> = candidates
            .into_iter()
            .zip(scores)
            .filter(|(_, score)| self.scorer.passes(*score))
            .filter(|(c, _)| seen.insert((c.chunk.file_id.clone(), c.chunk.chunk_index)))
            .map(|(c, score)| Hit {
                document: c.document,
                chunk: c.chunk,
                score,
            })
            .collect();

        sort_by_score_with_tiebreak(&mut hits);
        hits.truncate(top_k);
        Ok(hits)
    }
}

// Stable: equal score and index keep candidate (insertion) order.
fn sort_by_score_with_tiebreak(hits: &mut [Hit]) {
    hits.sort_by(|a, b| {
        let ord = b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal);
        if ord == Ordering::Equal {
            a.chunk.chunk_index.cmp(&b.chunk.chunk_index)
        } else {
            ord
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Chunker;
    use crate::embed::MockEmbedder;
    use crate::error::RagError;
    use crate::model::Candidate;
    use crate::model::Chunk;
    use crate::model::Document;
    use crate::model::DocumentRef;
    use crate::score::KeywordScorer;
    use crate::score::VectorScorer;
    use crate::source::MemoryStore;

    const ML_TEXT: &str = "Machine learning is a subset of AI. There are three types: supervised, unsupervised, reinforcement.";

    fn doc(file_id: &str, user: &str, subject: Option<&str>, text: &str) -> Document {
        Document {
            file_id: file_id.to_string(),
            user_id: user.to_string(),
            subject_id: subject.map(str::to_string),
            filename: format!("{file_id}.txt"),
            text: text.to_string(),
        }
    }

    struct Offline;

    impl ChunkSource for Offline {
        fn candidates(&self, _scope: &Scope) -> Result<Vec<Candidate>> {
            Err(RagError::unavailable("index", "no API key"))
        }
    }

    #[test]
    fn finds_first_chunk_for_machine_learning_question() -> Result<()> {
        let mut store = MemoryStore::new();
        store.add_document(&Chunker::new(50, 10)?, &doc("doc", "u1", None, ML_TEXT), None)?;
        let retriever = Retriever::new(&store, &KeywordScorer);

        let found = retriever.retrieve("What is machine learning?", &Scope::user("u1"), 5);
        assert!(!found.degraded);
        assert_eq!(found.hits.len(), 1);
        assert_eq!(found.hits[0].chunk.chunk_index, 0);
        assert!(found.hits[0].score > 0.0);
        assert_eq!(found.hits[0].citation(), "doc.txt (chunk 1)");

        let none = retriever.retrieve("quantum computing", &Scope::user("u1"), 5);
        assert!(none.is_empty());
        assert!(!none.degraded);
        Ok(())
    }

    #[test]
    fn filters_by_user_and_subject() -> Result<()> {
        let chunker = Chunker::new(200, 20)?;
        let mut store = MemoryStore::new();
        store.add_document(&chunker, &doc("a", "u1", Some("bio"), "cells divide"), None)?;
        store.add_document(&chunker, &doc("b", "u1", None, "cells grow"), None)?;
        store.add_document(&chunker, &doc("c", "u2", Some("bio"), "cells die"), None)?;
        let retriever = Retriever::new(&store, &KeywordScorer);

        let all = retriever.retrieve("cells", &Scope::user("u1"), 10);
        let ids: Vec<&str> = all.hits.iter().map(|h| h.document.file_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);

        let bio = retriever.retrieve(
            "cells",
            &Scope::user("u1").with_subject(Some("bio".to_string())),
            10,
        );
        assert_eq!(bio.hits.len(), 1);
        assert_eq!(bio.hits[0].document.file_id, "a");

        assert!(retriever.retrieve("cells", &Scope::user("nobody"), 10).is_empty());
        Ok(())
    }

    #[test]
    fn ranks_by_score_then_chunk_index_then_insertion() -> Result<()> {
        let chunker = Chunker::new(200, 20)?;
        let mut store = MemoryStore::new();
        store.add_document(&chunker, &doc("a", "u1", None, "energy"), None)?;
        store.add_document(&chunker, &doc("b", "u1", None, "kinetic energy"), None)?;
        store.add_document(&chunker, &doc("c", "u1", None, "energy again"), None)?;
        let retriever = Retriever::new(&store, &KeywordScorer);

        let found = retriever.retrieve("kinetic energy", &Scope::user("u1"), 10);
        let ids: Vec<&str> = found.hits.iter().map(|h| h.document.file_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);

        let top = retriever.retrieve("kinetic energy", &Scope::user("u1"), 2);
        assert_eq!(top.hits.len(), 2);
        assert!(retriever.retrieve("energy", &Scope::user("u1"), 0).is_empty());
        Ok(())
    }

    #[test]
    fn chunk_index_breaks_ties_before_insertion_order() -> Result<()> {
        let owner = |file_id: &str| DocumentRef {
            file_id: file_id.to_string(),
            user_id: "u1".to_string(),
            subject_id: None,
            filename: format!("{file_id}.txt"),
        };
        let mut store = MemoryStore::new();
        store.insert(
            owner("a"),
            vec![
                (Chunk::new("a", 0, "alpha", 0, 5)?, None),
                (Chunk::new("a", 1, "beta", 6, 10)?, None),
            ],
        );
        store.insert(owner("b"), vec![(Chunk::new("b", 0, "beta", 0, 4)?, None)]);

        let found = Retriever::new(&store, &KeywordScorer).retrieve("beta", &Scope::user("u1"), 5);
        let order: Vec<(&str, usize)> = found
            .hits
            .iter()
            .map(|h| (h.document.file_id.as_str(), h.chunk.chunk_index))
            .collect();
        assert_eq!(order, vec![("b", 0), ("a", 1)]);
        assert_eq!(found.hits[0].score, found.hits[1].score);
        Ok(())
    }

    #[test]
    fn backend_failure_degrades_instead_of_failing() -> Result<()> {
        let found = Retriever::new(&Offline, &KeywordScorer).retrieve("x", &Scope::user("u1"), 3);
        assert!(found.degraded);
        assert!(found.is_empty());
        assert!(found.reason.as_deref().unwrap_or_default().contains("no API key"));

        let mut store = MemoryStore::new();
        store.add_document(&Chunker::new(100, 10)?, &doc("a", "u1", None, "osmosis"), None)?;
        let scorer = VectorScorer::new(Box::new(MockEmbedder::new(16)), 0.7);
        let found = Retriever::new(&store, &scorer).retrieve("osmosis", &Scope::user("u1"), 3);
        assert!(found.degraded);
        Ok(())
    }

    #[test]
    fn vector_mode_ranks_exact_text_first() -> Result<()> {
        let embedder = MockEmbedder::new(32);
        let chunker = Chunker::new(100, 10)?;
        let mut store = MemoryStore::new();
        store.add_document(&chunker, &doc("a", "u1", None, "photosynthesis"), Some(&embedder))?;
        store.add_document(&chunker, &doc("b", "u1", None, "respiration"), Some(&embedder))?;
        let scorer = VectorScorer::new(Box::new(embedder), 0.7);

        let found = Retriever::new(&store, &scorer).retrieve("photosynthesis", &Scope::user("u1"), 5);
        assert!(!found.degraded);
        assert_eq!(found.hits[0].document.file_id, "a");
        assert!((found.hits[0].score - 1.0).abs() < 1e-5);
        Ok(())
    }
}
