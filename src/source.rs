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

//! Read side of the document store, as seen by the retriever.

use crate::chunk::Chunker;
use crate::embed::Embedder;
use crate::error::Result;
use crate::model::Candidate;
use crate::model::Chunk;
use crate::model::Document;
use crate::model::DocumentRef;
use crate::model::Scope;

pub trait ChunkSource {
    /// Chunks visible to `scope`, in document insertion order and then
    /// chunk order. Failures should be reported as `BackendUnavailable`.
    fn candidates(&self, scope: &Scope) -> Result<Vec<Candidate>>;
}

type StoredChunk = (Chunk, Option<Vec<f32>>);

/// A `ChunkSource` held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: Vec<(DocumentRef, Vec<StoredChunk>)>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any document with the same `file_id`; the replacement
    /// counts as newly inserted.
    pub fn insert(&mut self, document: DocumentRef, chunks: Vec<StoredChunk>) {
        self.remove(&document.file_id);
        self.documents.push((document, chunks));
    }

    /// Chunk `doc` and store it, embedding each chunk when an embedder is given.
    pub fn add_document(
        &mut self,
        chunker: &Chunker,
        doc: &Document,
        embedder: Option<&dyn Embedder>,
    ) -> Result<usize> {
        let chunks = chunker.chunk_document(doc)?;
        let mut stored = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let embedding = match embedder {
                Some(embedder) => Some(embedder.embed(&chunk.text)?),
                None => None,
            };
            stored.push((chunk, embedding));
        }
        let count = stored.len();
        self.insert(DocumentRef::from(doc), stored);
        Ok(count)
    }

    pub fn remove(&mut self, file_id: &str) -> bool {
        let before = self.documents.len();
        self.documents.retain(|(doc, _)| doc.file_id != file_id);
        self.documents.len() != before
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

impl ChunkSource for MemoryStore {
    fn candidates(&self, scope: &Scope) -> Result<Vec<Candidate>> {
        let mut out = Vec::new();
        for (doc, chunks) in &self.documents {
            if !scope.admits(doc) {
                continue;
            }
            for (chunk, embedding) in chunks {
                out.push(Candidate {
                    document: doc.clone(),
                    chunk: chunk.clone(),
                    embedding: embedding.clone(),
                });
            }
        }
        Ok(out)
    }
}
