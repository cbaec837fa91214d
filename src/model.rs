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

//! Shared domain types used across chunking, retrieval, and context assembly.

use serde::Serialize;

use crate::error::RagError;
use crate::error::Result;

/// An uploaded document before chunking.
#[derive(Debug, Clone)]
pub struct Document {
    pub file_id: String,
    pub user_id: String,
    pub subject_id: Option<String>,
    pub filename: String,
    pub text: String,
}

/// Document metadata carried alongside every retrieval candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentRef {
    pub file_id: String,
    pub user_id: String,
    pub subject_id: Option<String>,
    pub filename: String,
}

impl From<&Document> for DocumentRef {
    fn from(doc: &Document) -> Self {
        Self {
            file_id: doc.file_id.clone(),
            user_id: doc.user_id.clone(),
            subject_id: doc.subject_id.clone(),
            filename: doc.filename.clone(),
        }
    }
}

/// A trimmed window of source text. Positions count chars, not bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    pub index: usize,
    pub text: String,
    pub start_pos: usize,
    pub end_pos: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    pub file_id: String,
    pub chunk_index: usize,
    pub text: String,
    pub start_pos: usize,
    pub end_pos: usize,
    pub length: usize,
}

impl Chunk {
    pub fn new(
        file_id: impl Into<String>,
        chunk_index: usize,
        text: impl Into<String>,
        start_pos: usize,
        end_pos: usize,
    ) -> Result<Self> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(RagError::InvalidChunk(format!(
                "chunk {chunk_index} has no text"
            )));
        }
        if end_pos < start_pos {
            return Err(RagError::InvalidChunk(format!(
                "chunk {chunk_index} ends at {end_pos} before it starts at {start_pos}"
            )));
        }
        let length = text.chars().count();
        if end_pos - start_pos != length {
            return Err(RagError::InvalidChunk(format!(
                "chunk {chunk_index} spans {} chars but holds {length}",
                end_pos - start_pos
            )));
        }
        Ok(Self {
            file_id: file_id.into(),
            chunk_index,
            text,
            start_pos,
            end_pos,
            length,
        })
    }

    pub fn from_span(file_id: impl Into<String>, span: Span) -> Result<Self> {
        Self::new(file_id, span.index, span.text, span.start_pos, span.end_pos)
    }

    pub fn citation(&self, filename: &str) -> String {
        format!("{} (chunk {})", filename, self.chunk_index + 1)
    }
}

/// Who is asking, and optionally about which subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub user_id: String,
    pub subject_id: Option<String>,
}

impl Scope {
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            subject_id: None,
        }
    }

    pub fn with_subject(mut self, subject_id: Option<String>) -> Self {
        self.subject_id = subject_id;
        self
    }

    /// Untagged documents never match a subject filter.
    pub fn admits(&self, doc: &DocumentRef) -> bool {
        if doc.user_id != self.user_id {
            return false;
        }
        match &self.subject_id {
            Some(subject) => doc.subject_id.as_deref() == Some(subject.as_str()),
            None => true,
        }
    }
}

/// A chunk offered to the retriever, with whatever vector the store holds.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub document: DocumentRef,
    pub chunk: Chunk,
    pub embedding: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Hit {
    pub document: DocumentRef,
    pub chunk: Chunk,
    pub score: f32,
}

impl Hit {
    pub fn citation(&self) -> String {
        self.chunk.citation(&self.document.filename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(user: &str, subject: Option<&str>) -> DocumentRef {
        DocumentRef {
            file_id: "f".to_string(),
            user_id: user.to_string(),
            subject_id: subject.map(str::to_string),
            filename: "notes.txt".to_string(),
        }
    }

    #[test]
    fn chunk_rejects_blank_text_and_bad_spans() {
        assert!(Chunk::new("f", 0, "   ", 0, 3).is_err());
        assert!(Chunk::new("f", 0, "abc", 3, 0).is_err());
        assert!(Chunk::new("f", 0, "abc", 0, 5).is_err());
        let chunk = Chunk::new("f", 2, "héllo", 10, 15).expect("valid chunk");
        assert_eq!(chunk.length, 5);
        assert_eq!(chunk.citation("notes.txt"), "notes.txt (chunk 3)");
    }

    #[test]
    fn subject_scope_excludes_untagged_documents() {
        let scope = Scope::user("u1").with_subject(Some("math".to_string()));
        assert!(scope.admits(&doc("u1", Some("math"))));
        assert!(!scope.admits(&doc("u1", None)));
        assert!(!scope.admits(&doc("u1", Some("art"))));
        assert!(!scope.admits(&doc("u2", Some("math"))));
        assert!(Scope::user("u1").admits(&doc("u1", None)));
    }
}
