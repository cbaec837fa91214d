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

use std::collections::HashSet;

use serde::Serialize;

use crate::model::Hit;
use crate::retrieve::Retrieval;

pub const NO_MATCH_MESSAGE: &str = "No relevant documents were found for your question.";
pub const CONTEXT_TOO_SMALL_MESSAGE: &str =
    "Relevant documents were found, but none fit within the context limit.";

const SEPARATOR: &str = "\n\n";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormattedContext {
    pub context: String,
    pub citations: Vec<String>,
    pub max_context_length: usize,
    pub used_chars: usize,
    pub included: usize,
}

/// Join hit texts in rank order until the next one would overflow
/// `max_context_length` chars (separators included). Chunks are never cut.
pub fn format_context(hits: &[Hit], max_context_length: usize) -> FormattedContext {
    let separator_len = SEPARATOR.chars().count();
    let mut used = 0usize;
    let mut parts: Vec<&str> = Vec::new();
    let mut citations = Vec::new();
    let mut seen = HashSet::new();

    for hit in hits {
        let text_len = hit.chunk.text.chars().count();
        let needed = if parts.is_empty() {
            text_len
        } else {
            text_len + separator_len
        };
        if used + needed > max_context_length {
            break;
        }
        used += needed;
        parts.push(&hit.chunk.text);

        let citation = hit.citation();
        if seen.insert(citation.clone()) {
            citations.push(citation);
        }
    }

    FormattedContext {
        context: parts.join(SEPARATOR),
        citations,
        max_context_length,
        used_chars: used,
        included: parts.len(),
    }
}

/// What the response-generation step receives for one question.
#[derive(Debug, Clone, Serialize)]
pub struct Reply {
    pub enhanced: bool,
    pub degraded: bool,
    pub message: Option<String>,
    pub context: String,
    pub citations: Vec<String>,
}

impl Reply {
    pub fn from_retrieval(retrieval: &Retrieval, max_context_length: usize) -> Self {
        let formatted = format_context(&retrieval.hits, max_context_length);
        let fallback = if retrieval.is_empty() {
            Some(NO_MATCH_MESSAGE)
        } else if formatted.included == 0 {
            Some(CONTEXT_TOO_SMALL_MESSAGE)
        } else {
            None
        };
        if let Some(message) = fallback {
            return Self {
                enhanced: false,
                degraded: retrieval.degraded,
                message: Some(message.to_string()),
                context: String::new(),
                citations: Vec::new(),
            };
        }
        Self {
            enhanced: true,
            degraded: retrieval.degraded,
            message: None,
            context: formatted.context,
            citations: formatted.citations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Chunk;
    use crate::model::DocumentRef;

    fn hit(filename: &str, index: usize, text: &str) -> Hit {
        Hit {
            document: DocumentRef {
                file_id: format!("{filename}-id"),
                user_id: "u1".to_string(),
                subject_id: None,
                filename: filename.to_string(),
            },
            chunk: Chunk::new(
                format!("{filename}-id"),
                index,
                text,
                0,
                text.chars().count(),
            )
            .expect("chunk"),
            score: 1.0,
        }
    }

    #[test]
    fn empty_hits_give_empty_context() {
        let formatted = format_context(&[], 100);
        assert_eq!(formatted.context, "");
        assert!(formatted.citations.is_empty());
    }

    #[test]
    fn counts_separators_against_the_limit() {
        let hits = vec![hit("a.txt", 0, "aaaa"), hit("a.txt", 1, "bbbb")];
        let tight = format_context(&hits, 9);
        assert_eq!(tight.context, "aaaa");
        assert_eq!(tight.citations, vec!["a.txt (chunk 1)"]);

        let exact = format_context(&hits, 10);
        assert_eq!(exact.context, "aaaa\n\nbbbb");
        assert_eq!(exact.used_chars, 10);
        assert_eq!(exact.citations, vec!["a.txt (chunk 1)", "a.txt (chunk 2)"]);
    }

    #[test]
    fn stops_at_first_chunk_that_does_not_fit() {
        let hits = vec![
            hit("a.txt", 0, "short"),
            hit("b.txt", 0, "this one is far too long"),
            hit("c.txt", 0, "tiny"),
        ];
        let formatted = format_context(&hits, 12);
        assert_eq!(formatted.context, "short");
        assert_eq!(formatted.included, 1);
    }

    #[test]
    fn deduplicates_citations_in_first_seen_order() {
        let hits = vec![
            hit("notes.txt", 2, "one"),
            hit("intro.txt", 0, "two"),
            hit("notes.txt", 2, "three"),
        ];
        let formatted = format_context(&hits, 100);
        assert_eq!(formatted.included, 3);
        assert_eq!(
            formatted.citations,
            vec!["notes.txt (chunk 3)", "intro.txt (chunk 1)"]
        );
    }

    #[test]
    fn reply_falls_back_when_nothing_was_found() {
        let reply = Reply::from_retrieval(&Retrieval::default(), 100);
        assert!(!reply.enhanced);
        assert_eq!(reply.message.as_deref(), Some(NO_MATCH_MESSAGE));

        let reply = Reply::from_retrieval(&Retrieval::degraded("offline"), 100);
        assert!(reply.degraded);
        assert!(!reply.enhanced);

        let found = Retrieval {
            hits: vec![hit("doc.txt", 0, "Machine learning is a subset of AI.")],
            ..Default::default()
        };
        let reply = Reply::from_retrieval(&found, 100);
        assert!(reply.enhanced);
        assert_eq!(reply.citations, vec!["doc.txt (chunk 1)"]);
        assert!(reply.message.is_none());
    }

    #[test]
    fn reply_reports_hits_that_do_not_fit() {
        let found = Retrieval {
            hits: vec![hit("doc.txt", 0, "Machine learning is a subset of AI.")],
            ..Default::default()
        };
        let reply = Reply::from_retrieval(&found, 10);
        assert!(!reply.enhanced);
        assert!(!reply.degraded);
        assert_eq!(reply.message.as_deref(), Some(CONTEXT_TOO_SMALL_MESSAGE));
        assert!(reply.context.is_empty());
        assert!(reply.citations.is_empty());
    }
}
