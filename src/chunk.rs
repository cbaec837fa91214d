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

//! Character-window chunking with overlap and sentence-boundary snapping.

use crate::error::RagError;
use crate::error::Result;
use crate::model::Chunk;
use crate::model::Document;
use crate::model::Span;

pub const DEFAULT_SENTENCE_LOOKBACK: usize = 100;

const SENTENCE_TERMINATORS: [char; 3] = ['.', '!', '?'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
    sentence_lookback: usize,
}

impl Chunker {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(RagError::InvalidConfiguration(
                "chunk_size must be greater than 0".to_string(),
            ));
        }
        if overlap >= chunk_size {
            return Err(RagError::InvalidConfiguration(format!(
                "overlap {overlap} must be smaller than chunk_size {chunk_size}"
            )));
        }
        Ok(Self {
            chunk_size,
            overlap,
            sentence_lookback: DEFAULT_SENTENCE_LOOKBACK,
        })
    }

    /// How far back from a window end to look for a sentence terminator.
    /// Zero disables snapping.
    pub fn with_sentence_lookback(mut self, lookback: usize) -> Self {
        self.sentence_lookback = lookback;
        self
    }

    pub fn split(&self, text: &str) -> Vec<Span> {
        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();
        let mut spans = Vec::new();
        if total == 0 {
            return spans;
        }
        if total <= self.chunk_size {
            push_trimmed(&chars, 0, total, &mut spans);
            return spans;
        }

        let mut start = 0usize;
        while start < total {
            let mut end = usize::min(start + self.chunk_size, total);
            if end < total {
                end = self.snap_to_sentence(&chars, start, end);
            }
            push_trimmed(&chars, start, end, &mut spans);
            if end == total {
                break;
            }
            start = end - self.overlap;
        }
        spans
    }

    pub fn chunk_document(&self, doc: &Document) -> Result<Vec<Chunk>> {
        self.split(&doc.text)
            .into_iter()
            .map(|span| Chunk::from_span(doc.file_id.clone(), span))
            .collect()
    }

    // The snapped end stays past `start + overlap` so the next window
    // always starts further right.
    fn snap_to_sentence(&self, chars: &[char], start: usize, end: usize) -> usize {
        let floor = usize::max(
            start + self.overlap + 1,
            end.saturating_sub(self.sentence_lookback),
        );
        (floor..end)
            .rev()
            .find(|&idx| SENTENCE_TERMINATORS.contains(&chars[idx]))
            .map(|idx| idx + 1)
            .unwrap_or(end)
    }
}

/// Split `text` into trimmed, overlapping spans.
pub fn chunk(text: &str, chunk_size: usize, overlap: usize) -> Result<Vec<Span>> {
    Ok(Chunker::new(chunk_size, overlap)?.split(text))
}

fn push_trimmed(chars: &[char], start: usize, end: usize, spans: &mut Vec<Span>) {
    let window = &chars[start..end];
    let lead = window.iter().take_while(|c| c.is_whitespace()).count();
    if lead == window.len() {
        return;
    }
    let trail = window.iter().rev().take_while(|c| c.is_whitespace()).count();
    let (start_pos, end_pos) = (start + lead, end - trail);
    spans.push(Span {
        index: spans.len(),
        text: chars[start_pos..end_pos].iter().collect(),
        start_pos,
        end_pos,
    });
}
