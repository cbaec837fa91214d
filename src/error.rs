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

//! Error types for the retrieval core.
//!
//! Finding nothing is not an error: an empty hit list is the normal
//! "no match" outcome.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    /// Chunking or scoring parameters that can never work, such as
    /// `chunk_size == 0` or `overlap >= chunk_size`.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The embedding backend or chunk source could not serve the request.
    /// Retrieval turns this into degraded mode instead of failing.
    #[error("{backend} unavailable: {message}")]
    BackendUnavailable { backend: String, message: String },

    /// A chunk record that violates its own invariants.
    #[error("invalid chunk: {0}")]
    InvalidChunk(String),
}

impl RagError {
    pub fn unavailable(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            backend: backend.into(),
            message: message.into(),
        }
    }

    pub fn is_backend_unavailable(&self) -> bool {
        matches!(self, Self::BackendUnavailable { .. })
    }
}

pub type Result<T> = std::result::Result<T, RagError>;
