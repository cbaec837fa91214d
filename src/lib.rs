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

//! Retrieval core for per-user document collections: chunk uploads, score
//! chunks against a question, and assemble a bounded context with citations.

pub mod chunk;
pub mod cli;
pub mod config;
pub mod context;
pub mod embed;
pub mod error;
pub mod ingest;
pub mod model;
pub mod output;
pub mod retrieve;
pub mod score;
pub mod source;
pub mod store;
pub mod transfer;

pub use chunk::Chunker;
pub use chunk::chunk;
pub use context::FormattedContext;
pub use context::Reply;
pub use context::format_context;
pub use error::RagError;
pub use model::Chunk;
pub use model::Document;
pub use model::Hit;
pub use model::Scope;
pub use retrieve::Retrieval;
pub use retrieve::Retriever;
pub use source::ChunkSource;
pub use source::MemoryStore;
