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
use globset::Glob;
use globset::GlobSet;
use globset::GlobSetBuilder;
use sha2::Digest;
use sha2::Sha256;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use walkdir::WalkDir;

use crate::chunk::Chunker;
use crate::embed::Embedder;
use crate::model::Chunk;
use crate::model::Document;
use crate::store::DocumentRecord;
use crate::store::Store;

#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    pub user_id: String,
    pub subject_id: Option<String>,
    pub glob: Option<String>,
    pub ignore: Vec<String>,
}

#[derive(Debug, Default)]
pub struct IngestReport {
    pub docs_added: usize,
    pub chunks_added: usize,
    pub replaced: usize,
    pub file_ids: Vec<String>,
    pub warnings: Vec<String>,
}

pub fn ingest_paths(
    store: &Store,
    chunker: &Chunker,
    embedder: Option<&dyn Embedder>,
    paths: Vec<PathBuf>,
    opts: &IngestOptions,
) -> Result<IngestReport> {
    if opts.user_id.trim().is_empty() {
        anyhow::bail!("user id must not be empty");
    }
    let include_set = build_globset(opts.glob.as_deref())?;
    let ignore_set = build_ignore_set(&opts.ignore)?;
    let mut report = IngestReport::default();

    for path in paths {
        if path.is_file() {
            ingest_file(
                store,
                chunker,
                embedder,
                &path,
                &include_set,
                &ignore_set,
                opts,
                &mut report,
            )?;
        } else if path.is_dir() {
            for entry in WalkDir::new(&path)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
            {
                if entry.file_type().is_file() {
                    ingest_file(
                        store,
                        chunker,
                        embedder,
                        entry.path(),
                        &include_set,
                        &ignore_set,
                        opts,
                        &mut report,
                    )?;
                }
            }
        } else {
            report
                .warnings
                .push(format!("path not found: {}", path.display()));
        }
    }

    Ok(report)
}

fn build_globset(pattern: Option<&str>) -> Result<Option<GlobSet>> {
    let Some(pat) = pattern else {
        return Ok(None);
    };
    let mut builder = GlobSetBuilder::new();
    builder.add(Glob::new(pat).with_context(|| format!("invalid glob {pat}"))?);
    Ok(Some(builder.build()?))
}

fn build_ignore_set(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        builder.add(Glob::new(pat).with_context(|| format!("invalid ignore glob {pat}"))?);
    }
    Ok(builder.build()?)
}

#[allow(clippy::too_many_arguments)]
fn ingest_file(
    store: &Store,
    chunker: &Chunker,
    embedder: Option<&dyn Embedder>,
    path: &Path,
    include_set: &Option<GlobSet>,
    ignore_set: &GlobSet,
    opts: &IngestOptions,
    report: &mut IngestReport,
) -> Result<()> {
    if !ignore_set.is_empty() && ignore_set.is_match(path) {
        return Ok(());
    }
    if let Some(set) = include_set
        && !set.is_match(path)
    {
        return Ok(());
    }

    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(_) => {
            tracing::warn!(path = %path.display(), "skipping non-text file");
            report
                .warnings
                .push(format!("skip non-text file: {}", path.display()));
            return Ok(());
        }
    };
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned());

    ingest_text(store, chunker, embedder, opts, &filename, &text, report)
}

/// Chunk, optionally embed, and store one document's text.
pub fn ingest_text(
    store: &Store,
    chunker: &Chunker,
    embedder: Option<&dyn Embedder>,
    opts: &IngestOptions,
    filename: &str,
    text: &str,
    report: &mut IngestReport,
) -> Result<()> {
    let content_hash = sha256_hex(text.as_bytes());
    let subject = opts.subject_id.as_deref().unwrap_or("");
    let file_id = sha256_hex(
        format!("{}\0{}\0{}\0{}", opts.user_id, subject, filename, content_hash).as_bytes(),
    );
    let doc = Document {
        file_id: file_id.clone(),
        user_id: opts.user_id.clone(),
        subject_id: opts.subject_id.clone(),
        filename: filename.to_string(),
        text: text.to_string(),
    };

    let chunks = chunker
        .chunk_document(&doc)
        .with_context(|| format!("chunk {filename}"))?;
    if chunks.is_empty() {
        report
            .warnings
            .push(format!("skip empty document: {filename}"));
        return Ok(());
    }

    let stored = embed_chunks(embedder, chunks, filename, report);
    let uploaded_at = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .context("format upload time")?;
    let record = DocumentRecord {
        file_id: file_id.clone(),
        user_id: doc.user_id,
        subject_id: doc.subject_id,
        filename: doc.filename,
        hash: content_hash,
        size: text.len() as i64,
        uploaded_at,
        chunk_count: stored.len() as i64,
    };
    report.replaced += store
        .insert_document(&record, &stored)
        .with_context(|| format!("store {filename}"))?;
    tracing::info!(filename, chunks = stored.len(), "document stored");

    report.docs_added += 1;
    report.chunks_added += stored.len();
    report.file_ids.push(file_id);
    Ok(())
}

// The first embedding failure leaves the rest of the document unembedded.
fn embed_chunks(
    embedder: Option<&dyn Embedder>,
    chunks: Vec<Chunk>,
    filename: &str,
    report: &mut IngestReport,
) -> Vec<(Chunk, Option<Vec<f32>>)> {
    let mut embedder = embedder;
    let mut out = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        let embedding = match embedder {
            Some(e) => match e.embed(&chunk.text) {
                Ok(vec) => Some(vec),
                Err(err) => {
                    tracing::warn!(filename, error = %err, "storing chunks without embeddings");
                    report
                        .warnings
                        .push(format!("{filename}: embeddings skipped: {err}"));
                    embedder = None;
                    None
                }
            },
            None => None,
        };
        out.push((chunk, embedding));
    }
    out
}

pub fn sha256_hex(input: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::error::RagError;
    use crate::model::Scope;
    use crate::store::StoreMode;

    struct Broken;

    impl Embedder for Broken {
        fn embed(&self, _text: &str) -> crate::error::Result<Vec<f32>> {
            Err(RagError::unavailable("embedding", "API key not set"))
        }

        fn dim(&self) -> usize {
            4
        }
    }

    fn opts(user: &str, subject: Option<&str>) -> IngestOptions {
        IngestOptions {
            user_id: user.to_string(),
            subject_id: subject.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn walks_directories_with_globs_and_ignores() -> Result<()> {
        let dir = tempdir()?;
        let docs = dir.path().join("docs");
        std::fs::create_dir_all(docs.join("drafts"))?;
        std::fs::write(docs.join("a.txt"), "alpha text")?;
        std::fs::write(docs.join("b.md"), "beta text")?;
        std::fs::write(docs.join("drafts").join("c.txt"), "draft text")?;
        std::fs::write(docs.join("blank.txt"), "   \n")?;
        std::fs::write(docs.join("bin.txt"), b"\xff\xfe\x00")?;

        let db_path = dir.path().join("lectern.db");
        Store::init(&db_path)?;
        let store = Store::open(&db_path, StoreMode::ReadWrite)?;
        let chunker = Chunker::new(100, 10)?;
        let options = IngestOptions {
            glob: Some("**/*.txt".to_string()),
            ignore: vec!["**/drafts/**".to_string()],
            ..opts("u1", None)
        };

        let report = ingest_paths(&store, &chunker, None, vec![docs], &options)?;
        assert_eq!(report.docs_added, 1);
        assert_eq!(report.chunks_added, 1);
        assert_eq!(report.warnings.len(), 2);

        let listed = store.list_documents(&Scope::user("u1"))?;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].filename, "a.txt");
        Ok(())
    }

    #[test]
    fn file_id_depends_on_owner_and_subject() -> Result<()> {
        let dir = tempdir()?;
        let db_path = dir.path().join("lectern.db");
        Store::init(&db_path)?;
        let store = Store::open(&db_path, StoreMode::ReadWrite)?;
        let chunker = Chunker::new(100, 10)?;
        let mut report = IngestReport::default();

        ingest_text(&store, &chunker, None, &opts("u1", None), "n.txt", "same", &mut report)?;
        ingest_text(&store, &chunker, None, &opts("u1", Some("bio")), "n.txt", "same", &mut report)?;
        ingest_text(&store, &chunker, None, &opts("u2", None), "n.txt", "same", &mut report)?;
        assert_eq!(report.docs_added, 3);
        assert_eq!(report.replaced, 0);
        assert_eq!(report.file_ids.len(), 3);
        assert_ne!(report.file_ids[0], report.file_ids[1]);

        ingest_text(&store, &chunker, None, &opts("u1", None), "n.txt", "changed", &mut report)?;
        assert_eq!(report.replaced, 1);
        assert_eq!(store.list_documents(&Scope::user("u1"))?.len(), 2);
        Ok(())
    }

    #[test]
    fn embedding_failure_keeps_the_document() -> Result<()> {
        let dir = tempdir()?;
        let db_path = dir.path().join("lectern.db");
        Store::init(&db_path)?;
        let store = Store::open(&db_path, StoreMode::ReadWrite)?;
        let chunker = Chunker::new(20, 5)?;
        let mut report = IngestReport::default();

        let text = "first document text here, long enough";
        ingest_text(&store, &chunker, Some(&Broken), &opts("u1", None), "f.txt", text, &mut report)?;
        assert_eq!(report.docs_added, 1);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("API key not set"));
        assert_eq!(store.stats()?.embedded_chunks, 0);
        Ok(())
    }

    #[test]
    fn rejects_blank_user() -> Result<()> {
        let dir = tempdir()?;
        let db_path = dir.path().join("lectern.db");
        Store::init(&db_path)?;
        let store = Store::open(&db_path, StoreMode::ReadWrite)?;
        let chunker = Chunker::new(100, 10)?;
        let err = ingest_paths(&store, &chunker, None, vec![], &opts(" ", None)).unwrap_err();
        assert!(err.to_string().contains("user id"));
        Ok(())
    }
}
