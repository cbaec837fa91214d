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

//! JSONL dump and restore. Each line is a `document` or a `chunk`; a
//! document line always precedes its chunks.

use std::collections::HashMap;
use std::io::BufRead;
use std::io::BufReader;
use std::io::Write;

use anyhow::Context;
use anyhow::Result;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use rusqlite::params;
use serde::Deserialize;
use serde::Serialize;

use crate::model::Chunk;
use crate::store::Store;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Line {
    Document {
        file_id: String,
        user_id: String,
        subject_id: Option<String>,
        filename: String,
        hash: String,
        size: i64,
        uploaded_at: String,
    },
    Chunk {
        file_id: String,
        chunk_index: i64,
        text: String,
        start_pos: i64,
        end_pos: i64,
        #[serde(default)]
        embedding: Option<String>,
    },
}

// A document read from the current import and the chunk index it expects next.
struct Pending {
    user_id: String,
    subject_id: Option<String>,
    filename: String,
    next_index: i64,
    superseded: bool,
}

#[derive(Debug, Default, Serialize)]
pub struct TransferStats {
    pub docs: usize,
    pub chunks: usize,
}

pub fn export_store(
    store: &Store,
    user_id: Option<&str>,
    mut writer: impl Write,
) -> Result<TransferStats> {
    let mut stats = TransferStats::default();

    let mut stmt = store.conn.prepare(
        "SELECT file_id, user_id, subject_id, filename, hash, size, uploaded_at\n         FROM document WHERE (?1 IS NULL OR user_id = ?1) ORDER BY seq ASC",
    )?;
    let rows = stmt.query_map(params![user_id], |row| {
        Ok(Line::Document {
            file_id: row.get(0)?,
            user_id: row.get(1)?,
            subject_id: row.get(2)?,
            filename: row.get(3)?,
            hash: row.get(4)?,
            size: row.get(5)?,
            uploaded_at: row.get(6)?,
        })
    })?;
    for row in rows {
        writeln!(writer, "{}", serde_json::to_string(&row?)?)?;
        stats.docs += 1;
    }

    let mut stmt = store.conn.prepare(
        "SELECT c.file_id, c.chunk_index, c.text, c.start_pos, c.end_pos, c.embedding\n         FROM chunk c JOIN document d ON d.file_id = c.file_id\n         WHERE (?1 IS NULL OR d.user_id = ?1)\n         ORDER BY d.seq ASC, c.chunk_index ASC",
    )?;
    let rows = stmt.query_map(params![user_id], |row| {
        let embedding: Option<Vec<u8>> = row.get(5)?;
        Ok(Line::Chunk {
            file_id: row.get(0)?,
            chunk_index: row.get(1)?,
            text: row.get(2)?,
            start_pos: row.get(3)?,
            end_pos: row.get(4)?,
            embedding: embedding.map(|bytes| BASE64.encode(bytes)),
        })
    })?;
    for row in rows {
        writeln!(writer, "{}", serde_json::to_string(&row?)?)?;
        stats.chunks += 1;
    }

    Ok(stats)
}

/// Load a JSONL export in one transaction. A document replaces any stored
/// document with the same file_id or the same owner, subject and filename.
/// Each document's chunks must follow its document line with indices
/// 0, 1, 2, ... and every document needs at least one chunk.
pub fn import_store(store: &Store, reader: impl std::io::Read) -> Result<TransferStats> {
    let mut stats = TransferStats::default();
    let mut buf = BufReader::new(reader);

    store.conn.execute_batch("BEGIN IMMEDIATE")?;
    let res = (|| -> Result<()> {
        let mut pending: HashMap<String, Pending> = HashMap::new();
        let mut order: Vec<String> = Vec::new();
        let mut line = String::new();
        let mut line_no = 0usize;
        loop {
            line.clear();
            if buf.read_line(&mut line)? == 0 {
                break;
            }
            line_no += 1;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let parsed: Line = serde_json::from_str(trimmed)
                .with_context(|| format!("parse import line {line_no}"))?;
            match parsed {
                Line::Document {
                    file_id,
                    user_id,
                    subject_id,
                    filename,
                    hash,
                    size,
                    uploaded_at,
                } => {
                    Store::clear_slot(
                        &store.conn,
                        &file_id,
                        &user_id,
                        subject_id.as_deref(),
                        &filename,
                    )
                    .with_context(|| format!("replace document on line {line_no}"))?;
                    store.conn.execute(
                        "INSERT INTO document (file_id, user_id, subject_id, filename, hash, size, uploaded_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                        params![file_id, user_id, subject_id, filename, hash, size, uploaded_at],
                    )?;
                    for (other_id, other) in pending.iter_mut() {
                        if *other_id != file_id
                            && other.user_id == user_id
                            && other.subject_id == subject_id
                            && other.filename == filename
                        {
                            other.superseded = true;
                        }
                    }
                    if !pending.contains_key(&file_id) {
                        order.push(file_id.clone());
                    }
                    pending.insert(
                        file_id,
                        Pending {
                            user_id,
                            subject_id,
                            filename,
                            next_index: 0,
                            superseded: false,
                        },
                    );
                }
                Line::Chunk {
                    file_id,
                    chunk_index,
                    text,
                    start_pos,
                    end_pos,
                    embedding,
                } => {
                    let Some(doc) = pending.get_mut(&file_id) else {
                        anyhow::bail!(
                            "chunk for {file_id} on line {line_no} has no preceding document line"
                        );
                    };
                    if chunk_index != doc.next_index {
                        anyhow::bail!(
                            "chunk_index {chunk_index} out of sequence for {file_id} on line {line_no}; expected {}",
                            doc.next_index
                        );
                    }
                    doc.next_index += 1;
                    let chunk = Chunk::new(
                        file_id,
                        usize::try_from(chunk_index).context("negative chunk_index")?,
                        text,
                        usize::try_from(start_pos).context("negative start_pos")?,
                        usize::try_from(end_pos).context("negative end_pos")?,
                    )
                    .with_context(|| format!("import line {line_no}"))?;
                    let bytes = match embedding {
                        Some(encoded) => Some(
                            BASE64
                                .decode(encoded.as_bytes())
                                .with_context(|| format!("decode embedding on line {line_no}"))?,
                        ),
                        None => None,
                    };
                    // Chunks of a document replaced later in the same import are dropped.
                    if doc.superseded {
                        continue;
                    }
                    store
                        .conn
                        .execute(
                            "INSERT INTO chunk (file_id, chunk_index, text, start_pos, end_pos, length, embedding) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                            params![
                                chunk.file_id,
                                chunk_index,
                                chunk.text,
                                start_pos,
                                end_pos,
                                chunk.length as i64,
                                bytes,
                            ],
                        )
                        .with_context(|| format!("insert chunk on line {line_no}"))?;
                }
            }
        }

        for file_id in &order {
            let Some(doc) = pending.get(file_id) else {
                continue;
            };
            if doc.superseded {
                continue;
            }
            if doc.next_index == 0 {
                anyhow::bail!("document {file_id} has no chunks");
            }
            stats.docs += 1;
            stats.chunks += doc.next_index as usize;
        }
        Ok(())
    })();

    if let Err(err) = res {
        store.conn.execute_batch("ROLLBACK")?;
        return Err(err);
    }
    store.conn.execute_batch("COMMIT")?;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::chunk::Chunker;
    use crate::embed::MockEmbedder;
    use crate::ingest::IngestOptions;
    use crate::ingest::IngestReport;
    use crate::ingest::ingest_text;
    use crate::model::Scope;
    use crate::source::ChunkSource;
    use crate::store::StoreMode;

    fn fresh_store(dir: &std::path::Path, name: &str) -> Result<Store> {
        let db_path = dir.join(name);
        Store::init(&db_path)?;
        Store::open(&db_path, StoreMode::ReadWrite)
    }

    fn user(id: &str) -> IngestOptions {
        IngestOptions {
            user_id: id.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn export_then_import_restores_chunks_and_vectors() -> Result<()> {
        let dir = tempdir()?;
        let source = fresh_store(dir.path(), "a.db")?;
        let chunker = Chunker::new(20, 5)?;
        let embedder = MockEmbedder::new(8);
        let mut report = IngestReport::default();
        let text = "first document text here, long enough";
        ingest_text(&source, &chunker, Some(&embedder), &user("u1"), "f.txt", text, &mut report)?;
        ingest_text(&source, &chunker, None, &user("u2"), "g.txt", "other owner", &mut report)?;

        let mut dump = Vec::new();
        let exported = export_store(&source, Some("u1"), &mut dump)?;
        assert_eq!(exported.docs, 1);
        assert_eq!(exported.chunks, 3);

        let target = fresh_store(dir.path(), "b.db")?;
        let imported = import_store(&target, dump.as_slice())?;
        assert_eq!(imported.docs, 1);
        assert_eq!(imported.chunks, 3);

        let before = source.candidates(&Scope::user("u1")).expect("source");
        let after = target.candidates(&Scope::user("u1")).expect("target");
        assert_eq!(before.len(), after.len());
        for (a, b) in before.iter().zip(&after) {
            assert_eq!(a.chunk, b.chunk);
            assert_eq!(a.embedding, b.embedding);
        }
        assert!(target.list_documents(&Scope::user("u2"))?.is_empty());

        let again = import_store(&target, dump.as_slice())?;
        assert_eq!(again.docs, 1);
        assert_eq!(target.stats()?.chunk_count, 3);
        Ok(())
    }

    #[test]
    fn bad_line_rolls_back_everything() -> Result<()> {
        let dir = tempdir()?;
        let store = fresh_store(dir.path(), "c.db")?;
        let input = concat!(
            r#"{"type":"document","file_id":"x","user_id":"u1","subject_id":null,"filename":"x.txt","hash":"h","size":3,"uploaded_at":"2026-01-01T00:00:00Z"}"#,
            "\n",
            r#"{"type":"chunk","file_id":"x","chunk_index":0,"text":"abc","start_pos":0,"end_pos":7}"#,
            "\n",
        );
        let err = import_store(&store, input.as_bytes()).unwrap_err();
        assert!(format!("{err:#}").contains("line 2"));
        assert_eq!(store.stats()?.doc_count, 0);
        Ok(())
    }

    fn doc_line(file_id: &str, filename: &str) -> String {
        format!(
            r#"{{"type":"document","file_id":"{file_id}","user_id":"u1","subject_id":null,"filename":"{filename}","hash":"h","size":4,"uploaded_at":"2026-01-01T00:00:00Z"}}"#
        )
    }

    fn chunk_line(file_id: &str, index: usize, text: &str) -> String {
        format!(
            r#"{{"type":"chunk","file_id":"{file_id}","chunk_index":{index},"text":"{text}","start_pos":0,"end_pos":{}}}"#,
            text.chars().count()
        )
    }

    #[test]
    fn gapped_chunk_indices_are_rejected() -> Result<()> {
        let dir = tempdir()?;
        let store = fresh_store(dir.path(), "d.db")?;
        let input = [
            doc_line("x", "x.txt"),
            chunk_line("x", 3, "three"),
            chunk_line("x", 7, "seven"),
        ]
        .join("\n");
        let err = import_store(&store, input.as_bytes()).unwrap_err();
        assert!(format!("{err:#}").contains("out of sequence"));
        assert_eq!(store.stats()?.doc_count, 0);

        let repeated = [
            doc_line("x", "x.txt"),
            chunk_line("x", 0, "zero"),
            chunk_line("x", 0, "zero"),
        ]
        .join("\n");
        assert!(import_store(&store, repeated.as_bytes()).is_err());
        assert_eq!(store.stats()?.chunk_count, 0);
        Ok(())
    }

    #[test]
    fn documents_without_chunks_are_rejected() -> Result<()> {
        let dir = tempdir()?;
        let store = fresh_store(dir.path(), "e.db")?;
        let input = [
            doc_line("x", "x.txt"),
            chunk_line("x", 0, "kept"),
            doc_line("y", "y.txt"),
        ]
        .join("\n");
        let err = import_store(&store, input.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("no chunks"));
        assert_eq!(store.stats()?.doc_count, 0);

        let orphan = chunk_line("z", 0, "orphan");
        assert!(import_store(&store, orphan.as_bytes()).is_err());
        Ok(())
    }

    #[test]
    fn same_name_document_replaces_the_earlier_one() -> Result<()> {
        let dir = tempdir()?;
        let store = fresh_store(dir.path(), "f.db")?;
        let chunker = Chunker::new(100, 10)?;
        let mut report = IngestReport::default();
        ingest_text(&store, &chunker, None, &user("u1"), "doc.txt", "stored text", &mut report)?;

        let input = [
            doc_line("x", "doc.txt"),
            doc_line("y", "doc.txt"),
            chunk_line("x", 0, "older"),
            chunk_line("y", 0, "newer"),
        ]
        .join("\n");
        let imported = import_store(&store, input.as_bytes())?;
        assert_eq!(imported.docs, 1);
        assert_eq!(imported.chunks, 1);

        let docs = store.list_documents(&Scope::user("u1"))?;
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].file_id, "y");
        let found = store.candidates(&Scope::user("u1")).expect("candidates");
        let texts: Vec<&str> = found.iter().map(|c| c.chunk.text.as_str()).collect();
        assert_eq!(texts, vec!["newer"]);
        Ok(())
    }
}
