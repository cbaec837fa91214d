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

use std::fs;
use std::fs::File;
use std::fs::OpenOptions;
use std::path::Path;
use std::path::PathBuf;
use std::thread::sleep;
use std::time::Duration;
use std::time::Instant;

use anyhow::Context;
use anyhow::Result;
use fs2::FileExt;
use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::params;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;

use crate::embed::from_bytes;
use crate::embed::to_bytes;
use crate::error::RagError;
use crate::model::Candidate;
use crate::model::Chunk;
use crate::model::DocumentRef;
use crate::model::Scope;
use crate::source::ChunkSource;

const SCHEMA_VERSION: i64 = 1;
const STORE_BACKEND: &str = "document store";

pub struct Store {
    pub conn: Connection,
    pub path: PathBuf,
    lock: Option<StoreLock>,
}

struct StoreLock {
    _file: File,
    path: PathBuf,
    mode: StoreMode,
}

#[derive(Debug, Clone, Copy)]
pub enum StoreMode {
    ReadOnly,
    ReadWrite,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentRecord {
    pub file_id: String,
    pub user_id: String,
    pub subject_id: Option<String>,
    pub filename: String,
    pub hash: String,
    pub size: i64,
    pub uploaded_at: String,
    pub chunk_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub doc_count: i64,
    pub chunk_count: i64,
    pub embedded_chunks: i64,
    pub db_size_bytes: u64,
}

impl Store {
    pub fn init(path: &Path) -> Result<()> {
        if path.exists() {
            anyhow::bail!("store already exists at {}", path.display());
        }
        let _lock = Self::acquire_lock(path, StoreMode::ReadWrite)?;
        let conn = Self::open_connection(path, StoreMode::ReadWrite)?;
        Self::apply_pragmas(&conn, StoreMode::ReadWrite)?;
        Self::create_schema(&conn)?;
        Self::set_meta(&conn, "schema_version", &SCHEMA_VERSION.to_string())?;
        Ok(())
    }

    pub fn open(path: &Path, mode: StoreMode) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("store not found at {}", path.display());
        }
        let lock = Self::acquire_lock(path, mode)?;
        let conn = Self::open_connection(path, mode)?;
        Self::apply_pragmas(&conn, mode)?;

        let version = Self::schema_version(&conn)?;
        if version > SCHEMA_VERSION {
            anyhow::bail!(
                "store schema version {} is newer than supported {}",
                version,
                SCHEMA_VERSION
            );
        }
        if version < SCHEMA_VERSION {
            if matches!(mode, StoreMode::ReadOnly) {
                anyhow::bail!(
                    "store schema version {} needs an upgrade; run a write command first",
                    version
                );
            }
            Self::create_schema(&conn)?;
            Self::set_meta(&conn, "schema_version", &SCHEMA_VERSION.to_string())?;
        }

        Ok(Self {
            conn,
            path: path.to_path_buf(),
            lock: Some(lock),
        })
    }

    fn open_connection(path: &Path, mode: StoreMode) -> Result<Connection> {
        let flags = match mode {
            StoreMode::ReadOnly => OpenFlags::SQLITE_OPEN_READ_ONLY,
            StoreMode::ReadWrite => {
                OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
            }
        };
        let conn = Connection::open_with_flags(path, flags)
            .with_context(|| format!("open {}", path.display()))?;
        conn.busy_timeout(Duration::from_millis(5000))
            .context("set busy timeout")?;
        Ok(conn)
    }

    fn apply_pragmas(conn: &Connection, mode: StoreMode) -> Result<()> {
        let mut batch = String::from("PRAGMA foreign_keys=ON;");
        if matches!(mode, StoreMode::ReadWrite) {
            batch = format!("PRAGMA journal_mode=DELETE;\nPRAGMA synchronous=NORMAL;\n{batch}");
        }
        conn.execute_batch(&batch).context("apply pragmas")?;
        Ok(())
    }

    fn lock_path_for(path: &Path) -> Result<PathBuf> {
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let mut hasher = Sha256::new();
        hasher.update(canonical.to_string_lossy().as_bytes());
        let hash = hex::encode(hasher.finalize());
        let mut dir = std::env::temp_dir();
        dir.push("lectern");
        fs::create_dir_all(&dir).with_context(|| format!("create lock dir {}", dir.display()))?;
        Ok(dir.join(format!("lectern-{hash}.lock")))
    }

    fn acquire_lock(path: &Path, mode: StoreMode) -> Result<StoreLock> {
        let lock_path = Self::lock_path_for(path)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("open lock file {}", lock_path.display()))?;
        let deadline = Instant::now() + Duration::from_millis(5000);
        loop {
            let locked = match mode {
                StoreMode::ReadOnly => FileExt::try_lock_shared(&file),
                StoreMode::ReadWrite => FileExt::try_lock_exclusive(&file),
            };
            match locked {
                Ok(()) => {
                    return Ok(StoreLock {
                        _file: file,
                        path: lock_path,
                        mode,
                    });
                }
                Err(_) if Instant::now() >= deadline => {
                    let mode_label = match mode {
                        StoreMode::ReadOnly => "read",
                        StoreMode::ReadWrite => "write",
                    };
                    anyhow::bail!(
                        "store is locked for {mode_label} access; another process may be using {}",
                        path.display()
                    );
                }
                Err(_) => sleep(Duration::from_millis(50)),
            }
        }
    }

    fn create_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS meta (\n  key TEXT PRIMARY KEY,\n  value TEXT\n);\n\nCREATE TABLE IF NOT EXISTS document (\n  seq INTEGER PRIMARY KEY AUTOINCREMENT,\n  file_id TEXT NOT NULL UNIQUE,\n  user_id TEXT NOT NULL,\n  subject_id TEXT,\n  filename TEXT NOT NULL,\n  hash TEXT NOT NULL,\n  size INTEGER NOT NULL,\n  uploaded_at TEXT NOT NULL\n);\n\nCREATE TABLE IF NOT EXISTS chunk (\n  file_id TEXT NOT NULL REFERENCES document(file_id) ON DELETE CASCADE,\n  chunk_index INTEGER NOT NULL,\n  text TEXT NOT NULL,\n  start_pos INTEGER NOT NULL,\n  end_pos INTEGER NOT NULL,\n  length INTEGER NOT NULL,\n  embedding BLOB,\n  PRIMARY KEY (file_id, chunk_index)\n);\n\nCREATE INDEX IF NOT EXISTS idx_document_owner ON document(user_id, subject_id);",
        )
        .context("create schema")?;
        Ok(())
    }

    fn set_meta(conn: &Connection, key: &str, value: &str) -> Result<()> {
        conn.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
            params![key, value],
        )
        .context("set meta")?;
        Ok(())
    }

    fn schema_version(conn: &Connection) -> Result<i64> {
        let has_meta: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='meta'",
                [],
                |row| row.get(0),
            )
            .context("check meta table")?;
        if has_meta == 0 {
            return Ok(0);
        }
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM meta WHERE key='schema_version'",
                [],
                |row| row.get(0),
            )
            .optional()
            .context("read schema_version")?;
        Ok(value.and_then(|v| v.parse::<i64>().ok()).unwrap_or(0))
    }

    /// Store a chunked document. An earlier upload with the same owner,
    /// subject and filename is replaced. Returns how many were replaced.
    pub fn insert_document(
        &self,
        record: &DocumentRecord,
        chunks: &[(Chunk, Option<Vec<f32>>)],
    ) -> Result<usize> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("begin insert")?;
        let replaced = Self::clear_slot(
            &tx,
            &record.file_id,
            &record.user_id,
            record.subject_id.as_deref(),
            &record.filename,
        )?;
        tx.execute(
            "INSERT INTO document (file_id, user_id, subject_id, filename, hash, size, uploaded_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.file_id,
                record.user_id,
                record.subject_id,
                record.filename,
                record.hash,
                record.size,
                record.uploaded_at,
            ],
        )?;
        for (chunk, embedding) in chunks {
            tx.execute(
                "INSERT INTO chunk (file_id, chunk_index, text, start_pos, end_pos, length, embedding) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.file_id,
                    chunk.chunk_index as i64,
                    chunk.text,
                    chunk.start_pos as i64,
                    chunk.end_pos as i64,
                    chunk.length as i64,
                    embedding.as_deref().map(to_bytes),
                ],
            )?;
        }
        tx.commit().context("commit insert")?;
        Ok(replaced)
    }

    /// Remove whatever occupies a document's slot: the same file_id, or an
    /// earlier upload with the same owner, subject and filename. Chunks
    /// cascade. Returns how many same-name documents were removed.
    pub(crate) fn clear_slot(
        conn: &Connection,
        file_id: &str,
        user_id: &str,
        subject_id: Option<&str>,
        filename: &str,
    ) -> rusqlite::Result<usize> {
        let replaced = conn.execute(
            "DELETE FROM document WHERE user_id = ?1 AND subject_id IS ?2 AND filename = ?3",
            params![user_id, subject_id, filename],
        )?;
        conn.execute("DELETE FROM document WHERE file_id = ?1", params![file_id])?;
        Ok(replaced)
    }

    pub fn list_documents(&self, scope: &Scope) -> Result<Vec<DocumentRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT d.file_id, d.user_id, d.subject_id, d.filename, d.hash, d.size, d.uploaded_at,\n                (SELECT COUNT(*) FROM chunk c WHERE c.file_id = d.file_id)\n         FROM document d\n         WHERE d.user_id = ?1 AND (?2 IS NULL OR d.subject_id = ?2)\n         ORDER BY d.seq ASC",
        )?;
        let rows = stmt.query_map(params![scope.user_id, scope.subject_id], |row| {
            Ok(DocumentRecord {
                file_id: row.get(0)?,
                user_id: row.get(1)?,
                subject_id: row.get(2)?,
                filename: row.get(3)?,
                hash: row.get(4)?,
                size: row.get(5)?,
                uploaded_at: row.get(6)?,
                chunk_count: row.get(7)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Only the owner can delete a document; chunks cascade.
    pub fn delete_document(&self, user_id: &str, file_id: &str) -> Result<bool> {
        let deleted = self.conn.execute(
            "DELETE FROM document WHERE file_id = ?1 AND user_id = ?2",
            params![file_id, user_id],
        )?;
        Ok(deleted > 0)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let doc_count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM document", [], |row| row.get(0))
            .context("count documents")?;
        let chunk_count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM chunk", [], |row| row.get(0))
            .context("count chunks")?;
        let embedded_chunks: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM chunk WHERE embedding IS NOT NULL",
                [],
                |row| row.get(0),
            )
            .context("count embedded chunks")?;
        let db_size_bytes = std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        Ok(StoreStats {
            doc_count,
            chunk_count,
            embedded_chunks,
            db_size_bytes,
        })
    }

    fn load_candidates(&self, scope: &Scope) -> Result<Vec<Candidate>> {
        let mut stmt = self.conn.prepare(
            "SELECT d.file_id, d.user_id, d.subject_id, d.filename,\n                c.chunk_index, c.text, c.start_pos, c.end_pos, c.embedding\n         FROM chunk c\n         JOIN document d ON d.file_id = c.file_id\n         WHERE d.user_id = ?1 AND (?2 IS NULL OR d.subject_id = ?2)\n         ORDER BY d.seq ASC, c.chunk_index ASC",
        )?;
        let rows = stmt.query_map(params![scope.user_id, scope.subject_id], |row| {
            let document = DocumentRef {
                file_id: row.get(0)?,
                user_id: row.get(1)?,
                subject_id: row.get(2)?,
                filename: row.get(3)?,
            };
            let chunk_index: i64 = row.get(4)?;
            let text: String = row.get(5)?;
            let start_pos: i64 = row.get(6)?;
            let end_pos: i64 = row.get(7)?;
            let embedding: Option<Vec<u8>> = row.get(8)?;
            Ok((document, chunk_index, text, start_pos, end_pos, embedding))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (document, chunk_index, text, start_pos, end_pos, embedding) = row?;
            let chunk = Chunk::new(
                document.file_id.clone(),
                chunk_index as usize,
                text,
                start_pos as usize,
                end_pos as usize,
            )?;
            out.push(Candidate {
                document,
                chunk,
                embedding: embedding.map(|bytes| from_bytes(&bytes)),
            });
        }
        Ok(out)
    }
}

impl ChunkSource for Store {
    fn candidates(&self, scope: &Scope) -> crate::error::Result<Vec<Candidate>> {
        self.load_candidates(scope)
            .map_err(|err| RagError::unavailable(STORE_BACKEND, format!("{err:#}")))
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if let Some(lock) = self.lock.take() {
            let path = lock.path.clone();
            let mode = lock.mode;
            drop(lock);
            if matches!(mode, StoreMode::ReadWrite) {
                let _ = fs::remove_file(path);
            }
        }
    }
}
