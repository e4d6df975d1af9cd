//! SQLite chunk store backed by the `sqlite-vec` extension.
//!
//! Chunks live in a `chunks` table keyed by id with an indexed `policy_id`
//! column; vectors live in a `chunk_vectors` shadow table as `vec_f32`
//! blobs. Similarity queries run `vec_distance_cosine` with the policy and
//! kind filters in the `WHERE` clause, so isolation is enforced by the
//! database, not by post-filtering.
//!
//! sqlite-vec reports cosine *distance* (`1 - cos`); the store converts to
//! the engine's score space with `(2 - d) / 2`, which equals `(1 + cos)/2`.

use std::mem::transmute;
use std::os::raw::c_char;
use std::path::Path;
use std::sync::Once;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_rusqlite::{ffi, Connection, OptionalExtension};
use uuid::Uuid;

use cg_core::{Chunk, ChunkId, ChunkKind, NewChunk, ScoredChunk};

use super::{validate_batch, validate_query, ChunkStore};
use crate::error::StoreError;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS chunks (
    id           TEXT PRIMARY KEY,
    policy_id    TEXT NOT NULL,
    kind         TEXT NOT NULL,
    page_number  INTEGER NOT NULL,
    section_title TEXT,
    position     INTEGER NOT NULL,
    content      TEXT NOT NULL,
    created_at   TEXT NOT NULL,
    UNIQUE(policy_id, position)
);
CREATE INDEX IF NOT EXISTS idx_chunks_policy ON chunks(policy_id);
CREATE TABLE IF NOT EXISTS chunk_vectors (
    id        TEXT PRIMARY KEY,
    embedding BLOB NOT NULL
);
";

/// Plain row shape crossing the connection-thread boundary; typed errors
/// are attached outside the closure.
struct ChunkRow {
    id: String,
    policy_id: String,
    kind: String,
    page_number: i64,
    section_title: Option<String>,
    position: i64,
    content: String,
    created_at: String,
}

impl ChunkRow {
    fn read(row: &rusqlite::Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(ChunkRow {
            id: row.get(0)?,
            policy_id: row.get(1)?,
            kind: row.get(2)?,
            page_number: row.get(3)?,
            section_title: row.get(4)?,
            position: row.get(5)?,
            content: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    fn into_chunk(self) -> Result<Chunk, StoreError> {
        let kind = ChunkKind::parse(&self.kind).ok_or(StoreError::UnknownKind {
            value: self.kind,
        })?;
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|err| StoreError::Backend(format!("bad created_at: {err}")))?
            .with_timezone(&Utc);
        Ok(Chunk {
            id: ChunkId(self.id),
            policy_id: self.policy_id,
            text: self.content,
            kind,
            page_number: self.page_number as u32,
            section_title: self.section_title,
            position: self.position as u64,
            embedding: Vec::new(),
            created_at,
        })
    }
}

/// Chunk store persisted in a single SQLite database file.
#[derive(Clone)]
pub struct SqliteChunkStore {
    conn: Connection,
    dimension: usize,
}

impl SqliteChunkStore {
    /// Open (and migrate) the store at `path` with embedding dimension
    /// `dimension`.
    pub async fn open(path: impl AsRef<Path>, dimension: usize) -> Result<Self, StoreError> {
        Self::register_sqlite_vec()?;
        let conn = Connection::open(path)
            .await
            .map_err(|err| StoreError::Backend(err.to_string()))?;
        conn.call(|conn| {
            conn.query_row("select vec_version()", [], |row| row.get::<_, String>(0))
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
            conn.execute_batch(SCHEMA)
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
            Ok(())
        })
        .await
        .map_err(|err| StoreError::Backend(err.to_string()))?;
        Ok(Self { conn, dimension })
    }

    /// In-memory database, used by tests.
    pub async fn open_in_memory(dimension: usize) -> Result<Self, StoreError> {
        Self::register_sqlite_vec()?;
        let conn = Connection::open_in_memory()
            .await
            .map_err(|err| StoreError::Backend(err.to_string()))?;
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
            Ok(())
        })
        .await
        .map_err(|err| StoreError::Backend(err.to_string()))?;
        Ok(Self { conn, dimension })
    }

    fn register_sqlite_vec() -> Result<(), StoreError> {
        use std::sync::Mutex;

        static INIT: Once = Once::new();
        static INIT_RESULT: Mutex<Option<Result<(), String>>> = Mutex::new(None);

        INIT.call_once(|| {
            let result = unsafe {
                type SqliteExtensionInit = unsafe extern "C" fn(
                    *mut ffi::sqlite3,
                    *mut *mut c_char,
                    *const ffi::sqlite3_api_routines,
                ) -> i32;

                let init: unsafe extern "C" fn() = sqlite_vec::sqlite3_vec_init;
                let init_fn: SqliteExtensionInit =
                    transmute::<unsafe extern "C" fn(), SqliteExtensionInit>(init);
                let rc = ffi::sqlite3_auto_extension(Some(init_fn));
                if rc != 0 {
                    Err(format!("failed to register sqlite-vec extension (code {rc})"))
                } else {
                    Ok(())
                }
            };
            *INIT_RESULT.lock().expect("init result mutex poisoned") = Some(result);
        });

        INIT_RESULT
            .lock()
            .expect("init result mutex poisoned")
            .clone()
            .expect("init was called but result not set")
            .map_err(StoreError::Backend)
    }

    fn kind_predicate(kinds: Option<&[ChunkKind]>) -> String {
        match kinds {
            None => String::new(),
            Some(set) => {
                let list: Vec<String> = set.iter().map(|k| format!("'{}'", k.as_str())).collect();
                format!(" AND kind IN ({})", list.join(", "))
            }
        }
    }
}

#[async_trait]
impl ChunkStore for SqliteChunkStore {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn put_batch(
        &self,
        policy_id: &str,
        chunks: Vec<NewChunk>,
    ) -> Result<Vec<ChunkId>, StoreError> {
        validate_batch(self.dimension, &chunks)?;

        let policy_id = policy_id.to_string();
        let now = Utc::now().to_rfc3339();
        let ids: Vec<String> = chunks.iter().map(|_| Uuid::new_v4().to_string()).collect();
        let assigned: Vec<ChunkId> = ids.iter().map(|id| ChunkId(id.clone())).collect();

        self.conn
            .call(move |conn| {
                let tx = conn.transaction().map_err(tokio_rusqlite::Error::Rusqlite)?;
                for (id, chunk) in ids.iter().zip(&chunks) {
                    tx.execute(
                        "INSERT INTO chunks \
                         (id, policy_id, kind, page_number, section_title, position, content, created_at) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                        rusqlite::params![
                            id,
                            policy_id,
                            chunk.kind.as_str(),
                            chunk.page_number as i64,
                            chunk.section_title,
                            chunk.position as i64,
                            chunk.text,
                            now,
                        ],
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;

                    let vector_json = serde_json::to_string(&chunk.embedding)
                        .expect("f32 vector always serializes");
                    tx.execute(
                        "INSERT INTO chunk_vectors (id, embedding) VALUES (?1, vec_f32(?2))",
                        rusqlite::params![id, vector_json],
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                }
                tx.commit().map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(())
            })
            .await
            .map_err(|err| StoreError::Backend(err.to_string()))?;

        Ok(assigned)
    }

    async fn delete_policy(&self, policy_id: &str) -> Result<usize, StoreError> {
        let policy_id = policy_id.to_string();
        self.conn
            .call(move |conn| {
                let tx = conn.transaction().map_err(tokio_rusqlite::Error::Rusqlite)?;
                tx.execute(
                    "DELETE FROM chunk_vectors WHERE id IN \
                     (SELECT id FROM chunks WHERE policy_id = ?1)",
                    [&policy_id],
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let deleted = tx
                    .execute("DELETE FROM chunks WHERE policy_id = ?1", [&policy_id])
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                tx.commit().map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(deleted)
            })
            .await
            .map_err(|err| StoreError::Backend(err.to_string()))
    }

    async fn similar(
        &self,
        policy_id: &str,
        query: &[f32],
        k: usize,
        kinds: Option<&[ChunkKind]>,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        validate_query(self.dimension, query)?;

        let policy_id = policy_id.to_string();
        let query_json =
            serde_json::to_string(query).expect("f32 vector always serializes");
        let sql = format!(
            "SELECT c.id, c.policy_id, c.kind, c.page_number, c.section_title, c.position, \
                    c.content, c.created_at, \
                    vec_distance_cosine(v.embedding, vec_f32(?1)) AS distance \
             FROM chunks c JOIN chunk_vectors v ON v.id = c.id \
             WHERE c.policy_id = ?2{} \
             ORDER BY distance ASC, c.position ASC \
             LIMIT {}",
            Self::kind_predicate(kinds),
            k,
        );

        let rows: Vec<(ChunkRow, f32)> = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql).map_err(tokio_rusqlite::Error::Rusqlite)?;
                let mapped = stmt
                    .query_map(rusqlite::params![query_json, policy_id], |row| {
                        let chunk = ChunkRow::read(row)?;
                        let distance: f32 = row.get(8)?;
                        Ok((chunk, distance))
                    })
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let mut rows = Vec::new();
                for row in mapped {
                    rows.push(row.map_err(tokio_rusqlite::Error::Rusqlite)?);
                }
                Ok(rows)
            })
            .await
            .map_err(|err| StoreError::Backend(err.to_string()))?;

        rows.into_iter()
            .map(|(row, distance)| {
                Ok(ScoredChunk {
                    chunk: row.into_chunk()?,
                    score: ((2.0 - distance) / 2.0).clamp(0.0, 1.0),
                })
            })
            .collect()
    }

    async fn fetch(&self, id: &ChunkId) -> Result<Option<Chunk>, StoreError> {
        let id = id.0.clone();
        let row: Option<ChunkRow> = self
            .conn
            .call(move |conn| {
                let mut stmt = conn
                    .prepare(
                        "SELECT id, policy_id, kind, page_number, section_title, position, \
                                content, created_at \
                         FROM chunks WHERE id = ?1",
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                stmt.query_row([&id], |row| ChunkRow::read(row))
                    .optional()
                    .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await
            .map_err(|err| StoreError::Backend(err.to_string()))?;

        row.map(ChunkRow::into_chunk).transpose()
    }

    async fn count(
        &self,
        policy_id: &str,
        kinds: Option<&[ChunkKind]>,
    ) -> Result<usize, StoreError> {
        let policy_id = policy_id.to_string();
        let sql = format!(
            "SELECT COUNT(*) FROM chunks WHERE policy_id = ?1{}",
            Self::kind_predicate(kinds),
        );
        self.conn
            .call(move |conn| {
                let count: i64 = conn
                    .query_row(&sql, [&policy_id], |row| row.get(0))
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(count as usize)
            })
            .await
            .map_err(|err| StoreError::Backend(err.to_string()))
    }
}
